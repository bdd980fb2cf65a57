//! The CostGuard decision pipeline.
//!
//! One guard instance serves a whole host process: the runtime calls the
//! eight lifecycle hooks, the guard composes the policy store, budget
//! tracker, routing evaluator, and metrics emitter into a single
//! [`Decision`] per hook. Precedence within a decision, most restrictive
//! first: hard-limit block, per-run constraint, soft blocking action,
//! soft modifying action, log-only.
//!
//! Lifecycle: [`CostGuard::builder`] → hooks → [`CostGuard::shutdown`].
//! No process-wide state; drop the instance and everything goes with it.

use crate::config::{FailureMode, GuardConfig};
use costguard_policy::{PolicySource, PolicyStore};
use costguard_routing::{RouteSelection, RoutingSignals};
use costguard_tracker::{
    BudgetSnapshot, BudgetTracker, RunSnapshot, ThresholdCrossing, TrackerConfig,
};
use costguard_types::metrics::{attr, name, Attribute};
use costguard_types::{
    BudgetStore, Clock, ConfigError, Decision, DecisionAction, DecisionKind, MetricsEmitter,
    ModelDecision, ModelUsage, RunContext, RunId, RunStatus, Stage, SystemClock, ToolUsage,
};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// The cost-governance sidecar.
///
/// Thread-safe; share one instance behind an `Arc`. Every hook returns a
/// decision the runtime is required to honor — a rejected admission must
/// not start, a halted run must stop at the next opportunity. Hooks
/// never return errors: internal failures fold into decisions according
/// to the configured [`FailureMode`].
pub struct CostGuard {
    policies: Arc<PolicyStore>,
    tracker: Arc<BudgetTracker>,
    emitter: Arc<dyn MetricsEmitter>,
    config: GuardConfig,
    recovery: Mutex<Option<JoinHandle<()>>>,
}

impl CostGuard {
    /// Start building a guard over a policy source.
    pub fn builder(source: impl PolicySource + 'static) -> CostGuardBuilder {
        CostGuardBuilder {
            source: Arc::new(source),
            clock: Arc::new(SystemClock),
            store: None,
            emitter: Arc::new(costguard_otel::TracingEmitter::new()),
            config: GuardConfig::default(),
        }
    }

    /// Stop background work. Hooks remain callable but the store
    /// recovery task is gone; call this before dropping the guard in a
    /// long-lived process.
    pub fn shutdown(&self) {
        if let Some(handle) = self.recovery.lock().expect("recovery handle lock").take() {
            handle.abort();
        }
    }

    // --- Lifecycle hooks ---

    /// Hook 1: a run wants to start.
    ///
    /// Rejects on: a reached hard limit, a crossed soft threshold with
    /// `halt_new_runs`, an exhausted run count, or a full concurrency
    /// cap — on any applicable budget.
    pub async fn on_run_start(&self, ctx: &RunContext) -> Decision {
        let check = self.tracker.open_run(ctx).await;
        let attrs = self.base_attrs(ctx);

        if check.admitted {
            let mut run_attrs = attrs;
            run_attrs.push((attr::EVENT.to_string(), "start".to_string()));
            self.emit_u64(name::AGENT_RUNS, 1, &run_attrs);

            let mut decision =
                Decision::allow(DecisionKind::Admission).with_headroom(check.headroom);
            decision.warnings = check.warnings;
            decision
        } else {
            let reason = check
                .reason
                .unwrap_or_else(|| "admission rejected".to_string());
            let mut reject_attrs = attrs;
            reject_attrs.push((attr::REASON.to_string(), reason.clone()));
            self.emit_u64(name::REJECTION_EVENTS, 1, &reject_attrs);
            tracing::info!(run = %ctx.run_id, reason = %reason, "run rejected");

            let mut decision =
                Decision::reject(DecisionKind::Admission, reason).with_headroom(check.headroom);
            decision.warnings = check.warnings;
            decision
        }
    }

    /// Hook 2: a run ended. Releases concurrency slots; idempotent.
    pub async fn on_run_end(&self, run_id: &RunId, status: RunStatus) -> Decision {
        let ctx = self.tracker.run_context(run_id).await;
        let close = self.tracker.close_run(run_id, status).await;

        if !close.known {
            // Unknown context on a terminal hook is a warned no-op.
            tracing::warn!(run = %run_id, "on_run_end for unknown run");
            return Decision::allow(DecisionKind::Admission)
                .with_warning(format!("unknown run: {run_id}"));
        }
        if close.already_ended {
            return Decision::allow(DecisionKind::Admission);
        }

        if let Some(ctx) = ctx {
            let mut attrs = self.base_attrs(&ctx);
            attrs.push((attr::EVENT.to_string(), "end".to_string()));
            attrs.push((attr::STATUS.to_string(), close.status.as_str().to_string()));
            self.emit_u64(name::AGENT_RUNS, 1, &attrs);
        }

        let mut decision = Decision::allow(DecisionKind::Admission);
        decision.warnings = close.warnings;
        decision
    }

    /// Hook 3: an iteration wants to start. Halts on a reached hard
    /// limit with `halt_run` or the per-run iteration ceiling.
    pub async fn on_iteration_start(&self, run_id: &RunId, idx: u64) -> Decision {
        let check = self.tracker.check_iteration(run_id, idx).await;
        if !check.known {
            return self.unknown_run_decision(DecisionKind::Iteration, run_id);
        }

        let ctx = self.tracker.run_context(run_id).await;
        if check.allowed {
            if let Some(ctx) = &ctx {
                let mut attrs = self.base_attrs(ctx);
                attrs.push((attr::ITERATION_IDX.to_string(), idx.to_string()));
                self.emit_u64(name::AGENT_ITERATIONS, 1, &attrs);
            }
            let mut decision =
                Decision::allow(DecisionKind::Iteration).with_headroom(check.headroom);
            decision.warnings = check.warnings;
            decision
        } else {
            let reason = check
                .reason
                .unwrap_or_else(|| "iteration halted".to_string());
            self.emit_halt(ctx.as_ref(), &reason);
            Decision::halt(DecisionKind::Iteration, reason).with_headroom(check.headroom)
        }
    }

    /// Hook 4: an iteration finished. Accounting happens on the usage
    /// hooks; this acknowledges ordering and surfaces nothing new.
    pub async fn on_iteration_end(&self, run_id: &RunId, _idx: u64) -> Decision {
        if self.tracker.run_context(run_id).await.is_none() {
            tracing::warn!(run = %run_id, "on_iteration_end for unknown run");
            return Decision::allow(DecisionKind::Iteration)
                .with_warning(format!("unknown run: {run_id}"));
        }
        Decision::allow(DecisionKind::Iteration)
    }

    /// Hook 5: a model call is about to happen.
    ///
    /// Halts on the per-run token ceiling or a reached hard limit with
    /// `halt_run`; otherwise routes: the effective model is the stage
    /// default unless a downgrade trigger fires, and `limit_capabilities`
    /// caps tokens.
    pub async fn before_model_call(
        &self,
        run_id: &RunId,
        model: &str,
        stage: Stage,
        est_tokens: Option<u64>,
    ) -> ModelDecision {
        let check = self
            .tracker
            .check_model(run_id, model, Some(&stage), est_tokens)
            .await;
        if !check.known {
            return ModelDecision {
                decision: self.unknown_run_decision(DecisionKind::Model, run_id),
                effective_model: model.to_string(),
                max_tokens: None,
                was_downgraded: false,
            };
        }

        let ctx = self.tracker.run_context(run_id).await;
        if !check.allowed {
            let reason = check.reason.unwrap_or_else(|| "model call halted".to_string());
            self.emit_halt(ctx.as_ref(), &reason);
            return ModelDecision {
                decision: Decision::halt(DecisionKind::Model, reason)
                    .with_headroom(check.headroom),
                effective_model: model.to_string(),
                max_tokens: None,
                was_downgraded: false,
            };
        }

        let signals = RoutingSignals {
            soft_threshold_exceeded: check.soft_threshold_exceeded,
            remaining_budget: check.remaining_budget,
            iteration_count: check.iteration_count,
            avg_latency_ms: check.avg_latency_ms,
        };
        let selection: Option<RouteSelection> = match &ctx {
            Some(ctx) => self
                .policies
                .current()
                .await
                .routing_for(ctx)
                .map(|policy| costguard_routing::evaluate(&policy, &stage, &signals)),
            None => None,
        };

        let mut decision = Decision::allow(DecisionKind::Model).with_headroom(check.headroom);
        decision.warnings = check.warnings;

        let (effective_model, mut max_tokens, was_downgraded) = match &selection {
            Some(s) => (s.model.clone(), s.max_tokens, s.was_downgraded),
            None => (model.to_string(), None, false),
        };

        if was_downgraded {
            decision.action = DecisionAction::Downgrade;
            decision.reason = selection.as_ref().and_then(|s| s.reason.clone());
            if let Some(ctx) = &ctx {
                let mut attrs = self.base_attrs(ctx);
                attrs.push((attr::MODEL_ORIGINAL.to_string(), model.to_string()));
                attrs.push((attr::MODEL_FALLBACK.to_string(), effective_model.clone()));
                if let Some(reason) = &decision.reason {
                    attrs.push((attr::REASON.to_string(), reason.clone()));
                }
                self.emit_u64(name::DOWNGRADE_EVENTS, 1, &attrs);
            }
        }

        if check.limit_capabilities {
            match check.limit_tokens {
                Some(tokens) => {
                    if decision.action == DecisionAction::Allow {
                        decision.action = DecisionAction::Limit;
                    }
                    decision.overrides.max_tokens_remaining = Some(tokens);
                    let capped = u32::try_from(tokens).unwrap_or(u32::MAX);
                    max_tokens = Some(max_tokens.map_or(capped, |m| m.min(capped)));
                }
                None => {
                    decision.warnings.push(
                        "limit_capabilities active but no per-run token constraint is configured"
                            .to_string(),
                    );
                }
            }
        }

        ModelDecision {
            decision,
            effective_model,
            max_tokens,
            was_downgraded,
        }
    }

    /// Hook 6: a model call finished. Prices the usage, charges the run
    /// and every applicable budget, and reports threshold crossings as
    /// warnings.
    pub async fn after_model_call(&self, run_id: &RunId, usage: &ModelUsage) -> Decision {
        let record = self.tracker.record_model(run_id, usage).await;
        if !record.known {
            return Decision::allow(DecisionKind::Model)
                .with_warning(format!("unknown run: {run_id}"));
        }

        if let Some(ctx) = self.tracker.run_context(run_id).await {
            let base = self.base_attrs(&ctx);
            self.emit_cost(name::COST_TOTAL, record.cost, &base);

            let mut model_attrs = base.clone();
            model_attrs.push((attr::MODEL_NAME.to_string(), usage.model.clone()));
            self.emit_cost(name::COST_MODEL, record.cost, &model_attrs);
            self.emit_u64(name::TOKENS_INPUT, usage.prompt_tokens, &model_attrs);
            self.emit_u64(
                name::TOKENS_OUTPUT,
                usage.completion_tokens + usage.reasoning_tokens,
                &model_attrs,
            );
        }

        self.crossing_decision(DecisionKind::Model, record.warnings, &record.crossings)
    }

    /// Hook 7: a tool call is about to happen. Halts on the per-run
    /// tool-call ceiling or a reached hard limit with `halt_run`.
    pub async fn before_tool_call(&self, run_id: &RunId, tool: &str) -> Decision {
        let check = self.tracker.check_tool(run_id, tool).await;
        if !check.known {
            return self.unknown_run_decision(DecisionKind::Tool, run_id);
        }

        let ctx = self.tracker.run_context(run_id).await;
        if check.allowed {
            if let Some(ctx) = &ctx {
                let mut attrs = self.base_attrs(ctx);
                attrs.push((attr::TOOL_NAME.to_string(), tool.to_string()));
                self.emit_u64(name::AGENT_TOOL_CALLS, 1, &attrs);
            }
            let mut decision = Decision::allow(DecisionKind::Tool).with_headroom(check.headroom);
            decision.warnings = check.warnings;
            decision
        } else {
            let reason = check.reason.unwrap_or_else(|| "tool call halted".to_string());
            self.emit_halt(ctx.as_ref(), &reason);
            Decision::halt(DecisionKind::Tool, reason).with_headroom(check.headroom)
        }
    }

    /// Hook 8: a tool call finished. Prices the usage and charges the
    /// run and every applicable budget.
    pub async fn after_tool_call(&self, run_id: &RunId, usage: &ToolUsage) -> Decision {
        let record = self.tracker.record_tool(run_id, usage).await;
        if !record.known {
            return Decision::allow(DecisionKind::Tool)
                .with_warning(format!("unknown run: {run_id}"));
        }

        if let Some(ctx) = self.tracker.run_context(run_id).await {
            let base = self.base_attrs(&ctx);
            self.emit_cost(name::COST_TOTAL, record.cost, &base);

            let mut tool_attrs = base.clone();
            tool_attrs.push((attr::TOOL_NAME.to_string(), usage.tool.clone()));
            self.emit_cost(name::COST_TOOL, record.cost, &tool_attrs);
        }

        self.crossing_decision(DecisionKind::Tool, record.warnings, &record.crossings)
    }

    // --- Queries ---

    /// Accounting snapshot of one run.
    pub async fn run_snapshot(&self, run_id: &RunId) -> Option<RunSnapshot> {
        self.tracker.run_snapshot(run_id).await
    }

    /// Snapshot of every budget accumulator this process has touched.
    pub async fn budget_snapshots(&self) -> Vec<BudgetSnapshot> {
        self.tracker.budget_snapshots().await
    }

    // --- Internals ---

    fn unknown_run_decision(&self, kind: DecisionKind, run_id: &RunId) -> Decision {
        match self.config.failure_mode {
            FailureMode::FailOpen => {
                tracing::warn!(run = %run_id, "hook for unknown run, failing open");
                Decision::allow(kind).with_warning(format!("unknown run: {run_id}"))
            }
            FailureMode::FailClosed => {
                tracing::warn!(run = %run_id, "hook for unknown run, failing closed");
                Decision::reject(kind, format!("unknown run: {run_id}"))
            }
        }
    }

    fn crossing_decision(
        &self,
        kind: DecisionKind,
        warnings: Vec<String>,
        crossings: &[ThresholdCrossing],
    ) -> Decision {
        let mut decision = Decision::allow(kind);
        decision.warnings = warnings;
        for crossing in crossings {
            tracing::warn!(
                budget = %crossing.budget_id,
                threshold = %crossing.threshold,
                utilization = %crossing.utilization,
                action = ?crossing.action,
                "soft budget threshold crossed"
            );
            decision.warnings.push(format!(
                "budget '{}' crossed soft threshold {} at utilization {:.2} (action: {:?})",
                crossing.budget_id, crossing.threshold, crossing.utilization, crossing.action
            ));
        }
        decision
    }

    fn base_attrs(&self, ctx: &RunContext) -> Vec<Attribute> {
        let mut attrs = vec![
            (attr::TENANT_ID.to_string(), ctx.tenant_id.to_string()),
            (attr::STRAND_ID.to_string(), ctx.strand_id.to_string()),
            (attr::WORKFLOW_ID.to_string(), ctx.workflow_id.to_string()),
        ];
        for (key, value) in &ctx.metadata {
            attrs.push((format!("{}{key}", attr::METADATA_PREFIX), value.clone()));
        }
        if self.config.include_run_id {
            attrs.push((attr::RUN_ID.to_string(), ctx.run_id.to_string()));
        }
        attrs
    }

    fn emit_halt(&self, ctx: Option<&RunContext>, reason: &str) {
        if let Some(ctx) = ctx {
            let mut attrs = self.base_attrs(ctx);
            attrs.push((attr::REASON.to_string(), reason.to_string()));
            self.emit_u64(name::HALT_EVENTS, 1, &attrs);
        }
    }

    /// Metrics must never fail a hook: errors are logged and swallowed.
    fn emit_u64(&self, metric: &'static str, value: u64, attrs: &[Attribute]) {
        if let Err(e) = self.emitter.add_u64(metric, value, attrs) {
            tracing::warn!(metric, error = %e, "metric emission failed");
        }
    }

    fn emit_cost(&self, metric: &'static str, value: Decimal, attrs: &[Attribute]) {
        if let Err(e) = self.emitter.add_cost(metric, value, attrs) {
            tracing::warn!(metric, error = %e, "metric emission failed");
        }
    }
}

/// Builder for [`CostGuard`]. Only the policy source is required.
pub struct CostGuardBuilder {
    source: Arc<dyn PolicySource>,
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn BudgetStore>>,
    emitter: Arc<dyn MetricsEmitter>,
    config: GuardConfig,
}

impl CostGuardBuilder {
    /// Inject a clock. Tests use `ManualClock`.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share budget state across a fleet through this store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn BudgetStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the metrics emitter. Defaults to the tracing-based
    /// emitter; tests substitute a recording fake.
    #[must_use]
    pub fn emitter(mut self, emitter: Arc<dyn MetricsEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    /// Set the full configuration.
    #[must_use]
    pub fn config(mut self, config: GuardConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the failure mode (convenience for `config.failure_mode`).
    #[must_use]
    pub fn failure_mode(mut self, mode: FailureMode) -> Self {
        self.config.failure_mode = mode;
        self
    }

    /// Load policies and assemble the guard.
    ///
    /// The initial policy load must succeed. When a store is configured,
    /// a background task probes it for recovery while it is unavailable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the policy source cannot produce a
    /// valid initial snapshot.
    pub async fn build(self) -> Result<CostGuard, ConfigError> {
        let policies = Arc::new(
            PolicyStore::load(
                Arc::clone(&self.source),
                self.config.refresh_interval,
                Arc::clone(&self.clock),
            )
            .await?,
        );

        let mut tracker_config = TrackerConfig::default();
        tracker_config.cas_max_attempts = self.config.cas_max_attempts;
        tracker_config.ended_retention = self.config.ended_retention;
        let tracker = Arc::new(BudgetTracker::new(
            Arc::clone(&policies),
            Arc::clone(&self.clock),
            self.store.clone(),
            tracker_config,
        ));

        let recovery = self.store.is_some().then(|| {
            let tracker = Arc::clone(&tracker);
            let interval = self.config.store_probe_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    if !tracker.store_healthy() {
                        tracker.probe_store().await;
                    }
                }
            })
        });

        Ok(CostGuard {
            policies,
            tracker,
            emitter: self.emitter,
            config: self.config,
            recovery: Mutex::new(recovery),
        })
    }
}
