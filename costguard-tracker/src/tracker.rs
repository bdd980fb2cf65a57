//! The budget tracker — period-windowed accounting with admission and
//! constraint checks.
//!
//! One tracker owns all run and budget state for a process. Budgets are
//! resolved through the policy store at admission and pinned to the run;
//! every accounting event flows into each pinned accumulator. When a
//! persistent store is configured, deltas are written back through an
//! optimistic CAS loop and the local accumulators track fleet-wide
//! totals.
//!
//! Locking: the runs map and budget map are `RwLock`-protected indexes
//! of `Arc<Mutex<_>>` entries. A run's mutex is taken before any budget
//! mutex, and budget mutexes are always taken in ascending
//! `(budget_id, scope_key)` order, so multi-budget updates cannot
//! deadlock.

use crate::period::PeriodWindow;
use crate::persist::{self, SyncResult};
use crate::state::{BudgetState, RunState, ThresholdCrossing, UsageDelta};
use chrono::{DateTime, Utc};
use costguard_policy::{BudgetSpec, HardLimitAction, PolicyStore, ThresholdAction};
use costguard_types::{
    BudgetId, BudgetStore, Clock, Headroom, ModelUsage, RunContext, RunId, RunStatus, ScopeKey,
    Stage, ToolUsage, TrackerError,
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Tuning knobs for the tracker.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// CAS attempts before an update degrades to in-memory accounting.
    pub cas_max_attempts: u32,
    /// Ended runs retained for late usage reports before eviction.
    pub ended_retention: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            cas_max_attempts: 8,
            ended_retention: 256,
        }
    }
}

/// Result of an admission attempt.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct AdmissionCheck {
    /// Whether the run was admitted.
    pub admitted: bool,
    /// Why not, when rejected.
    pub reason: Option<String>,
    /// Non-blocking diagnostics.
    pub warnings: Vec<String>,
    /// Tightest headroom across applicable budgets.
    pub headroom: Headroom,
}

/// Result of an iteration or tool gate check.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct GateCheck {
    /// Whether the tracker knows this run.
    pub known: bool,
    /// Whether the operation may proceed.
    pub allowed: bool,
    /// Why not, when blocked.
    pub reason: Option<String>,
    /// Non-blocking diagnostics.
    pub warnings: Vec<String>,
    /// Tightest headroom.
    pub headroom: Headroom,
}

impl GateCheck {
    fn unknown(run_id: &RunId) -> Self {
        Self {
            known: false,
            allowed: true,
            reason: None,
            warnings: vec![format!("unknown run: {run_id}")],
            headroom: Headroom::default(),
        }
    }
}

/// Result of a model gate check, carrying the routing signal bundle.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ModelCheck {
    /// Whether the tracker knows this run.
    pub known: bool,
    /// Whether the call may proceed.
    pub allowed: bool,
    /// Why not, when blocked.
    pub reason: Option<String>,
    /// Non-blocking diagnostics.
    pub warnings: Vec<String>,
    /// Tightest headroom.
    pub headroom: Headroom,
    /// A budget with a `downgrade_model` soft action stands crossed.
    pub soft_threshold_exceeded: bool,
    /// A budget with a `limit_capabilities` soft action stands crossed.
    pub limit_capabilities: bool,
    /// Tokens left under the tightest per-run token constraint, when one
    /// is configured.
    pub limit_tokens: Option<u64>,
    /// Tightest remaining budget across cost-capped budgets.
    pub remaining_budget: Option<Decimal>,
    /// Iterations this run has started.
    pub iteration_count: u64,
    /// Average reported model latency for this run.
    pub avg_latency_ms: Option<f64>,
}

impl ModelCheck {
    fn unknown(run_id: &RunId) -> Self {
        Self {
            known: false,
            allowed: true,
            reason: None,
            warnings: vec![format!("unknown run: {run_id}")],
            headroom: Headroom::default(),
            soft_threshold_exceeded: false,
            limit_capabilities: false,
            limit_tokens: None,
            remaining_budget: None,
            iteration_count: 0,
            avg_latency_ms: None,
        }
    }
}

/// Result of recording model or tool usage.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    /// Whether the tracker knows this run.
    pub known: bool,
    /// Cost computed for this usage.
    pub cost: Decimal,
    /// Soft thresholds newly crossed by this update, ascending per budget.
    pub crossings: Vec<ThresholdCrossing>,
    /// Non-blocking diagnostics.
    pub warnings: Vec<String>,
}

impl RecordOutcome {
    fn unknown(run_id: &RunId) -> Self {
        Self {
            known: false,
            cost: Decimal::ZERO,
            crossings: Vec::new(),
            warnings: vec![format!("unknown run: {run_id}")],
        }
    }
}

/// Result of closing a run.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct CloseOutcome {
    /// Whether the tracker knows this run.
    pub known: bool,
    /// Whether the run had already ended (second close is a no-op).
    pub already_ended: bool,
    /// The status the run ended with.
    pub status: RunStatus,
    /// Non-blocking diagnostics.
    pub warnings: Vec<String>,
}

/// Read-only view of one run's accounting, for host dashboards.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    /// The run's identity.
    pub ctx: RunContext,
    /// Current status.
    pub status: RunStatus,
    /// Iterations started.
    pub iterations: u64,
    /// Cost accumulated.
    pub total_cost: Decimal,
    /// Input tokens.
    pub input_tokens: u64,
    /// Output tokens.
    pub output_tokens: u64,
    /// Tool calls.
    pub tool_calls: u64,
    /// Cost by model.
    pub model_costs: BTreeMap<String, Decimal>,
    /// Cost by tool.
    pub tool_costs: BTreeMap<String, Decimal>,
    /// When the run ended, if it has.
    pub ended_at: Option<DateTime<Utc>>,
}

/// Read-only view of one budget accumulator.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct BudgetSnapshot {
    /// The budget.
    pub budget_id: BudgetId,
    /// The accumulator's scope slice.
    pub scope_key: ScopeKey,
    /// Window start.
    pub period_start: DateTime<Utc>,
    /// Window end.
    pub period_end: DateTime<Utc>,
    /// Configured cost ceiling (zero when uncapped).
    pub max_cost: Decimal,
    /// Cost this period.
    pub total_cost: Decimal,
    /// `total_cost / max_cost`, when capped.
    pub utilization: Option<Decimal>,
    /// Runs this period.
    pub total_runs: u64,
    /// Runs currently holding a concurrency slot.
    pub concurrent_runs: usize,
    /// Thresholds already signaled this period, ascending.
    pub thresholds_crossed: Vec<Decimal>,
}

type BudgetEntry = Arc<Mutex<BudgetState>>;
type RunEntry = Arc<Mutex<RunState>>;

/// Period-windowed budget accounting engine.
pub struct BudgetTracker {
    policies: Arc<PolicyStore>,
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn BudgetStore>>,
    config: TrackerConfig,
    runs: RwLock<HashMap<RunId, RunEntry>>,
    ended: Mutex<VecDeque<RunId>>,
    budgets: RwLock<HashMap<ScopeKey, BudgetEntry>>,
    store_healthy: AtomicBool,
}

impl BudgetTracker {
    /// Create a tracker over the given policy store, clock, and optional
    /// persistent store.
    pub fn new(
        policies: Arc<PolicyStore>,
        clock: Arc<dyn Clock>,
        store: Option<Arc<dyn BudgetStore>>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            policies,
            clock,
            store,
            config,
            runs: RwLock::new(HashMap::new()),
            ended: Mutex::new(VecDeque::new()),
            budgets: RwLock::new(HashMap::new()),
            store_healthy: AtomicBool::new(true),
        }
    }

    /// Whether the persistent store (if configured) is currently usable.
    pub fn store_healthy(&self) -> bool {
        self.store_healthy.load(Ordering::Relaxed)
    }

    /// Probe an unhealthy store; flips it back to healthy on success.
    /// Returns the post-probe health.
    pub async fn probe_store(&self) -> bool {
        let Some(store) = &self.store else {
            return true;
        };
        match store.list_keys("").await {
            Ok(_) => {
                if !self.store_healthy.swap(true, Ordering::Relaxed) {
                    tracing::info!("persistent budget store recovered");
                }
                true
            }
            Err(e) => {
                tracing::debug!(error = %e, "persistent budget store still unavailable");
                self.store_healthy.store(false, Ordering::Relaxed);
                false
            }
        }
    }

    fn active_store(&self) -> Option<&Arc<dyn BudgetStore>> {
        self.store
            .as_ref()
            .filter(|_| self.store_healthy.load(Ordering::Relaxed))
    }

    /// Apply a delta to one locked accumulator, through the store when
    /// one is configured and healthy, locally otherwise.
    async fn commit_delta(&self, state: &mut BudgetState, delta: &UsageDelta) {
        if let Some(store) = self.active_store() {
            match persist::sync_delta(store.as_ref(), state, delta, self.config.cas_max_attempts)
                .await
            {
                SyncResult::Synced => return,
                SyncResult::Contended => {
                    tracing::warn!(
                        scope_key = %state.data.scope_key,
                        attempts = self.config.cas_max_attempts,
                        "budget CAS contention exhausted, accounting in memory only"
                    );
                }
                SyncResult::Failed(e) => {
                    tracing::warn!(
                        scope_key = %state.data.scope_key,
                        error = %e,
                        "budget store write failed, accounting in memory only"
                    );
                    if e.is_retryable() {
                        self.store_healthy.store(false, Ordering::Relaxed);
                    }
                }
            }
        }
        delta.apply(&mut state.data);
    }

    /// The accumulator entry for a budget at a scope slice, created on
    /// first touch.
    async fn budget_entry(&self, spec: &Arc<BudgetSpec>, scope_key: &ScopeKey) -> BudgetEntry {
        if let Some(entry) = self.budgets.read().await.get(scope_key) {
            return Arc::clone(entry);
        }
        let mut map = self.budgets.write().await;
        Arc::clone(map.entry(scope_key.clone()).or_insert_with(|| {
            Arc::new(Mutex::new(BudgetState::new(
                Arc::clone(spec),
                scope_key.clone(),
                self.clock.now(),
            )))
        }))
    }

    async fn run_entry(&self, run_id: &RunId) -> Option<RunEntry> {
        self.runs.read().await.get(run_id).map(Arc::clone)
    }

    /// Lock a run's pinned budgets in ascending `(budget_id, scope_key)`
    /// order. The pinned list is sorted at admission.
    async fn lock_budgets(
        &self,
        pinned: &[(Arc<BudgetSpec>, ScopeKey)],
    ) -> Vec<OwnedMutexGuard<BudgetState>> {
        let now = self.clock.now();
        let mut guards = Vec::with_capacity(pinned.len());
        for (spec, key) in pinned {
            let entry = self.budget_entry(spec, key).await;
            let mut guard = entry.lock_owned().await;
            guard.spec = Arc::clone(spec);
            guard.roll_window(now);
            guards.push(guard);
        }
        guards
    }

    // --- Admission ---

    /// Admit or reject a new run.
    ///
    /// Locates every applicable budget, rolls windows, refreshes from the
    /// persistent store, and rejects when any budget shows: a reached
    /// hard limit, a crossed soft threshold with `halt_new_runs`, an
    /// exhausted `max_runs_per_period`, or a full `max_concurrent_runs`.
    /// On admission the run is registered and every budget's run counter
    /// and concurrency set are updated.
    pub async fn open_run(&self, ctx: &RunContext) -> AdmissionCheck {
        let mut warnings = Vec::new();

        if self.runs.read().await.contains_key(&ctx.run_id) {
            return AdmissionCheck {
                admitted: false,
                reason: Some(format!("run {} is already admitted", ctx.run_id)),
                warnings,
                headroom: Headroom::default(),
            };
        }

        let snapshot = self.policies.current().await;
        let mut pinned: Vec<(Arc<BudgetSpec>, ScopeKey)> = snapshot
            .budgets_for(ctx)
            .into_iter()
            .map(|spec| {
                let key = ScopeKey::for_context(spec.scope, ctx, &spec.id);
                (spec, key)
            })
            .collect();
        pinned.sort_by(|a, b| a.0.id.cmp(&b.0.id).then_with(|| a.1.cmp(&b.1)));

        // Hold every budget lock for the whole check-and-commit, so two
        // concurrent admissions cannot both squeeze past a concurrency
        // cap. Acquisition order is the sorted pin order.
        let mut guards = self.lock_budgets(&pinned).await;
        if let Some(store) = self.active_store() {
            for guard in guards.iter_mut() {
                if let Err(e) = persist::refresh_state(store.as_ref(), guard).await {
                    tracing::warn!(
                        scope_key = %guard.data.scope_key,
                        error = %e,
                        "budget store read failed at admission, using local state"
                    );
                    if e.is_retryable() {
                        self.store_healthy.store(false, Ordering::Relaxed);
                    }
                    break;
                }
            }
        }

        if let Some(reason) = admission_block_reason(&guards) {
            return AdmissionCheck {
                admitted: false,
                reason: Some(reason),
                warnings,
                headroom: headroom_of(&guards, None),
            };
        }

        for guard in &guards {
            if guard.soft_threshold_standing() {
                warnings.push(format!(
                    "budget '{}' has a soft threshold crossed (action: {:?})",
                    guard.spec.id, guard.spec.on_soft_threshold_exceeded
                ));
            }
        }

        let delta = UsageDelta {
            runs: 1,
            add_run: Some(ctx.run_id.clone()),
            ..Default::default()
        };
        for guard in guards.iter_mut() {
            if let Some(max) = guard.spec.max_concurrent_runs {
                let bound = (max as usize).saturating_mul(2);
                while bound > 0 && guard.data.concurrent_run_ids.len() >= bound {
                    let evicted = guard.data.concurrent_run_ids.remove(0);
                    tracing::warn!(
                        budget = %guard.spec.id,
                        run = %evicted,
                        "evicting stale run from concurrency set"
                    );
                    warnings.push(format!(
                        "evicted stale run {evicted} from budget '{}' concurrency set",
                        guard.spec.id
                    ));
                }
            }
            self.commit_delta(guard, &delta).await;
        }
        let headroom = headroom_of(&guards, None);
        drop(guards);

        let run = RunState::new(ctx.clone(), pinned);
        let mut runs = self.runs.write().await;
        if runs.contains_key(&ctx.run_id) {
            // Two admissions raced past the early duplicate check. Both
            // deltas are committed (at-least-once accounting); keep the
            // first registration.
            let err = TrackerError::InternalInvariant(format!(
                "run {} admitted concurrently",
                ctx.run_id
            ));
            tracing::warn!(error = %err, "duplicate admission race");
            warnings.push(err.to_string());
        } else {
            runs.insert(ctx.run_id.clone(), Arc::new(Mutex::new(run)));
        }
        drop(runs);

        AdmissionCheck {
            admitted: true,
            reason: None,
            warnings,
            headroom,
        }
    }

    // --- Gate checks ---

    /// Gate the start of an iteration. Halts on a reached hard limit
    /// with `halt_run`, or on the per-run iteration ceiling. On allow,
    /// the iteration is counted.
    pub async fn check_iteration(&self, run_id: &RunId, _idx: u64) -> GateCheck {
        let Some(entry) = self.run_entry(run_id).await else {
            return GateCheck::unknown(run_id);
        };
        let mut run = entry.lock().await;
        if let Some(reason) = not_running_reason(&run) {
            return GateCheck {
                known: true,
                allowed: false,
                reason: Some(reason),
                warnings: Vec::new(),
                headroom: Headroom::default(),
            };
        }

        let guards = self.lock_budgets(&run.budgets).await;
        let mut reason = halt_reason(&guards);

        if reason.is_none() {
            if let Some(max) = tightest(&run.budgets, |c| c.max_iterations) {
                if run.iterations >= max {
                    reason = Some(format!("per-run iteration limit reached ({max})"));
                }
            }
        }

        if let Some(reason) = reason {
            return GateCheck {
                known: true,
                allowed: false,
                reason: Some(reason),
                warnings: Vec::new(),
                headroom: headroom_of(&guards, Some(&run)),
            };
        }
        drop(guards);

        run.iterations += 1;
        let delta = UsageDelta {
            iterations: 1,
            ..Default::default()
        };
        let mut guards = self.lock_budgets(&run.budgets).await;
        for guard in guards.iter_mut() {
            self.commit_delta(guard, &delta).await;
        }

        GateCheck {
            known: true,
            allowed: true,
            reason: None,
            warnings: Vec::new(),
            headroom: headroom_of(&guards, Some(&run)),
        }
    }

    /// Gate a model call. Halts on a reached hard limit with `halt_run`
    /// or on the per-run token ceiling; otherwise reports the signal
    /// bundle routing needs.
    pub async fn check_model(
        &self,
        run_id: &RunId,
        _model: &str,
        _stage: Option<&Stage>,
        est_tokens: Option<u64>,
    ) -> ModelCheck {
        let Some(entry) = self.run_entry(run_id).await else {
            return ModelCheck::unknown(run_id);
        };
        let run = entry.lock().await;
        if let Some(reason) = not_running_reason(&run) {
            let mut check = ModelCheck::unknown(run_id);
            check.known = true;
            check.allowed = false;
            check.reason = Some(reason);
            check.warnings.clear();
            return check;
        }

        let guards = self.lock_budgets(&run.budgets).await;
        let mut reason = halt_reason(&guards);

        let token_ceiling = tightest(&run.budgets, |c| c.max_tokens);
        if reason.is_none() {
            if let Some(max) = token_ceiling {
                let projected = run.tokens_used() + est_tokens.unwrap_or(0);
                if projected > max || run.tokens_used() >= max {
                    reason = Some(format!(
                        "per-run token limit reached ({} of {max})",
                        run.tokens_used()
                    ));
                }
            }
        }

        let soft_threshold_exceeded = guards.iter().any(|g| {
            g.spec.on_soft_threshold_exceeded == ThresholdAction::DowngradeModel
                && g.soft_threshold_standing()
        });
        let limit_capabilities = guards.iter().any(|g| {
            g.spec.on_soft_threshold_exceeded == ThresholdAction::LimitCapabilities
                && g.soft_threshold_standing()
        });
        let remaining_budget = guards.iter().filter_map(|g| g.remaining_cost()).min();
        let limit_tokens = limit_capabilities
            .then(|| token_ceiling.map(|max| max.saturating_sub(run.tokens_used())))
            .flatten();

        let allowed = reason.is_none();
        ModelCheck {
            known: true,
            allowed,
            reason,
            warnings: Vec::new(),
            headroom: headroom_of(&guards, Some(&run)),
            soft_threshold_exceeded,
            limit_capabilities,
            limit_tokens,
            remaining_budget,
            iteration_count: run.iterations,
            avg_latency_ms: run.avg_latency_ms(),
        }
    }

    /// Gate a tool call. Halts on a reached hard limit with `halt_run`
    /// or on the per-run tool-call ceiling.
    pub async fn check_tool(&self, run_id: &RunId, _tool: &str) -> GateCheck {
        let Some(entry) = self.run_entry(run_id).await else {
            return GateCheck::unknown(run_id);
        };
        let run = entry.lock().await;
        if let Some(reason) = not_running_reason(&run) {
            return GateCheck {
                known: true,
                allowed: false,
                reason: Some(reason),
                warnings: Vec::new(),
                headroom: Headroom::default(),
            };
        }

        let guards = self.lock_budgets(&run.budgets).await;
        let mut reason = halt_reason(&guards);

        if reason.is_none() {
            if let Some(max) = tightest(&run.budgets, |c| c.max_tool_calls) {
                if run.tool_calls >= max {
                    reason = Some(format!("per-run tool call limit reached ({max})"));
                }
            }
        }

        let allowed = reason.is_none();
        GateCheck {
            known: true,
            allowed,
            reason,
            warnings: Vec::new(),
            headroom: headroom_of(&guards, Some(&run)),
        }
    }

    // --- Recording ---

    /// Record a completed model call: price it, charge the run, charge
    /// every pinned budget, detect threshold crossings.
    pub async fn record_model(&self, run_id: &RunId, usage: &ModelUsage) -> RecordOutcome {
        let Some(entry) = self.run_entry(run_id).await else {
            let err = TrackerError::ContextUnknown(run_id.clone());
            tracing::warn!(error = %err, "model usage reported for unknown run, dropping");
            return RecordOutcome::unknown(run_id);
        };
        let mut run = entry.lock().await;
        let mut warnings = Vec::new();
        if run.status != RunStatus::Running {
            let msg = format!(
                "late model usage for run {run_id} ({})",
                run.status.as_str()
            );
            tracing::warn!(run = %run_id, status = run.status.as_str(), "late model usage report");
            warnings.push(msg);
        }

        let pricing = Arc::clone(&self.policies.snapshot().pricing);
        let cost = pricing.model_cost(usage);
        let output_tokens = usage.completion_tokens + usage.reasoning_tokens;

        run.total_cost += cost;
        run.input_tokens += usage.prompt_tokens;
        run.output_tokens += output_tokens;
        *run.model_costs.entry(usage.model.clone()).or_default() += cost;
        if let Some(latency) = usage.latency_ms {
            run.latency_sum_ms += latency;
            run.latency_count += 1;
        }

        let delta = UsageDelta {
            cost,
            input_tokens: usage.prompt_tokens,
            output_tokens,
            model: Some(usage.model.clone()),
            ..Default::default()
        };
        let mut crossings = Vec::new();
        let mut guards = self.lock_budgets(&run.budgets).await;
        for guard in guards.iter_mut() {
            self.commit_delta(guard, &delta).await;
            crossings.extend(guard.detect_crossings());
        }

        RecordOutcome {
            known: true,
            cost,
            crossings,
            warnings,
        }
    }

    /// Record a completed tool call: price it, charge the run, charge
    /// every pinned budget, detect threshold crossings.
    pub async fn record_tool(&self, run_id: &RunId, usage: &ToolUsage) -> RecordOutcome {
        let Some(entry) = self.run_entry(run_id).await else {
            let err = TrackerError::ContextUnknown(run_id.clone());
            tracing::warn!(error = %err, "tool usage reported for unknown run, dropping");
            return RecordOutcome::unknown(run_id);
        };
        let mut run = entry.lock().await;
        let mut warnings = Vec::new();
        if run.status != RunStatus::Running {
            let msg = format!("late tool usage for run {run_id} ({})", run.status.as_str());
            tracing::warn!(run = %run_id, status = run.status.as_str(), "late tool usage report");
            warnings.push(msg);
        }

        let pricing = Arc::clone(&self.policies.snapshot().pricing);
        let cost = pricing.tool_cost(usage);

        run.total_cost += cost;
        run.tool_calls += 1;
        *run.tool_costs.entry(usage.tool.clone()).or_default() += cost;

        let delta = UsageDelta {
            cost,
            tool_calls: 1,
            tool: Some(usage.tool.clone()),
            ..Default::default()
        };
        let mut crossings = Vec::new();
        let mut guards = self.lock_budgets(&run.budgets).await;
        for guard in guards.iter_mut() {
            self.commit_delta(guard, &delta).await;
            crossings.extend(guard.detect_crossings());
        }

        RecordOutcome {
            known: true,
            cost,
            crossings,
            warnings,
        }
    }

    // --- Closing ---

    /// Close a run: release its concurrency slots and mark it ended.
    /// Idempotent — a second close is a no-op. The state is retained for
    /// late usage reports until evicted by the retention bound.
    pub async fn close_run(&self, run_id: &RunId, status: RunStatus) -> CloseOutcome {
        let Some(entry) = self.run_entry(run_id).await else {
            return CloseOutcome {
                known: false,
                already_ended: false,
                status,
                warnings: vec![format!("unknown run: {run_id}")],
            };
        };
        let mut run = entry.lock().await;
        if run.ended_at.is_some() {
            return CloseOutcome {
                known: true,
                already_ended: true,
                status: run.status,
                warnings: Vec::new(),
            };
        }

        run.status = status;
        run.ended_at = Some(self.clock.now());

        let delta = UsageDelta {
            remove_run: Some(run_id.clone()),
            ..Default::default()
        };
        let mut guards = self.lock_budgets(&run.budgets).await;
        for guard in guards.iter_mut() {
            self.commit_delta(guard, &delta).await;
        }
        drop(guards);
        drop(run);

        // Retention: ended runs linger for late usage reports, oldest out.
        let mut ended = self.ended.lock().await;
        ended.push_back(run_id.clone());
        while ended.len() > self.config.ended_retention {
            if let Some(evicted) = ended.pop_front() {
                self.runs.write().await.remove(&evicted);
            }
        }

        CloseOutcome {
            known: true,
            already_ended: false,
            status,
            warnings: Vec::new(),
        }
    }

    // --- Queries ---

    /// The identity of a run the tracker knows.
    pub async fn run_context(&self, run_id: &RunId) -> Option<RunContext> {
        let entry = self.run_entry(run_id).await?;
        let run = entry.lock().await;
        Some(run.ctx.clone())
    }

    /// Accounting snapshot of one run, if the tracker still knows it.
    pub async fn run_snapshot(&self, run_id: &RunId) -> Option<RunSnapshot> {
        let entry = self.run_entry(run_id).await?;
        let run = entry.lock().await;
        Some(RunSnapshot {
            ctx: run.ctx.clone(),
            status: run.status,
            iterations: run.iterations,
            total_cost: run.total_cost,
            input_tokens: run.input_tokens,
            output_tokens: run.output_tokens,
            tool_calls: run.tool_calls,
            model_costs: run.model_costs.clone(),
            tool_costs: run.tool_costs.clone(),
            ended_at: run.ended_at,
        })
    }

    /// Snapshot of every budget accumulator this process has touched,
    /// windows rolled to the current instant first.
    pub async fn budget_snapshots(&self) -> Vec<BudgetSnapshot> {
        let now = self.clock.now();
        let entries: Vec<BudgetEntry> = self.budgets.read().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(entries.len());
        for entry in entries {
            let mut state = entry.lock().await;
            state.roll_window(now);
            snapshots.push(BudgetSnapshot {
                budget_id: state.spec.id.clone(),
                scope_key: state.data.scope_key.clone(),
                period_start: state.data.period_start,
                period_end: state.data.period_end,
                max_cost: state.spec.max_cost,
                total_cost: state.data.total_cost,
                utilization: state.utilization(),
                total_runs: state.data.total_runs,
                concurrent_runs: state.data.concurrent_run_ids.len(),
                thresholds_crossed: state.thresholds_crossed.iter().copied().collect(),
            });
        }
        snapshots.sort_by(|a, b| a.scope_key.cmp(&b.scope_key));
        snapshots
    }

    /// The window a budget period currently occupies, per this tracker's
    /// clock.
    pub fn current_window(&self, period: costguard_types::BudgetPeriod) -> PeriodWindow {
        PeriodWindow::containing(period, self.clock.now())
    }
}

// --- Shared check helpers ---

/// Why a run in a non-running state can't proceed.
fn not_running_reason(run: &RunState) -> Option<String> {
    (run.status != RunStatus::Running).then(|| {
        format!(
            "run {} is not running (status: {})",
            run.ctx.run_id,
            run.status.as_str()
        )
    })
}

/// First blocking condition for a new admission, in precedence order:
/// hard limits over every budget, then soft halt_new_runs, then run
/// count, then concurrency.
fn admission_block_reason(guards: &[OwnedMutexGuard<BudgetState>]) -> Option<String> {
    for g in guards {
        if g.hard_limit_exceeded() {
            return Some(format!(
                "budget '{}' hard limit reached: cost {} of {}",
                g.spec.id, g.data.total_cost, g.spec.max_cost
            ));
        }
    }
    for g in guards {
        if g.spec.on_soft_threshold_exceeded == ThresholdAction::HaltNewRuns
            && g.soft_threshold_standing()
        {
            return Some(format!(
                "budget '{}' soft threshold crossed, new runs are halted",
                g.spec.id
            ));
        }
    }
    for g in guards {
        if let Some(max) = g.spec.max_runs_per_period {
            if g.data.total_runs >= max {
                return Some(format!(
                    "budget '{}' max runs per period reached ({} of {max})",
                    g.spec.id, g.data.total_runs
                ));
            }
        }
    }
    for g in guards {
        if let Some(max) = g.spec.max_concurrent_runs {
            if g.data.concurrent_run_ids.len() as u64 >= max {
                return Some(format!(
                    "budget '{}' concurrent run limit reached ({} of {max})",
                    g.spec.id,
                    g.data.concurrent_run_ids.len()
                ));
            }
        }
    }
    None
}

/// A reached hard limit whose action stops in-flight runs.
fn halt_reason(guards: &[OwnedMutexGuard<BudgetState>]) -> Option<String> {
    guards
        .iter()
        .find(|g| {
            g.hard_limit_exceeded() && g.spec.on_hard_limit_exceeded == HardLimitAction::HaltRun
        })
        .map(|g| {
            format!(
                "budget '{}' hard limit reached: cost {} of {}",
                g.spec.id, g.data.total_cost, g.spec.max_cost
            )
        })
}

/// Tightest value of one per-run constraint across pinned budgets.
fn tightest<F>(pinned: &[(Arc<BudgetSpec>, ScopeKey)], pick: F) -> Option<u64>
where
    F: Fn(&costguard_policy::BudgetConstraints) -> Option<u64>,
{
    pinned.iter().filter_map(|(spec, _)| pick(&spec.constraints)).min()
}

/// Tightest headroom across locked budgets, minus what the run already
/// consumed when run state is available.
fn headroom_of(guards: &[OwnedMutexGuard<BudgetState>], run: Option<&RunState>) -> Headroom {
    let mut headroom = Headroom::default();
    for g in guards {
        let constraints = &g.spec.constraints;
        headroom.tighten(&Headroom {
            remaining_cost: g.remaining_cost(),
            remaining_runs: g.remaining_runs(),
            remaining_iterations: constraints
                .max_iterations
                .map(|max| max.saturating_sub(run.map_or(0, |r| r.iterations))),
            remaining_tool_calls: constraints
                .max_tool_calls
                .map(|max| max.saturating_sub(run.map_or(0, |r| r.tool_calls))),
            remaining_tokens: constraints
                .max_tokens
                .map(|max| max.saturating_sub(run.map_or(0, |r| r.tokens_used()))),
        });
    }
    headroom
}
