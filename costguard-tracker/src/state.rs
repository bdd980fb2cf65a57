//! Mutable accounting state for runs and budgets.

use crate::period::PeriodWindow;
use chrono::{DateTime, Utc};
use costguard_policy::BudgetSpec;
use costguard_types::{
    BudgetStateData, RunContext, RunId, RunStatus, ScopeKey,
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Accounting totals for one in-flight (or recently ended) run.
///
/// Owned by the tracker, protected by a per-run mutex. Once `status`
/// leaves [`RunStatus::Running`] further accounting is a warned no-op.
#[derive(Debug)]
pub struct RunState {
    /// Immutable identity of the run.
    pub ctx: RunContext,
    /// Budgets resolved at admission, with their concrete scope keys.
    /// Pinned for the run's life so accounting and concurrency release
    /// hit exactly the accumulators that admitted it.
    pub budgets: Vec<(Arc<BudgetSpec>, ScopeKey)>,
    /// Current status.
    pub status: RunStatus,
    /// Iterations started.
    pub iterations: u64,
    /// Cost accumulated by this run.
    pub total_cost: Decimal,
    /// Input tokens (prompt, including cached).
    pub input_tokens: u64,
    /// Output tokens (completion + reasoning).
    pub output_tokens: u64,
    /// Tool calls made.
    pub tool_calls: u64,
    /// Cost by model.
    pub model_costs: BTreeMap<String, Decimal>,
    /// Cost by tool.
    pub tool_costs: BTreeMap<String, Decimal>,
    /// Sum and count of reported model latencies, for the routing signal.
    pub latency_sum_ms: f64,
    /// Number of latency reports.
    pub latency_count: u64,
    /// When the run ended, if it has.
    pub ended_at: Option<DateTime<Utc>>,
}

impl RunState {
    /// Fresh state for a just-admitted run.
    pub fn new(ctx: RunContext, budgets: Vec<(Arc<BudgetSpec>, ScopeKey)>) -> Self {
        Self {
            ctx,
            budgets,
            status: RunStatus::Running,
            iterations: 0,
            total_cost: Decimal::ZERO,
            input_tokens: 0,
            output_tokens: 0,
            tool_calls: 0,
            model_costs: BTreeMap::new(),
            tool_costs: BTreeMap::new(),
            latency_sum_ms: 0.0,
            latency_count: 0,
            ended_at: None,
        }
    }

    /// Average model-call latency, if any was reported.
    pub fn avg_latency_ms(&self) -> Option<f64> {
        (self.latency_count > 0).then(|| self.latency_sum_ms / self.latency_count as f64)
    }

    /// Tokens consumed so far (input + output).
    pub fn tokens_used(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// One budget accumulator plus its per-process bookkeeping.
///
/// `data` holds the best-known fleet-wide totals for the current window
/// (merged back from the persistent store when one is configured).
/// `thresholds_crossed` is deliberately per-process: distributed
/// threshold signaling is at-least-once, and the set insert makes the
/// local signal exactly-once per period.
#[derive(Debug)]
pub struct BudgetState {
    /// The spec this accumulator enforces. Refreshed on policy reload.
    pub spec: Arc<BudgetSpec>,
    /// Totals for the current window.
    pub data: BudgetStateData,
    /// Thresholds already signaled this period, ascending.
    pub thresholds_crossed: BTreeSet<Decimal>,
    /// Last version seen from the persistent store, if any.
    pub version: Option<u64>,
}

impl BudgetState {
    /// A zeroed accumulator for the window containing `now`.
    pub fn new(spec: Arc<BudgetSpec>, scope_key: ScopeKey, now: DateTime<Utc>) -> Self {
        let window = PeriodWindow::containing(spec.period, now);
        let data = BudgetStateData::empty(spec.id.clone(), scope_key, window.start, window.end);
        Self {
            spec,
            data,
            thresholds_crossed: BTreeSet::new(),
            version: None,
        }
    }

    /// The current window.
    pub fn window(&self) -> PeriodWindow {
        PeriodWindow {
            start: self.data.period_start,
            end: self.data.period_end,
        }
    }

    /// Reset to a fresh window if `now` has left the current one.
    ///
    /// Counters and crossed thresholds are zeroed; `concurrent_run_ids`
    /// survives, since runs span periods. Returns whether a reset
    /// happened.
    pub fn roll_window(&mut self, now: DateTime<Utc>) -> bool {
        if !self.window().expired(now) {
            return false;
        }
        let window = PeriodWindow::containing(self.spec.period, now);
        let concurrent = std::mem::take(&mut self.data.concurrent_run_ids);
        self.data = BudgetStateData::empty(
            self.spec.id.clone(),
            self.data.scope_key.clone(),
            window.start,
            window.end,
        );
        self.data.concurrent_run_ids = concurrent;
        self.thresholds_crossed.clear();
        self.version = None;
        tracing::debug!(
            budget = %self.spec.id,
            period_start = %window.start,
            "budget window rolled"
        );
        true
    }

    /// Utilization `total_cost / max_cost`, when the budget caps cost.
    pub fn utilization(&self) -> Option<Decimal> {
        (self.spec.max_cost > Decimal::ZERO).then(|| self.data.total_cost / self.spec.max_cost)
    }

    /// Whether utilization has reached 1.0 on a hard-limited budget.
    pub fn hard_limit_exceeded(&self) -> bool {
        self.spec.hard_limit && self.utilization().is_some_and(|u| u >= Decimal::ONE)
    }

    /// Budget currency left before the cap, floored at zero.
    pub fn remaining_cost(&self) -> Option<Decimal> {
        (self.spec.max_cost > Decimal::ZERO)
            .then(|| (self.spec.max_cost - self.data.total_cost).max(Decimal::ZERO))
    }

    /// Runs left in this period under `max_runs_per_period`.
    pub fn remaining_runs(&self) -> Option<u64> {
        self.spec
            .max_runs_per_period
            .map(|max| max.saturating_sub(self.data.total_runs))
    }

    /// Soft thresholds newly reached at the current utilization, in
    /// ascending order. Records them as crossed. A threshold is crossed
    /// exactly when `utilization >= threshold`.
    pub fn detect_crossings(&mut self) -> Vec<ThresholdCrossing> {
        let Some(u) = self.utilization() else {
            return Vec::new();
        };
        let mut fired = Vec::new();
        for t in &self.spec.soft_thresholds {
            if *t <= u && !self.thresholds_crossed.contains(t) {
                fired.push(ThresholdCrossing {
                    scope_key: self.data.scope_key.clone(),
                    budget_id: self.spec.id.clone(),
                    threshold: *t,
                    utilization: u,
                    action: self.spec.on_soft_threshold_exceeded,
                });
            }
        }
        for crossing in &fired {
            self.thresholds_crossed.insert(crossing.threshold);
        }
        fired
    }

    /// Whether any soft threshold stands crossed for the current
    /// utilization, counting both recorded crossings and the live value
    /// (admission may observe a crossing before any record landed here).
    pub fn soft_threshold_standing(&self) -> bool {
        if !self.thresholds_crossed.is_empty() {
            return true;
        }
        match self.utilization() {
            Some(u) => self.spec.soft_thresholds.iter().any(|t| *t <= u),
            None => false,
        }
    }
}

/// One soft-threshold crossing event.
#[derive(Debug, Clone)]
pub struct ThresholdCrossing {
    /// The accumulator that crossed.
    pub scope_key: ScopeKey,
    /// The budget that crossed.
    pub budget_id: costguard_types::BudgetId,
    /// The threshold fraction.
    pub threshold: Decimal,
    /// Utilization at detection time.
    pub utilization: Decimal,
    /// The configured soft action.
    pub action: costguard_policy::ThresholdAction,
}

/// Delta applied to budget accumulators by one accounting event.
#[derive(Debug, Clone, Default)]
pub struct UsageDelta {
    /// Cost to add.
    pub cost: Decimal,
    /// Input tokens to add.
    pub input_tokens: u64,
    /// Output tokens to add.
    pub output_tokens: u64,
    /// Iterations to add.
    pub iterations: u64,
    /// Tool calls to add.
    pub tool_calls: u64,
    /// Runs to add.
    pub runs: u64,
    /// Model attribution of `cost`.
    pub model: Option<String>,
    /// Tool attribution of `cost`.
    pub tool: Option<String>,
    /// Run to add to the concurrent set.
    pub add_run: Option<RunId>,
    /// Run to remove from the concurrent set.
    pub remove_run: Option<RunId>,
}

impl UsageDelta {
    /// Apply this delta to a wire record.
    pub fn apply(&self, data: &mut BudgetStateData) {
        data.total_cost += self.cost;
        data.total_input_tokens += self.input_tokens;
        data.total_output_tokens += self.output_tokens;
        data.total_iterations += self.iterations;
        data.total_tool_calls += self.tool_calls;
        data.total_runs += self.runs;
        if let Some(model) = &self.model {
            *data.model_costs.entry(model.clone()).or_default() += self.cost;
        }
        if let Some(tool) = &self.tool {
            *data.tool_costs.entry(tool.clone()).or_default() += self.cost;
        }
        if let Some(run) = &self.add_run {
            if !data.concurrent_run_ids.contains(run) {
                data.concurrent_run_ids.push(run.clone());
            }
        }
        if let Some(run) = &self.remove_run {
            data.concurrent_run_ids.retain(|r| r != run);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use costguard_policy::MatchPatterns;
    use costguard_types::BudgetScope;
    use rust_decimal_macros::dec;

    fn spec(max_cost: Decimal, thresholds: Vec<Decimal>) -> Arc<BudgetSpec> {
        let mut s = BudgetSpec::new("cap", BudgetScope::Global, MatchPatterns::any());
        s.max_cost = max_cost;
        s.soft_thresholds = thresholds;
        s.hard_limit = true;
        Arc::new(s)
    }

    fn state(max_cost: Decimal, thresholds: Vec<Decimal>) -> BudgetState {
        BudgetState::new(
            spec(max_cost, thresholds),
            ScopeKey::from_encoded("global:cap"),
            "2026-03-02T10:30:00Z".parse().unwrap(),
        )
    }

    #[test]
    fn crossing_fires_exactly_once_per_threshold() {
        let mut s = state(dec!(100), vec![dec!(0.5), dec!(0.9)]);
        s.data.total_cost = dec!(55);
        let fired = s.detect_crossings();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].threshold, dec!(0.5));

        // Same utilization: nothing new.
        assert!(s.detect_crossings().is_empty());

        // Both remaining thresholds at once, ascending order.
        s.data.total_cost = dec!(95);
        let fired = s.detect_crossings();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].threshold, dec!(0.9));
    }

    #[test]
    fn crossing_is_inclusive_at_the_boundary() {
        let mut s = state(dec!(100), vec![dec!(0.7)]);
        s.data.total_cost = dec!(69.999);
        assert!(s.detect_crossings().is_empty());
        s.data.total_cost = dec!(70);
        assert_eq!(s.detect_crossings().len(), 1);
    }

    #[test]
    fn multiple_thresholds_fire_ascending_in_one_update() {
        let mut s = state(dec!(100), vec![dec!(0.25), dec!(0.5), dec!(0.75)]);
        s.data.total_cost = dec!(80);
        let fired = s.detect_crossings();
        let order: Vec<_> = fired.iter().map(|c| c.threshold).collect();
        assert_eq!(order, vec![dec!(0.25), dec!(0.5), dec!(0.75)]);
    }

    #[test]
    fn roll_window_zeroes_counters_keeps_concurrent_runs() {
        let mut s = state(dec!(100), vec![dec!(0.5)]);
        s.data.total_cost = dec!(80);
        s.data.total_runs = 3;
        s.data.concurrent_run_ids.push(RunId::new("r1"));
        let _ = s.detect_crossings();
        assert!(!s.thresholds_crossed.is_empty());

        // Still inside the hour: no reset.
        assert!(!s.roll_window("2026-03-02T10:59:59Z".parse().unwrap()));

        // Exactly at the boundary: reset.
        assert!(s.roll_window("2026-03-02T11:00:00Z".parse().unwrap()));
        assert_eq!(s.data.total_cost, Decimal::ZERO);
        assert_eq!(s.data.total_runs, 0);
        assert!(s.thresholds_crossed.is_empty());
        assert_eq!(s.data.concurrent_run_ids, vec![RunId::new("r1")]);
        assert_eq!(s.data.period_start, "2026-03-02T11:00:00Z".parse::<DateTime<Utc>>().unwrap());
        assert_eq!(s.data.period_end, "2026-03-02T12:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn hard_limit_requires_the_flag_and_full_utilization() {
        let mut s = state(dec!(100), vec![]);
        s.data.total_cost = dec!(100.01);
        assert!(s.hard_limit_exceeded());

        let mut soft = BudgetState::new(
            {
                let mut sp = BudgetSpec::new("soft", BudgetScope::Global, MatchPatterns::any());
                sp.max_cost = dec!(100);
                Arc::new(sp)
            },
            ScopeKey::from_encoded("global:soft"),
            "2026-03-02T10:30:00Z".parse().unwrap(),
        );
        soft.data.total_cost = dec!(200);
        assert!(!soft.hard_limit_exceeded());
    }

    #[test]
    fn uncapped_budget_has_no_utilization() {
        let s = state(Decimal::ZERO, vec![]);
        assert!(s.utilization().is_none());
        assert!(s.remaining_cost().is_none());
        assert!(!s.hard_limit_exceeded());
    }

    #[test]
    fn delta_applies_all_axes() {
        let mut data = BudgetStateData::empty(
            costguard_types::BudgetId::new("cap"),
            ScopeKey::from_encoded("global:cap"),
            "2026-03-02T10:00:00Z".parse().unwrap(),
            "2026-03-02T11:00:00Z".parse().unwrap(),
        );
        UsageDelta {
            cost: dec!(1.5),
            input_tokens: 1000,
            output_tokens: 200,
            model: Some("gpt-4o".into()),
            add_run: Some(RunId::new("r1")),
            ..Default::default()
        }
        .apply(&mut data);
        UsageDelta {
            cost: dec!(0.5),
            tool_calls: 1,
            tool: Some("search".into()),
            remove_run: Some(RunId::new("r1")),
            ..Default::default()
        }
        .apply(&mut data);

        assert_eq!(data.total_cost, dec!(2));
        assert_eq!(data.model_costs["gpt-4o"], dec!(1.5));
        assert_eq!(data.tool_costs["search"], dec!(0.5));
        assert!(data.concurrent_run_ids.is_empty());
    }

    #[test]
    fn run_state_latency_average() {
        let ctx = RunContext::new("t", "s", "w", "r", Utc::now());
        let mut run = RunState::new(ctx, Vec::new());
        assert!(run.avg_latency_ms().is_none());
        run.latency_sum_ms = 300.0;
        run.latency_count = 2;
        assert_eq!(run.avg_latency_ms(), Some(150.0));
    }
}
