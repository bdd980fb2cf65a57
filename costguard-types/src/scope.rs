//! Budget scopes, accounting periods, and the scope-key encoding.

use crate::context::RunContext;
use crate::id::BudgetId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The hierarchy level at which a budget applies.
///
/// A budget at a wider scope pools spend across everything beneath it;
/// a budget at a narrower scope tracks one slice independently. All
/// matching budgets apply concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetScope {
    /// One pool for the whole deployment.
    Global,
    /// One pool per tenant.
    Tenant,
    /// One pool per (tenant, strand).
    Strand,
    /// One pool per (tenant, strand, workflow).
    Workflow,
}

impl BudgetScope {
    /// Priority weight of this scope. Narrower scopes outrank wider ones.
    pub fn weight(&self) -> u32 {
        match self {
            BudgetScope::Global => 0,
            BudgetScope::Tenant => 10,
            BudgetScope::Strand => 20,
            BudgetScope::Workflow => 30,
        }
    }

    /// The scope name as used in scope keys and config documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetScope::Global => "global",
            BudgetScope::Tenant => "tenant",
            BudgetScope::Strand => "strand",
            BudgetScope::Workflow => "workflow",
        }
    }
}

impl fmt::Display for BudgetScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accounting period of a budget. Windows are aligned to wall-clock UTC
/// boundaries, not to when the budget was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPeriod {
    /// Resets at the top of every UTC hour.
    Hourly,
    /// Resets at 00:00 UTC.
    Daily,
    /// Resets Monday 00:00 UTC.
    Weekly,
    /// Resets on the first of the month, 00:00 UTC.
    Monthly,
}

impl BudgetPeriod {
    /// The period name as used in config documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetPeriod::Hourly => "hourly",
            BudgetPeriod::Daily => "daily",
            BudgetPeriod::Weekly => "weekly",
            BudgetPeriod::Monthly => "monthly",
        }
    }
}

impl std::str::FromStr for BudgetPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(BudgetPeriod::Hourly),
            "daily" => Ok(BudgetPeriod::Daily),
            "weekly" => Ok(BudgetPeriod::Weekly),
            "monthly" => Ok(BudgetPeriod::Monthly),
            other => Err(format!("unknown period: {other}")),
        }
    }
}

impl fmt::Display for BudgetPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical key of one budget accumulator:
/// `{scope}:{tenant}[:{strand}[:{workflow}]]:{budget_id}`, with levels
/// below the budget's scope omitted.
///
/// The same encoding is used in memory (accumulator map key) and in the
/// persistent store (suffix of the storage key), so a fleet of processes
/// sharing one backing store converges on the same accumulators.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeKey(String);

impl ScopeKey {
    /// Build the scope key for a budget applied to a concrete run context.
    pub fn for_context(scope: BudgetScope, ctx: &RunContext, budget_id: &BudgetId) -> Self {
        let key = match scope {
            BudgetScope::Global => format!("global:{budget_id}"),
            BudgetScope::Tenant => format!("tenant:{}:{budget_id}", ctx.tenant_id),
            BudgetScope::Strand => {
                format!("strand:{}:{}:{budget_id}", ctx.tenant_id, ctx.strand_id)
            }
            BudgetScope::Workflow => format!(
                "workflow:{}:{}:{}:{budget_id}",
                ctx.tenant_id, ctx.strand_id, ctx.workflow_id
            ),
        };
        Self(key)
    }

    /// Wrap a pre-encoded scope key (e.g. read back from the store).
    pub fn from_encoded(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the encoded form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ctx() -> RunContext {
        RunContext::new("acme", "researcher", "daily-report", "run-1", Utc::now())
    }

    #[test]
    fn scope_weights_are_strictly_increasing() {
        assert!(BudgetScope::Global.weight() < BudgetScope::Tenant.weight());
        assert!(BudgetScope::Tenant.weight() < BudgetScope::Strand.weight());
        assert!(BudgetScope::Strand.weight() < BudgetScope::Workflow.weight());
    }

    #[test]
    fn scope_key_omits_levels_below_scope() {
        let id = BudgetId::new("cap");
        assert_eq!(
            ScopeKey::for_context(BudgetScope::Global, &ctx(), &id).as_str(),
            "global:cap"
        );
        assert_eq!(
            ScopeKey::for_context(BudgetScope::Tenant, &ctx(), &id).as_str(),
            "tenant:acme:cap"
        );
        assert_eq!(
            ScopeKey::for_context(BudgetScope::Strand, &ctx(), &id).as_str(),
            "strand:acme:researcher:cap"
        );
        assert_eq!(
            ScopeKey::for_context(BudgetScope::Workflow, &ctx(), &id).as_str(),
            "workflow:acme:researcher:daily-report:cap"
        );
    }

    #[test]
    fn period_parses_all_names() {
        for name in ["hourly", "daily", "weekly", "monthly"] {
            let p: BudgetPeriod = name.parse().unwrap();
            assert_eq!(p.as_str(), name);
        }
        assert!("fortnightly".parse::<BudgetPeriod>().is_err());
    }

    #[test]
    fn scope_key_serializes_transparently() {
        let key = ScopeKey::from_encoded("tenant:acme:cap");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"tenant:acme:cap\"");
    }
}
