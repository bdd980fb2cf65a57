//! Policy load sources.
//!
//! A [`PolicySource`] produces the three policy documents (budgets,
//! routing, pricing) from somewhere. Two sources ship here:
//!
//! - [`FilePolicySource`]: a directory of JSON documents
//!   (`budgets.json`, `routing.json`, `pricing.json`, each optional)
//! - [`EnvPolicySource`]: environment variables synthesizing one global
//!   wildcard budget and one wildcard routing policy
//!
//! Unknown keys in file documents are warnings, not errors — a newer
//! config schema must not brick an older sidecar.

use crate::budget::BudgetSpec;
use crate::routing::RoutingPolicy;
use async_trait::async_trait;
use costguard_pricing::PricingTable;
use costguard_types::{BudgetScope, ConfigError};
use rust_decimal::Decimal;
use std::path::PathBuf;

/// The three policy documents a source yields.
#[non_exhaustive]
#[derive(Debug, Clone, Default)]
pub struct PolicyDocuments {
    /// Budget policies, in document order.
    pub budgets: Vec<BudgetSpec>,
    /// Routing policies, in document order (order breaks priority ties).
    pub routing: Vec<RoutingPolicy>,
    /// The pricing table.
    pub pricing: PricingTable,
}

/// Where policy documents come from.
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// Load a fresh set of documents.
    ///
    /// A failed load keeps the store's previous snapshot; sources should
    /// return an error rather than partial documents.
    async fn load(&self) -> Result<PolicyDocuments, ConfigError>;
}

// --- File source ---

/// Loads policy documents from a directory of JSON files.
///
/// Layout:
/// ```text
/// dir/
///   budgets.json   — array of budget specs
///   routing.json   — array of routing policies
///   pricing.json   — one pricing table
/// ```
/// Each file is optional; a missing file contributes nothing.
pub struct FilePolicySource {
    dir: PathBuf,
}

impl FilePolicySource {
    /// A source reading from the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn read_optional(&self, name: &str) -> Result<Option<serde_json::Value>, ConfigError> {
        let path = self.dir.join(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => serde_json::from_str(&contents)
                .map(Some)
                .map_err(|e| ConfigError::Parse(format!("{name}: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::SourceUnavailable(format!("{name}: {e}"))),
        }
    }
}

const BUDGET_KEYS: &[&str] = &[
    "id",
    "scope",
    "match",
    "period",
    "max_cost",
    "soft_thresholds",
    "hard_limit",
    "on_soft_threshold_exceeded",
    "on_hard_limit_exceeded",
    "max_runs_per_period",
    "max_concurrent_runs",
    "constraints",
    "enabled",
];

const ROUTING_KEYS: &[&str] = &[
    "id",
    "match",
    "default_model",
    "default_fallback_model",
    "stages",
];

/// Warn about keys a document carries that this version doesn't know.
fn warn_unknown_keys(doc: &str, entry: &serde_json::Value, known: &[&str]) {
    let Some(object) = entry.as_object() else {
        return;
    };
    for key in object.keys() {
        if !known.contains(&key.as_str()) {
            tracing::warn!(doc, key = %key, "ignoring unknown policy key");
        }
    }
}

#[async_trait]
impl PolicySource for FilePolicySource {
    async fn load(&self) -> Result<PolicyDocuments, ConfigError> {
        let mut docs = PolicyDocuments::default();

        if let Some(value) = self.read_optional("budgets.json").await? {
            let entries = value
                .as_array()
                .ok_or_else(|| ConfigError::Invalid("budgets.json: expected an array".into()))?;
            for entry in entries {
                warn_unknown_keys("budgets.json", entry, BUDGET_KEYS);
                let spec: BudgetSpec = serde_json::from_value(entry.clone())
                    .map_err(|e| ConfigError::Parse(format!("budgets.json: {e}")))?;
                spec.validate()?;
                docs.budgets.push(spec);
            }
        }

        if let Some(value) = self.read_optional("routing.json").await? {
            let entries = value
                .as_array()
                .ok_or_else(|| ConfigError::Invalid("routing.json: expected an array".into()))?;
            for entry in entries {
                warn_unknown_keys("routing.json", entry, ROUTING_KEYS);
                let policy: RoutingPolicy = serde_json::from_value(entry.clone())
                    .map_err(|e| ConfigError::Parse(format!("routing.json: {e}")))?;
                docs.routing.push(policy);
            }
        }

        if let Some(value) = self.read_optional("pricing.json").await? {
            docs.pricing = serde_json::from_value(value)
                .map_err(|e| ConfigError::Parse(format!("pricing.json: {e}")))?;
        }

        Ok(docs)
    }
}

// --- Environment source ---

/// Synthesizes a minimal policy set from environment variables.
///
/// Recognized (with `COSTGUARD_` as the example prefix):
///
/// | Variable | Effect |
/// |----------|--------|
/// | `COSTGUARD_MAX_COST` | One global wildcard budget with this hard cap |
/// | `COSTGUARD_PERIOD` | Period of that budget (default `daily`) |
/// | `COSTGUARD_DEFAULT_MODEL` | One wildcard routing policy with this default |
/// | `COSTGUARD_FALLBACK_MODEL` | Fleet-wide fallback on that policy |
///
/// The budget is synthesized only when `MAX_COST` is set; the routing
/// policy only when `DEFAULT_MODEL` is set.
pub struct EnvPolicySource {
    prefix: String,
}

impl EnvPolicySource {
    /// A source reading variables under the given prefix
    /// (e.g. `"COSTGUARD_"`).
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn var(&self, name: &str) -> Option<String> {
        std::env::var(format!("{}{name}", self.prefix)).ok()
    }
}

#[async_trait]
impl PolicySource for EnvPolicySource {
    async fn load(&self) -> Result<PolicyDocuments, ConfigError> {
        let mut docs = PolicyDocuments::default();

        if let Some(raw) = self.var("MAX_COST") {
            let max_cost: Decimal = raw.parse().map_err(|_| {
                ConfigError::Invalid(format!("{}MAX_COST: not a decimal: {raw}", self.prefix))
            })?;
            let mut spec = BudgetSpec::new(
                "env-global",
                BudgetScope::Global,
                crate::matching::MatchPatterns::any(),
            );
            spec.max_cost = max_cost;
            spec.hard_limit = true;
            if let Some(raw_period) = self.var("PERIOD") {
                spec.period = raw_period.parse().map_err(|e| {
                    ConfigError::Invalid(format!("{}PERIOD: {e}", self.prefix))
                })?;
            }
            spec.validate()?;
            docs.budgets.push(spec);
        }

        if let Some(default_model) = self.var("DEFAULT_MODEL") {
            docs.routing.push(RoutingPolicy {
                id: costguard_types::PolicyId::new("env-routing"),
                matcher: crate::matching::MatchPatterns::any(),
                default_model,
                default_fallback_model: self.var("FALLBACK_MODEL"),
                stages: Vec::new(),
            });
        }

        Ok(docs)
    }
}
