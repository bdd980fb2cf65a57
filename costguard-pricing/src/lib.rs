//! Pricing table and cost arithmetic.
//!
//! Pure and thread-safe: the table is immutable after load and every
//! calculation is arithmetic over it. Costs are `rust_decimal::Decimal` —
//! per-call charges are fractions of a cent and budget enforcement sums
//! thousands of them, so binary-float drift is not acceptable.
//!
//! Model-name resolution: exact match → longest configured prefix →
//! fallback rates. Ties in prefix length resolve to the earlier entry in
//! the table, so resolution is deterministic for any input.

#![deny(missing_docs)]

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-1k-token rates for one model (or model-name prefix).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Model name, or prefix covering a family of dated releases
    /// (`gpt-4o` covers `gpt-4o-2024-08-06`).
    pub model: String,
    /// Rate per 1 000 non-cached prompt tokens.
    pub input_per_1k: Decimal,
    /// Rate per 1 000 completion tokens.
    pub output_per_1k: Decimal,
    /// Rate per 1 000 cache-served prompt tokens. Unset means cached
    /// tokens are not billed.
    #[serde(default)]
    pub cached_input_per_1k: Option<Decimal>,
    /// Rate per 1 000 reasoning tokens. Unset means reasoning tokens are
    /// not billed separately.
    #[serde(default)]
    pub reasoning_per_1k: Option<Decimal>,
}

impl ModelPricing {
    /// Rates for a model billed only on input/output.
    pub fn new(model: impl Into<String>, input_per_1k: Decimal, output_per_1k: Decimal) -> Self {
        Self {
            model: model.into(),
            input_per_1k,
            output_per_1k,
            cached_input_per_1k: None,
            reasoning_per_1k: None,
        }
    }
}

/// Per-call and per-byte rates for one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolPricing {
    /// Tool name. Exact match only — tools don't have dated variants.
    pub tool: String,
    /// Flat charge per invocation.
    #[serde(default)]
    pub cost_per_call: Decimal,
    /// Charge per input byte.
    #[serde(default)]
    pub cost_per_input_byte: Decimal,
    /// Charge per output byte.
    #[serde(default)]
    pub cost_per_output_byte: Decimal,
}

/// The loaded pricing table.
///
/// Entry order matters: prefix-resolution ties break toward the earlier
/// entry, so keep more specific families first in config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTable {
    /// Currency every rate is denominated in.
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Model rate entries, in configuration order.
    #[serde(default)]
    pub models: Vec<ModelPricing>,
    /// Tool rate entries.
    #[serde(default)]
    pub tools: Vec<ToolPricing>,
    /// Input rate for models with no entry.
    #[serde(default)]
    pub fallback_input_per_1k: Decimal,
    /// Output rate for models with no entry.
    #[serde(default)]
    pub fallback_output_per_1k: Decimal,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            models: Vec::new(),
            tools: Vec::new(),
            fallback_input_per_1k: Decimal::ZERO,
            fallback_output_per_1k: Decimal::ZERO,
        }
    }
}

/// Resolved rates for one model call. Borrowed from the table or
/// synthesized from the fallback rates.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ResolvedRates {
    input_per_1k: Decimal,
    output_per_1k: Decimal,
    cached_input_per_1k: Option<Decimal>,
    reasoning_per_1k: Option<Decimal>,
}

const PER_1K: Decimal = Decimal::from_parts(1000, 0, 0, false, 0);

impl PricingTable {
    /// Resolve the rates for a model name.
    ///
    /// Exact match wins. Otherwise the longest entry whose name is a
    /// prefix of `model` wins, earlier entry on equal length. Otherwise
    /// the fallback rates apply.
    fn resolve(&self, model: &str) -> ResolvedRates {
        if let Some(exact) = self.models.iter().find(|m| m.model == model) {
            return ResolvedRates {
                input_per_1k: exact.input_per_1k,
                output_per_1k: exact.output_per_1k,
                cached_input_per_1k: exact.cached_input_per_1k,
                reasoning_per_1k: exact.reasoning_per_1k,
            };
        }

        let mut best: Option<&ModelPricing> = None;
        for entry in &self.models {
            if model.starts_with(&entry.model)
                && best.map_or(true, |b| entry.model.len() > b.model.len())
            {
                best = Some(entry);
            }
        }
        if let Some(entry) = best {
            tracing::debug!(model, prefix = %entry.model, "pricing resolved by prefix");
            return ResolvedRates {
                input_per_1k: entry.input_per_1k,
                output_per_1k: entry.output_per_1k,
                cached_input_per_1k: entry.cached_input_per_1k,
                reasoning_per_1k: entry.reasoning_per_1k,
            };
        }

        tracing::debug!(model, "pricing resolved to fallback rates");
        ResolvedRates {
            input_per_1k: self.fallback_input_per_1k,
            output_per_1k: self.fallback_output_per_1k,
            cached_input_per_1k: None,
            reasoning_per_1k: None,
        }
    }

    /// Cost of one model call.
    ///
    /// `(prompt − cached)/1k × input + cached/1k × cached_rate +
    /// completion/1k × output + reasoning/1k × reasoning_rate`, where an
    /// unset cached/reasoning rate contributes zero.
    pub fn model_cost(&self, usage: &costguard_types::ModelUsage) -> Decimal {
        let rates = self.resolve(&usage.model);

        let uncached = usage.prompt_tokens.saturating_sub(usage.cached_tokens);
        let mut cost = Decimal::from(uncached) / PER_1K * rates.input_per_1k
            + Decimal::from(usage.completion_tokens) / PER_1K * rates.output_per_1k;
        if let Some(cached_rate) = rates.cached_input_per_1k {
            cost += Decimal::from(usage.cached_tokens) / PER_1K * cached_rate;
        }
        if let Some(reasoning_rate) = rates.reasoning_per_1k {
            cost += Decimal::from(usage.reasoning_tokens) / PER_1K * reasoning_rate;
        }
        cost
    }

    /// Cost of one tool call. A tool with no entry costs zero.
    pub fn tool_cost(&self, usage: &costguard_types::ToolUsage) -> Decimal {
        let Some(entry) = self.tools.iter().find(|t| t.tool == usage.tool) else {
            tracing::debug!(tool = %usage.tool, "no tool pricing entry, cost is zero");
            return Decimal::ZERO;
        };
        entry.cost_per_call
            + Decimal::from(usage.input_bytes) * entry.cost_per_input_byte
            + Decimal::from(usage.output_bytes) * entry.cost_per_output_byte
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use costguard_types::{ModelUsage, ToolUsage};
    use rust_decimal_macros::dec;

    fn table() -> PricingTable {
        PricingTable {
            currency: "USD".into(),
            models: vec![
                ModelPricing {
                    model: "gpt-4o".into(),
                    input_per_1k: dec!(0.0025),
                    output_per_1k: dec!(0.01),
                    cached_input_per_1k: Some(dec!(0.00125)),
                    reasoning_per_1k: None,
                },
                ModelPricing::new("gpt-4o-mini", dec!(0.00015), dec!(0.0006)),
                ModelPricing {
                    model: "o3".into(),
                    input_per_1k: dec!(0.002),
                    output_per_1k: dec!(0.008),
                    cached_input_per_1k: None,
                    reasoning_per_1k: Some(dec!(0.008)),
                },
            ],
            tools: vec![ToolPricing {
                tool: "web_search".into(),
                cost_per_call: dec!(0.01),
                cost_per_input_byte: dec!(0.000001),
                cost_per_output_byte: dec!(0.000002),
            }],
            fallback_input_per_1k: dec!(0.001),
            fallback_output_per_1k: dec!(0.002),
        }
    }

    #[test]
    fn exact_match_beats_prefix() {
        // "gpt-4o-mini" is both an exact entry and prefixed by "gpt-4o".
        let cost = table().model_cost(&ModelUsage::new("gpt-4o-mini", 1000, 0));
        assert_eq!(cost, dec!(0.00015));
    }

    #[test]
    fn dated_release_resolves_by_prefix() {
        let cost = table().model_cost(&ModelUsage::new("gpt-4o-2024-08-06", 1000, 1000));
        assert_eq!(cost, dec!(0.0025) + dec!(0.01));
    }

    #[test]
    fn longest_prefix_wins() {
        // "gpt-4o-mini-2024-07-18" matches both "gpt-4o" and "gpt-4o-mini";
        // the longer prefix applies.
        let cost = table().model_cost(&ModelUsage::new("gpt-4o-mini-2024-07-18", 1000, 0));
        assert_eq!(cost, dec!(0.00015));
    }

    #[test]
    fn unknown_model_uses_fallback_rates() {
        let cost = table().model_cost(&ModelUsage::new("unknown-model", 2000, 500));
        assert_eq!(cost, dec!(0.002) + dec!(0.001));
    }

    #[test]
    fn cached_tokens_billed_at_cached_rate() {
        let usage = ModelUsage {
            cached_tokens: 400,
            ..ModelUsage::new("gpt-4o", 1000, 0)
        };
        // 600 uncached at 0.0025/1k + 400 cached at 0.00125/1k
        assert_eq!(
            table().model_cost(&usage),
            dec!(0.0015) + dec!(0.0005)
        );
    }

    #[test]
    fn cached_tokens_free_without_cached_rate() {
        let usage = ModelUsage {
            cached_tokens: 400,
            ..ModelUsage::new("o3", 1000, 0)
        };
        // Only the 600 uncached tokens are billed.
        assert_eq!(table().model_cost(&usage), dec!(0.0012));
    }

    #[test]
    fn reasoning_tokens_billed_when_configured() {
        let usage = ModelUsage {
            reasoning_tokens: 500,
            ..ModelUsage::new("o3", 0, 0)
        };
        assert_eq!(table().model_cost(&usage), dec!(0.004));
    }

    #[test]
    fn cached_exceeding_prompt_saturates() {
        let usage = ModelUsage {
            cached_tokens: 2000,
            ..ModelUsage::new("o3", 1000, 0)
        };
        assert_eq!(table().model_cost(&usage), Decimal::ZERO);
    }

    #[test]
    fn tool_cost_sums_call_and_bytes() {
        let cost = table().tool_cost(&ToolUsage::new("web_search", 1000, 5000));
        assert_eq!(cost, dec!(0.01) + dec!(0.001) + dec!(0.01));
    }

    #[test]
    fn unlisted_tool_costs_zero() {
        assert_eq!(table().tool_cost(&ToolUsage::new("calculator", 10, 10)), Decimal::ZERO);
    }

    #[test]
    fn table_roundtrips_through_json() {
        let t = table();
        let json = serde_json::to_string(&t).unwrap();
        let back: PricingTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // Doubling every token count doubles the cost.
            #[test]
            fn model_cost_is_homogeneous(
                prompt in 0u64..1_000_000,
                completion in 0u64..1_000_000,
                cached in 0u64..1_000_000,
            ) {
                let t = table();
                let cached = cached.min(prompt);
                let usage = ModelUsage {
                    cached_tokens: cached,
                    ..ModelUsage::new("gpt-4o", prompt, completion)
                };
                let doubled = ModelUsage {
                    cached_tokens: cached * 2,
                    ..ModelUsage::new("gpt-4o", prompt * 2, completion * 2)
                };
                prop_assert_eq!(t.model_cost(&doubled), t.model_cost(&usage) * Decimal::from(2u32));
            }

            // Resolution never panics and always lands on some rate set.
            #[test]
            fn resolution_is_total(model in "[a-z0-9.-]{0,40}") {
                let t = table();
                let _ = t.model_cost(&ModelUsage::new(model, 100, 100));
            }
        }
    }
}
