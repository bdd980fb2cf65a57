//! Typed ID wrappers for the cost-attribution hierarchy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed ID wrappers prevent mixing up tenant IDs, run IDs, etc.
/// These are just strings underneath — no UUID enforcement, no format
/// requirement. The attribution hierarchy doesn't care what your IDs
/// look like.
macro_rules! typed_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new typed ID from anything that converts to String.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the inner string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

typed_id!(TenantId, "Organization paying the bill. Top of the hierarchy.");
typed_id!(StrandId, "Agent type within a tenant.");
typed_id!(WorkflowId, "Task flow within a strand.");
typed_id!(RunId, "A single execution. Leaf of the hierarchy.");
typed_id!(BudgetId, "Identifier of a declarative budget policy.");
typed_id!(PolicyId, "Identifier of a routing policy.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_roundtrip_as_plain_strings() {
        let id = TenantId::new("acme");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"acme\"");
        let back: TenantId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn ids_are_ordered_lexically() {
        // Lock-ordering across budgets relies on Ord over the raw string.
        assert!(BudgetId::new("a") < BudgetId::new("b"));
        assert!(BudgetId::new("global-cap") < BudgetId::new("tenant-cap"));
    }

    #[test]
    fn display_matches_inner() {
        assert_eq!(RunId::new("run-1").to_string(), "run-1");
        assert_eq!(RunId::from("run-2").as_str(), "run-2");
    }
}
