//! Wildcard patterns and context matching.

use costguard_types::RunContext;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A wildcard-capable match pattern.
///
/// Three forms: `*` matches anything, a bare literal matches exactly, a
/// literal with a trailing `*` matches by prefix. `starter-*` matches
/// `starter-` and `starter-xyz` but not `starter`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Pattern {
    /// Matches any value.
    Any,
    /// Matches the value exactly.
    Exact(String),
    /// Matches values starting with the prefix.
    Prefix(String),
}

impl Pattern {
    /// Parse a pattern from its config form. Never fails — every string
    /// is a valid pattern.
    pub fn parse(s: &str) -> Self {
        if s == "*" {
            Pattern::Any
        } else if let Some(prefix) = s.strip_suffix('*') {
            Pattern::Prefix(prefix.to_string())
        } else {
            Pattern::Exact(s.to_string())
        }
    }

    /// Whether the pattern matches a concrete identifier.
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::Exact(literal) => value == literal,
            Pattern::Prefix(prefix) => value.starts_with(prefix),
        }
    }

    /// Whether this pattern constrains the field at all. `*` does not;
    /// exact and prefix patterns do, and earn the specificity bonus.
    pub fn is_constraining(&self) -> bool {
        !matches!(self, Pattern::Any)
    }
}

impl Default for Pattern {
    fn default() -> Self {
        Pattern::Any
    }
}

impl From<String> for Pattern {
    fn from(s: String) -> Self {
        Pattern::parse(&s)
    }
}

impl From<Pattern> for String {
    fn from(p: Pattern) -> Self {
        p.to_string()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Any => f.write_str("*"),
            Pattern::Exact(literal) => f.write_str(literal),
            Pattern::Prefix(prefix) => write!(f, "{prefix}*"),
        }
    }
}

/// The three patterns a policy matches a context against.
/// All three must match simultaneously.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPatterns {
    /// Pattern over `tenant_id`.
    #[serde(default)]
    pub tenant_id: Pattern,
    /// Pattern over `strand_id`.
    #[serde(default)]
    pub strand_id: Pattern,
    /// Pattern over `workflow_id`.
    #[serde(default)]
    pub workflow_id: Pattern,
}

impl MatchPatterns {
    /// A matcher that accepts every context.
    pub fn any() -> Self {
        Self::default()
    }

    /// Whether all three patterns match the context.
    pub fn matches(&self, ctx: &RunContext) -> bool {
        self.tenant_id.matches(ctx.tenant_id.as_str())
            && self.strand_id.matches(ctx.strand_id.as_str())
            && self.workflow_id.matches(ctx.workflow_id.as_str())
    }

    /// Specificity bonus: +1 for a constraining tenant pattern, +2 for
    /// strand, +4 for workflow. Added to the scope weight to form the
    /// total priority score.
    pub fn specificity(&self) -> u32 {
        let mut score = 0;
        if self.tenant_id.is_constraining() {
            score += 1;
        }
        if self.strand_id.is_constraining() {
            score += 2;
        }
        if self.workflow_id.is_constraining() {
            score += 4;
        }
        score
    }
}
