//! The persistent budget store contract.
//!
//! How budget accumulators are shared across process instances. The trait
//! is deliberately minimal — get + CAS + TTL write + list — so any KV
//! backend with a compare-and-set primitive (Redis/Valkey, DynamoDB,
//! etcd, an in-memory map) can implement it.
//!
//! Consistency model: optimistic. Writers read a versioned record, apply
//! their delta, and CAS it back; a conflict means another process wrote
//! first and the caller retries from the read. Every record is written
//! with expiry at its period end so stale windows self-purge.

use crate::error::StoreError;
use crate::id::{BudgetId, RunId};
use crate::scope::ScopeKey;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Wire record of one budget accumulator, as persisted to the store.
///
/// Field set is stable: deployments read each other's records. Serializing
/// and reloading yields the same state (up to map ordering, which BTreeMap
/// fixes).
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetStateData {
    /// The budget this accumulator belongs to.
    pub budget_id: BudgetId,
    /// The concrete scope slice being accumulated.
    pub scope_key: ScopeKey,
    /// Start of the current period window (inclusive), ISO-8601.
    pub period_start: DateTime<Utc>,
    /// End of the current period window (exclusive), ISO-8601.
    pub period_end: DateTime<Utc>,
    /// Cost accumulated this period.
    pub total_cost: Decimal,
    /// Runs admitted this period.
    pub total_runs: u64,
    /// Input tokens this period.
    pub total_input_tokens: u64,
    /// Output tokens this period.
    pub total_output_tokens: u64,
    /// Iterations started this period.
    pub total_iterations: u64,
    /// Tool calls this period.
    pub total_tool_calls: u64,
    /// Cost by model name this period.
    pub model_costs: BTreeMap<String, Decimal>,
    /// Cost by tool name this period.
    pub tool_costs: BTreeMap<String, Decimal>,
    /// Runs currently holding a concurrency slot, oldest first.
    pub concurrent_run_ids: Vec<RunId>,
}

impl BudgetStateData {
    /// A zeroed accumulator for a fresh period window.
    pub fn empty(
        budget_id: BudgetId,
        scope_key: ScopeKey,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Self {
        Self {
            budget_id,
            scope_key,
            period_start,
            period_end,
            total_cost: Decimal::ZERO,
            total_runs: 0,
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_iterations: 0,
            total_tool_calls: 0,
            model_costs: BTreeMap::new(),
            tool_costs: BTreeMap::new(),
            concurrent_run_ids: Vec::new(),
        }
    }
}

/// A stored record together with the version the backend assigned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedState {
    /// The record.
    pub data: BudgetStateData,
    /// Backend-assigned version, passed back on CAS.
    pub version: u64,
}

/// Outcome of a compare-and-set attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write landed.
    Ok,
    /// Another writer got there first; re-read and retry.
    Conflict,
}

/// Protocol for sharing budget accumulators across a fleet.
///
/// Implementations:
/// - `costguard-store-memory`: HashMap + version counter (tests,
///   single-process deployments)
/// - Redis/Valkey adapter: WATCH/MULTI or Lua CAS, TTL via EXPIREAT
///
/// All methods must degrade gracefully: a dead backend returns
/// [`StoreError::Unavailable`], never panics, never blocks beyond its
/// deadline. The in-memory tracker keeps functioning without the store.
#[async_trait]
pub trait BudgetStore: Send + Sync {
    /// Fetch a record and its version. `None` if the key doesn't exist
    /// (or has expired).
    async fn get(&self, scope_key: &ScopeKey) -> Result<Option<VersionedState>, StoreError>;

    /// Atomically replace the record if its version still matches.
    /// `expected_version: None` asserts the key does not exist yet.
    /// The record is written with expiry at `expires_at`.
    async fn compare_and_set(
        &self,
        scope_key: &ScopeKey,
        expected_version: Option<u64>,
        data: BudgetStateData,
        expires_at: DateTime<Utc>,
    ) -> Result<CasOutcome, StoreError>;

    /// Unconditionally write the record with expiry at `expires_at`.
    /// Used for recovery snapshots, not for accounting deltas.
    async fn set_with_ttl(
        &self,
        scope_key: &ScopeKey,
        data: BudgetStateData,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// List keys under a prefix. Used by recovery and inspection tooling.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<ScopeKey>, StoreError>;
}
