//! Optimistic write-back of budget deltas to the persistent store.
//!
//! Protocol: read the versioned record, apply the delta to it, CAS it
//! back. A conflict means another process wrote first — retry from the
//! read, at most `max_attempts` times. Exhaustion and backend errors
//! both degrade to in-memory accounting for that update; the persistent
//! state may under-count under sustained contention.
//!
//! Records whose window has lapsed (or that are missing — TTL expiry
//! looks the same) are replaced with a fresh record for the current
//! window.

use crate::state::{BudgetState, UsageDelta};
use costguard_types::{BudgetStateData, BudgetStore, CasOutcome, StoreError};

/// How a sync attempt ended.
#[derive(Debug)]
pub(crate) enum SyncResult {
    /// The delta landed in the store; in-memory state now holds the
    /// merged fleet totals.
    Synced,
    /// CAS attempts exhausted. The caller applies the delta locally.
    Contended,
    /// The backend failed. The caller applies the delta locally and
    /// flags the store for recovery.
    Failed(StoreError),
}

/// Push one delta through the read→apply→CAS loop.
///
/// On success `state.data` is replaced with the merged record, so the
/// local accumulator tracks fleet-wide totals.
pub(crate) async fn sync_delta(
    store: &dyn BudgetStore,
    state: &mut BudgetState,
    delta: &UsageDelta,
    max_attempts: u32,
) -> SyncResult {
    let scope_key = state.data.scope_key.clone();
    let expires_at = state.data.period_end;

    for attempt in 0..max_attempts {
        let read = match store.get(&scope_key).await {
            Ok(read) => read,
            Err(e) => return SyncResult::Failed(e),
        };

        // A record from a lapsed window counts as absent: it is about to
        // expire, and its totals belong to a period that already reset.
        let current = read.filter(|v| v.data.period_end == state.data.period_end);

        let (expected_version, mut merged) = match current {
            Some(v) => (Some(v.version), v.data),
            None => {
                let fresh = BudgetStateData::empty(
                    state.spec.id.clone(),
                    scope_key.clone(),
                    state.data.period_start,
                    state.data.period_end,
                );
                (None, fresh)
            }
        };
        delta.apply(&mut merged);

        match store
            .compare_and_set(&scope_key, expected_version, merged.clone(), expires_at)
            .await
        {
            Ok(CasOutcome::Ok) => {
                state.data = merged;
                state.version = None;
                return SyncResult::Synced;
            }
            Ok(CasOutcome::Conflict) => {
                tracing::debug!(
                    scope_key = %scope_key,
                    attempt,
                    "budget CAS conflict, retrying from read"
                );
            }
            Err(e) => return SyncResult::Failed(e),
        }
    }
    SyncResult::Contended
}

/// Adopt the store's record for the current window, if one exists.
///
/// Used at admission so checks see fleet-wide totals. Best-effort: a
/// failed read keeps the local state.
pub(crate) async fn refresh_state(
    store: &dyn BudgetStore,
    state: &mut BudgetState,
) -> Result<(), StoreError> {
    let read = store.get(&state.data.scope_key).await?;
    if let Some(v) = read.filter(|v| v.data.period_end == state.data.period_end) {
        state.version = Some(v.version);
        state.data = v.data;
    }
    Ok(())
}
