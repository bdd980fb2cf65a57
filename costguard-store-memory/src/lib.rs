#![deny(missing_docs)]
//! In-memory implementation of the [`BudgetStore`] contract.
//!
//! A `HashMap` behind a `RwLock`, with a version counter per key for
//! compare-and-set and lazy TTL expiry on read. Suitable for tests and
//! single-process deployments; a fleet shares state through a networked
//! backend implementing the same trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use costguard_types::{
    BudgetStateData, BudgetStore, CasOutcome, Clock, ScopeKey, StoreError, SystemClock,
    VersionedState,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

struct Record {
    data: BudgetStateData,
    version: u64,
    expires_at: DateTime<Utc>,
}

/// In-memory versioned budget store.
pub struct MemoryBudgetStore {
    records: RwLock<HashMap<String, Record>>,
    clock: Arc<dyn Clock>,
}

impl MemoryBudgetStore {
    /// An empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// An empty store on an injected clock, for TTL tests.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            clock,
        }
    }

    fn live<'a>(&self, record: Option<&'a Record>, now: DateTime<Utc>) -> Option<&'a Record> {
        record.filter(|r| r.expires_at > now)
    }
}

impl Default for MemoryBudgetStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BudgetStore for MemoryBudgetStore {
    async fn get(&self, scope_key: &ScopeKey) -> Result<Option<VersionedState>, StoreError> {
        let now = self.clock.now();
        let records = self.records.read().await;
        Ok(self
            .live(records.get(scope_key.as_str()), now)
            .map(|r| VersionedState {
                data: r.data.clone(),
                version: r.version,
            }))
    }

    async fn compare_and_set(
        &self,
        scope_key: &ScopeKey,
        expected_version: Option<u64>,
        data: BudgetStateData,
        expires_at: DateTime<Utc>,
    ) -> Result<CasOutcome, StoreError> {
        let now = self.clock.now();
        let mut records = self.records.write().await;
        let current = self
            .live(records.get(scope_key.as_str()), now)
            .map(|r| r.version);
        if current != expected_version {
            return Ok(CasOutcome::Conflict);
        }
        let version = current.map_or(1, |v| v + 1);
        records.insert(
            scope_key.as_str().to_string(),
            Record {
                data,
                version,
                expires_at,
            },
        );
        Ok(CasOutcome::Ok)
    }

    async fn set_with_ttl(
        &self,
        scope_key: &ScopeKey,
        data: BudgetStateData,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let version = records
            .get(scope_key.as_str())
            .map_or(1, |r| r.version + 1);
        records.insert(
            scope_key.as_str().to_string(),
            Record {
                data,
                version,
                expires_at,
            },
        );
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<ScopeKey>, StoreError> {
        let now = self.clock.now();
        let records = self.records.read().await;
        let mut keys: Vec<ScopeKey> = records
            .iter()
            .filter(|(k, r)| r.expires_at > now && k.starts_with(prefix))
            .map(|(k, _)| ScopeKey::from_encoded(k.clone()))
            .collect();
        keys.sort();
        Ok(keys)
    }
}
