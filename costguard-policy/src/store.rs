//! The snapshot policy store.
//!
//! Holds an immutable [`PolicySnapshot`] behind an atomically-swapped
//! pointer. Readers never lock against a reload: they clone the `Arc`
//! and work with whatever snapshot was current. Reloads are lazy (before
//! a lookup, when the refresh interval has elapsed), single-flight, and
//! best-effort — a failed load keeps the previous snapshot and warns.

use crate::budget::BudgetSpec;
use crate::routing::RoutingPolicy;
use crate::source::PolicySource;
use chrono::{DateTime, Utc};
use costguard_pricing::PricingTable;
use costguard_types::{Clock, ConfigError, RunContext};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// One immutable generation of loaded policy.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    /// Budget policies, in document order.
    pub budgets: Vec<Arc<BudgetSpec>>,
    /// Routing policies, in document order.
    pub routing: Vec<Arc<RoutingPolicy>>,
    /// The pricing table.
    pub pricing: Arc<PricingTable>,
    /// When this snapshot was last loaded or confirmed current.
    pub loaded_at: DateTime<Utc>,
}

impl PolicySnapshot {
    /// All enabled budgets whose patterns match the context.
    /// Every one of them applies concurrently.
    pub fn budgets_for(&self, ctx: &RunContext) -> Vec<Arc<BudgetSpec>> {
        self.budgets
            .iter()
            .filter(|b| b.applies_to(ctx))
            .cloned()
            .collect()
    }

    /// The single routing policy driving model selection for the
    /// context: highest priority score, first-in-document-order on ties.
    pub fn routing_for(&self, ctx: &RunContext) -> Option<Arc<RoutingPolicy>> {
        let mut best: Option<&Arc<RoutingPolicy>> = None;
        for policy in self.routing.iter().filter(|p| p.applies_to(ctx)) {
            match best {
                // Strictly greater replaces, so the earliest of equals wins.
                Some(current) if policy.priority() <= current.priority() => {}
                _ => best = Some(policy),
            }
        }
        best.cloned()
    }
}

/// Caches policy snapshots and resolves them by context.
pub struct PolicyStore {
    source: Arc<dyn PolicySource>,
    refresh_interval: Duration,
    clock: Arc<dyn Clock>,
    snapshot: RwLock<Arc<PolicySnapshot>>,
    refresh_gate: tokio::sync::Mutex<()>,
}

impl PolicyStore {
    /// Load the initial snapshot from the source.
    ///
    /// Unlike refreshes, the initial load must succeed — there is no
    /// prior snapshot to fall back to.
    pub async fn load(
        source: Arc<dyn PolicySource>,
        refresh_interval: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let docs = source.load().await?;
        let snapshot = Arc::new(PolicySnapshot {
            budgets: docs.budgets.into_iter().map(Arc::new).collect(),
            routing: docs.routing.into_iter().map(Arc::new).collect(),
            pricing: Arc::new(docs.pricing),
            loaded_at: clock.now(),
        });
        Ok(Self {
            source,
            refresh_interval,
            clock,
            snapshot: RwLock::new(snapshot),
            refresh_gate: tokio::sync::Mutex::new(()),
        })
    }

    /// The current snapshot, without checking freshness.
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        Arc::clone(&self.snapshot.read().expect("policy snapshot lock poisoned"))
    }

    /// The current snapshot, reloading first if the refresh interval has
    /// elapsed. Reload failures keep the previous snapshot.
    pub async fn current(&self) -> Arc<PolicySnapshot> {
        let snapshot = self.snapshot();
        let now = self.clock.now();
        let age = (now - snapshot.loaded_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if age < self.refresh_interval {
            return snapshot;
        }

        // Single-flight: concurrent callers wait, then see the fresh swap.
        let _gate = self.refresh_gate.lock().await;
        let snapshot = self.snapshot();
        let age = (self.clock.now() - snapshot.loaded_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if age < self.refresh_interval {
            return snapshot;
        }
        self.refresh(snapshot).await
    }

    async fn refresh(&self, previous: Arc<PolicySnapshot>) -> Arc<PolicySnapshot> {
        let now = self.clock.now();
        let next = match self.source.load().await {
            Ok(docs) => Arc::new(PolicySnapshot {
                budgets: docs.budgets.into_iter().map(Arc::new).collect(),
                routing: docs.routing.into_iter().map(Arc::new).collect(),
                pricing: Arc::new(docs.pricing),
                loaded_at: now,
            }),
            Err(e) => {
                tracing::warn!(error = %e, "policy reload failed, keeping previous snapshot");
                // Stamp the attempt so a dead source isn't hammered on
                // every lookup.
                Arc::new(PolicySnapshot {
                    loaded_at: now,
                    ..(*previous).clone()
                })
            }
        };
        *self.snapshot.write().expect("policy snapshot lock poisoned") = Arc::clone(&next);
        next
    }
}
