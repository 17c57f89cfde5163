/*!
 * Maintenance
 * Role reloads, grant hydration and background reclamation
 */

use super::manager::AuthorizationManager;
use crate::core::errors::AuthzResult;
use crate::permissions::graph::PermissionGraph;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Storage reclaimed by one reaper pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapReport {
    pub delegations: usize,
    pub elevations: usize,
    pub sessions: usize,
    pub rate_buckets: usize,
}

impl ReapReport {
    pub fn total(&self) -> usize {
        self.delegations + self.elevations + self.sessions + self.rate_buckets
    }
}

/// Active grants loaded from the policy store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HydrationReport {
    pub delegations: usize,
    pub elevations: usize,
}

impl AuthorizationManager {
    /// Replace the role graph
    ///
    /// Cached decisions computed against the old graph stop matching because
    /// the graph digest is part of every fingerprint.
    pub fn reload_roles(&self, graph: PermissionGraph) {
        let previous = self.graph.swap(Arc::new(graph));
        info!(
            previous = previous.digest(),
            current = self.graph.load().digest(),
            roles = self.graph.load().len(),
            "role graph reloaded"
        );
    }

    /// Load still-active delegations and elevations from the store
    pub async fn hydrate(&self) -> AuthzResult<HydrationReport> {
        let delegations = self.store.list_delegations().await?;
        let elevations = self.store.list_elevations().await?;
        let report = HydrationReport {
            delegations: self.delegations.hydrate(delegations),
            elevations: self.elevations.hydrate(elevations),
        };
        info!(
            delegations = report.delegations,
            elevations = report.elevations,
            "grants hydrated from policy store"
        );
        Ok(report)
    }

    /// Reclaim expired or revoked grants, ended sessions and idle rate buckets
    ///
    /// Expiry is already enforced at evaluation time; this only frees memory.
    pub fn reap_expired(&self) -> ReapReport {
        let report = ReapReport {
            delegations: self.delegations.reap(),
            elevations: self.elevations.reap(),
            sessions: self.contexts.purge_closed(),
            rate_buckets: self.limiter.purge_idle(),
        };
        if report.total() > 0 {
            debug!(
                delegations = report.delegations,
                elevations = report.elevations,
                sessions = report.sessions,
                rate_buckets = report.rate_buckets,
                "reaper pass reclaimed storage"
            );
        }
        report
    }

    /// Run `reap_expired` periodically in the background
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                manager.reap_expired();
            }
        })
    }

    /// Retry queued audit events periodically in the background
    pub fn spawn_audit_recovery(&self, interval: Duration) -> JoinHandle<()> {
        self.ledger.spawn_recovery(interval)
    }
}
