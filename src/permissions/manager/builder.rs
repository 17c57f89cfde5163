/*!
 * Manager Builder
 * Wires collaborators into an `AuthorizationManager`, defaulting to the
 * bundled in-memory implementations
 */

use super::manager::AuthorizationManager;
use crate::config::AuthzConfig;
use crate::core::clock::{SharedClock, SystemClock};
use crate::core::errors::ConfigurationError;
use crate::core::limits::{MAX_ESCALATED_AUDIT_EVENTS, MAX_PENDING_AUDIT_EVENTS};
use crate::identity::IdentityProvider;
use crate::permissions::audit::{AuditLedger, AuditSink, LedgerSettings, MemoryAuditSink};
use crate::permissions::cache::{CacheStore, DecisionCache, MemoryCacheStore};
use crate::permissions::context::{ContextManager, TenantDirectory};
use crate::permissions::delegation::DelegationManager;
use crate::permissions::elevation::ElevationManager;
use crate::permissions::graph::PermissionGraph;
use crate::permissions::ratelimit::RateLimiter;
use crate::store::{MemoryPolicyStore, PolicyStore};
use arc_swap::ArcSwap;
use std::sync::Arc;
use tracing::info;

pub struct AuthorizationManagerBuilder {
    config: AuthzConfig,
    graph: Option<PermissionGraph>,
    store: Option<Arc<dyn PolicyStore>>,
    sink: Option<Arc<dyn AuditSink>>,
    cache_store: Option<Arc<dyn CacheStore>>,
    identity: Option<Arc<dyn IdentityProvider>>,
    clock: Option<SharedClock>,
}

impl AuthorizationManagerBuilder {
    pub fn new(config: AuthzConfig) -> Self {
        Self {
            config,
            graph: None,
            store: None,
            sink: None,
            cache_store: None,
            identity: None,
            clock: None,
        }
    }

    pub fn graph(mut self, graph: PermissionGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn policy_store(mut self, store: Arc<dyn PolicyStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    pub fn identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(provider);
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the configuration and assemble the manager
    pub fn build(self) -> Result<AuthorizationManager, ConfigurationError> {
        let config = self.config;
        config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryPolicyStore::new()));
        let sink = self.sink.unwrap_or_else(|| Arc::new(MemoryAuditSink::new()));
        let cache_store = self.cache_store.unwrap_or_else(|| {
            Arc::new(MemoryCacheStore::new(config.cache_max_entries, clock.clone()))
        });

        let ledger = AuditLedger::new(
            sink,
            LedgerSettings {
                cipher: config.payload_cipher(),
                retention: config.audit.retention,
                comprehensive: config.features.comprehensive_audit,
                retry: config.audit.retry,
                pending_capacity: MAX_PENDING_AUDIT_EVENTS,
                escalation_capacity: MAX_ESCALATED_AUDIT_EVENTS,
            },
            clock.clone(),
        );

        info!(
            cache_ttl_ms = config.cache_ttl.as_millis() as u64,
            inheritance = config.features.inheritance,
            context_switching = config.features.context_switching,
            delegation = config.features.delegation,
            elevation = config.features.elevation,
            identity_provider = self.identity.is_some(),
            "authorization manager initialized"
        );

        Ok(AuthorizationManager {
            graph: ArcSwap::from_pointee(self.graph.unwrap_or_default()),
            tenants: TenantDirectory::new(store.clone()),
            contexts: ContextManager::new(config.context_validation_timeout, clock.clone()),
            delegations: DelegationManager::new(config.max_delegation_duration, clock.clone()),
            elevations: ElevationManager::new(config.max_elevation_duration, clock.clone()),
            limiter: RateLimiter::new(config.rate_limits, cache_store.clone(), clock.clone()),
            cache: DecisionCache::new(cache_store, config.cache_ttl, clock.clone()),
            ledger: Arc::new(ledger),
            store,
            identity: self.identity,
            clock,
            config,
        })
    }
}
