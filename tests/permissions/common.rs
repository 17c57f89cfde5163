/*!
 * Shared fixtures for the authorization tests
 */

use async_trait::async_trait;
use context_authz::core::types::{DelegationId, ElevationId, PrincipalId, TenantId};
use context_authz::identity::IdentityProvider;
use context_authz::permissions::audit::{AuditEvent, AuditKind, AuditSink, MemoryAuditSink};
use context_authz::permissions::delegation::Delegation;
use context_authz::permissions::elevation::Elevation;
use context_authz::permissions::graph::{GraphBuilder, PermissionGraph, PermissionNode};
use context_authz::store::{MemoryPolicyStore, PolicyStore};
use context_authz::{
    Action, AuthorizationManager, AuthorizationRequest, AuthzConfig, CapabilitySet,
    CorporateContext, FeatureFlags, ManualClock, Principal, ResourceRef, SharedClock, StoreError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// viewer ← editor ← manager
pub fn graph() -> PermissionGraph {
    GraphBuilder::new()
        .with(PermissionNode::new(
            "viewer",
            CapabilitySet::parse(["read:report", "list:report"]).unwrap(),
        ))
        .with(
            PermissionNode::new("editor", CapabilitySet::parse(["write:report"]).unwrap())
                .with_parent("viewer"),
        )
        .with(
            PermissionNode::new(
                "manager",
                CapabilitySet::parse(["approve:report", "create:report"]).unwrap(),
            )
            .with_parent("editor"),
        )
        .build()
        .unwrap()
}

pub fn tenants() -> Vec<CorporateContext> {
    vec![
        CorporateContext::new("acme")
            .allow_domain("company.com")
            .with_inheritance(true),
        CorporateContext::new("globex")
            .allow_domain("company.com")
            .with_inheritance(true),
        CorporateContext::new("flat").allow_domain("company.com"),
        CorporateContext::new("partners").allow_domain("partner.org"),
        CorporateContext::new("slowcorp").allow_domain("company.com"),
    ]
}

pub fn alice() -> Principal {
    Principal::new("alice", "company.com").with_role("viewer")
}

pub fn bob() -> Principal {
    Principal::new("bob", "company.com").with_role("manager")
}

pub fn carol() -> Principal {
    Principal::new("carol", "company.com")
}

pub fn acme() -> TenantId {
    TenantId::from("acme")
}

pub fn report(action: Action, principal: Principal, tenant: &str) -> AuthorizationRequest {
    AuthorizationRequest::new(
        principal,
        action,
        ResourceRef::new("report".parse().unwrap()).with_id("q3"),
        tenant,
    )
}

pub fn scope(values: &[&str]) -> CapabilitySet {
    CapabilitySet::parse(values.iter().copied()).unwrap()
}

pub fn config(features: FeatureFlags) -> AuthzConfig {
    AuthzConfig::default()
        .without_required_encryption()
        .with_features(features)
}

/// Audit sink with an outage switch
#[derive(Default)]
pub struct SwitchableSink {
    pub inner: MemoryAuditSink,
    offline: AtomicBool,
}

impl SwitchableSink {
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuditSink for SwitchableSink {
    async fn append(&self, event: &AuditEvent) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::new("audit sink offline"));
        }
        self.inner.append(event).await
    }
}

/// Policy store whose `slowcorp` tenant takes longer to load than any sane timeout
pub struct SlowTenantStore {
    pub inner: MemoryPolicyStore,
    pub delay: Duration,
}

#[async_trait]
impl PolicyStore for SlowTenantStore {
    async fn load_tenant(&self, tenant: &TenantId) -> Result<Option<CorporateContext>, StoreError> {
        if tenant.as_str() == "slowcorp" {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.load_tenant(tenant).await
    }

    async fn load_principal(&self, id: &PrincipalId) -> Result<Option<Principal>, StoreError> {
        self.inner.load_principal(id).await
    }

    async fn save_principal(&self, principal: &Principal) -> Result<(), StoreError> {
        self.inner.save_principal(principal).await
    }

    async fn save_delegation(&self, delegation: &Delegation) -> Result<(), StoreError> {
        self.inner.save_delegation(delegation).await
    }

    async fn load_delegation(&self, id: &DelegationId) -> Result<Option<Delegation>, StoreError> {
        self.inner.load_delegation(id).await
    }

    async fn list_delegations(&self) -> Result<Vec<Delegation>, StoreError> {
        self.inner.list_delegations().await
    }

    async fn save_elevation(&self, elevation: &Elevation) -> Result<(), StoreError> {
        self.inner.save_elevation(elevation).await
    }

    async fn load_elevation(&self, id: &ElevationId) -> Result<Option<Elevation>, StoreError> {
        self.inner.load_elevation(id).await
    }

    async fn list_elevations(&self) -> Result<Vec<Elevation>, StoreError> {
        self.inner.list_elevations().await
    }
}

pub fn policy_store() -> MemoryPolicyStore {
    tenants()
        .into_iter()
        .fold(MemoryPolicyStore::new(), |store, tenant| store.with_tenant(tenant))
}

/// A manager over in-memory collaborators and a manual clock
pub struct Harness {
    pub manager: Arc<AuthorizationManager>,
    pub sink: Arc<SwitchableSink>,
    pub store: Arc<MemoryPolicyStore>,
    pub clock: ManualClock,
}

impl Harness {
    pub fn new(features: FeatureFlags) -> Self {
        Self::with_config(config(features), None)
    }

    pub fn with_config(config: AuthzConfig, identity: Option<Arc<dyn IdentityProvider>>) -> Self {
        let sink = Arc::new(SwitchableSink::default());
        let store = Arc::new(policy_store());
        let clock = ManualClock::starting_now();
        let shared: SharedClock = Arc::new(clock.clone());

        let mut builder = AuthorizationManager::builder(config)
            .graph(graph())
            .policy_store(store.clone())
            .audit_sink(sink.clone())
            .clock(shared);
        if let Some(identity) = identity {
            builder = builder.identity_provider(identity);
        }

        Self {
            manager: Arc::new(builder.build().unwrap()),
            sink,
            store,
            clock,
        }
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.sink.inner.events()
    }

    pub fn events_of(&self, kind: AuditKind) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.kind == kind)
            .collect()
    }
}
