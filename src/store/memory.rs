/*!
 * In-Memory Policy Store
 */

use super::PolicyStore;
use crate::core::errors::StoreError;
use crate::core::types::{DelegationId, ElevationId, PrincipalId, TenantId};
use crate::permissions::delegation::Delegation;
use crate::permissions::elevation::Elevation;
use crate::permissions::types::{CorporateContext, Principal};
use ahash::RandomState;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// DashMap-backed store, with an outage switch for failure testing
pub struct MemoryPolicyStore {
    tenants: DashMap<TenantId, CorporateContext, RandomState>,
    principals: DashMap<PrincipalId, Principal, RandomState>,
    delegations: DashMap<DelegationId, Delegation, RandomState>,
    elevations: DashMap<ElevationId, Elevation, RandomState>,
    unavailable: AtomicBool,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self {
            tenants: DashMap::with_hasher(RandomState::new()),
            principals: DashMap::with_hasher(RandomState::new()),
            delegations: DashMap::with_hasher(RandomState::new()),
            elevations: DashMap::with_hasher(RandomState::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn with_tenant(self, context: CorporateContext) -> Self {
        self.put_tenant(context);
        self
    }

    pub fn with_principal(self, principal: Principal) -> Self {
        self.principals.insert(principal.id.clone(), principal);
        self
    }

    pub fn put_tenant(&self, context: CorporateContext) {
        self.tenants.insert(context.tenant.clone(), context);
    }

    /// Make every subsequent call fail until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::new("policy store unavailable"));
        }
        Ok(())
    }
}

impl Default for MemoryPolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn load_tenant(&self, tenant: &TenantId) -> Result<Option<CorporateContext>, StoreError> {
        self.check_available()?;
        Ok(self.tenants.get(tenant).map(|entry| entry.clone()))
    }

    async fn load_principal(&self, id: &PrincipalId) -> Result<Option<Principal>, StoreError> {
        self.check_available()?;
        Ok(self.principals.get(id).map(|entry| entry.clone()))
    }

    async fn save_principal(&self, principal: &Principal) -> Result<(), StoreError> {
        self.check_available()?;
        self.principals.insert(principal.id.clone(), principal.clone());
        Ok(())
    }

    async fn save_delegation(&self, delegation: &Delegation) -> Result<(), StoreError> {
        self.check_available()?;
        self.delegations.insert(delegation.id, delegation.clone());
        Ok(())
    }

    async fn load_delegation(&self, id: &DelegationId) -> Result<Option<Delegation>, StoreError> {
        self.check_available()?;
        Ok(self.delegations.get(id).map(|entry| entry.clone()))
    }

    async fn list_delegations(&self) -> Result<Vec<Delegation>, StoreError> {
        self.check_available()?;
        Ok(self.delegations.iter().map(|entry| entry.value().clone()).collect())
    }

    async fn save_elevation(&self, elevation: &Elevation) -> Result<(), StoreError> {
        self.check_available()?;
        self.elevations.insert(elevation.id, elevation.clone());
        Ok(())
    }

    async fn load_elevation(&self, id: &ElevationId) -> Result<Option<Elevation>, StoreError> {
        self.check_available()?;
        Ok(self.elevations.get(id).map(|entry| entry.clone()))
    }

    async fn list_elevations(&self) -> Result<Vec<Elevation>, StoreError> {
        self.check_available()?;
        Ok(self.elevations.iter().map(|entry| entry.value().clone()).collect())
    }
}
