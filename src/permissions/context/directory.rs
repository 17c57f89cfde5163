/*!
 * Tenant Directory
 * Read-only cache of corporate contexts loaded from the policy store
 */

use crate::core::errors::{AuthzError, AuthzResult};
use crate::core::types::TenantId;
use crate::permissions::types::CorporateContext;
use crate::store::PolicyStore;
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

pub struct TenantDirectory {
    store: Arc<dyn PolicyStore>,
    tenants: DashMap<TenantId, Arc<CorporateContext>, RandomState>,
}

impl TenantDirectory {
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self {
            store,
            tenants: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Cached context, loading it on first use
    pub async fn resolve(&self, tenant: &TenantId) -> AuthzResult<Arc<CorporateContext>> {
        if let Some(context) = self.tenants.get(tenant) {
            return Ok(Arc::clone(context.value()));
        }

        let context = self
            .store
            .load_tenant(tenant)
            .await?
            .ok_or_else(|| AuthzError::UnknownTenant(tenant.clone()))?;
        debug!(tenant = %tenant, whitelist = context.domain_whitelist.len(), "tenant context loaded");

        let context = Arc::new(context);
        self.tenants.insert(tenant.clone(), Arc::clone(&context));
        Ok(context)
    }

    /// Forget a tenant so the next resolution reloads it
    pub fn invalidate(&self, tenant: &TenantId) {
        self.tenants.remove(tenant);
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}
