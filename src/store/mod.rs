/*!
 * Policy Store
 * Persistence collaborator for tenants, principals and grants
 *
 * The core issues reads and writes through this trait and never embeds
 * storage-engine logic. Delegations and elevations are written through on
 * every change and hydrated on startup.
 */

mod memory;

pub use memory::MemoryPolicyStore;

use crate::core::errors::StoreError;
use crate::core::types::{DelegationId, ElevationId, PrincipalId, TenantId};
use crate::permissions::delegation::Delegation;
use crate::permissions::elevation::Elevation;
use crate::permissions::types::{CorporateContext, Principal};
use async_trait::async_trait;

/// Durable store for authorization state
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn load_tenant(&self, tenant: &TenantId) -> Result<Option<CorporateContext>, StoreError>;

    async fn load_principal(&self, id: &PrincipalId) -> Result<Option<Principal>, StoreError>;

    async fn save_principal(&self, principal: &Principal) -> Result<(), StoreError>;

    async fn save_delegation(&self, delegation: &Delegation) -> Result<(), StoreError>;

    async fn load_delegation(&self, id: &DelegationId) -> Result<Option<Delegation>, StoreError>;

    /// Every stored delegation, revoked and expired included
    async fn list_delegations(&self) -> Result<Vec<Delegation>, StoreError>;

    async fn save_elevation(&self, elevation: &Elevation) -> Result<(), StoreError>;

    async fn load_elevation(&self, id: &ElevationId) -> Result<Option<Elevation>, StoreError>;

    async fn list_elevations(&self) -> Result<Vec<Elevation>, StoreError>;
}
