/*!
 * Context Authorization Library
 * Context-aware authorization and delegation core
 */

pub mod config;
pub mod core;
pub mod identity;
pub mod monitoring;
pub mod permissions;
pub mod store;

// Re-exports
pub use config::{AuthzConfig, FeatureFlags};
pub use crate::core::{
    AuthzError, AuthzResult, Clock, ConfigurationError, DelegationId, Domain, ElevationId, EventId,
    ManualClock, PrincipalId, RoleId, SessionId, SharedClock, StoreError, SystemClock, TenantId,
};
pub use identity::{IdentityProvider, ResolvedIdentity, StaticIdentityProvider};
pub use monitoring::init_tracing;
pub use permissions::{
    Action, AuthorizationDecision, AuthorizationManager, AuthorizationRequest, Authorizer,
    CapabilitySet, CorporateContext, Outcome, Principal, ReasonCode, ReasonKind, ResourceRef,
};
pub use store::{MemoryPolicyStore, PolicyStore};
