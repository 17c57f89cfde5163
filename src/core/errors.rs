/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use crate::core::types::{DelegationId, Domain, ElevationId, PrincipalId, RoleId, SessionId, TenantId};
use crate::permissions::types::{RateCategory, ReasonCode};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for authorization operations
pub type AuthzResult<T> = Result<T, AuthzError>;

/// Configuration faults: fatal to the affected decision, never a silent denial
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum ConfigurationError {
    #[error("Unknown role '{role}'")]
    #[diagnostic(
        code(config::unknown_role),
        help("The role is referenced by a principal or parent edge but missing from the role catalog.")
    )]
    UnknownRole { role: RoleId },

    #[error("Cyclic role graph: {}", format_roles(.roles))]
    #[diagnostic(
        code(config::cyclic_role_graph),
        help("Role inheritance must form a DAG. Remove one parent edge from the listed roles.")
    )]
    CyclicRoleGraph { roles: Vec<RoleId> },

    #[error("Invalid capability '{value}': {reason}")]
    #[diagnostic(
        code(config::invalid_capability),
        help("Capabilities are written as `action:resource`, e.g. `read:report` or `write:*`.")
    )]
    InvalidCapability { value: String, reason: String },

    #[error("Invalid setting {key}={value}: {reason}")]
    #[diagnostic(code(config::invalid_setting))]
    InvalidSetting {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Missing required setting {key}")]
    #[diagnostic(
        code(config::missing_setting),
        help("Set the variable in the environment or provide it through the config lookup.")
    )]
    MissingSetting { key: String },
}

fn format_roles(roles: &[RoleId]) -> String {
    roles
        .iter()
        .map(RoleId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Failures reported by a persistence collaborator
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[error("Store error: {reason}")]
#[diagnostic(code(store::failure))]
pub struct StoreError {
    pub reason: String,
}

impl StoreError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Unified authorization error
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum AuthzError {
    #[error("Authentication failed: {reason}")]
    #[diagnostic(
        code(authz::authentication),
        help("The identity provider could not resolve the principal. Re-authenticate upstream.")
    )]
    Authentication { reason: String },

    #[error("Configuration error: {0}")]
    #[diagnostic(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Context validation for tenant '{tenant}' exceeded {timeout_ms}ms")]
    #[diagnostic(
        code(authz::context_validation_timeout),
        help("The session keeps its previous context. Retry or raise AUTHZ_CONTEXT_VALIDATION_TIMEOUT_MS.")
    )]
    ContextValidationTimeout { tenant: TenantId, timeout_ms: u64 },

    #[error("Context switch to tenant '{tenant}' rejected: domain '{domain}' is not whitelisted")]
    #[diagnostic(code(authz::context_switch_rejected))]
    ContextSwitchRejected { tenant: TenantId, domain: Domain },

    #[error("Insufficient scope: grantor does not hold {}", .missing.join(", "))]
    #[diagnostic(
        code(authz::insufficient_scope),
        help("A delegation may only carry capabilities the grantor effectively holds.")
    )]
    InsufficientScope { missing: Vec<String> },

    #[error("Rate limit exceeded for {principal} ({category}), retry after {retry_after_ms}ms")]
    #[diagnostic(code(authz::rate_limit_exceeded))]
    RateLimitExceeded {
        principal: PrincipalId,
        category: RateCategory,
        retry_after_ms: u64,
    },

    #[error("Audit write failed: {reason}")]
    #[diagnostic(
        code(authz::audit_write_failure),
        help("Decisions are denied until the audit sink recovers. Check the sink's availability.")
    )]
    AuditWriteFailure { reason: String },

    #[error("Feature disabled: {feature}")]
    #[diagnostic(
        code(authz::feature_disabled),
        help("Enable the feature with the matching AUTHZ_ENABLE_* setting.")
    )]
    FeatureDisabled { feature: String },

    #[error("Session {0} not found")]
    #[diagnostic(code(authz::session_not_found))]
    SessionNotFound(SessionId),

    #[error("Session {0} already has a context switch in flight")]
    #[diagnostic(code(authz::session_busy))]
    SessionBusy(SessionId),

    #[error("Unknown tenant '{0}'")]
    #[diagnostic(code(authz::unknown_tenant))]
    UnknownTenant(TenantId),

    #[error("Delegation {0} not found")]
    #[diagnostic(code(authz::unknown_delegation))]
    UnknownDelegation(DelegationId),

    #[error("Elevation {0} not found")]
    #[diagnostic(code(authz::unknown_elevation))]
    UnknownElevation(ElevationId),

    #[error("Not permitted: {reason}")]
    #[diagnostic(code(authz::not_permitted))]
    NotPermitted { reason: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

impl AuthzError {
    /// Reason code recorded in the audit trail for this failure
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            AuthzError::Authentication { .. } => ReasonCode::AuthenticationFailed,
            AuthzError::Configuration(_) => ReasonCode::ConfigurationFault,
            AuthzError::ContextValidationTimeout { .. } => ReasonCode::ContextValidationTimeout,
            AuthzError::ContextSwitchRejected { .. } => ReasonCode::DomainNotWhitelisted,
            AuthzError::InsufficientScope { .. } => ReasonCode::InsufficientScope,
            AuthzError::RateLimitExceeded { .. } => ReasonCode::RateLimited,
            AuthzError::AuditWriteFailure { .. } => ReasonCode::AuditUnavailable,
            AuthzError::FeatureDisabled { .. } => ReasonCode::FeatureDisabled,
            AuthzError::SessionNotFound(_) | AuthzError::SessionBusy(_) => {
                ReasonCode::ContextMismatch
            }
            AuthzError::UnknownTenant(_) => ReasonCode::UnknownTenant,
            AuthzError::UnknownDelegation(_)
            | AuthzError::UnknownElevation(_)
            | AuthzError::NotPermitted { .. } => ReasonCode::NotPermitted,
            AuthzError::Store(_) => ReasonCode::StoreUnavailable,
        }
    }
}
