/*!
 * Permission Types
 * Core types for context-aware permission decisions
 */

use crate::core::errors::ConfigurationError;
use crate::core::types::{Domain, EventId, PrincipalId, RoleId, SessionId, TenantId};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DeserializeFromStr, SerializeDisplay, TimestampMilliSeconds};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

/// Action being performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Write,
    Create,
    Delete,
    List,
    Execute,
    Approve,
    Administer,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::Read,
        Action::Write,
        Action::Create,
        Action::Delete,
        Action::List,
        Action::Execute,
        Action::Approve,
        Action::Administer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::Create => "create",
            Action::Delete => "delete",
            Action::List => "list",
            Action::Execute => "execute",
            Action::Approve => "approve",
            Action::Administer => "administer",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .iter()
            .copied()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| ConfigurationError::InvalidCapability {
                value: s.to_string(),
                reason: "unknown action".to_string(),
            })
    }
}

/// Kind of resource a capability applies to, or the `*` wildcard
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr,
)]
pub struct ResourceKind(String);

impl ResourceKind {
    pub const WILDCARD: &'static str = "*";
    const MAX_LEN: usize = 64;

    pub fn wildcard() -> Self {
        Self(Self::WILDCARD.to_string())
    }

    pub fn is_wildcard(&self) -> bool {
        self.0 == Self::WILDCARD
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ResourceKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigurationError::InvalidCapability {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        if s == Self::WILDCARD {
            return Ok(Self::wildcard());
        }
        if s.is_empty() || s.len() > Self::MAX_LEN {
            return Err(invalid("resource kind must be 1-64 characters"));
        }
        let valid = s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(invalid("resource kind allows only [a-z0-9._-] or `*`"));
        }
        Ok(Self(s.to_string()))
    }
}

/// A single granted capability: an action over a resource kind
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr,
)]
pub struct Capability {
    pub action: Action,
    pub resource: ResourceKind,
}

impl Capability {
    pub fn new(action: Action, resource: ResourceKind) -> Self {
        Self { action, resource }
    }

    /// Whether this capability authorizes `action` on `resource`
    pub fn permits(&self, action: Action, resource: &ResourceKind) -> bool {
        self.action == action && (self.resource.is_wildcard() || &self.resource == resource)
    }

    /// Whether holding this capability implies holding `other`
    pub fn covers(&self, other: &Capability) -> bool {
        self.action == other.action
            && (self.resource.is_wildcard() || self.resource == other.resource)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.action, self.resource)
    }
}

impl FromStr for Capability {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (action, resource) =
            s.split_once(':')
                .ok_or_else(|| ConfigurationError::InvalidCapability {
                    value: s.to_string(),
                    reason: "expected `action:resource`".to_string(),
                })?;
        Ok(Self {
            action: action.trim().parse()?,
            resource: resource.trim().parse()?,
        })
    }
}

/// Ordered set of capabilities
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a list of `action:resource` strings
    pub fn parse<I, S>(values: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        values
            .into_iter()
            .map(|value| value.as_ref().parse::<Capability>())
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Self)
    }

    pub fn insert(&mut self, capability: Capability) -> bool {
        self.0.insert(capability)
    }

    /// Union, never override
    pub fn extend(&mut self, other: &CapabilitySet) {
        self.0.extend(other.0.iter().cloned());
    }

    pub fn contains(&self, capability: &Capability) -> bool {
        self.0.contains(capability)
    }

    pub fn permits(&self, action: Action, resource: &ResourceKind) -> bool {
        self.0.iter().any(|cap| cap.permits(action, resource))
    }

    pub fn covers(&self, capability: &Capability) -> bool {
        self.0.iter().any(|held| held.covers(capability))
    }

    /// Capabilities of `requested` that this set does not cover
    pub fn missing(&self, requested: &CapabilitySet) -> Vec<Capability> {
        requested
            .iter()
            .filter(|cap| !self.covers(cap))
            .cloned()
            .collect()
    }

    pub fn is_superset_of(&self, requested: &CapabilitySet) -> bool {
        requested.iter().all(|cap| self.covers(cap))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Resource targeted by a request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ResourceRef {
    pub kind: ResourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind) -> Self {
        Self { kind, id: None }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}/{}", self.kind, id),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// An authenticated actor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub domain: Domain,
    #[serde(default)]
    pub roles: BTreeSet<RoleId>,
}

impl Principal {
    pub fn new(id: impl Into<PrincipalId>, domain: impl AsRef<str>) -> Self {
        Self {
            id: id.into(),
            domain: Domain::normalized(domain),
            roles: BTreeSet::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<RoleId>) -> Self {
        self.roles.insert(role.into());
        self
    }
}

/// Tenant scoping configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorporateContext {
    pub tenant: TenantId,
    #[serde(default)]
    pub domain_whitelist: BTreeSet<Domain>,
    #[serde(default)]
    pub sso_enabled: bool,
    #[serde(default)]
    pub inheritance_enabled: bool,
}

impl CorporateContext {
    pub fn new(tenant: impl Into<TenantId>) -> Self {
        Self {
            tenant: tenant.into(),
            domain_whitelist: BTreeSet::new(),
            sso_enabled: false,
            inheritance_enabled: false,
        }
    }

    pub fn allow_domain(mut self, domain: impl AsRef<str>) -> Self {
        self.domain_whitelist.insert(Domain::normalized(domain));
        self
    }

    pub fn with_inheritance(mut self, enabled: bool) -> Self {
        self.inheritance_enabled = enabled;
        self
    }

    pub fn with_sso(mut self, enabled: bool) -> Self {
        self.sso_enabled = enabled;
        self
    }

    /// An empty whitelist admits nobody
    pub fn admits(&self, domain: &Domain) -> bool {
        self.domain_whitelist.contains(domain)
    }
}

/// Rate-limited operation categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateCategory {
    ContextSwitch,
    DelegationGrant,
    IdentityFederation,
}

impl fmt::Display for RateCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RateCategory::ContextSwitch => "context_switch",
            RateCategory::DelegationGrant => "delegation_grant",
            RateCategory::IdentityFederation => "identity_federation",
        })
    }
}

/// Final outcome of a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Allow,
    Deny,
}

/// How operators should read a reason code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonKind {
    Granted,
    PolicyDenial,
    InfrastructureFailure,
}

/// Reason attached to every decision and audit event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    // Granted
    CapabilityGranted,
    GrantedViaDelegation,
    GrantedViaElevation,
    SessionOpened,
    SessionClosed,
    ContextSwitched,
    DelegationGranted,
    DelegationGrantedClamped,
    DelegationRevoked,
    ElevationGranted,
    ElevationGrantedClamped,
    ElevationRevoked,
    IdentityResolved,

    // Explicit policy denials
    NoMatchingCapability,
    DomainNotWhitelisted,
    ContextMismatch,
    InsufficientScope,
    RateLimited,
    FeatureDisabled,
    AuthenticationFailed,
    UnknownTenant,
    NotPermitted,

    // Infrastructure failures
    AuditUnavailable,
    ConfigurationFault,
    ContextValidationTimeout,
    StoreUnavailable,
}

impl ReasonCode {
    pub fn kind(&self) -> ReasonKind {
        use ReasonCode::*;
        match self {
            CapabilityGranted | GrantedViaDelegation | GrantedViaElevation | SessionOpened
            | SessionClosed | ContextSwitched | DelegationGranted | DelegationGrantedClamped
            | DelegationRevoked | ElevationGranted | ElevationGrantedClamped | ElevationRevoked
            | IdentityResolved => ReasonKind::Granted,
            NoMatchingCapability | DomainNotWhitelisted | ContextMismatch | InsufficientScope
            | RateLimited | FeatureDisabled | AuthenticationFailed | UnknownTenant
            | NotPermitted => ReasonKind::PolicyDenial,
            AuditUnavailable | ConfigurationFault | ContextValidationTimeout
            | StoreUnavailable => ReasonKind::InfrastructureFailure,
        }
    }

    pub fn is_infrastructure(&self) -> bool {
        self.kind() == ReasonKind::InfrastructureFailure
    }

    pub fn outcome(&self) -> Outcome {
        match self.kind() {
            ReasonKind::Granted => Outcome::Allow,
            _ => Outcome::Deny,
        }
    }
}

/// Decision produced by policy evaluation, before auditing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub outcome: Outcome,
    pub reason: ReasonCode,
}

impl Decision {
    pub fn from_reason(reason: ReasonCode) -> Self {
        Self {
            outcome: reason.outcome(),
            reason,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.outcome == Outcome::Allow
    }
}

/// Read-decision request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub principal: Principal,
    pub action: Action,
    pub resource: ResourceRef,
    pub context: TenantId,
    /// Session whose active context must match `context`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionId>,
}

impl AuthorizationRequest {
    pub fn new(
        principal: Principal,
        action: Action,
        resource: ResourceRef,
        context: impl Into<TenantId>,
    ) -> Self {
        Self {
            principal,
            action,
            resource,
            context: context.into(),
            session: None,
        }
    }

    pub fn in_session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }
}

/// Decision returned to callers, always backed by a committed audit event
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationDecision {
    pub outcome: Outcome,
    pub reason: ReasonCode,
    /// Audit event committed for this decision; `None` only when the write failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EventId>,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub decided_at: SystemTime,
    /// Whether the policy result came from the decision cache
    #[serde(default)]
    pub cached: bool,
}

impl AuthorizationDecision {
    pub fn is_allowed(&self) -> bool {
        self.outcome == Outcome::Allow
    }

    pub fn reason(&self) -> ReasonCode {
        self.reason
    }

    pub fn reason_kind(&self) -> ReasonKind {
        self.reason.kind()
    }
}
