/*!
 * Identity Federation
 * Resolves an external token into a principal identity
 *
 * The core never sees credentials: the provider hands back a resolved
 * principal id and domain, or an authentication failure.
 */

use crate::core::errors::{AuthzError, AuthzResult};
use crate::core::types::{Domain, PrincipalId};
use ahash::RandomState;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Identity asserted by an upstream identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    pub principal: PrincipalId,
    pub domain: Domain,
}

impl ResolvedIdentity {
    pub fn new(principal: impl Into<PrincipalId>, domain: impl AsRef<str>) -> Self {
        Self {
            principal: principal.into(),
            domain: Domain::normalized(domain),
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve `token`, failing with `AuthzError::Authentication`
    async fn resolve(&self, token: &str) -> AuthzResult<ResolvedIdentity>;
}

/// Fixed token table
#[derive(Default)]
pub struct StaticIdentityProvider {
    tokens: DashMap<String, ResolvedIdentity, RandomState>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(self, token: impl Into<String>, identity: ResolvedIdentity) -> Self {
        self.tokens.insert(token.into(), identity);
        self
    }

    pub fn revoke_token(&self, token: &str) {
        self.tokens.remove(token);
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn resolve(&self, token: &str) -> AuthzResult<ResolvedIdentity> {
        self.tokens
            .get(token)
            .map(|entry| entry.clone())
            .ok_or_else(|| AuthzError::Authentication {
                reason: "token not recognized".to_string(),
            })
    }
}
