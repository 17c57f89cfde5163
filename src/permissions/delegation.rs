/*!
 * Delegation Manager
 * Bounded, revocable capability grants from a grantor to a grantee
 *
 * ## Rules
 * - Scope must be covered by the grantor's role-derived capabilities in the
 *   delegation's context; delegated capabilities cannot be re-delegated
 * - Durations above the configured maximum are clamped, not rejected
 * - Expiry is evaluated lazily at read time; reaping only reclaims memory
 * - Revocation is idempotent
 */

use crate::core::clock::SharedClock;
use crate::core::errors::{AuthzError, AuthzResult};
use crate::core::types::{DelegationId, PrincipalId, TenantId};
use crate::permissions::types::CapabilitySet;
use ahash::RandomState;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampMilliSeconds};
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

/// Clamp `requested` to `max`, reporting whether clamping happened
pub fn clamp_duration(requested: Duration, max: Duration) -> (Duration, bool) {
    if requested > max {
        (max, true)
    } else {
        (requested, false)
    }
}

/// A capability grant from one principal to another
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub id: DelegationId,
    pub grantor: PrincipalId,
    pub grantee: PrincipalId,
    pub scope: CapabilitySet,
    pub context: TenantId,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub created_at: SystemTime,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub expires_at: SystemTime,
    #[serde(default)]
    pub revoked: bool,
    /// Requested duration exceeded the maximum
    #[serde(default)]
    pub clamped: bool,
}

impl Delegation {
    pub fn is_active(&self, now: SystemTime) -> bool {
        !self.revoked && now < self.expires_at
    }

    pub fn duration(&self) -> Duration {
        self.expires_at
            .duration_since(self.created_at)
            .unwrap_or(Duration::ZERO)
    }
}

/// Index key: the grantee and the context the grant applies in
type GranteeKey = (PrincipalId, TenantId);

/// Validates and tracks delegations
pub struct DelegationManager {
    delegations: DashMap<DelegationId, Delegation, RandomState>,
    /// Delegation ids per (grantee, context)
    by_grantee: DashMap<GranteeKey, Vec<DelegationId>, RandomState>,
    max_duration: Duration,
    clock: SharedClock,
}

impl DelegationManager {
    pub fn new(max_duration: Duration, clock: SharedClock) -> Self {
        Self {
            delegations: DashMap::with_hasher(RandomState::new()),
            by_grantee: DashMap::with_hasher(RandomState::new()),
            max_duration,
            clock,
        }
    }

    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }

    /// Validate a grant; nothing is registered until `insert`
    pub fn prepare(
        &self,
        grantor: &PrincipalId,
        grantor_capabilities: &CapabilitySet,
        grantee: &PrincipalId,
        scope: CapabilitySet,
        context: &TenantId,
        requested: Duration,
    ) -> AuthzResult<Delegation> {
        if grantor == grantee {
            return Err(AuthzError::NotPermitted {
                reason: "a principal cannot delegate to itself".to_string(),
            });
        }
        if scope.is_empty() {
            return Err(AuthzError::NotPermitted {
                reason: "delegation scope is empty".to_string(),
            });
        }
        if requested.is_zero() {
            return Err(AuthzError::NotPermitted {
                reason: "delegation duration must be positive".to_string(),
            });
        }

        let missing = grantor_capabilities.missing(&scope);
        if !missing.is_empty() {
            return Err(AuthzError::InsufficientScope {
                missing: missing.iter().map(ToString::to_string).collect(),
            });
        }

        let (duration, clamped) = clamp_duration(requested, self.max_duration);
        if clamped {
            info!(
                grantor = %grantor,
                requested_ms = requested.as_millis() as u64,
                max_ms = self.max_duration.as_millis() as u64,
                "delegation duration clamped"
            );
        }

        let now = self.clock.now();
        Ok(Delegation {
            id: DelegationId::new(),
            grantor: grantor.clone(),
            grantee: grantee.clone(),
            scope,
            context: context.clone(),
            created_at: now,
            expires_at: now + duration,
            revoked: false,
            clamped,
        })
    }

    pub fn insert(&self, delegation: Delegation) {
        debug!(
            delegation = %delegation.id,
            grantor = %delegation.grantor,
            grantee = %delegation.grantee,
            "delegation registered"
        );
        self.register(delegation);
    }

    fn register(&self, delegation: Delegation) {
        let id = delegation.id;
        let key = (delegation.grantee.clone(), delegation.context.clone());
        if self.delegations.insert(id, delegation).is_none() {
            self.by_grantee.entry(key).or_default().push(id);
        }
    }

    fn unindex(&self, key: &GranteeKey, id: &DelegationId) {
        if let Some(mut ids) = self.by_grantee.get_mut(key) {
            ids.retain(|held| held != id);
        }
        self.by_grantee.remove_if(key, |_, ids| ids.is_empty());
    }

    pub fn get(&self, id: &DelegationId) -> Option<Delegation> {
        self.delegations.get(id).map(|entry| entry.clone())
    }

    /// Mark revoked; `None` when the registry does not hold it
    pub fn revoke(&self, id: &DelegationId) -> Option<Delegation> {
        self.delegations.get_mut(id).map(|mut entry| {
            entry.revoked = true;
            entry.clone()
        })
    }

    /// Live delegations a grantee holds in `context`
    pub fn active_for(&self, grantee: &PrincipalId, context: &TenantId) -> Vec<Delegation> {
        let key = (grantee.clone(), context.clone());
        let Some(ids) = self.by_grantee.get(&key).map(|ids| ids.clone()) else {
            return Vec::new();
        };

        let now = self.clock.now();
        let mut active: Vec<Delegation> = ids
            .iter()
            .filter_map(|id| self.delegations.get(id).map(|entry| entry.value().clone()))
            .filter(|delegation| delegation.is_active(now))
            .collect();
        active.sort_by_key(|delegation| delegation.id);
        active
    }

    /// Load stored delegations, skipping those no longer active
    pub fn hydrate(&self, delegations: impl IntoIterator<Item = Delegation>) -> usize {
        let now = self.clock.now();
        let mut loaded = 0;
        for delegation in delegations.into_iter().filter(|d| d.is_active(now)) {
            self.register(delegation);
            loaded += 1;
        }
        loaded
    }

    /// Reclaim revoked and expired delegations
    pub fn reap(&self) -> usize {
        let now = self.clock.now();
        let mut reaped = Vec::new();
        self.delegations.retain(|id, delegation| {
            let keep = delegation.is_active(now);
            if !keep {
                reaped.push(((delegation.grantee.clone(), delegation.context.clone()), *id));
            }
            keep
        });
        for (key, id) in &reaped {
            self.unindex(key, id);
        }
        reaped.len()
    }

    pub fn len(&self) -> usize {
        self.delegations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delegations.is_empty()
    }
}
