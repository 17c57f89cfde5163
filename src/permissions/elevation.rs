/*!
 * Elevation Manager
 * Time-limited additional scope for a single principal
 *
 * Unlike delegation, the scope need not be held already: elevation exists to
 * grant more. Approval happens upstream before `prepare` is called. The
 * duration ceiling is separate from, and usually tighter than, delegation's.
 */

use crate::core::clock::SharedClock;
use crate::core::errors::{AuthzError, AuthzResult};
use crate::core::types::{ElevationId, PrincipalId, TenantId};
use crate::permissions::delegation::clamp_duration;
use crate::permissions::types::CapabilitySet;
use ahash::RandomState;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampMilliSeconds};
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

/// Additional scope held by one principal until expiry or revocation
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Elevation {
    pub id: ElevationId,
    pub principal: PrincipalId,
    pub scope: CapabilitySet,
    pub context: TenantId,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub created_at: SystemTime,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub expires_at: SystemTime,
    #[serde(default)]
    pub revoked: bool,
    #[serde(default)]
    pub clamped: bool,
}

impl Elevation {
    pub fn is_active(&self, now: SystemTime) -> bool {
        !self.revoked && now < self.expires_at
    }

    pub fn remaining(&self, now: SystemTime) -> Duration {
        if self.revoked {
            return Duration::ZERO;
        }
        self.expires_at.duration_since(now).unwrap_or(Duration::ZERO)
    }
}

pub struct ElevationManager {
    elevations: DashMap<ElevationId, Elevation, RandomState>,
    /// Elevation ids per (principal, context)
    by_principal: DashMap<(PrincipalId, TenantId), Vec<ElevationId>, RandomState>,
    max_duration: Duration,
    clock: SharedClock,
}

impl ElevationManager {
    pub fn new(max_duration: Duration, clock: SharedClock) -> Self {
        Self {
            elevations: DashMap::with_hasher(RandomState::new()),
            by_principal: DashMap::with_hasher(RandomState::new()),
            max_duration,
            clock,
        }
    }

    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }

    pub fn prepare(
        &self,
        principal: &PrincipalId,
        scope: CapabilitySet,
        context: &TenantId,
        requested: Duration,
    ) -> AuthzResult<Elevation> {
        if scope.is_empty() {
            return Err(AuthzError::NotPermitted {
                reason: "elevation scope is empty".to_string(),
            });
        }
        if requested.is_zero() {
            return Err(AuthzError::NotPermitted {
                reason: "elevation duration must be positive".to_string(),
            });
        }

        let (duration, clamped) = clamp_duration(requested, self.max_duration);
        if clamped {
            info!(
                principal = %principal,
                requested_ms = requested.as_millis() as u64,
                max_ms = self.max_duration.as_millis() as u64,
                "elevation duration clamped"
            );
        }

        let now = self.clock.now();
        Ok(Elevation {
            id: ElevationId::new(),
            principal: principal.clone(),
            scope,
            context: context.clone(),
            created_at: now,
            expires_at: now + duration,
            revoked: false,
            clamped,
        })
    }

    pub fn insert(&self, elevation: Elevation) {
        debug!(elevation = %elevation.id, principal = %elevation.principal, "elevation registered");
        self.register(elevation);
    }

    fn register(&self, elevation: Elevation) {
        let id = elevation.id;
        let key = (elevation.principal.clone(), elevation.context.clone());
        if self.elevations.insert(id, elevation).is_none() {
            self.by_principal.entry(key).or_default().push(id);
        }
    }

    pub fn get(&self, id: &ElevationId) -> Option<Elevation> {
        self.elevations.get(id).map(|entry| entry.clone())
    }

    pub fn revoke(&self, id: &ElevationId) -> Option<Elevation> {
        self.elevations.get_mut(id).map(|mut entry| {
            entry.revoked = true;
            entry.clone()
        })
    }

    pub fn active_for(&self, principal: &PrincipalId, context: &TenantId) -> Vec<Elevation> {
        let key = (principal.clone(), context.clone());
        let Some(ids) = self.by_principal.get(&key).map(|ids| ids.clone()) else {
            return Vec::new();
        };

        let now = self.clock.now();
        let mut active: Vec<Elevation> = ids
            .iter()
            .filter_map(|id| self.elevations.get(id).map(|entry| entry.value().clone()))
            .filter(|elevation| elevation.is_active(now))
            .collect();
        active.sort_by_key(|elevation| elevation.id);
        active
    }

    pub fn hydrate(&self, elevations: impl IntoIterator<Item = Elevation>) -> usize {
        let now = self.clock.now();
        let mut loaded = 0;
        for elevation in elevations.into_iter().filter(|e| e.is_active(now)) {
            self.register(elevation);
            loaded += 1;
        }
        loaded
    }

    pub fn reap(&self) -> usize {
        let now = self.clock.now();
        let mut reaped = Vec::new();
        self.elevations.retain(|id, elevation| {
            let keep = elevation.is_active(now);
            if !keep {
                reaped.push(((elevation.principal.clone(), elevation.context.clone()), *id));
            }
            keep
        });
        for (key, id) in &reaped {
            if let Some(mut ids) = self.by_principal.get_mut(key) {
                ids.retain(|held| held != id);
            }
            self.by_principal.remove_if(key, |_, ids| ids.is_empty());
        }
        reaped.len()
    }

    pub fn len(&self) -> usize {
        self.elevations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elevations.is_empty()
    }
}
