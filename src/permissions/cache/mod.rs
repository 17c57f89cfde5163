/*!
 * Decision Cache
 * TTL memo of policy decisions keyed by decision fingerprint
 *
 * Fingerprints cover everything a decision depends on, including the ids of
 * active delegations and elevations, so grants and revocations take effect
 * without explicit invalidation. At most one computation runs per
 * fingerprint; concurrent callers wait on it and check again.
 */

mod store;

pub use store::{CacheStore, MemoryCacheStore};

use crate::core::clock::{elapsed_between, SharedClock};
use crate::core::errors::AuthzResult;
use crate::core::types::TenantId;
use crate::permissions::types::{Action, Decision, Principal, ResourceRef};
use ahash::RandomState;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, TimestampMilliSeconds};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{trace, warn};

const KEY_PREFIX: &str = "authz:decision:";

/// Stable BLAKE3 digest of a decision's inputs
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn builder() -> FingerprintBuilder {
        FingerprintBuilder {
            hasher: blake3::Hasher::new(),
        }
    }

    /// Fingerprint of an authorization request
    ///
    /// `grants` are the ids of active delegations and elevations affecting
    /// the principal; order does not matter.
    pub fn for_request(
        principal: &Principal,
        graph_digest: &str,
        action: Action,
        resource: &ResourceRef,
        context: &TenantId,
        grants: &[String],
    ) -> Self {
        let mut grants = grants.to_vec();
        grants.sort();

        let mut builder = Self::builder();
        builder
            .field("principal", principal.id.as_str())
            .field("domain", principal.domain.as_str());
        for role in &principal.roles {
            builder.field("role", role.as_str());
        }
        builder
            .field("graph", graph_digest)
            .field("action", action.as_str())
            .field("resource_kind", resource.kind.as_str())
            .field("resource_id", resource.id.as_deref().unwrap_or(""))
            .field("context", context.as_str());
        for grant in &grants {
            builder.field("grant", grant);
        }
        builder.finish()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Length-prefixed field hasher, so adjacent fields cannot run together
pub struct FingerprintBuilder {
    hasher: blake3::Hasher,
}

impl FingerprintBuilder {
    pub fn field(&mut self, label: &str, value: &str) -> &mut Self {
        for part in [label, value] {
            self.hasher.update(&(part.len() as u64).to_le_bytes());
            self.hasher.update(part.as_bytes());
        }
        self
    }

    pub fn finish(&self) -> Fingerprint {
        Fingerprint(self.hasher.finalize().to_hex().to_string())
    }
}

/// Cached decision as persisted in the cache store
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionCacheEntry {
    pub fingerprint: Fingerprint,
    pub decision: Decision,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub computed_at: SystemTime,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub ttl: Duration,
}

impl DecisionCacheEntry {
    pub fn is_fresh(&self, now: SystemTime) -> bool {
        elapsed_between(self.computed_at, now) < self.ttl
    }
}

/// Result of `get_or_compute`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lookup {
    pub decision: Decision,
    pub cached: bool,
}

type Gate = Arc<tokio::sync::Mutex<()>>;

/// One caller's handle on a computation gate
///
/// Dropping it, including when the caller's future is cancelled, retires the
/// gate once no other caller holds it.
struct InflightHandle<'a> {
    inflight: &'a DashMap<Fingerprint, Gate, RandomState>,
    fingerprint: &'a Fingerprint,
    gate: Gate,
}

impl Drop for InflightHandle<'_> {
    fn drop(&mut self) {
        // Only the map's handle and ours left: nobody else is waiting on this gate
        self.inflight
            .remove_if(self.fingerprint, |_, gate| Arc::strong_count(gate) == 2);
    }
}

/// Decision cache over a `CacheStore`
pub struct DecisionCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    clock: SharedClock,
    /// Per-fingerprint computation gates
    inflight: DashMap<Fingerprint, Gate, RandomState>,
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
}

impl DecisionCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration, clock: SharedClock) -> Self {
        Self {
            store,
            ttl,
            clock,
            inflight: DashMap::with_hasher(RandomState::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            computations: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh cached decision, if any
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<DecisionCacheEntry> {
        let key = store_key(fingerprint);

        if let Some(raw) = self.store.get(&key) {
            match serde_json::from_str::<DecisionCacheEntry>(&raw) {
                Ok(entry) if entry.is_fresh(self.clock.now()) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry);
                }
                Ok(_) => self.store.remove(&key),
                Err(e) => {
                    warn!(fingerprint = %fingerprint, error = %e, "discarding unreadable cache entry");
                    self.store.remove(&key);
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn put(&self, fingerprint: &Fingerprint, decision: Decision, ttl: Duration) {
        let entry = DecisionCacheEntry {
            fingerprint: fingerprint.clone(),
            decision,
            computed_at: self.clock.now(),
            ttl,
        };
        match serde_json::to_string(&entry) {
            Ok(raw) => self.store.put(&store_key(fingerprint), raw, ttl),
            Err(e) => warn!(fingerprint = %fingerprint, error = %e, "failed to encode cache entry"),
        }
    }

    /// Return the cached decision or run `compute` exactly once for this fingerprint
    ///
    /// Only successful computations are cached; after an error the next
    /// waiter computes again.
    pub async fn get_or_compute<F, Fut>(
        &self,
        fingerprint: &Fingerprint,
        compute: F,
    ) -> AuthzResult<Lookup>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AuthzResult<Decision>>,
    {
        if let Some(entry) = self.get(fingerprint) {
            return Ok(Lookup {
                decision: entry.decision,
                cached: true,
            });
        }

        let handle = InflightHandle {
            inflight: &self.inflight,
            fingerprint,
            gate: self
                .inflight
                .entry(fingerprint.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone(),
        };
        let guard = handle.gate.lock().await;

        // A computation may have finished while we waited
        let result = if let Some(entry) = self.get(fingerprint) {
            Ok(Lookup {
                decision: entry.decision,
                cached: true,
            })
        } else {
            self.computations.fetch_add(1, Ordering::Relaxed);
            trace!(fingerprint = %fingerprint, "computing decision");
            compute().await.map(|decision| {
                self.put(fingerprint, decision, self.ttl);
                Lookup {
                    decision,
                    cached: false,
                }
            })
        };

        drop(guard);
        drop(handle);
        result
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        CacheStats {
            size: self.store.len(),
            hits,
            misses,
            computations: self.computations.load(Ordering::Relaxed),
            hit_rate,
        }
    }
}

fn store_key(fingerprint: &Fingerprint) -> String {
    format!("{KEY_PREFIX}{fingerprint}")
}

/// Cache statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entries in the backing store, rate buckets included
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    /// Policy computations actually run
    pub computations: u64,
    pub hit_rate: f64,
}
