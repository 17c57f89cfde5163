/*!
 * Rate Limiter
 * Token bucket per (principal, category)
 *
 * Each bucket starts full (capacity = count) and refills continuously at
 * count/window, driven by the injected clock. Bucket state lives in the
 * `CacheStore` under `authz:rate:{principal}:{category}` with a TTL of one
 * window: a bucket untouched for a whole window is full again, so an absent
 * entry and a full bucket are the same thing. A per-key lock serializes the
 * read-modify-write of one bucket.
 */

use crate::core::clock::{elapsed_between, SharedClock};
use crate::core::errors::{AuthzError, AuthzResult, ConfigurationError};
use crate::core::limits::{DEFAULT_CONTEXT_SWITCH_RATE, DEFAULT_DELEGATION_RATE, DEFAULT_FEDERATION_RATE};
use crate::core::types::PrincipalId;
use crate::permissions::cache::CacheStore;
use crate::permissions::types::RateCategory;
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, TimestampNanoSeconds};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::warn;

const KEY_PREFIX: &str = "authz:rate:";

/// `count` operations per `window`
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub count: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub window: Duration,
}

impl RateLimit {
    pub const fn new(count: u32, window: Duration) -> Self {
        Self { count, window }
    }

    /// Parse the `count/window_ms` form used by `AUTHZ_RATE_*` settings
    pub fn parse(key: &str, value: &str) -> Result<Self, ConfigurationError> {
        let invalid = |reason: &str| ConfigurationError::InvalidSetting {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let (count, window) = value
            .trim()
            .split_once('/')
            .ok_or_else(|| invalid("expected `count/window_ms`"))?;
        let count: u32 = count
            .trim()
            .parse()
            .map_err(|_| invalid("count must be a non-negative integer"))?;
        let window: u64 = window
            .trim()
            .parse()
            .map_err(|_| invalid("window must be milliseconds"))?;
        if window == 0 {
            return Err(invalid("window must be greater than zero"));
        }
        Ok(Self::new(count, Duration::from_millis(window)))
    }

    /// Tokens regained per second
    fn refill_rate(&self) -> f64 {
        self.count as f64 / self.window.as_secs_f64()
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.count, self.window.as_millis())
    }
}

/// Configured limit for every category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    pub context_switch: RateLimit,
    pub delegation_grant: RateLimit,
    pub identity_federation: RateLimit,
}

impl RateLimits {
    pub fn for_category(&self, category: RateCategory) -> RateLimit {
        match category {
            RateCategory::ContextSwitch => self.context_switch,
            RateCategory::DelegationGrant => self.delegation_grant,
            RateCategory::IdentityFederation => self.identity_federation,
        }
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        let (switches, switch_window) = DEFAULT_CONTEXT_SWITCH_RATE;
        let (grants, grant_window) = DEFAULT_DELEGATION_RATE;
        let (flows, flow_window) = DEFAULT_FEDERATION_RATE;
        Self {
            context_switch: RateLimit::new(switches, switch_window),
            delegation_grant: RateLimit::new(grants, grant_window),
            identity_federation: RateLimit::new(flows, flow_window),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct TokenBucket {
    tokens: f64,
    #[serde_as(as = "TimestampNanoSeconds<i64>")]
    last_refill: SystemTime,
}

impl TokenBucket {
    fn full(limit: &RateLimit, now: SystemTime) -> Self {
        Self {
            tokens: limit.count as f64,
            last_refill: now,
        }
    }

    fn empty(now: SystemTime) -> Self {
        Self {
            tokens: 0.0,
            last_refill: now,
        }
    }

    fn is_full(&self, limit: &RateLimit) -> bool {
        self.tokens >= limit.count as f64
    }

    fn refill(&mut self, limit: &RateLimit, now: SystemTime) {
        let elapsed = elapsed_between(self.last_refill, now);
        if elapsed > Duration::ZERO {
            self.tokens =
                (self.tokens + elapsed.as_secs_f64() * limit.refill_rate()).min(limit.count as f64);
            self.last_refill = now;
        }
    }

    /// Take one token, or report how long until one is available
    fn try_take(&mut self, limit: &RateLimit, now: SystemTime) -> Result<(), Duration> {
        self.refill(limit, now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        if limit.count == 0 {
            return Err(limit.window);
        }
        let wait_ms = ((1.0 - self.tokens) / limit.refill_rate() * 1000.0).ceil();
        Err(Duration::from_millis(wait_ms as u64))
    }
}

fn bucket_key(principal: &PrincipalId, category: RateCategory) -> String {
    format!("{KEY_PREFIX}{principal}:{category}")
}

/// Per-principal, per-category admission control
pub struct RateLimiter {
    limits: RateLimits,
    store: Arc<dyn CacheStore>,
    /// Bucket locks for the keys this process has touched
    locks: DashMap<(PrincipalId, RateCategory), Arc<Mutex<()>>, RandomState>,
    clock: SharedClock,
}

impl RateLimiter {
    pub fn new(limits: RateLimits, store: Arc<dyn CacheStore>, clock: SharedClock) -> Self {
        Self {
            limits,
            store,
            locks: DashMap::with_hasher(RandomState::new()),
            clock,
        }
    }

    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    /// Consume one token or fail with `RateLimitExceeded`
    pub fn admit(&self, principal: &PrincipalId, category: RateCategory) -> AuthzResult<()> {
        let limit = self.limits.for_category(category);
        let key = bucket_key(principal, category);
        let lock = self
            .locks
            .entry((principal.clone(), category))
            .or_default()
            .clone();

        let outcome = {
            let _guard = lock.lock();
            let now = self.clock.now();
            let mut bucket = self.load(&key, &limit, now);
            let outcome = bucket.try_take(&limit, now);
            if outcome.is_ok() {
                self.save(&key, &bucket, &limit);
            }
            outcome
        };

        outcome.map_err(|wait| {
            let retry_after_ms = wait.as_millis().max(1) as u64;
            warn!(
                principal = %principal,
                category = %category,
                retry_after_ms,
                "rate limit exceeded"
            );
            AuthzError::RateLimitExceeded {
                principal: principal.clone(),
                category,
                retry_after_ms,
            }
        })
    }

    /// Whole tokens currently available
    pub fn available(&self, principal: &PrincipalId, category: RateCategory) -> u32 {
        let limit = self.limits.for_category(category);
        let now = self.clock.now();
        let mut bucket = self.load(&bucket_key(principal, category), &limit, now);
        bucket.refill(&limit, now);
        bucket.tokens.floor() as u32
    }

    /// Drop state for buckets that have refilled completely
    pub fn purge_idle(&self) -> usize {
        let now = self.clock.now();
        let mut purged = 0;
        self.locks.retain(|(principal, category), lock| {
            // Held by an admit in progress
            if Arc::strong_count(lock) > 1 {
                return true;
            }
            let _guard = lock.lock();
            let limit = self.limits.for_category(*category);
            let key = bucket_key(principal, *category);
            let mut bucket = self.load(&key, &limit, now);
            bucket.refill(&limit, now);
            if !bucket.is_full(&limit) {
                return true;
            }
            self.store.remove(&key);
            purged += 1;
            false
        });
        purged
    }

    /// Stored bucket, or a full one when absent
    ///
    /// An unreadable entry counts as exhausted and refills from now.
    fn load(&self, key: &str, limit: &RateLimit, now: SystemTime) -> TokenBucket {
        match self.store.get(key) {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(key, error = %e, "unreadable rate bucket treated as exhausted");
                TokenBucket::empty(now)
            }),
            None => TokenBucket::full(limit, now),
        }
    }

    fn save(&self, key: &str, bucket: &TokenBucket, limit: &RateLimit) {
        match serde_json::to_string(bucket) {
            Ok(raw) => self.store.put(key, raw, limit.window),
            Err(e) => warn!(key, error = %e, "failed to encode rate bucket"),
        }
    }
}
