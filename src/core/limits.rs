/*!
 * Authorization Limits and Defaults
 *
 * Centralized location for default policy knobs, thresholds, and bounds.
 * Every value here is the fallback used when the corresponding `AUTHZ_*`
 * setting is absent.
 *
 * - Security-critical constants are marked with [SECURITY]
 * - Performance-critical constants are marked with [PERF]
 */

use std::time::Duration;

// =============================================================================
// DECISION CACHE
// =============================================================================

/// Default decision TTL (5 seconds)
/// [SECURITY] Cached decisions are invalidated only by expiry, so this bounds staleness
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5);

/// Maximum cached decisions held by the in-memory cache store
/// [PERF] Oldest-first eviction once full
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 10_000;

// =============================================================================
// CONTEXT SWITCHING
// =============================================================================

/// Default budget for validating a context switch (2 seconds)
pub const DEFAULT_CONTEXT_VALIDATION_TIMEOUT: Duration = Duration::from_millis(2_000);

// =============================================================================
// DELEGATION & ELEVATION
// =============================================================================

/// Longest delegation a grantor may issue (1 hour)
/// [SECURITY] Longer requests are clamped, not rejected
pub const DEFAULT_MAX_DELEGATION_DURATION: Duration = Duration::from_secs(60 * 60);

/// Longest elevation a principal may hold (15 minutes)
/// [SECURITY] Elevation adds privilege, so its ceiling is tighter than delegation
pub const DEFAULT_MAX_ELEVATION_DURATION: Duration = Duration::from_secs(15 * 60);

// =============================================================================
// AUDIT
// =============================================================================

/// Audit retention (7 years)
/// [SECURITY] Enforced by the persistence layer, stamped on each event
pub const DEFAULT_AUDIT_RETENTION: Duration = Duration::from_secs(7 * 365 * 24 * 60 * 60);

/// Attempts made per queued audit event before escalation
pub const DEFAULT_AUDIT_RETRY_ATTEMPTS: u32 = 5;

/// Initial backoff between audit retries, doubled per attempt
pub const DEFAULT_AUDIT_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Upper bound on a single backoff step
pub const MAX_AUDIT_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Events waiting for the ledger to recover
/// [SECURITY] Beyond this, new failures escalate immediately instead of queueing
pub const MAX_PENDING_AUDIT_EVENTS: usize = 10_000;

/// Escalated events buffered for operator tooling
/// [SECURITY] Overflow is counted and logged in full at error level
pub const MAX_ESCALATED_AUDIT_EVENTS: usize = 1_000;

/// AES-256-GCM and ChaCha20-Poly1305 both take 32-byte keys
pub const AUDIT_KEY_LEN: usize = 32;

// =============================================================================
// RATE LIMITS (count per window)
// =============================================================================

/// Context switches per principal per minute
pub const DEFAULT_CONTEXT_SWITCH_RATE: (u32, Duration) = (100, Duration::from_secs(60));

/// Delegation grants per principal per minute
pub const DEFAULT_DELEGATION_RATE: (u32, Duration) = (10, Duration::from_secs(60));

/// Identity federation flows per subject per minute
pub const DEFAULT_FEDERATION_RATE: (u32, Duration) = (20, Duration::from_secs(60));

// =============================================================================
// MAINTENANCE
// =============================================================================

/// Interval for the optional expired-grant reaper
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(60);

/// Interval for the audit recovery loop
pub const DEFAULT_AUDIT_RECOVERY_INTERVAL: Duration = Duration::from_secs(5);
