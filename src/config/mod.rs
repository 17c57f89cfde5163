/*!
 * Configuration
 * Explicit settings struct, read once from `AUTHZ_*` keys and passed into
 * every component
 *
 * Absent keys fall back to the defaults in `core::limits`; absent feature
 * flags fall back to the restrictive setting.
 */

use crate::core::errors::ConfigurationError;
use crate::core::limits::{
    DEFAULT_AUDIT_RETENTION, DEFAULT_AUDIT_RETRY_ATTEMPTS, DEFAULT_AUDIT_RETRY_BACKOFF,
    DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_CACHE_TTL, DEFAULT_CONTEXT_VALIDATION_TIMEOUT,
    DEFAULT_MAX_DELEGATION_DURATION, DEFAULT_MAX_ELEVATION_DURATION,
};
use crate::permissions::audit::{AuditKey, CipherAlgorithm, PayloadCipher, RetryPolicy};
use crate::permissions::ratelimit::{RateLimit, RateLimits};
use std::str::FromStr;
use std::time::Duration;

pub const CACHE_TTL_SECS: &str = "AUTHZ_CACHE_TTL_SECS";
pub const CACHE_MAX_ENTRIES: &str = "AUTHZ_CACHE_MAX_ENTRIES";
pub const CONTEXT_VALIDATION_TIMEOUT_MS: &str = "AUTHZ_CONTEXT_VALIDATION_TIMEOUT_MS";
pub const MAX_DELEGATION_DURATION_MS: &str = "AUTHZ_MAX_DELEGATION_DURATION_MS";
pub const MAX_ELEVATION_DURATION_MS: &str = "AUTHZ_MAX_ELEVATION_DURATION_MS";
pub const AUDIT_RETENTION_MS: &str = "AUTHZ_AUDIT_RETENTION_MS";
pub const AUDIT_ENCRYPTION_REQUIRED: &str = "AUTHZ_AUDIT_ENCRYPTION_REQUIRED";
pub const AUDIT_ENCRYPTION_ALGORITHM: &str = "AUTHZ_AUDIT_ENCRYPTION_ALGORITHM";
pub const AUDIT_ENCRYPTION_KEY: &str = "AUTHZ_AUDIT_ENCRYPTION_KEY";
pub const AUDIT_RETRY_ATTEMPTS: &str = "AUTHZ_AUDIT_RETRY_ATTEMPTS";
pub const AUDIT_RETRY_BACKOFF_MS: &str = "AUTHZ_AUDIT_RETRY_BACKOFF_MS";
pub const RATE_CONTEXT_SWITCH: &str = "AUTHZ_RATE_CONTEXT_SWITCH";
pub const RATE_DELEGATION: &str = "AUTHZ_RATE_DELEGATION";
pub const RATE_IDENTITY_FEDERATION: &str = "AUTHZ_RATE_IDENTITY_FEDERATION";
pub const ENABLE_INHERITANCE: &str = "AUTHZ_ENABLE_INHERITANCE";
pub const ENABLE_CONTEXT_SWITCHING: &str = "AUTHZ_ENABLE_CONTEXT_SWITCHING";
pub const ENABLE_DELEGATION: &str = "AUTHZ_ENABLE_DELEGATION";
pub const ENABLE_ELEVATION: &str = "AUTHZ_ENABLE_ELEVATION";
pub const ENABLE_COMPREHENSIVE_AUDIT: &str = "AUTHZ_ENABLE_COMPREHENSIVE_AUDIT";

/// Feature switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    pub inheritance: bool,
    pub context_switching: bool,
    pub delegation: bool,
    pub elevation: bool,
    /// Adds fingerprints and capability snapshots to audit payloads
    pub comprehensive_audit: bool,
}

impl FeatureFlags {
    /// Everything on
    pub fn all() -> Self {
        Self {
            inheritance: true,
            context_switching: true,
            delegation: true,
            elevation: true,
            comprehensive_audit: true,
        }
    }
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            inheritance: false,
            context_switching: false,
            delegation: false,
            elevation: false,
            comprehensive_audit: true,
        }
    }
}

/// Audit ledger settings
#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub retention: Duration,
    pub encryption_required: bool,
    pub algorithm: CipherAlgorithm,
    pub key: Option<AuditKey>,
    pub retry: RetryPolicy,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_AUDIT_RETENTION,
            encryption_required: true,
            algorithm: CipherAlgorithm::Aes256Gcm,
            key: None,
            retry: RetryPolicy {
                attempts: DEFAULT_AUDIT_RETRY_ATTEMPTS,
                initial_backoff: DEFAULT_AUDIT_RETRY_BACKOFF,
            },
        }
    }
}

/// Complete configuration for an `AuthorizationManager`
#[derive(Debug, Clone)]
pub struct AuthzConfig {
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub context_validation_timeout: Duration,
    pub max_delegation_duration: Duration,
    pub max_elevation_duration: Duration,
    pub audit: AuditConfig,
    pub rate_limits: RateLimits,
    pub features: FeatureFlags,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            context_validation_timeout: DEFAULT_CONTEXT_VALIDATION_TIMEOUT,
            max_delegation_duration: DEFAULT_MAX_DELEGATION_DURATION,
            max_elevation_duration: DEFAULT_MAX_ELEVATION_DURATION,
            audit: AuditConfig::default(),
            rate_limits: RateLimits::default(),
            features: FeatureFlags::default(),
        }
    }
}

impl AuthzConfig {
    /// Read from the process environment
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read through an arbitrary key/value lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let settings = Settings { lookup: &lookup };
        let defaults = Self::default();
        let audit_defaults = AuditConfig::default();
        let limits = RateLimits::default();

        let key = match settings.raw(AUDIT_ENCRYPTION_KEY) {
            Some(value) => Some(AuditKey::from_hex(AUDIT_ENCRYPTION_KEY, &value)?),
            None => None,
        };

        let config = Self {
            cache_ttl: settings.secs(CACHE_TTL_SECS, defaults.cache_ttl)?,
            cache_max_entries: settings.parsed(CACHE_MAX_ENTRIES, defaults.cache_max_entries)?,
            context_validation_timeout: settings
                .millis(CONTEXT_VALIDATION_TIMEOUT_MS, defaults.context_validation_timeout)?,
            max_delegation_duration: settings
                .millis(MAX_DELEGATION_DURATION_MS, defaults.max_delegation_duration)?,
            max_elevation_duration: settings
                .millis(MAX_ELEVATION_DURATION_MS, defaults.max_elevation_duration)?,
            audit: AuditConfig {
                retention: settings.millis(AUDIT_RETENTION_MS, audit_defaults.retention)?,
                encryption_required: settings
                    .flag(AUDIT_ENCRYPTION_REQUIRED, audit_defaults.encryption_required)?,
                algorithm: settings.algorithm(AUDIT_ENCRYPTION_ALGORITHM, audit_defaults.algorithm)?,
                key,
                retry: RetryPolicy {
                    attempts: settings.parsed(AUDIT_RETRY_ATTEMPTS, audit_defaults.retry.attempts)?,
                    initial_backoff: settings
                        .millis(AUDIT_RETRY_BACKOFF_MS, audit_defaults.retry.initial_backoff)?,
                },
            },
            rate_limits: RateLimits {
                context_switch: settings.rate(RATE_CONTEXT_SWITCH, limits.context_switch)?,
                delegation_grant: settings.rate(RATE_DELEGATION, limits.delegation_grant)?,
                identity_federation: settings
                    .rate(RATE_IDENTITY_FEDERATION, limits.identity_federation)?,
            },
            features: FeatureFlags {
                inheritance: settings.flag(ENABLE_INHERITANCE, false)?,
                context_switching: settings.flag(ENABLE_CONTEXT_SWITCHING, false)?,
                delegation: settings.flag(ENABLE_DELEGATION, false)?,
                elevation: settings.flag(ENABLE_ELEVATION, false)?,
                comprehensive_audit: settings.flag(ENABLE_COMPREHENSIVE_AUDIT, true)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.audit.encryption_required && self.audit.key.is_none() {
            return Err(ConfigurationError::MissingSetting {
                key: AUDIT_ENCRYPTION_KEY.to_string(),
            });
        }
        // Rate buckets share the cache store; disable decision caching with a zero TTL instead
        if self.cache_max_entries == 0 {
            return Err(ConfigurationError::InvalidSetting {
                key: CACHE_MAX_ENTRIES.to_string(),
                value: "0".to_string(),
                reason: "the cache store must hold at least one entry".to_string(),
            });
        }
        if self.audit.retry.attempts == 0 {
            return Err(ConfigurationError::InvalidSetting {
                key: AUDIT_RETRY_ATTEMPTS.to_string(),
                value: "0".to_string(),
                reason: "at least one attempt is required".to_string(),
            });
        }
        for (key, value) in [
            (CONTEXT_VALIDATION_TIMEOUT_MS, self.context_validation_timeout),
            (MAX_DELEGATION_DURATION_MS, self.max_delegation_duration),
            (MAX_ELEVATION_DURATION_MS, self.max_elevation_duration),
        ] {
            if value.is_zero() {
                return Err(ConfigurationError::InvalidSetting {
                    key: key.to_string(),
                    value: "0".to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn with_features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    pub fn with_audit_key(mut self, algorithm: CipherAlgorithm, key: AuditKey) -> Self {
        self.audit.algorithm = algorithm;
        self.audit.key = Some(key);
        self
    }

    /// Store payloads in the clear unless a key is configured
    pub fn without_required_encryption(mut self) -> Self {
        self.audit.encryption_required = false;
        self
    }

    /// Cipher for audit payloads; any configured key is used even when not required
    pub fn payload_cipher(&self) -> Option<PayloadCipher> {
        self.audit
            .key
            .as_ref()
            .map(|key| PayloadCipher::new(self.audit.algorithm, key))
    }
}

struct Settings<'a, F> {
    lookup: &'a F,
}

impl<F> Settings<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn invalid(key: &str, value: &str, reason: impl Into<String>) -> ConfigurationError {
        ConfigurationError::InvalidSetting {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    fn parsed<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigurationError> {
        match self.raw(key) {
            Some(value) => value
                .parse()
                .map_err(|_| Self::invalid(key, &value, "not a valid number")),
            None => Ok(default),
        }
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigurationError> {
        match self.raw(key) {
            Some(_) => self.parsed::<u64>(key, 0).map(Duration::from_millis),
            None => Ok(default),
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigurationError> {
        match self.raw(key) {
            Some(_) => self.parsed::<u64>(key, 0).map(Duration::from_secs),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigurationError> {
        match self.raw(key) {
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(Self::invalid(key, &value, "expected true or false")),
            },
            None => Ok(default),
        }
    }

    fn rate(&self, key: &str, default: RateLimit) -> Result<RateLimit, ConfigurationError> {
        match self.raw(key) {
            Some(value) => RateLimit::parse(key, &value),
            None => Ok(default),
        }
    }

    fn algorithm(
        &self,
        key: &str,
        default: CipherAlgorithm,
    ) -> Result<CipherAlgorithm, ConfigurationError> {
        match self.raw(key) {
            Some(value) => value
                .parse()
                .map_err(|reason: String| Self::invalid(key, &value, reason)),
            None => Ok(default),
        }
    }
}
