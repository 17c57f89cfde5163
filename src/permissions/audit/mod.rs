/*!
 * Audit Ledger
 * Append-only, encrypted record of every security-relevant decision
 *
 * Contract:
 * - `record` returns only after the sink committed the event
 * - a failed write queues an `audit_unavailable` denial event for later
 *   recording, retried with exponential backoff by `retry_pending`
 * - events whose retries are exhausted, or that overflow the pending queue,
 *   are escalated to a bounded operator channel
 * - an event that cannot be sealed is queued as an unsealed note carrying
 *   only the failure metadata
 * - escalations beyond the channel's capacity are counted and logged in full
 */

mod cipher;
mod sink;

pub use cipher::{AuditKey, CipherAlgorithm, CipherError, PayloadCipher, Sealed};
pub use sink::{AuditSink, AuditStats, MemoryAuditSink};

use crate::core::clock::SharedClock;
use crate::core::errors::{AuthzError, AuthzResult};
use crate::core::limits::MAX_AUDIT_RETRY_BACKOFF;
use crate::core::types::{EventId, PrincipalId, TenantId};
use crate::permissions::types::{Action, Outcome, ReasonCode, ResourceRef};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::{serde_as, TimestampMilliSeconds};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What kind of operation an event records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Authorization,
    SessionStart,
    SessionEnd,
    ContextSwitch,
    DelegationGrant,
    DelegationRevoke,
    Elevation,
    ElevationRevoke,
    IdentityFederation,
}

impl AuditKind {
    pub fn is_privileged_mutation(&self) -> bool {
        !matches!(self, AuditKind::Authorization)
    }
}

/// Audit event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Info,
    Warning,
    Critical,
}

/// Event payload as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", rename_all = "snake_case")]
pub enum AuditPayload {
    Plain {
        details: Value,
    },
    Encrypted {
        algorithm: CipherAlgorithm,
        /// Hex-encoded nonce
        nonce: String,
        /// Hex-encoded ciphertext, authenticated with the event id
        ciphertext: String,
    },
}

impl AuditPayload {
    pub fn is_encrypted(&self) -> bool {
        matches!(self, AuditPayload::Encrypted { .. })
    }
}

/// Committed audit event
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: EventId,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub timestamp: SystemTime,
    pub principal: PrincipalId,
    pub kind: AuditKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<TenantId>,
    pub decision: Outcome,
    pub reason: ReasonCode,
    pub severity: AuditSeverity,
    pub payload: AuditPayload,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub retain_until: SystemTime,
}

/// Event draft handed to the ledger; sealed into an `AuditEvent` on record
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub principal: PrincipalId,
    pub kind: AuditKind,
    pub action: Option<Action>,
    pub resource: Option<ResourceRef>,
    pub context: Option<TenantId>,
    pub reason: ReasonCode,
    /// Always persisted
    pub details: Map<String, Value>,
    /// Persisted only with comprehensive audit enabled
    pub extended: Map<String, Value>,
}

impl AuditRecord {
    pub fn new(principal: PrincipalId, kind: AuditKind, reason: ReasonCode) -> Self {
        Self {
            principal,
            kind,
            action: None,
            resource: None,
            context: None,
            reason,
            details: Map::new(),
            extended: Map::new(),
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_resource(mut self, resource: ResourceRef) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn with_context(mut self, context: TenantId) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn with_extended(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extended.insert(key.to_string(), value.into());
        self
    }

    fn severity(&self) -> AuditSeverity {
        if self.reason.is_infrastructure() {
            return AuditSeverity::Critical;
        }
        match self.reason.outcome() {
            Outcome::Allow if self.kind.is_privileged_mutation() => AuditSeverity::Warning,
            Outcome::Allow => AuditSeverity::Info,
            // Denied mutations are more severe than denied reads
            Outcome::Deny if self.kind.is_privileged_mutation() => AuditSeverity::Critical,
            Outcome::Deny => AuditSeverity::Warning,
        }
    }
}

/// Proof of a committed event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditReceipt {
    pub event_id: EventId,
}

/// Retry schedule for queued events
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(MAX_AUDIT_RETRY_BACKOFF)
    }
}

/// Ledger settings derived from `AuthzConfig`
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub cipher: Option<PayloadCipher>,
    pub retention: Duration,
    pub comprehensive: bool,
    pub retry: RetryPolicy,
    /// Failure notes held for `retry_pending`
    pub pending_capacity: usize,
    /// Escalated events buffered until operator tooling drains them
    pub escalation_capacity: usize,
}

/// Result of one recovery pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub recorded: usize,
    pub escalated: usize,
    pub remaining: usize,
}

/// Ledger counters
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LedgerStats {
    pub written: u64,
    pub failed: u64,
    pub recovered: u64,
    pub escalated: u64,
    /// Escalations that found the operator channel full or gone
    pub overflowed: u64,
    pub pending: usize,
}

/// Writes audit events through a sink, fail-closed
pub struct AuditLedger {
    sink: Arc<dyn AuditSink>,
    settings: LedgerSettings,
    clock: SharedClock,
    pending: Mutex<VecDeque<AuditEvent>>,
    escalation_tx: flume::Sender<AuditEvent>,
    /// Held until `take_escalations` hands it out; drained by recovery meanwhile
    escalation_rx: Mutex<Option<flume::Receiver<AuditEvent>>>,
    written: AtomicU64,
    failed: AtomicU64,
    recovered: AtomicU64,
    escalated: AtomicU64,
    overflowed: AtomicU64,
}

/// Failure metadata kept when a note cannot be sealed
const FAILURE_NOTE_KEYS: [&str; 3] = ["original_reason", "original_event_id", "failure"];

impl AuditLedger {
    pub fn new(sink: Arc<dyn AuditSink>, settings: LedgerSettings, clock: SharedClock) -> Self {
        let (escalation_tx, escalation_rx) = flume::bounded(settings.escalation_capacity);
        info!(
            encrypted = settings.cipher.is_some(),
            comprehensive = settings.comprehensive,
            "audit ledger initialized"
        );
        Self {
            sink,
            settings,
            clock,
            pending: Mutex::new(VecDeque::new()),
            escalation_tx,
            escalation_rx: Mutex::new(Some(escalation_rx)),
            written: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            recovered: AtomicU64::new(0),
            escalated: AtomicU64::new(0),
            overflowed: AtomicU64::new(0),
        }
    }

    /// Seal and durably write an event
    ///
    /// On failure the caller must treat its pending decision as denied; a
    /// denial event carrying the original intent is queued for recovery.
    pub async fn record(&self, record: AuditRecord) -> AuthzResult<AuditReceipt> {
        let failure_note = record.clone();
        let event = match self.seal(record) {
            Ok(event) => event,
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "failed to seal audit payload");
                let reason = e.to_string();
                self.queue_failure(failure_note, None, &reason);
                return Err(AuthzError::AuditWriteFailure { reason });
            }
        };

        match self.sink.append(&event).await {
            Ok(()) => {
                self.written.fetch_add(1, Ordering::Relaxed);
                debug!(event_id = %event.event_id, kind = ?event.kind, reason = ?event.reason, "audit event committed");
                Ok(AuditReceipt {
                    event_id: event.event_id,
                })
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    event_id = %event.event_id,
                    principal = %event.principal,
                    error = %e,
                    "audit write failed, decision forced to deny"
                );
                self.queue_failure(failure_note, Some(event.event_id), &e.reason);
                Err(AuthzError::AuditWriteFailure { reason: e.reason })
            }
        }
    }

    /// Queue the fact that a decision was denied because its audit write failed
    fn queue_failure(&self, mut note: AuditRecord, original: Option<EventId>, cause: &str) {
        note.details
            .insert("original_reason".to_string(), serde_json::to_value(note.reason).unwrap_or(Value::Null));
        if let Some(original) = original {
            note.details
                .insert("original_event_id".to_string(), Value::String(original.to_string()));
        }
        note.details
            .insert("failure".to_string(), Value::String(cause.to_string()));
        note.reason = ReasonCode::AuditUnavailable;

        let fallback = note.clone();
        let event = match self.seal(note) {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "failed to seal audit failure event, queueing unsealed note");
                self.unsealed(fallback)
            }
        };

        let mut pending = self.pending.lock();
        if pending.len() >= self.settings.pending_capacity {
            drop(pending);
            self.escalate(event);
        } else {
            pending.push_back(event);
        }
    }

    /// Retry every queued event with exponential backoff
    pub async fn retry_pending(&self) -> RecoveryReport {
        let batch: Vec<AuditEvent> = self.pending.lock().drain(..).collect();
        let mut report = RecoveryReport::default();

        for event in batch {
            let mut committed = false;
            for attempt in 0..self.settings.retry.attempts {
                match self.sink.append(&event).await {
                    Ok(()) => {
                        committed = true;
                        break;
                    }
                    Err(e) => {
                        let backoff = self.settings.retry.backoff(attempt);
                        warn!(
                            event_id = %event.event_id,
                            attempt = attempt + 1,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "audit retry failed"
                        );
                        if attempt + 1 < self.settings.retry.attempts {
                            tokio::time::sleep(backoff).await;
                        }
                    }
                }
            }

            if committed {
                self.recovered.fetch_add(1, Ordering::Relaxed);
                report.recorded += 1;
            } else {
                self.escalate(event);
                report.escalated += 1;
            }
        }

        report.remaining = self.pending.lock().len();
        if report.recorded > 0 || report.escalated > 0 {
            info!(
                recorded = report.recorded,
                escalated = report.escalated,
                "audit recovery pass finished"
            );
        }
        report
    }

    fn escalate(&self, event: AuditEvent) {
        self.escalated.fetch_add(1, Ordering::Relaxed);
        error!(
            event_id = %event.event_id,
            principal = %event.principal,
            reason = ?event.reason,
            "audit event escalated"
        );
        if let Err(e) = self.escalation_tx.try_send(event) {
            let event = e.into_inner();
            self.overflowed.fetch_add(1, Ordering::Relaxed);
            error!(
                event = %serde_json::to_string(&event).unwrap_or_default(),
                "audit escalation channel unavailable, event retained only in this log"
            );
        }
    }

    /// Take the escalation receiver for operator tooling
    ///
    /// Returns `None` once taken. Until then `spawn_recovery` drains the
    /// channel into the error log.
    pub fn take_escalations(&self) -> Option<flume::Receiver<AuditEvent>> {
        self.escalation_rx.lock().take()
    }

    /// Log and discard buffered escalations while no operator holds the receiver
    pub fn drain_escalations(&self) -> usize {
        let guard = self.escalation_rx.lock();
        let Some(rx) = guard.as_ref() else {
            return 0;
        };
        let mut drained = 0;
        for event in rx.try_iter() {
            error!(
                event = %serde_json::to_string(&event).unwrap_or_default(),
                "unhandled audit escalation"
            );
            drained += 1;
        }
        drained
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Run `retry_pending` periodically in the background
    pub fn spawn_recovery(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let ledger = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if ledger.pending_len() > 0 {
                    ledger.retry_pending().await;
                }
                ledger.drain_escalations();
            }
        })
    }

    /// Decrypt an event payload (operator tooling)
    pub fn decrypt_payload(&self, event: &AuditEvent) -> Result<Value, CipherError> {
        match &event.payload {
            AuditPayload::Plain { details } => Ok(details.clone()),
            AuditPayload::Encrypted {
                algorithm,
                nonce,
                ciphertext,
            } => {
                let cipher = self
                    .settings
                    .cipher
                    .as_ref()
                    .ok_or_else(|| CipherError::Malformed("ledger has no key".to_string()))?;
                if cipher.algorithm() != *algorithm {
                    return Err(CipherError::AlgorithmMismatch {
                        expected: cipher.algorithm(),
                        found: *algorithm,
                    });
                }
                let sealed = Sealed {
                    nonce: hex::decode(nonce).map_err(|e| CipherError::Malformed(e.to_string()))?,
                    ciphertext: hex::decode(ciphertext)
                        .map_err(|e| CipherError::Malformed(e.to_string()))?,
                };
                let plaintext = cipher.open(&sealed, event.event_id.to_string().as_bytes())?;
                serde_json::from_slice(&plaintext).map_err(|e| CipherError::Malformed(e.to_string()))
            }
        }
    }

    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            written: self.written.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            recovered: self.recovered.load(Ordering::Relaxed),
            escalated: self.escalated.load(Ordering::Relaxed),
            overflowed: self.overflowed.load(Ordering::Relaxed),
            pending: self.pending_len(),
        }
    }

    fn seal(&self, mut record: AuditRecord) -> Result<AuditEvent, CipherError> {
        let event_id = EventId::new();

        let mut details = std::mem::take(&mut record.details);
        if self.settings.comprehensive {
            details.extend(std::mem::take(&mut record.extended));
        }
        let details = Value::Object(details);

        let payload = match &self.settings.cipher {
            Some(cipher) => {
                let plaintext = serde_json::to_vec(&details)
                    .map_err(|e| CipherError::Malformed(e.to_string()))?;
                let sealed = cipher.seal(&plaintext, event_id.to_string().as_bytes())?;
                AuditPayload::Encrypted {
                    algorithm: cipher.algorithm(),
                    nonce: hex::encode(sealed.nonce),
                    ciphertext: hex::encode(sealed.ciphertext),
                }
            }
            None => AuditPayload::Plain { details },
        };

        Ok(self.frame(event_id, record, payload))
    }

    /// Plain event carrying only the failure metadata of `note`
    fn unsealed(&self, mut note: AuditRecord) -> AuditEvent {
        let mut details = Map::new();
        for key in FAILURE_NOTE_KEYS {
            if let Some(value) = note.details.remove(key) {
                details.insert(key.to_string(), value);
            }
        }
        details.insert("sealed".to_string(), Value::Bool(false));
        self.frame(
            EventId::new(),
            note,
            AuditPayload::Plain {
                details: Value::Object(details),
            },
        )
    }

    fn frame(&self, event_id: EventId, record: AuditRecord, payload: AuditPayload) -> AuditEvent {
        let timestamp = self.clock.now();
        AuditEvent {
            event_id,
            timestamp,
            severity: record.severity(),
            principal: record.principal,
            kind: record.kind,
            action: record.action,
            resource: record.resource,
            context: record.context,
            decision: record.reason.outcome(),
            reason: record.reason,
            payload,
            retain_until: timestamp + self.settings.retention,
        }
    }
}
