/*!
 * Audit Sinks
 * Durable destinations for audit events
 */

use super::AuditEvent;
use crate::core::errors::StoreError;
use crate::core::types::PrincipalId;
use crate::permissions::types::Outcome;
use ahash::RandomState;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

/// Append-only durable store for audit events
///
/// `append` returning `Ok` means the event is committed. Retention is the
/// sink's responsibility: events may only be dropped after `retain_until`.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> Result<(), StoreError>;
}

/// In-memory sink with per-principal indexing
pub struct MemoryAuditSink {
    /// Global append log
    events: parking_lot::RwLock<Vec<AuditEvent>>,
    /// Per-principal positions in the global log
    by_principal: Arc<DashMap<PrincipalId, Vec<usize>, RandomState>>,
    /// Denial counters for monitoring
    denial_counts: Arc<DashMap<PrincipalId, u64, RandomState>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self {
            events: parking_lot::RwLock::new(Vec::new()),
            by_principal: Arc::new(DashMap::with_hasher(RandomState::new())),
            denial_counts: Arc::new(DashMap::with_hasher(RandomState::new())),
        }
    }

    /// All committed events, oldest first
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.read().clone()
    }

    /// Most recent events, newest first
    pub fn recent(&self, limit: usize) -> Vec<AuditEvent> {
        let events = self.events.read();
        events.iter().rev().take(limit).cloned().collect()
    }

    pub fn for_principal(&self, principal: &PrincipalId) -> Vec<AuditEvent> {
        let events = self.events.read();
        self.by_principal
            .get(principal)
            .map(|positions| positions.iter().map(|i| events[*i].clone()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn denial_count(&self, principal: &PrincipalId) -> u64 {
        self.denial_counts.get(principal).map(|e| *e).unwrap_or(0)
    }

    /// Drop events whose retention has elapsed; returns how many were removed
    pub fn purge_expired(&self, now: SystemTime) -> usize {
        let mut events = self.events.write();
        let before = events.len();
        events.retain(|event| event.retain_until > now);
        let removed = before - events.len();

        if removed > 0 {
            self.by_principal.clear();
            for (i, event) in events.iter().enumerate() {
                self.by_principal
                    .entry(event.principal.clone())
                    .or_default()
                    .push(i);
            }
        }
        removed
    }

    pub fn stats(&self) -> AuditStats {
        let total_events = self.len();
        let total_denials: u64 = self.denial_counts.iter().map(|e| *e.value()).sum();

        AuditStats {
            total_events,
            total_denials,
            principals_tracked: self.by_principal.len(),
        }
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, event: &AuditEvent) -> Result<(), StoreError> {
        let position = {
            let mut events = self.events.write();
            events.push(event.clone());
            events.len() - 1
        };

        self.by_principal
            .entry(event.principal.clone())
            .or_default()
            .push(position);

        if event.decision == Outcome::Deny {
            self.denial_counts
                .entry(event.principal.clone())
                .and_modify(|count| *count += 1)
                .or_insert(1);
        }
        Ok(())
    }
}

/// Audit statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStats {
    pub total_events: usize,
    pub total_denials: u64,
    pub principals_tracked: usize,
}
