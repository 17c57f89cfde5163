/*!
 * Context Manager
 * Per-session tenant context state machine
 *
 * ```text
 * open ──► ContextActive ──begin_switch──► SwitchPending ──commit──► ContextActive
 *              ▲                                │
 *              └────────── ticket dropped ──────┘
 * close ──► Idle (terminal)
 * ```
 *
 * A session has at most one switch in flight. The ticket returned by
 * `begin_switch` reverts the session when dropped uncommitted, so a rejected,
 * timed-out or cancelled switch always leaves the prior context in place.
 */

mod directory;

pub use directory::TenantDirectory;

use crate::core::clock::SharedClock;
use crate::core::errors::{AuthzError, AuthzResult};
use crate::core::types::{Domain, PrincipalId, SessionId, TenantId};
use crate::permissions::types::{CorporateContext, Principal, ReasonCode};
use ahash::RandomState;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampMilliSeconds};
use std::future::Future;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Ended; no further switches
    Idle,
    ContextActive,
    SwitchPending,
}

/// Active context of one session
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session: SessionId,
    pub principal: PrincipalId,
    pub domain: Domain,
    pub tenant: TenantId,
    /// Target of the in-flight switch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<TenantId>,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub opened_at: SystemTime,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub switched_at: SystemTime,
    pub switch_count: u64,
    pub state: SessionState,
}

/// Owns every session's state
pub struct ContextManager {
    sessions: DashMap<SessionId, SessionRecord, RandomState>,
    validation_timeout: Duration,
    clock: SharedClock,
}

impl ContextManager {
    pub fn new(validation_timeout: Duration, clock: SharedClock) -> Self {
        Self {
            sessions: DashMap::with_hasher(RandomState::new()),
            validation_timeout,
            clock,
        }
    }

    pub fn validation_timeout(&self) -> Duration {
        self.validation_timeout
    }

    /// Start a session in `context`; the principal's domain must be whitelisted
    pub fn open(&self, principal: &Principal, context: &CorporateContext) -> AuthzResult<SessionRecord> {
        self.open_as(SessionId::new(), principal, context)
    }

    /// `open` with a caller-chosen id, so the id can be audited before the session exists
    pub fn open_as(
        &self,
        session: SessionId,
        principal: &Principal,
        context: &CorporateContext,
    ) -> AuthzResult<SessionRecord> {
        admit_domain(principal, context)?;

        let now = self.clock.now();
        let record = SessionRecord {
            session,
            principal: principal.id.clone(),
            domain: principal.domain.clone(),
            tenant: context.tenant.clone(),
            pending: None,
            opened_at: now,
            switched_at: now,
            switch_count: 0,
            state: SessionState::ContextActive,
        };
        self.sessions.insert(record.session, record.clone());
        info!(session = %record.session, principal = %record.principal, tenant = %record.tenant, "session opened");
        Ok(record)
    }

    pub fn get(&self, session: &SessionId) -> Option<SessionRecord> {
        self.sessions.get(session).map(|entry| entry.clone())
    }

    /// Move the session to `SwitchPending`
    pub fn begin_switch(
        &self,
        session: &SessionId,
        principal: &PrincipalId,
        target: &TenantId,
    ) -> AuthzResult<SwitchTicket<'_>> {
        let mut record = self
            .sessions
            .get_mut(session)
            .ok_or(AuthzError::SessionNotFound(*session))?;

        if &record.principal != principal {
            return Err(AuthzError::NotPermitted {
                reason: format!("session {session} belongs to another principal"),
            });
        }
        match record.state {
            SessionState::Idle => {
                return Err(AuthzError::NotPermitted {
                    reason: format!("session {session} has ended"),
                })
            }
            SessionState::SwitchPending => return Err(AuthzError::SessionBusy(*session)),
            SessionState::ContextActive => {}
        }

        record.state = SessionState::SwitchPending;
        record.pending = Some(target.clone());
        debug!(session = %session, from = %record.tenant, to = %target, "context switch pending");

        Ok(SwitchTicket {
            manager: self,
            session: *session,
            previous: record.tenant.clone(),
            target: target.clone(),
            settled: false,
        })
    }

    /// Run switch validation under the configured timeout
    pub async fn validate_within<T, Fut>(&self, target: &TenantId, validation: Fut) -> AuthzResult<T>
    where
        Fut: Future<Output = AuthzResult<T>>,
    {
        match tokio::time::timeout(self.validation_timeout, validation).await {
            Ok(result) => result,
            Err(_) => {
                warn!(tenant = %target, timeout_ms = self.validation_timeout.as_millis() as u64, "context validation timed out");
                Err(AuthzError::ContextValidationTimeout {
                    tenant: target.clone(),
                    timeout_ms: self.validation_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// End the session; terminal
    pub fn close(&self, session: &SessionId, principal: &PrincipalId) -> AuthzResult<SessionRecord> {
        let mut record = self
            .sessions
            .get_mut(session)
            .ok_or(AuthzError::SessionNotFound(*session))?;
        if &record.principal != principal {
            return Err(AuthzError::NotPermitted {
                reason: format!("session {session} belongs to another principal"),
            });
        }
        record.state = SessionState::Idle;
        record.pending = None;
        info!(session = %session, principal = %principal, "session closed");
        Ok(record.clone())
    }

    /// Whether a read under `session` may be evaluated in `tenant`
    pub fn check(
        &self,
        session: &SessionId,
        principal: &PrincipalId,
        tenant: &TenantId,
    ) -> Result<(), ReasonCode> {
        let record = self.sessions.get(session).ok_or(ReasonCode::ContextMismatch)?;
        let usable = matches!(record.state, SessionState::ContextActive | SessionState::SwitchPending);
        if usable && &record.principal == principal && &record.tenant == tenant {
            Ok(())
        } else {
            Err(ReasonCode::ContextMismatch)
        }
    }

    /// Drop ended sessions
    pub fn purge_closed(&self) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, record| record.state != SessionState::Idle);
        before - self.sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn settle(&self, session: &SessionId, target: Option<&TenantId>) -> AuthzResult<SessionRecord> {
        let mut record = self
            .sessions
            .get_mut(session)
            .ok_or(AuthzError::SessionNotFound(*session))?;
        if record.state != SessionState::SwitchPending {
            return Err(AuthzError::NotPermitted {
                reason: format!("session {session} ended during the switch"),
            });
        }

        record.state = SessionState::ContextActive;
        record.pending = None;
        if let Some(target) = target {
            record.tenant = target.clone();
            record.switched_at = self.clock.now();
            record.switch_count += 1;
        }
        Ok(record.clone())
    }
}

/// Admission check shared by session open and context switch
pub fn admit_domain(principal: &Principal, context: &CorporateContext) -> AuthzResult<()> {
    if context.admits(&principal.domain) {
        Ok(())
    } else {
        Err(AuthzError::ContextSwitchRejected {
            tenant: context.tenant.clone(),
            domain: principal.domain.clone(),
        })
    }
}

/// In-flight context switch; reverts the session unless committed
pub struct SwitchTicket<'a> {
    manager: &'a ContextManager,
    session: SessionId,
    previous: TenantId,
    target: TenantId,
    settled: bool,
}

impl SwitchTicket<'_> {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn previous(&self) -> &TenantId {
        &self.previous
    }

    pub fn target(&self) -> &TenantId {
        &self.target
    }

    /// Make the target the active context
    pub fn commit(mut self) -> AuthzResult<SessionRecord> {
        self.settled = true;
        let record = self.manager.settle(&self.session, Some(&self.target))?;
        info!(
            session = %self.session,
            from = %self.previous,
            to = %self.target,
            switch_count = record.switch_count,
            "context switched"
        );
        Ok(record)
    }
}

impl Drop for SwitchTicket<'_> {
    fn drop(&mut self) {
        if !self.settled {
            // The session may have been closed meanwhile; nothing to revert then
            if self.manager.settle(&self.session, None).is_ok() {
                debug!(session = %self.session, tenant = %self.previous, "context switch reverted");
            }
        }
    }
}
