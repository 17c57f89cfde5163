/*!
 * Privileged Mutations
 * Sessions, context switches, delegations, elevations and identity federation
 *
 * Every operation here is audited whether it succeeds or is rejected. The
 * success event is committed before the change takes effect; if it cannot be
 * written the change is abandoned and `AuditWriteFailure` is returned.
 */

use super::manager::AuthorizationManager;
use crate::core::errors::{AuthzError, AuthzResult, StoreError};
use crate::core::types::{DelegationId, ElevationId, PrincipalId, SessionId, TenantId};
use crate::monitoring::span_operation;
use crate::permissions::audit::{AuditKind, AuditRecord};
use crate::permissions::context::{admit_domain, SessionRecord};
use crate::permissions::delegation::Delegation;
use crate::permissions::elevation::Elevation;
use crate::permissions::types::{CapabilitySet, CorporateContext, Principal, RateCategory, ReasonCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

fn scope_value(scope: &CapabilitySet) -> Value {
    serde_json::to_value(scope).unwrap_or_default()
}

impl AuthorizationManager {
    /// Tenant lookup plus whitelist check, the unit bounded by the validation timeout
    async fn validate_target(
        &self,
        principal: &Principal,
        tenant: &TenantId,
    ) -> AuthzResult<Arc<CorporateContext>> {
        let context = self.tenants.resolve(tenant).await?;
        admit_domain(principal, &context)?;
        Ok(context)
    }

    /// Open a session whose active context is `tenant`
    pub async fn open_session(
        &self,
        principal: &Principal,
        tenant: &TenantId,
    ) -> AuthzResult<SessionRecord> {
        let _span = span_operation("open_session", principal.id.as_str());
        let session = SessionId::new();
        let record = AuditRecord::new(principal.id.clone(), AuditKind::SessionStart, ReasonCode::SessionOpened)
            .with_context(tenant.clone())
            .with_detail("session", session.to_string());

        let validated = self
            .contexts
            .validate_within(tenant, self.validate_target(principal, tenant))
            .await;
        let context = match validated {
            Ok(context) => context,
            Err(err) => return self.reject(record, err).await,
        };

        self.ledger.record(record).await?;
        self.contexts.open_as(session, principal, &context)
    }

    /// Move a session to `target`
    ///
    /// The session keeps its previous context on any failure: disabled
    /// feature, rate limit, busy session, whitelist rejection, validation
    /// timeout or audit failure.
    pub async fn switch_context(
        &self,
        session: &SessionId,
        principal: &Principal,
        target: &TenantId,
    ) -> AuthzResult<SessionRecord> {
        let _span = span_operation("switch_context", principal.id.as_str());
        let record = AuditRecord::new(principal.id.clone(), AuditKind::ContextSwitch, ReasonCode::ContextSwitched)
            .with_context(target.clone())
            .with_detail("session", session.to_string());

        if !self.config.features.context_switching {
            let err = AuthzError::FeatureDisabled {
                feature: "context_switching".to_string(),
            };
            return self.reject(record, err).await;
        }
        if let Err(err) = self.limiter.admit(&principal.id, RateCategory::ContextSwitch) {
            return self.reject(record, err).await;
        }

        let ticket = match self.contexts.begin_switch(session, &principal.id, target) {
            Ok(ticket) => ticket,
            Err(err) => return self.reject(record, err).await,
        };
        let record = record.with_detail("from", ticket.previous().to_string());

        let validated = self
            .contexts
            .validate_within(target, self.validate_target(principal, target))
            .await;
        if let Err(err) = validated {
            drop(ticket);
            return self.reject(record, err).await;
        }

        // An error here drops the ticket, which reverts the session
        self.ledger.record(record).await?;
        ticket.commit()
    }

    /// End a session; closing an ended session again is harmless
    pub async fn close_session(
        &self,
        session: &SessionId,
        principal: &PrincipalId,
    ) -> AuthzResult<SessionRecord> {
        let _span = span_operation("close_session", principal.as_str());
        let record = AuditRecord::new(principal.clone(), AuditKind::SessionEnd, ReasonCode::SessionClosed)
            .with_detail("session", session.to_string());

        let Some(current) = self.contexts.get(session) else {
            return self.reject(record, AuthzError::SessionNotFound(*session)).await;
        };
        if &current.principal != principal {
            let err = AuthzError::NotPermitted {
                reason: format!("session {session} belongs to another principal"),
            };
            return self.reject(record, err).await;
        }

        self.ledger.record(record.with_context(current.tenant)).await?;
        self.contexts.close(session, principal)
    }

    /// Grant part of `grantor`'s role-derived capabilities to `grantee`
    ///
    /// Durations above the configured maximum are clamped and the grant is
    /// audited as `DelegationGrantedClamped`.
    pub async fn delegate(
        &self,
        grantor: &Principal,
        grantee: &PrincipalId,
        scope: CapabilitySet,
        context: &TenantId,
        duration: Duration,
    ) -> AuthzResult<Delegation> {
        let _span = span_operation("delegate", grantor.id.as_str());
        let record = AuditRecord::new(grantor.id.clone(), AuditKind::DelegationGrant, ReasonCode::DelegationGranted)
            .with_context(context.clone())
            .with_detail("grantee", grantee.to_string())
            .with_detail("scope", scope_value(&scope))
            .with_detail("requested_ms", duration.as_millis() as u64);

        if !self.config.features.delegation {
            let err = AuthzError::FeatureDisabled {
                feature: "delegation".to_string(),
            };
            return self.reject(record, err).await;
        }
        if let Err(err) = self.limiter.admit(&grantor.id, RateCategory::DelegationGrant) {
            return self.reject(record, err).await;
        }

        let tenant = match self.tenants.resolve(context).await {
            Ok(tenant) => tenant,
            Err(err) => return self.reject(record, err).await,
        };
        if !tenant.admits(&grantor.domain) {
            let err = AuthzError::NotPermitted {
                reason: format!("domain '{}' is not admitted by tenant '{}'", grantor.domain, context),
            };
            return self.reject(record, err).await;
        }

        // Only role-derived capabilities count, so delegated scope cannot be re-delegated
        let held = match self.role_capabilities(grantor, &tenant) {
            Ok(held) => held,
            Err(err) => return self.reject(record, err).await,
        };
        let delegation = match self
            .delegations
            .prepare(&grantor.id, &held, grantee, scope, context, duration)
        {
            Ok(delegation) => delegation,
            Err(err) => return self.reject(record, err).await,
        };

        let mut record = record
            .with_detail("delegation", delegation.id.to_string())
            .with_detail("granted_ms", delegation.duration().as_millis() as u64);
        if delegation.clamped {
            record.reason = ReasonCode::DelegationGrantedClamped;
        }
        self.ledger.record(record).await?;

        if let Err(e) = self.store.save_delegation(&delegation).await {
            error!(delegation = %delegation.id, error = %e, "audited delegation could not be persisted");
            return Err(e.into());
        }
        self.delegations.insert(delegation.clone());
        info!(
            delegation = %delegation.id,
            grantor = %delegation.grantor,
            grantee = %delegation.grantee,
            clamped = delegation.clamped,
            "delegation granted"
        );
        Ok(delegation)
    }

    /// Revoke a delegation; revoking an inactive one succeeds without change
    ///
    /// Only the grantor or the grantee may revoke.
    pub async fn revoke_delegation(
        &self,
        actor: &PrincipalId,
        id: &DelegationId,
    ) -> AuthzResult<Delegation> {
        let _span = span_operation("revoke_delegation", actor.as_str());
        let record = AuditRecord::new(actor.clone(), AuditKind::DelegationRevoke, ReasonCode::DelegationRevoked)
            .with_detail("delegation", id.to_string());

        let found = match self.delegations.get(id) {
            Some(delegation) => Some(delegation),
            None => match self.store.load_delegation(id).await {
                Ok(found) => found,
                Err(e) => return self.reject(record, e.into()).await,
            },
        };
        let Some(delegation) = found else {
            return self.reject(record, AuthzError::UnknownDelegation(*id)).await;
        };

        let record = record
            .with_context(delegation.context.clone())
            .with_detail("grantor", delegation.grantor.to_string())
            .with_detail("grantee", delegation.grantee.to_string());
        if actor != &delegation.grantor && actor != &delegation.grantee {
            let err = AuthzError::NotPermitted {
                reason: "only the grantor or grantee may revoke a delegation".to_string(),
            };
            return self.reject(record, err).await;
        }

        if !delegation.is_active(self.clock.now()) {
            self.ledger.record(record.clone().with_detail("already_inactive", true)).await?;
            // A revoke whose write failed earlier is persisted on retry
            if delegation.revoked {
                if let Err(e) = self.store.save_delegation(&delegation).await {
                    return Err(self.revocation_unpersisted(record, e).await);
                }
            }
            return Ok(delegation);
        }

        self.ledger.record(record.clone().with_detail("already_inactive", false)).await?;
        let revoked = Delegation {
            revoked: true,
            ..delegation
        };
        self.delegations.revoke(id);
        info!(delegation = %id, actor = %actor, "delegation revoked");
        if let Err(e) = self.store.save_delegation(&revoked).await {
            return Err(self.revocation_unpersisted(record, e).await);
        }
        Ok(revoked)
    }

    /// Grant temporary additional scope to `principal`; approval happens upstream
    ///
    /// Unlike delegation, the scope need not be held already.
    pub async fn elevate(
        &self,
        principal: &Principal,
        scope: CapabilitySet,
        context: &TenantId,
        duration: Duration,
    ) -> AuthzResult<Elevation> {
        let _span = span_operation("elevate", principal.id.as_str());
        let record = AuditRecord::new(principal.id.clone(), AuditKind::Elevation, ReasonCode::ElevationGranted)
            .with_context(context.clone())
            .with_detail("scope", scope_value(&scope))
            .with_detail("requested_ms", duration.as_millis() as u64);

        if !self.config.features.elevation {
            let err = AuthzError::FeatureDisabled {
                feature: "elevation".to_string(),
            };
            return self.reject(record, err).await;
        }

        let tenant = match self.tenants.resolve(context).await {
            Ok(tenant) => tenant,
            Err(err) => return self.reject(record, err).await,
        };
        if !tenant.admits(&principal.domain) {
            let err = AuthzError::NotPermitted {
                reason: format!("domain '{}' is not admitted by tenant '{}'", principal.domain, context),
            };
            return self.reject(record, err).await;
        }

        let elevation = match self.elevations.prepare(&principal.id, scope, context, duration) {
            Ok(elevation) => elevation,
            Err(err) => return self.reject(record, err).await,
        };

        let mut record = record
            .with_detail("elevation", elevation.id.to_string())
            .with_detail("granted_ms", elevation.remaining(elevation.created_at).as_millis() as u64);
        if elevation.clamped {
            record.reason = ReasonCode::ElevationGrantedClamped;
        }
        self.ledger.record(record).await?;

        if let Err(e) = self.store.save_elevation(&elevation).await {
            error!(elevation = %elevation.id, error = %e, "audited elevation could not be persisted");
            return Err(e.into());
        }
        self.elevations.insert(elevation.clone());
        info!(
            elevation = %elevation.id,
            principal = %elevation.principal,
            clamped = elevation.clamped,
            "elevation granted"
        );
        Ok(elevation)
    }

    /// Revoke an elevation; revoking an inactive one succeeds without change
    pub async fn revoke_elevation(
        &self,
        actor: &PrincipalId,
        id: &ElevationId,
    ) -> AuthzResult<Elevation> {
        let _span = span_operation("revoke_elevation", actor.as_str());
        let record = AuditRecord::new(actor.clone(), AuditKind::ElevationRevoke, ReasonCode::ElevationRevoked)
            .with_detail("elevation", id.to_string());

        let found = match self.elevations.get(id) {
            Some(elevation) => Some(elevation),
            None => match self.store.load_elevation(id).await {
                Ok(found) => found,
                Err(e) => return self.reject(record, e.into()).await,
            },
        };
        let Some(elevation) = found else {
            return self.reject(record, AuthzError::UnknownElevation(*id)).await;
        };

        let record = record
            .with_context(elevation.context.clone())
            .with_detail("principal", elevation.principal.to_string());

        if !elevation.is_active(self.clock.now()) {
            self.ledger.record(record.clone().with_detail("already_inactive", true)).await?;
            if elevation.revoked {
                if let Err(e) = self.store.save_elevation(&elevation).await {
                    return Err(self.revocation_unpersisted(record, e).await);
                }
            }
            return Ok(elevation);
        }

        self.ledger.record(record.clone().with_detail("already_inactive", false)).await?;
        let revoked = Elevation {
            revoked: true,
            ..elevation
        };
        self.elevations.revoke(id);
        info!(elevation = %id, actor = %actor, "elevation revoked");
        if let Err(e) = self.store.save_elevation(&revoked).await {
            return Err(self.revocation_unpersisted(record, e).await);
        }
        Ok(revoked)
    }

    /// Audit a revocation that took effect in memory but not in the store
    ///
    /// The grant stays revoked in this process; revoking it again retries the write.
    async fn revocation_unpersisted(&self, mut record: AuditRecord, err: StoreError) -> AuthzError {
        error!(principal = %record.principal, kind = ?record.kind, error = %err, "revocation in effect but not persisted");
        record.reason = ReasonCode::StoreUnavailable;
        let record = record
            .with_detail("persisted", false)
            .with_detail("error", err.to_string());
        if let Err(audit) = self.ledger.record(record).await {
            error!(error = %audit, "unpersisted revocation could not be audited");
        }
        err.into()
    }

    /// Resolve an identity-provider token into a principal
    ///
    /// The token must resolve to `claimed`. A principal seen for the first
    /// time is created with no roles; a known principal keeps its roles but
    /// must still belong to the same domain.
    pub async fn resolve_identity(&self, claimed: &PrincipalId, token: &str) -> AuthzResult<Principal> {
        let _span = span_operation("resolve_identity", claimed.as_str());
        let record = AuditRecord::new(claimed.clone(), AuditKind::IdentityFederation, ReasonCode::IdentityResolved);

        if let Err(err) = self.limiter.admit(claimed, RateCategory::IdentityFederation) {
            return self.reject(record, err).await;
        }
        let Some(provider) = &self.identity else {
            let err = AuthzError::Authentication {
                reason: "no identity provider configured".to_string(),
            };
            return self.reject(record, err).await;
        };

        let resolved = match provider.resolve(token).await {
            Ok(resolved) => resolved,
            Err(err) => return self.reject(record, err).await,
        };
        if &resolved.principal != claimed {
            let err = AuthzError::Authentication {
                reason: "token was issued to a different principal".to_string(),
            };
            return self.reject(record, err).await;
        }

        let existing = match self.store.load_principal(claimed).await {
            Ok(existing) => existing,
            Err(e) => return self.reject(record, e.into()).await,
        };
        let (principal, created) = match existing {
            Some(known) if known.domain != resolved.domain => {
                let err = AuthzError::Authentication {
                    reason: format!(
                        "principal belongs to '{}' but the token asserts '{}'",
                        known.domain, resolved.domain
                    ),
                };
                return self.reject(record, err).await;
            }
            Some(known) => (known, false),
            None => (
                Principal {
                    id: resolved.principal,
                    domain: resolved.domain,
                    roles: Default::default(),
                },
                true,
            ),
        };

        let record = record
            .with_detail("domain", principal.domain.to_string())
            .with_detail("created", created);
        self.ledger.record(record).await?;

        if created {
            self.store.save_principal(&principal).await?;
            info!(principal = %principal.id, domain = %principal.domain, "principal created from identity federation");
        }
        Ok(principal)
    }
}
