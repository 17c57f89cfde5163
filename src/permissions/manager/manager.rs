/*!
 * Authorization Manager
 * Read decisions and shared facade state
 */

use super::builder::AuthorizationManagerBuilder;
use crate::config::AuthzConfig;
use crate::core::clock::SharedClock;
use crate::core::errors::{AuthzError, AuthzResult};
use crate::core::types::{DelegationId, ElevationId, SessionId, TenantId};
use crate::identity::IdentityProvider;
use crate::monitoring::span_operation;
use crate::permissions::audit::{AuditKind, AuditLedger, AuditRecord, LedgerStats};
use crate::permissions::cache::{CacheStats, DecisionCache, Fingerprint};
use crate::permissions::context::{ContextManager, SessionRecord, TenantDirectory};
use crate::permissions::delegation::{Delegation, DelegationManager};
use crate::permissions::elevation::{Elevation, ElevationManager};
use crate::permissions::graph::PermissionGraph;
use crate::permissions::ratelimit::RateLimiter;
use crate::permissions::types::{
    Action, AuthorizationDecision, AuthorizationRequest, Authorizer, CapabilitySet,
    CorporateContext, Decision, Outcome, Principal, ReasonCode, ResourceKind,
};
use crate::store::PolicyStore;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Facade over every authorization component
pub struct AuthorizationManager {
    pub(super) config: AuthzConfig,
    pub(super) clock: SharedClock,
    /// Swapped whole on `reload_roles`
    pub(super) graph: ArcSwap<PermissionGraph>,
    pub(super) store: Arc<dyn PolicyStore>,
    pub(super) identity: Option<Arc<dyn IdentityProvider>>,
    pub(super) tenants: TenantDirectory,
    pub(super) contexts: ContextManager,
    pub(super) delegations: DelegationManager,
    pub(super) elevations: ElevationManager,
    pub(super) limiter: RateLimiter,
    pub(super) cache: DecisionCache,
    pub(super) ledger: Arc<AuditLedger>,
}

impl AuthorizationManager {
    pub fn builder(config: AuthzConfig) -> AuthorizationManagerBuilder {
        AuthorizationManagerBuilder::new(config)
    }

    /// Decide a read request
    ///
    /// Always returns an audited decision, except for configuration faults,
    /// which are audited and then returned as errors. When the audit write
    /// fails the decision is `Deny` with `AuditUnavailable` and no event id.
    pub async fn authorize(
        &self,
        request: &AuthorizationRequest,
    ) -> AuthzResult<AuthorizationDecision> {
        let span = span_operation("authorize", request.principal.id.as_str());
        let principal = &request.principal;

        let mut record = AuditRecord::new(
            principal.id.clone(),
            AuditKind::Authorization,
            ReasonCode::NoMatchingCapability,
        )
        .with_action(request.action)
        .with_resource(request.resource.clone())
        .with_context(request.context.clone());
        if let Some(session) = request.session {
            record = record.with_detail("session", session.to_string());
        }

        let (decision, cached) = match self.evaluate(request, &mut record).await {
            Ok(evaluated) => evaluated,
            Err(err) => {
                error!(principal = %principal.id, error = %err, "authorization aborted by configuration fault");
                record.reason = err.reason_code();
                let record = record.with_detail("error", err.to_string());
                if let Err(audit) = self.ledger.record(record).await {
                    error!(error = %audit, "configuration fault could not be audited");
                }
                span.record_outcome(false, "configuration_fault");
                return Err(err);
            }
        };

        record.reason = decision.reason;
        let record = record.with_detail("cached", cached);
        let decided_at = self.clock.now();

        let decision = match self.ledger.record(record).await {
            Ok(receipt) => AuthorizationDecision {
                outcome: decision.outcome,
                reason: decision.reason,
                event_id: Some(receipt.event_id),
                decided_at,
                cached,
            },
            Err(err) => {
                warn!(principal = %principal.id, error = %err, "audit unavailable, decision denied");
                AuthorizationDecision {
                    outcome: Outcome::Deny,
                    reason: ReasonCode::AuditUnavailable,
                    event_id: None,
                    decided_at,
                    cached: false,
                }
            }
        };

        span.record_outcome(decision.is_allowed(), &format!("{:?}", decision.reason));
        span.record_cached(decision.cached);
        Ok(decision)
    }

    /// Policy result for a request; `Err` only for configuration faults
    async fn evaluate(
        &self,
        request: &AuthorizationRequest,
        record: &mut AuditRecord,
    ) -> AuthzResult<(Decision, bool)> {
        let principal = &request.principal;

        if let Some(session) = &request.session {
            if let Err(reason) = self.contexts.check(session, &principal.id, &request.context) {
                debug!(principal = %principal.id, session = %session, "request context does not match session");
                return Ok((Decision::from_reason(reason), false));
            }
        }

        let tenant = match self.tenants.resolve(&request.context).await {
            Ok(tenant) => tenant,
            Err(err @ AuthzError::Configuration(_)) => return Err(err),
            Err(err) => return Ok((Decision::from_reason(err.reason_code()), false)),
        };
        if !tenant.admits(&principal.domain) {
            return Ok((Decision::from_reason(ReasonCode::DomainNotWhitelisted), false));
        }

        let delegations = if self.config.features.delegation {
            self.delegations.active_for(&principal.id, &tenant.tenant)
        } else {
            Vec::new()
        };
        let elevations = if self.config.features.elevation {
            self.elevations.active_for(&principal.id, &tenant.tenant)
        } else {
            Vec::new()
        };
        let grants: Vec<String> = delegations
            .iter()
            .map(|d| format!("delegation:{}", d.id))
            .chain(elevations.iter().map(|e| format!("elevation:{}", e.id)))
            .collect();

        let graph = self.graph.load_full();
        let fingerprint = Fingerprint::for_request(
            principal,
            graph.digest(),
            request.action,
            &request.resource,
            &tenant.tenant,
            &grants,
        );
        let inherit = self.config.features.inheritance && tenant.inheritance_enabled;

        let snapshot: Mutex<Option<CapabilitySet>> = Mutex::new(None);
        let lookup = self
            .cache
            .get_or_compute(&fingerprint, || {
                std::future::ready(
                    evaluate_policy(
                        &graph,
                        principal,
                        &tenant,
                        inherit,
                        request.action,
                        &request.resource.kind,
                        &delegations,
                        &elevations,
                    )
                    .map(|(decision, capabilities)| {
                        *snapshot.lock() = Some(capabilities);
                        decision
                    }),
                )
            })
            .await?;

        record.extended.insert("fingerprint".to_string(), Value::from(fingerprint.as_str()));
        record.extended.insert("graph_digest".to_string(), Value::from(graph.digest()));
        record.extended.insert("grants".to_string(), Value::from(grants));
        if let Some(capabilities) = snapshot.into_inner() {
            record.extended.insert(
                "capabilities".to_string(),
                serde_json::to_value(&capabilities).unwrap_or_default(),
            );
        }

        Ok((lookup.decision, lookup.cached))
    }

    pub fn config(&self) -> &AuthzConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<AuditLedger> {
        &self.ledger
    }

    pub fn audit_stats(&self) -> LedgerStats {
        self.ledger.stats()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Current role graph snapshot
    pub fn graph(&self) -> Arc<PermissionGraph> {
        self.graph.load_full()
    }

    pub fn session(&self, session: &SessionId) -> Option<SessionRecord> {
        self.contexts.get(session)
    }

    pub fn delegation(&self, id: &DelegationId) -> Option<Delegation> {
        self.delegations.get(id)
    }

    pub fn elevation(&self, id: &ElevationId) -> Option<Elevation> {
        self.elevations.get(id)
    }

    /// Forget the cached tenant configuration so the next request reloads it
    pub fn invalidate_tenant(&self, tenant: &TenantId) {
        self.tenants.invalidate(tenant);
    }

    /// Record a rejected mutation attempt and hand the error back
    pub(super) async fn reject<T>(&self, mut record: AuditRecord, err: AuthzError) -> AuthzResult<T> {
        record.reason = err.reason_code();
        let record = record.with_detail("error", err.to_string());
        warn!(principal = %record.principal, kind = ?record.kind, error = %err, "privileged mutation rejected");
        if let Err(audit) = self.ledger.record(record).await {
            error!(error = %audit, "rejected mutation could not be audited");
        }
        Err(err)
    }

    /// Role-derived capabilities of `principal` in `tenant`
    pub(super) fn role_capabilities(
        &self,
        principal: &Principal,
        tenant: &CorporateContext,
    ) -> AuthzResult<CapabilitySet> {
        let graph = self.graph.load();
        let capabilities = if self.config.features.inheritance && tenant.inheritance_enabled {
            graph.resolve(principal, tenant)?
        } else {
            graph.resolve_direct(principal, tenant)?
        };
        Ok(capabilities)
    }
}

#[allow(clippy::too_many_arguments)]
fn evaluate_policy(
    graph: &PermissionGraph,
    principal: &Principal,
    tenant: &CorporateContext,
    inherit: bool,
    action: Action,
    resource: &ResourceKind,
    delegations: &[Delegation],
    elevations: &[Elevation],
) -> AuthzResult<(Decision, CapabilitySet)> {
    let capabilities = if inherit {
        graph.resolve(principal, tenant)?
    } else {
        graph.resolve_direct(principal, tenant)?
    };

    let reason = if capabilities.permits(action, resource) {
        ReasonCode::CapabilityGranted
    } else if delegations.iter().any(|d| d.scope.permits(action, resource)) {
        ReasonCode::GrantedViaDelegation
    } else if elevations.iter().any(|e| e.scope.permits(action, resource)) {
        ReasonCode::GrantedViaElevation
    } else {
        ReasonCode::NoMatchingCapability
    };
    Ok((Decision::from_reason(reason), capabilities))
}

#[async_trait]
impl Authorizer for AuthorizationManager {
    async fn authorize(&self, request: &AuthorizationRequest) -> AuthzResult<AuthorizationDecision> {
        AuthorizationManager::authorize(self, request).await
    }
}
