/*!
 * Delegation Tests
 * Scope subset, clamping, expiry and revocation through the facade
 */

use crate::common::*;
use context_authz::permissions::audit::AuditKind;
use context_authz::store::PolicyStore;
use context_authz::{Action, AuthzError, DelegationId, FeatureFlags, PrincipalId, ReasonCode};
use std::time::Duration;

const THIRTY_MINUTES: Duration = Duration::from_secs(30 * 60);

#[tokio::test]
async fn test_delegated_write_expires() {
    let harness = Harness::new(FeatureFlags::all());
    let request = report(Action::Write, carol(), "acme");

    let before = harness.manager.authorize(&request).await.unwrap();
    assert_eq!(before.reason(), ReasonCode::NoMatchingCapability);

    let delegation = harness
        .manager
        .delegate(&bob(), &carol().id, scope(&["write:report"]), &acme(), THIRTY_MINUTES)
        .await
        .unwrap();
    assert!(!delegation.clamped);

    let during = harness.manager.authorize(&request).await.unwrap();
    assert!(during.is_allowed());
    assert_eq!(during.reason(), ReasonCode::GrantedViaDelegation);

    harness.clock.advance(THIRTY_MINUTES + Duration::from_secs(60));
    let after = harness.manager.authorize(&request).await.unwrap();
    assert_eq!(after.reason(), ReasonCode::NoMatchingCapability);
}

#[tokio::test]
async fn test_delegation_scope_must_be_held() {
    let harness = Harness::new(FeatureFlags::all());

    let err = harness
        .manager
        .delegate(&alice(), &carol().id, scope(&["write:report"]), &acme(), THIRTY_MINUTES)
        .await
        .unwrap_err();

    match err {
        AuthzError::InsufficientScope { missing } => {
            assert_eq!(missing, vec!["write:report".to_string()])
        }
        other => panic!("unexpected error: {other:?}"),
    }
    let grants = harness.events_of(AuditKind::DelegationGrant);
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].reason, ReasonCode::InsufficientScope);
}

#[tokio::test]
async fn test_delegated_scope_is_not_redelegable() {
    let harness = Harness::new(FeatureFlags::all());
    harness
        .manager
        .delegate(&bob(), &carol().id, scope(&["write:report"]), &acme(), THIRTY_MINUTES)
        .await
        .unwrap();

    let err = harness
        .manager
        .delegate(&carol(), &PrincipalId::from("dave"), scope(&["write:report"]), &acme(), THIRTY_MINUTES)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::InsufficientScope { .. }));
}

#[tokio::test]
async fn test_long_delegation_is_clamped() {
    let harness = Harness::new(FeatureFlags::all());
    let max = harness.manager.config().max_delegation_duration;

    let delegation = harness
        .manager
        .delegate(&bob(), &carol().id, scope(&["read:report"]), &acme(), max * 3)
        .await
        .unwrap();

    assert!(delegation.clamped);
    assert_eq!(delegation.duration(), max);
    let grants = harness.events_of(AuditKind::DelegationGrant);
    assert_eq!(grants[0].reason, ReasonCode::DelegationGrantedClamped);
}

#[tokio::test]
async fn test_revoke_is_idempotent() {
    let harness = Harness::new(FeatureFlags::all());
    let delegation = harness
        .manager
        .delegate(&bob(), &carol().id, scope(&["write:report"]), &acme(), THIRTY_MINUTES)
        .await
        .unwrap();

    let revoked = harness
        .manager
        .revoke_delegation(&bob().id, &delegation.id)
        .await
        .unwrap();
    assert!(revoked.revoked);

    let decision = harness
        .manager
        .authorize(&report(Action::Write, carol(), "acme"))
        .await
        .unwrap();
    assert_eq!(decision.reason(), ReasonCode::NoMatchingCapability);

    // Again, and again after the reaper dropped it from memory
    assert!(harness
        .manager
        .revoke_delegation(&carol().id, &delegation.id)
        .await
        .unwrap()
        .revoked);
    assert_eq!(harness.manager.reap_expired().delegations, 1);
    assert!(harness
        .manager
        .revoke_delegation(&bob().id, &delegation.id)
        .await
        .unwrap()
        .revoked);

    let stored = harness.store.load_delegation(&delegation.id).await.unwrap().unwrap();
    assert!(stored.revoked);
    assert_eq!(harness.events_of(AuditKind::DelegationRevoke).len(), 3);
}

#[tokio::test]
async fn test_revoke_applies_when_store_write_fails() {
    let harness = Harness::new(FeatureFlags::all());
    let delegation = harness
        .manager
        .delegate(&bob(), &carol().id, scope(&["write:report"]), &acme(), THIRTY_MINUTES)
        .await
        .unwrap();

    harness.store.set_unavailable(true);
    let err = harness
        .manager
        .revoke_delegation(&bob().id, &delegation.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::Store(_)));

    let decision = harness
        .manager
        .authorize(&report(Action::Write, carol(), "acme"))
        .await
        .unwrap();
    assert_eq!(decision.reason(), ReasonCode::NoMatchingCapability);

    let revokes = harness.events_of(AuditKind::DelegationRevoke);
    let reasons: Vec<_> = revokes.iter().map(|event| event.reason).collect();
    assert_eq!(reasons, vec![ReasonCode::DelegationRevoked, ReasonCode::StoreUnavailable]);

    // Revoking again once the store is back persists the revocation
    harness.store.set_unavailable(false);
    harness
        .manager
        .revoke_delegation(&bob().id, &delegation.id)
        .await
        .unwrap();
    let stored = harness.store.load_delegation(&delegation.id).await.unwrap().unwrap();
    assert!(stored.revoked);
}

#[tokio::test]
async fn test_revoke_requires_party() {
    let harness = Harness::new(FeatureFlags::all());
    let delegation = harness
        .manager
        .delegate(&bob(), &carol().id, scope(&["write:report"]), &acme(), THIRTY_MINUTES)
        .await
        .unwrap();

    let err = harness
        .manager
        .revoke_delegation(&PrincipalId::from("mallory"), &delegation.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::NotPermitted { .. }));
    assert!(!harness.manager.delegation(&delegation.id).unwrap().revoked);

    let err = harness
        .manager
        .revoke_delegation(&bob().id, &DelegationId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::UnknownDelegation(_)));
}

#[tokio::test]
async fn test_delegation_survives_restart() {
    let harness = Harness::new(FeatureFlags::all());
    let delegation = harness
        .manager
        .delegate(&bob(), &carol().id, scope(&["write:report"]), &acme(), THIRTY_MINUTES)
        .await
        .unwrap();
    assert!(harness.store.load_delegation(&delegation.id).await.unwrap().is_some());

    let delegations = harness.store.list_delegations().await.unwrap();
    assert_eq!(delegations.len(), 1);
    assert_eq!(harness.manager.hydrate().await.unwrap().delegations, 1);
}

#[tokio::test]
async fn test_delegation_rate_limit() {
    let harness = Harness::new(FeatureFlags::all());
    let limit = harness.manager.config().rate_limits.delegation_grant.count;

    for i in 0..limit {
        harness
            .manager
            .delegate(
                &bob(),
                &PrincipalId::from(format!("grantee-{i}")),
                scope(&["read:report"]),
                &acme(),
                THIRTY_MINUTES,
            )
            .await
            .unwrap();
    }

    let err = harness
        .manager
        .delegate(&bob(), &carol().id, scope(&["read:report"]), &acme(), THIRTY_MINUTES)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::RateLimitExceeded { .. }));
}
