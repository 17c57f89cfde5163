/*!
 * Elevation Tests
 */

use crate::common::*;
use context_authz::permissions::audit::AuditKind;
use context_authz::{Action, AuthzError, FeatureFlags, PrincipalId, ReasonCode};
use std::time::Duration;

#[tokio::test]
async fn test_elevation_grants_unheld_scope() {
    let harness = Harness::new(FeatureFlags::all());
    let request = report(Action::Administer, alice(), "acme");

    let elevation = harness
        .manager
        .elevate(&alice(), scope(&["administer:report"]), &acme(), Duration::from_secs(300))
        .await
        .unwrap();
    assert!(!elevation.clamped);

    let decision = harness.manager.authorize(&request).await.unwrap();
    assert_eq!(decision.reason(), ReasonCode::GrantedViaElevation);

    harness.clock.advance(Duration::from_secs(301));
    let decision = harness.manager.authorize(&request).await.unwrap();
    assert_eq!(decision.reason(), ReasonCode::NoMatchingCapability);
}

#[tokio::test]
async fn test_elevation_is_clamped_to_its_own_maximum() {
    let harness = Harness::new(FeatureFlags::all());
    let config = harness.manager.config();
    assert!(config.max_elevation_duration < config.max_delegation_duration);

    let elevation = harness
        .manager
        .elevate(&alice(), scope(&["delete:report"]), &acme(), config.max_delegation_duration)
        .await
        .unwrap();

    assert!(elevation.clamped);
    assert_eq!(
        elevation.expires_at,
        elevation.created_at + config.max_elevation_duration
    );
    let events = harness.events_of(AuditKind::Elevation);
    assert_eq!(events[0].reason, ReasonCode::ElevationGrantedClamped);
}

#[tokio::test]
async fn test_elevation_only_applies_in_its_context() {
    let harness = Harness::new(FeatureFlags::all());
    harness
        .manager
        .elevate(&alice(), scope(&["delete:report"]), &acme(), Duration::from_secs(60))
        .await
        .unwrap();

    let decision = harness
        .manager
        .authorize(&report(Action::Delete, alice(), "globex"))
        .await
        .unwrap();
    assert!(!decision.is_allowed());
}

#[tokio::test]
async fn test_revoked_elevation_stops_applying() {
    let harness = Harness::new(FeatureFlags::all());
    let elevation = harness
        .manager
        .elevate(&alice(), scope(&["delete:report"]), &acme(), Duration::from_secs(60))
        .await
        .unwrap();
    let request = report(Action::Delete, alice(), "acme");
    assert!(harness.manager.authorize(&request).await.unwrap().is_allowed());

    let revoked = harness
        .manager
        .revoke_elevation(&PrincipalId::from("security-officer"), &elevation.id)
        .await
        .unwrap();
    assert!(revoked.revoked);
    assert!(!harness.manager.authorize(&request).await.unwrap().is_allowed());

    let events = harness.events_of(AuditKind::ElevationRevoke);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].principal, PrincipalId::from("security-officer"));
}

#[tokio::test]
async fn test_elevation_revoke_applies_when_store_write_fails() {
    let harness = Harness::new(FeatureFlags::all());
    let elevation = harness
        .manager
        .elevate(&alice(), scope(&["delete:report"]), &acme(), Duration::from_secs(60))
        .await
        .unwrap();
    let request = report(Action::Delete, alice(), "acme");
    assert!(harness.manager.authorize(&request).await.unwrap().is_allowed());

    harness.store.set_unavailable(true);
    let err = harness
        .manager
        .revoke_elevation(&PrincipalId::from("security-officer"), &elevation.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::Store(_)));
    assert!(!harness.manager.authorize(&request).await.unwrap().is_allowed());
    assert!(harness.manager.elevation(&elevation.id).unwrap().revoked);

    let events = harness.events_of(AuditKind::ElevationRevoke);
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].reason, ReasonCode::StoreUnavailable);
}

#[tokio::test]
async fn test_elevation_disabled() {
    let harness = Harness::new(FeatureFlags {
        elevation: false,
        ..FeatureFlags::all()
    });

    let err = harness
        .manager
        .elevate(&alice(), scope(&["delete:report"]), &acme(), Duration::from_secs(60))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::FeatureDisabled { .. }));
    assert_eq!(harness.events_of(AuditKind::Elevation)[0].reason, ReasonCode::FeatureDisabled);
}
