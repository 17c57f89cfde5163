/*!
 * Audit Tests
 * Fail-closed decisions, recovery and payload encryption through the facade
 */

use crate::common::*;
use context_authz::permissions::audit::{AuditKey, AuditKind, AuditSeverity, CipherAlgorithm};
use context_authz::{Action, AuthzConfig, AuthzError, FeatureFlags, Outcome, ReasonCode, TenantId};

#[tokio::test]
async fn test_audit_outage_denies_allowed_request() {
    let harness = Harness::new(FeatureFlags::all());
    harness.sink.set_offline(true);

    let decision = harness
        .manager
        .authorize(&report(Action::Read, alice(), "acme"))
        .await
        .unwrap();

    assert_eq!(decision.outcome, Outcome::Deny);
    assert_eq!(decision.reason(), ReasonCode::AuditUnavailable);
    assert!(decision.event_id.is_none());
    assert!(harness.events().is_empty());
    assert_eq!(harness.manager.ledger().pending_len(), 1);

    harness.sink.set_offline(false);
    let report = harness.manager.ledger().retry_pending().await;
    assert_eq!(report.recorded, 1);

    let events = harness.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, ReasonCode::AuditUnavailable);
    assert_eq!(events[0].severity, AuditSeverity::Critical);
}

#[tokio::test]
async fn test_audit_outage_abandons_context_switch() {
    let harness = Harness::new(FeatureFlags::all());
    let opened = harness.manager.open_session(&alice(), &acme()).await.unwrap();
    harness.sink.set_offline(true);

    let err = harness
        .manager
        .switch_context(&opened.session, &alice(), &TenantId::from("globex"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::AuditWriteFailure { .. }));
    assert_eq!(harness.manager.session(&opened.session).unwrap().tenant, acme());
}

#[tokio::test]
async fn test_audit_outage_abandons_delegation() {
    let harness = Harness::new(FeatureFlags::all());
    harness.sink.set_offline(true);

    let err = harness
        .manager
        .delegate(
            &bob(),
            &carol().id,
            scope(&["write:report"]),
            &acme(),
            std::time::Duration::from_secs(60),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::AuditWriteFailure { .. }));

    harness.sink.set_offline(false);
    let decision = harness
        .manager
        .authorize(&report(Action::Write, carol(), "acme"))
        .await
        .unwrap();
    assert_eq!(decision.reason(), ReasonCode::NoMatchingCapability);
}

#[tokio::test]
async fn test_encrypted_comprehensive_payload() {
    let config = AuthzConfig::default()
        .with_features(FeatureFlags::all())
        .with_audit_key(CipherAlgorithm::ChaCha20Poly1305, AuditKey::new([7u8; 32]));
    let harness = Harness::with_config(config, None);

    harness
        .manager
        .authorize(&report(Action::Read, alice(), "acme"))
        .await
        .unwrap();

    let events = harness.events();
    assert!(events[0].payload.is_encrypted());
    let details = harness.manager.ledger().decrypt_payload(&events[0]).unwrap();
    assert_eq!(details["cached"], false);
    assert!(details["fingerprint"].is_string());
    assert!(details["capabilities"]
        .as_array()
        .unwrap()
        .iter()
        .any(|cap| cap == "read:report"));
}

#[tokio::test]
async fn test_plain_payload_without_comprehensive_audit() {
    let harness = Harness::new(FeatureFlags {
        comprehensive_audit: false,
        ..FeatureFlags::all()
    });

    harness
        .manager
        .authorize(&report(Action::Read, alice(), "acme"))
        .await
        .unwrap();

    let events = harness.events();
    assert!(!events[0].payload.is_encrypted());
    let details = harness.manager.ledger().decrypt_payload(&events[0]).unwrap();
    assert!(details.get("fingerprint").is_none());
}

#[tokio::test]
async fn test_denied_mutation_is_critical() {
    let harness = Harness::new(FeatureFlags::all());
    let _ = harness
        .manager
        .delegate(
            &alice(),
            &carol().id,
            scope(&["delete:report"]),
            &acme(),
            std::time::Duration::from_secs(60),
        )
        .await;

    let grants = harness.events_of(AuditKind::DelegationGrant);
    assert_eq!(grants[0].decision, Outcome::Deny);
    assert_eq!(grants[0].severity, AuditSeverity::Critical);
}
