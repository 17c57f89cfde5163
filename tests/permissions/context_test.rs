/*!
 * Context Switching Tests
 * Whitelisting, rate limiting, validation timeout and session state
 */

use crate::common::*;
use context_authz::permissions::audit::AuditKind;
use context_authz::permissions::context::SessionState;
use context_authz::permissions::RateCategory;
use context_authz::{AuthorizationManager, AuthzError, FeatureFlags, ManualClock, ReasonCode, SharedClock, TenantId};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_switch_moves_active_context() {
    let harness = Harness::new(FeatureFlags::all());
    let opened = harness.manager.open_session(&alice(), &acme()).await.unwrap();

    let switched = harness
        .manager
        .switch_context(&opened.session, &alice(), &TenantId::from("globex"))
        .await
        .unwrap();

    assert_eq!(switched.tenant, TenantId::from("globex"));
    assert_eq!(switched.state, SessionState::ContextActive);
    assert_eq!(switched.switch_count, 1);
    assert_eq!(harness.events_of(AuditKind::ContextSwitch).len(), 1);
}

#[tokio::test]
async fn test_switch_to_foreign_domain_is_rejected() {
    let harness = Harness::new(FeatureFlags::all());
    let opened = harness.manager.open_session(&alice(), &acme()).await.unwrap();

    let err = harness
        .manager
        .switch_context(&opened.session, &alice(), &TenantId::from("partners"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::ContextSwitchRejected { .. }));

    let session = harness.manager.session(&opened.session).unwrap();
    assert_eq!(session.tenant, acme());
    assert_eq!(session.state, SessionState::ContextActive);
    assert!(session.pending.is_none());

    let switches = harness.events_of(AuditKind::ContextSwitch);
    assert_eq!(switches.len(), 1);
    assert_eq!(switches[0].reason, ReasonCode::DomainNotWhitelisted);
}

#[tokio::test]
async fn test_switch_rate_limit() {
    let harness = Harness::new(FeatureFlags::all());
    let opened = harness.manager.open_session(&alice(), &acme()).await.unwrap();
    let tenants = [TenantId::from("globex"), acme()];

    for i in 0..100 {
        harness
            .manager
            .switch_context(&opened.session, &alice(), &tenants[i % 2])
            .await
            .unwrap_or_else(|e| panic!("switch {} failed: {e}", i + 1));
    }

    let err = harness
        .manager
        .switch_context(&opened.session, &alice(), &tenants[0])
        .await
        .unwrap_err();
    match err {
        AuthzError::RateLimitExceeded {
            category,
            retry_after_ms,
            ..
        } => {
            assert_eq!(category, RateCategory::ContextSwitch);
            assert!(retry_after_ms > 0);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // The rejected switch left the session where the 100th put it
    assert_eq!(harness.manager.session(&opened.session).unwrap().tenant, acme());
    let last = harness.events_of(AuditKind::ContextSwitch).pop().unwrap();
    assert_eq!(last.reason, ReasonCode::RateLimited);

    // A refilled token admits the next switch
    harness.clock.advance(Duration::from_secs(1));
    assert!(harness
        .manager
        .switch_context(&opened.session, &alice(), &tenants[0])
        .await
        .is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_validation_timeout_keeps_previous_context() {
    let store = Arc::new(SlowTenantStore {
        inner: policy_store(),
        delay: Duration::from_secs(10),
    });
    let clock: SharedClock = Arc::new(ManualClock::starting_now());
    let mut config = config(FeatureFlags::all());
    config.context_validation_timeout = Duration::from_millis(50);

    let manager = AuthorizationManager::builder(config)
        .graph(graph())
        .policy_store(store)
        .clock(clock)
        .build()
        .unwrap();
    let opened = manager.open_session(&alice(), &acme()).await.unwrap();

    let err = manager
        .switch_context(&opened.session, &alice(), &TenantId::from("slowcorp"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AuthzError::ContextValidationTimeout { timeout_ms: 50, .. }
    ));

    let session = manager.session(&opened.session).unwrap();
    assert_eq!(session.tenant, acme());
    assert_eq!(session.state, SessionState::ContextActive);
}

#[tokio::test]
async fn test_switch_of_foreign_session_is_not_permitted() {
    let harness = Harness::new(FeatureFlags::all());
    let opened = harness.manager.open_session(&alice(), &acme()).await.unwrap();

    let err = harness
        .manager
        .switch_context(&opened.session, &bob(), &TenantId::from("globex"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::NotPermitted { .. }));
    assert_eq!(harness.manager.session(&opened.session).unwrap().tenant, acme());
}

#[tokio::test]
async fn test_closed_session_cannot_switch() {
    let harness = Harness::new(FeatureFlags::all());
    let opened = harness.manager.open_session(&alice(), &acme()).await.unwrap();
    harness
        .manager
        .close_session(&opened.session, &alice().id)
        .await
        .unwrap();

    let err = harness
        .manager
        .switch_context(&opened.session, &alice(), &TenantId::from("globex"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::NotPermitted { .. }));

    let report = harness.manager.reap_expired();
    assert_eq!(report.sessions, 1);
    assert!(harness.manager.session(&opened.session).is_none());
}

#[tokio::test]
async fn test_open_session_rejects_foreign_domain() {
    let harness = Harness::new(FeatureFlags::all());

    let err = harness
        .manager
        .open_session(&alice(), &TenantId::from("partners"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::ContextSwitchRejected { .. }));

    let starts = harness.events_of(AuditKind::SessionStart);
    assert_eq!(starts.len(), 1);
    assert_eq!(starts[0].reason, ReasonCode::DomainNotWhitelisted);
}
