/*!
 * Read Decision Tests
 * Graph resolution, caching and deny reasons through the facade
 */

use crate::common::*;
use context_authz::permissions::audit::AuditKind;
use context_authz::{Action, AuthzError, ConfigurationError, FeatureFlags, Principal, ReasonCode};
use pretty_assertions::assert_eq;
use std::time::Duration;

#[tokio::test]
async fn test_viewer_reads_report() {
    let harness = Harness::new(FeatureFlags::all());

    let decision = harness
        .manager
        .authorize(&report(Action::Read, alice(), "acme"))
        .await
        .unwrap();

    assert!(decision.is_allowed());
    assert_eq!(decision.reason(), ReasonCode::CapabilityGranted);
    assert!(!decision.cached);

    let events = harness.events();
    assert_eq!(events.len(), 1);
    assert_eq!(Some(events[0].event_id), decision.event_id);
    assert_eq!(events[0].kind, AuditKind::Authorization);
    assert_eq!(events[0].reason, ReasonCode::CapabilityGranted);
}

#[tokio::test]
async fn test_viewer_cannot_write() {
    let harness = Harness::new(FeatureFlags::all());

    let decision = harness
        .manager
        .authorize(&report(Action::Write, alice(), "acme"))
        .await
        .unwrap();

    assert!(!decision.is_allowed());
    assert_eq!(decision.reason(), ReasonCode::NoMatchingCapability);
    assert!(decision.event_id.is_some());
}

#[tokio::test]
async fn test_cached_decision_is_still_audited() {
    let harness = Harness::new(FeatureFlags::all());
    let request = report(Action::Read, alice(), "acme");

    let first = harness.manager.authorize(&request).await.unwrap();
    let second = harness.manager.authorize(&request).await.unwrap();

    assert!(!first.cached);
    assert!(second.cached);
    assert_ne!(first.event_id, second.event_id);
    assert_eq!(harness.events().len(), 2);
    assert_eq!(harness.manager.cache_stats().computations, 1);
}

#[tokio::test]
async fn test_cache_entry_expires_after_ttl() {
    let harness = Harness::new(FeatureFlags::all());
    let request = report(Action::Read, alice(), "acme");

    harness.manager.authorize(&request).await.unwrap();
    harness.clock.advance(harness.manager.config().cache_ttl + Duration::from_millis(1));
    let again = harness.manager.authorize(&request).await.unwrap();

    assert!(!again.cached);
    assert_eq!(harness.manager.cache_stats().computations, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_requests_compute_once() {
    let harness = Harness::new(FeatureFlags::all());
    let request = report(Action::Read, bob(), "acme");

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let manager = harness.manager.clone();
            let request = request.clone();
            tokio::spawn(async move { manager.authorize(&request).await })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        let decision = result.unwrap().unwrap();
        assert!(decision.is_allowed());
    }

    assert_eq!(harness.manager.cache_stats().computations, 1);
    assert_eq!(harness.events().len(), 32);
}

#[tokio::test]
async fn test_inheritance_requires_feature_flag() {
    let disabled = Harness::new(FeatureFlags {
        inheritance: false,
        ..FeatureFlags::all()
    });
    let decision = disabled
        .manager
        .authorize(&report(Action::Read, bob(), "acme"))
        .await
        .unwrap();
    assert_eq!(decision.reason(), ReasonCode::NoMatchingCapability);

    let enabled = Harness::new(FeatureFlags::all());
    let decision = enabled
        .manager
        .authorize(&report(Action::Read, bob(), "acme"))
        .await
        .unwrap();
    assert_eq!(decision.reason(), ReasonCode::CapabilityGranted);
}

#[tokio::test]
async fn test_inheritance_requires_tenant_opt_in() {
    let harness = Harness::new(FeatureFlags::all());

    // Direct role capabilities still apply in a tenant without inheritance
    let approve = harness
        .manager
        .authorize(&report(Action::Approve, bob(), "flat"))
        .await
        .unwrap();
    assert!(approve.is_allowed());

    let read = harness
        .manager
        .authorize(&report(Action::Read, bob(), "flat"))
        .await
        .unwrap();
    assert_eq!(read.reason(), ReasonCode::NoMatchingCapability);
}

#[tokio::test]
async fn test_unknown_role_is_configuration_fault() {
    let harness = Harness::new(FeatureFlags::all());
    let ghost = Principal::new("ghost", "company.com").with_role("phantom");

    let err = harness
        .manager
        .authorize(&report(Action::Read, ghost, "acme"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AuthzError::Configuration(ConfigurationError::UnknownRole { .. })
    ));
    let events = harness.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, ReasonCode::ConfigurationFault);
}

#[tokio::test]
async fn test_unknown_tenant_denies() {
    let harness = Harness::new(FeatureFlags::all());

    let decision = harness
        .manager
        .authorize(&report(Action::Read, alice(), "initech"))
        .await
        .unwrap();

    assert_eq!(decision.reason(), ReasonCode::UnknownTenant);
    assert_eq!(harness.events().len(), 1);
}

#[tokio::test]
async fn test_foreign_domain_denied_in_tenant() {
    let harness = Harness::new(FeatureFlags::all());

    let decision = harness
        .manager
        .authorize(&report(Action::Read, alice(), "partners"))
        .await
        .unwrap();

    assert_eq!(decision.reason(), ReasonCode::DomainNotWhitelisted);
}

#[tokio::test]
async fn test_session_context_must_match_request() {
    let harness = Harness::new(FeatureFlags::all());
    let session = harness
        .manager
        .open_session(&alice(), &acme())
        .await
        .unwrap();

    let in_session = report(Action::Read, alice(), "acme").in_session(session.session);
    assert!(harness.manager.authorize(&in_session).await.unwrap().is_allowed());

    let elsewhere = report(Action::Read, alice(), "globex").in_session(session.session);
    let decision = harness.manager.authorize(&elsewhere).await.unwrap();
    assert_eq!(decision.reason(), ReasonCode::ContextMismatch);
}

#[tokio::test]
async fn test_reloaded_roles_apply_immediately() {
    let harness = Harness::new(FeatureFlags::all());
    let request = report(Action::Delete, alice(), "acme");
    assert!(!harness.manager.authorize(&request).await.unwrap().is_allowed());

    let graph = context_authz::permissions::graph::GraphBuilder::new()
        .with(context_authz::permissions::graph::PermissionNode::new(
            "viewer",
            scope(&["read:report", "delete:report"]),
        ))
        .build()
        .unwrap();
    harness.manager.reload_roles(graph);

    let decision = harness.manager.authorize(&request).await.unwrap();
    assert!(decision.is_allowed());
    assert!(!decision.cached);
}
