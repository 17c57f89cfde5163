/*!
 * Identity Federation Tests
 */

use crate::common::*;
use context_authz::permissions::audit::AuditKind;
use context_authz::store::PolicyStore;
use context_authz::{
    Action, AuthzError, FeatureFlags, IdentityProvider, Principal, PrincipalId, ReasonCode,
    ResolvedIdentity, StaticIdentityProvider,
};
use std::sync::Arc;

fn harness() -> Harness {
    let provider = StaticIdentityProvider::new()
        .with_token("t-dave", ResolvedIdentity::new("dave", "Company.com"))
        .with_token("t-bob", ResolvedIdentity::new("bob", "elsewhere.io"));
    let provider: Arc<dyn IdentityProvider> = Arc::new(provider);
    Harness::with_config(config(FeatureFlags::all()), Some(provider))
}

#[tokio::test]
async fn test_first_resolution_creates_principal() {
    let harness = harness();
    let dave = PrincipalId::from("dave");

    let principal = harness.manager.resolve_identity(&dave, "t-dave").await.unwrap();
    assert_eq!(principal.domain.as_str(), "company.com");
    assert!(principal.roles.is_empty());

    let stored = harness.store.load_principal(&dave).await.unwrap().unwrap();
    assert_eq!(stored, principal);

    let events = harness.events_of(AuditKind::IdentityFederation);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, ReasonCode::IdentityResolved);

    // A fresh principal holds nothing until roles are assigned
    let decision = harness
        .manager
        .authorize(&report(Action::Read, principal, "acme"))
        .await
        .unwrap();
    assert_eq!(decision.reason(), ReasonCode::NoMatchingCapability);
}

#[tokio::test]
async fn test_known_principal_keeps_roles() {
    let harness = harness();
    let dave = Principal::new("dave", "company.com").with_role("editor");
    harness.store.save_principal(&dave).await.unwrap();

    let principal = harness.manager.resolve_identity(&dave.id, "t-dave").await.unwrap();
    assert_eq!(principal, dave);
}

#[tokio::test]
async fn test_token_for_another_principal() {
    let harness = harness();

    let err = harness
        .manager
        .resolve_identity(&PrincipalId::from("erin"), "t-dave")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::Authentication { .. }));
    assert_eq!(
        harness.events_of(AuditKind::IdentityFederation)[0].reason,
        ReasonCode::AuthenticationFailed
    );
}

#[tokio::test]
async fn test_domain_change_is_rejected() {
    let harness = harness();
    harness.store.save_principal(&bob()).await.unwrap();

    let err = harness
        .manager
        .resolve_identity(&bob().id, "t-bob")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::Authentication { .. }));
}

#[tokio::test]
async fn test_unknown_token() {
    let harness = harness();
    let err = harness
        .manager
        .resolve_identity(&PrincipalId::from("dave"), "forged")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::Authentication { .. }));
}

#[tokio::test]
async fn test_federation_rate_limit() {
    let harness = harness();
    let dave = PrincipalId::from("dave");
    let limit = harness.manager.config().rate_limits.identity_federation.count;

    for _ in 0..limit {
        harness.manager.resolve_identity(&dave, "t-dave").await.unwrap();
    }
    let err = harness
        .manager
        .resolve_identity(&dave, "t-dave")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::RateLimitExceeded { .. }));
}
