/*!
 * Permission Traits
 * Interfaces for answering authorization requests
 */

use super::core::{AuthorizationDecision, AuthorizationRequest};
use crate::core::errors::AuthzResult;
use async_trait::async_trait;

/// Core read-decision interface
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Decide a request; the returned decision is already audited
    async fn authorize(&self, request: &AuthorizationRequest) -> AuthzResult<AuthorizationDecision>;

    /// Decide several requests in order
    async fn authorize_batch(
        &self,
        requests: &[AuthorizationRequest],
    ) -> Vec<AuthzResult<AuthorizationDecision>> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.authorize(request).await);
        }
        results
    }
}
