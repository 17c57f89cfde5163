/*!
 * Permissions Module
 * Context-aware authorization, delegation and audit
 *
 * ## Features
 * - Role graph with optional per-tenant inheritance
 * - Per-session tenant contexts with validated, rate-limited switching
 * - Time-bounded delegations and elevations
 * - Single-flight decision cache keyed by a BLAKE3 fingerprint
 * - Fail-closed audit ledger with optional payload encryption
 *
 * ## Usage
 * ```ignore
 * use context_authz::permissions::{Action, AuthorizationManager, AuthorizationRequest};
 *
 * let manager = AuthorizationManager::builder(config).graph(graph).build()?;
 *
 * let request = AuthorizationRequest::new(alice, Action::Read, report, "acme");
 * let decision = manager.authorize(&request).await?;
 * if !decision.is_allowed() {
 *     eprintln!("Denied: {:?}", decision.reason());
 * }
 * ```
 */

pub mod audit;
pub mod cache;
pub mod context;
pub mod delegation;
pub mod elevation;
pub mod graph;
pub mod manager;
pub mod ratelimit;
pub mod types;

// Re-export commonly used items
pub use audit::{AuditEvent, AuditKind, AuditLedger, AuditSeverity, AuditSink, MemoryAuditSink};
pub use cache::{CacheStats, CacheStore, DecisionCache, Fingerprint, MemoryCacheStore};
pub use context::{ContextManager, SessionRecord, SessionState};
pub use delegation::{Delegation, DelegationManager};
pub use elevation::{Elevation, ElevationManager};
pub use graph::{GraphBuilder, PermissionGraph, PermissionNode, RoleCatalog};
pub use manager::{AuthorizationManager, AuthorizationManagerBuilder, HydrationReport, ReapReport};
pub use ratelimit::{RateLimit, RateLimiter, RateLimits};
pub use types::{
    Action, AuthorizationDecision, AuthorizationRequest, Authorizer, Capability, CapabilitySet,
    CorporateContext, Decision, Outcome, Principal, RateCategory, ReasonCode, ReasonKind,
    ResourceKind, ResourceRef,
};
