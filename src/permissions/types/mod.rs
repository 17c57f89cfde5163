/*!
 * Permission Types Module
 * Core types and traits for the authorization core
 */

mod core;
mod traits;

pub use self::core::{
    Action, AuthorizationDecision, AuthorizationRequest, Capability, CapabilitySet,
    CorporateContext, Decision, Outcome, Principal, RateCategory, ReasonCode, ReasonKind,
    ResourceKind, ResourceRef,
};
pub use traits::Authorizer;
