/*!
 * Authorization tests entry point
 */

#[path = "permissions/common.rs"]
mod common;

#[path = "permissions/authorize_test.rs"]
mod authorize_test;

#[path = "permissions/context_test.rs"]
mod context_test;

#[path = "permissions/delegation_test.rs"]
mod delegation_test;

#[path = "permissions/elevation_test.rs"]
mod elevation_test;

#[path = "permissions/audit_test.rs"]
mod audit_test;

#[path = "permissions/identity_test.rs"]
mod identity_test;
