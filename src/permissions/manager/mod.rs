/*!
 * Authorization Manager
 * Single entry point for read decisions and privileged mutations
 *
 * Reads: context check → decision cache (graph + delegations + elevations on
 * a miss) → audit write → decision. Mutations: rate limit → validation →
 * audit → commit. Nothing becomes effective or is returned before its audit
 * event is committed.
 */

mod builder;
mod maintenance;
mod manager;
mod mutations;

pub use builder::AuthorizationManagerBuilder;
pub use maintenance::{HydrationReport, ReapReport};
pub use manager::AuthorizationManager;
