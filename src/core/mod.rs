/*!
 * Core Module
 * Identifiers, time source, limits, and error handling
 */

pub mod clock;
pub mod errors;
pub mod limits;
pub mod types;

// Re-export for convenience
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use errors::*;
pub use types::*;
