/*!
 * Core Module
 * Fundamental scheduler types, limits, configuration and error handling
 */

pub mod config;
pub mod errors;
pub mod limits;
pub mod time;
pub mod types;

// Re-export for convenience
pub use config::SchedConfig;
pub use errors::*;
pub use time::{Clock, ManualClock, MonotonicClock};
pub use types::*;
