//! Sync configuration
//!
//! Timeouts, round length and sample filtering shared by both roles.

/// Protocol timing and filtering parameters
pub mod sync;

pub use sync::{ConfigError, SyncConfig};
