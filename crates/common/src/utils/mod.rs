//! Common utility functions
//!
//! - **[`serde`]**: Serialization helpers for durations carried on the wire
//!   and in configuration files

pub mod serde;

// Re-export commonly used items for convenience
pub use self::serde::{duration_millis, duration_secs_f64};
