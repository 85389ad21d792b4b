//! # Conduit Domain
//!
//! Value types shared by every Conduit layer.
//!
//! This crate contains:
//! - The [`ConduitError`] taxonomy and `Result` alias
//! - REST request/response shapes and rate-limit metadata
//! - Gateway wire frames, opcodes and close codes
//! - Configuration structures
//!
//! ## Architecture
//! - Depends only on `conduit-common` (foundation tier)
//! - No I/O, no async runtime
//! - Pure data structures and classification logic

pub mod config;
pub mod constants;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
