//! # Conduit Infrastructure
//!
//! Infrastructure implementations of core ports.
//!
//! This crate contains:
//! - The reqwest REST transport
//! - The tokio-tungstenite gateway connector
//! - Credential providers
//! - Configuration loading and tracing setup
//! - [`ConduitClient`], which wires all of the above together
//!
//! ## Architecture
//! - Implements traits defined in `conduit-core`
//! - Contains all "impure" code (network, environment, files)

pub mod auth;
pub mod client;
pub mod config;
pub mod gateway;
pub mod http;
pub mod observability;

// Re-export commonly used items
pub use auth::StaticTokenProvider;
pub use client::{ConduitClient, ConduitClientBuilder};
pub use gateway::WebSocketConnector;
pub use http::ReqwestTransport;
pub use observability::init_tracing;
