//! HTTP transport for the REST pipeline

pub mod client;

pub use client::{ReqwestTransport, ReqwestTransportBuilder};
