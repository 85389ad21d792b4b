//! Gateway link implementations

pub mod websocket;

pub use websocket::{gateway_url, WebSocketConnector};
