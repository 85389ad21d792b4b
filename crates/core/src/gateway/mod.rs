//! Gateway session lifecycle
//!
//! - [`state`]: the tagged session state and its transition function
//! - [`session`]: the control task that drives one connection
//! - [`start_limiter`]: the process-wide session start budget

pub mod ports;
pub mod session;
pub mod start_limiter;
pub mod state;

pub use session::{GatewaySession, SessionHandle};
pub use start_limiter::{SessionStartLimiter, StartPermit};
pub use state::{advance, Session, Trigger};
