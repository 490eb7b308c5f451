//! Relief Budget Core - domain types, validation rules and message dispatch.
//!
//! This crate holds the transport-free part of live budget sync: project
//! budget snapshots, the tiered amount validation, the channel wire format
//! and the dispatcher that turns inbound frames into cache invalidations.
//! The `relief-budget-sync` crate drives it over HTTP and WebSocket.

pub mod budget;
pub mod cache;
pub mod constants;
pub mod dispatch;
pub mod errors;
pub mod messages;
pub mod notifications;
pub mod session;

pub use budget::*;
pub use session::SessionId;

// Re-export error types
pub use errors::Error;
pub use errors::Result;
