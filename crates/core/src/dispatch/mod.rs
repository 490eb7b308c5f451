//! Inbound message dispatch.

mod dispatcher;

pub use dispatcher::{DispatchOutcome, MessageDispatcher};
