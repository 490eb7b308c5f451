//! Notifications module.
//!
//! Provides notification types and the sink trait used to surface them.
//! Runtimes implement the sink to show toasts, write logs, or alert
//! administrators.

mod notification;
mod sink;

pub use notification::*;
pub use sink::*;
