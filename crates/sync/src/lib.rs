//! Relief Budget Sync - client runtime for live budget synchronization.
//!
//! This crate talks to the budget server: validation and broadcast calls over
//! HTTP, and a persistent WebSocket channel whose frames are routed into the
//! core dispatcher.
//!
//! # Usage
//!
//! ```rust,ignore
//! use relief_budget_sync::{BudgetSyncRuntime, SyncConfig};
//!
//! let runtime = BudgetSyncRuntime::from_config(SyncConfig::from_env(), notifier)?;
//! runtime.start(session_key).await;
//! let snapshot = runtime.open_project("5001234").await?;
//! let preview = runtime.edit_amount("5001234", amount);
//! let outcome = runtime.submit("5001234", amount).await;
//! ```

mod api;
mod broadcaster;
mod config;
pub mod connection;
mod error;
mod runtime;
mod timer;
mod validator;

pub use api::{BudgetApi, BudgetApiClient, MockBudgetApi};
pub use broadcaster::ChangeBroadcaster;
pub use config::{BackoffPolicy, SyncConfig};
pub use connection::{ConnectionInfo, ConnectionManager, ConnectionState, Visibility};
pub use error::{Result, SyncError};
pub use runtime::BudgetSyncRuntime;
pub use timer::TimerHandle;
pub use validator::{BudgetValidator, ValidationOutcome};
