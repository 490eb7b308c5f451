//! Relief Budget Server - validation and fan-out endpoints for live budget sync.

pub mod api;
pub mod config;
pub mod error;
pub mod hub;
pub mod notifier;
pub mod repository;

mod main_lib;

pub use main_lib::{build_state, init_tracing, AppState};
