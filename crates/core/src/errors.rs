//! Core error types for relief-budget.
//!
//! These errors are transport-agnostic. Network and socket failures live in
//! the `sync` crate and are converted into soft validation outcomes there.

use thiserror::Error;

/// Type alias for Result using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type for the budget domain.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Input validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Budget snapshot not found for project {0}")]
    SnapshotNotFound(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Validation errors for user input and incoming payloads.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Quarter must be between 1 and 4, got {0}")]
    InvalidQuarter(u8),

    #[error("Failed to parse decimal number: {0}")]
    DecimalParse(#[from] rust_decimal::Error),
}

impl From<rust_decimal::Error> for Error {
    fn from(err: rust_decimal::Error) -> Self {
        Error::Validation(ValidationError::DecimalParse(err))
    }
}
