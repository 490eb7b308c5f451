//! Client-side caller of the validation engine.

use std::sync::Arc;

use log::{debug, warn};
use rust_decimal::Decimal;

use relief_budget_core::budget::{validate_against_snapshot, BudgetSnapshotStore};
use relief_budget_core::messages::ValidateRequest;
use relief_budget_core::{SessionId, ValidationResult};

use crate::api::BudgetApi;
use crate::error::SyncError;

/// Where a validation result came from.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    /// Decided locally without a network call.
    Local(ValidationResult),
    /// Decided by the server.
    Server(ValidationResult),
    /// The server could not be reached or answered garbage.
    Degraded(ValidationResult),
    /// The session key was rejected.
    AuthExpired(ValidationResult),
}

impl ValidationOutcome {
    pub fn result(&self) -> &ValidationResult {
        match self {
            ValidationOutcome::Local(result)
            | ValidationOutcome::Server(result)
            | ValidationOutcome::Degraded(result)
            | ValidationOutcome::AuthExpired(result) => result,
        }
    }

    pub fn into_result(self) -> ValidationResult {
        match self {
            ValidationOutcome::Local(result)
            | ValidationOutcome::Server(result)
            | ValidationOutcome::Degraded(result)
            | ValidationOutcome::AuthExpired(result) => result,
        }
    }

    pub fn can_create(&self) -> bool {
        self.result().can_create
    }
}

/// Validates amounts against cached snapshots or through the server.
pub struct BudgetValidator {
    session_id: SessionId,
    api: Arc<dyn BudgetApi>,
    store: Arc<BudgetSnapshotStore>,
}

impl BudgetValidator {
    pub fn new(session_id: SessionId, api: Arc<dyn BudgetApi>, store: Arc<BudgetSnapshotStore>) -> Self {
        Self {
            session_id,
            api,
            store,
        }
    }

    /// Immediate evaluation against the cached snapshot.
    pub fn validate_local(&self, mis: &str, amount: Decimal) -> ValidationResult {
        if amount <= Decimal::ZERO {
            return ValidationResult::missing_amount();
        }
        match self.store.snapshot(mis) {
            Some(snapshot) => validate_against_snapshot(amount, &snapshot),
            None => ValidationResult::snapshot_unavailable(mis),
        }
    }

    /// Server round-trip. Never fails: transport problems degrade to a soft
    /// warning that blocks creation.
    pub async fn validate(&self, mis: &str, amount: Decimal) -> ValidationOutcome {
        if amount <= Decimal::ZERO {
            return ValidationOutcome::Local(ValidationResult::missing_amount());
        }

        let request = ValidateRequest {
            mis: mis.to_string(),
            amount,
            session_id: self.session_id,
        };
        match self.api.validate(&request).await {
            Ok(result) => {
                debug!(
                    "Validated {} for {}: {:?} (tier {:?})",
                    amount,
                    mis,
                    result.status,
                    result.tier()
                );
                if let Some(snapshot) = result.snapshot() {
                    if snapshot.mis == mis {
                        self.store.put(snapshot.clone());
                    }
                }
                ValidationOutcome::Server(result)
            }
            Err(SyncError::AuthExpired) => {
                warn!("Validation for {} rejected: session expired", mis);
                ValidationOutcome::AuthExpired(ValidationResult::session_expired())
            }
            Err(e) => {
                warn!("Validation for {} degraded: {}", mis, e);
                ValidationOutcome::Degraded(ValidationResult::transport_unavailable(e.to_string()))
            }
        }
    }
}
