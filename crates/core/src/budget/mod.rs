//! Budget snapshots and tiered validation.

mod budget_model;
mod snapshot_store;
mod validation;

pub use budget_model::*;
pub use snapshot_store::{BudgetSnapshotStore, PendingPreview, SnapshotEntry};
pub use validation::*;
