//! Snapshot storage behind the budget endpoints.
//!
//! The portal keeps budget figures in its own database; this repository is
//! the seam where that storage plugs in. The in-memory implementation is
//! seeded from a JSON file at startup.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use anyhow::Context;
use relief_budget_core::{BudgetFigures, BudgetSnapshot, Quarter};

pub trait BudgetRepository: Send + Sync {
    fn get(&self, mis: &str) -> Option<BudgetSnapshot>;

    /// Inserts or replaces the figures for a project and returns the
    /// recomputed snapshot.
    fn upsert(&self, mis: &str, figures: BudgetFigures, quarter: Option<Quarter>) -> BudgetSnapshot;

    fn projects(&self) -> Vec<String>;
}

#[derive(Default)]
pub struct InMemoryBudgetRepository {
    snapshots: RwLock<HashMap<String, BudgetSnapshot>>,
}

impl InMemoryBudgetRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshots(snapshots: impl IntoIterator<Item = BudgetSnapshot>) -> Self {
        let map = snapshots
            .into_iter()
            .map(|snapshot| (snapshot.mis.clone(), snapshot))
            .collect();
        Self {
            snapshots: RwLock::new(map),
        }
    }

    /// Loads a JSON array of snapshots. Derived availability is recomputed
    /// from the figures, whatever the file says.
    pub async fn from_seed_file(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read seed file {}", path.display()))?;
        let mut snapshots: Vec<BudgetSnapshot> = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid seed file {}", path.display()))?;
        for snapshot in &mut snapshots {
            snapshot.recompute();
        }
        Ok(Self::with_snapshots(snapshots))
    }

    pub fn len(&self) -> usize {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BudgetRepository for InMemoryBudgetRepository {
    fn get(&self, mis: &str) -> Option<BudgetSnapshot> {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(mis)
            .cloned()
    }

    fn upsert(&self, mis: &str, figures: BudgetFigures, quarter: Option<Quarter>) -> BudgetSnapshot {
        let mut snapshots = self.snapshots.write().unwrap_or_else(PoisonError::into_inner);
        let snapshot = match snapshots.get_mut(mis) {
            Some(existing) => {
                if let Some(quarter) = quarter {
                    existing.current_quarter = quarter;
                }
                existing.update_figures(figures);
                existing.clone()
            }
            None => {
                let snapshot = match quarter {
                    Some(quarter) => BudgetSnapshot::for_quarter(mis, figures, quarter),
                    None => BudgetSnapshot::new(mis, figures),
                };
                snapshots.insert(mis.to_string(), snapshot.clone());
                snapshot
            }
        };
        snapshot
    }

    fn projects(&self) -> Vec<String> {
        let mut projects: Vec<String> = self
            .snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        projects.sort();
        projects
    }
}
