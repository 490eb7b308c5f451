//! Budget snapshot domain models.

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, ValidationError};

/// Fiscal quarter used to pick the quarterly allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quarter {
    Q1,
    Q2,
    Q3,
    Q4,
}

impl Quarter {
    pub fn from_month(month: u32) -> Self {
        match month {
            1..=3 => Quarter::Q1,
            4..=6 => Quarter::Q2,
            7..=9 => Quarter::Q3,
            _ => Quarter::Q4,
        }
    }

    pub fn current() -> Self {
        Self::from_month(Utc::now().month())
    }

    /// Parses a 1-based quarter number.
    pub fn from_number(number: u8) -> Result<Self> {
        match number {
            1 => Ok(Quarter::Q1),
            2 => Ok(Quarter::Q2),
            3 => Ok(Quarter::Q3),
            4 => Ok(Quarter::Q4),
            other => Err(ValidationError::InvalidQuarter(other).into()),
        }
    }

    /// Zero-based index into [`BudgetFigures::quarterly`].
    pub fn index(self) -> usize {
        match self {
            Quarter::Q1 => 0,
            Quarter::Q2 => 1,
            Quarter::Q3 => 2,
            Quarter::Q4 => 3,
        }
    }
}

/// Raw ceiling figures for one project, as stored by the budget backend.
///
/// Field aliases accept the legacy Greek column names so payloads exported
/// from the portal database deserialize unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetFigures {
    /// Amount already committed by documents (user_view).
    #[serde(alias = "user_view")]
    pub user_view: Decimal,
    /// Total appropriation for the project.
    #[serde(alias = "total_budget")]
    pub total_budget: Decimal,
    /// Yearly credit (ethsia_pistosi).
    #[serde(alias = "ethsia_pistosi")]
    pub annual_credit: Decimal,
    /// Distributed yearly allocation (katanomes_etous).
    #[serde(alias = "katanomes_etous")]
    pub annual_allocation: Decimal,
    /// Hard ceiling (proip).
    #[serde(alias = "proip")]
    pub ceiling: Decimal,
    /// Quarterly allocations q1..q4.
    #[serde(default)]
    pub quarterly: [Decimal; 4],
}

/// Last-known budget state for a project plus derived availability.
///
/// Derived fields are always recomputed from the figures; they may go
/// negative to signal overcommitment. Use the `display_*` accessors for
/// values shown to users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetSnapshot {
    pub mis: String,
    pub figures: BudgetFigures,
    pub current_quarter: Quarter,
    pub available_budget: Decimal,
    pub quarter_available: Decimal,
    pub yearly_available: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl BudgetSnapshot {
    pub fn new(mis: impl Into<String>, figures: BudgetFigures) -> Self {
        Self::for_quarter(mis, figures, Quarter::current())
    }

    pub fn for_quarter(mis: impl Into<String>, figures: BudgetFigures, quarter: Quarter) -> Self {
        let mut snapshot = Self {
            mis: mis.into(),
            figures,
            current_quarter: quarter,
            available_budget: Decimal::ZERO,
            quarter_available: Decimal::ZERO,
            yearly_available: Decimal::ZERO,
            updated_at: Utc::now(),
        };
        snapshot.recompute();
        snapshot
    }

    /// Replaces the figures and recomputes derived availability.
    pub fn update_figures(&mut self, figures: BudgetFigures) {
        self.figures = figures;
        self.updated_at = Utc::now();
        self.recompute();
    }

    /// Recomputes `available_*` from the current figures.
    pub fn recompute(&mut self) {
        let committed = self.figures.user_view;
        self.available_budget = self.figures.annual_allocation - committed;
        self.yearly_available = self.figures.annual_credit - committed;
        self.quarter_available = self.figures.quarterly[self.current_quarter.index()] - committed;
    }

    pub fn quarter_allocation(&self) -> Decimal {
        self.figures.quarterly[self.current_quarter.index()]
    }

    pub fn is_overcommitted(&self) -> bool {
        self.available_budget.is_sign_negative()
            || self.yearly_available.is_sign_negative()
            || self.quarter_available.is_sign_negative()
    }

    pub fn display_available_budget(&self) -> Decimal {
        clamp_zero(self.available_budget)
    }

    pub fn display_quarter_available(&self) -> Decimal {
        clamp_zero(self.quarter_available)
    }

    pub fn display_yearly_available(&self) -> Decimal {
        clamp_zero(self.yearly_available)
    }
}

/// Precomputed availability after a pending amount is committed.
///
/// Attached to broadcasts (`simpleBudgetData`) so receivers can render
/// before their own fetch completes. Never authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetDelta {
    pub available_budget: Decimal,
    pub quarter_available: Decimal,
    pub yearly_available: Decimal,
}

impl BudgetDelta {
    pub fn project(snapshot: &BudgetSnapshot, amount: Decimal) -> Self {
        Self {
            available_budget: snapshot.available_budget - amount,
            quarter_available: snapshot.quarter_available - amount,
            yearly_available: snapshot.yearly_available - amount,
        }
    }
}

fn clamp_zero(value: Decimal) -> Decimal {
    value.max(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn figures() -> BudgetFigures {
        BudgetFigures {
            user_view: dec!(3000),
            total_budget: dec!(50000),
            annual_credit: dec!(8000),
            annual_allocation: dec!(5000),
            ceiling: dec!(10000),
            quarterly: [dec!(1000), dec!(2000), dec!(4000), dec!(1500)],
        }
    }

    #[test]
    fn test_quarter_from_month() {
        assert_eq!(Quarter::from_month(1), Quarter::Q1);
        assert_eq!(Quarter::from_month(6), Quarter::Q2);
        assert_eq!(Quarter::from_month(9), Quarter::Q3);
        assert_eq!(Quarter::from_month(12), Quarter::Q4);
    }

    #[test]
    fn test_quarter_from_number_rejects_out_of_range() {
        assert_eq!(Quarter::from_number(3).unwrap(), Quarter::Q3);
        assert!(Quarter::from_number(0).is_err());
        assert!(Quarter::from_number(5).is_err());
    }

    #[test]
    fn test_derived_availability() {
        let snapshot = BudgetSnapshot::for_quarter("5001234", figures(), Quarter::Q3);
        assert_eq!(snapshot.available_budget, dec!(2000));
        assert_eq!(snapshot.yearly_available, dec!(5000));
        assert_eq!(snapshot.quarter_available, dec!(1000));
        assert!(!snapshot.is_overcommitted());
    }

    #[test]
    fn test_overcommitment_keeps_raw_negative_but_display_clamps() {
        let mut snapshot = BudgetSnapshot::for_quarter("5001234", figures(), Quarter::Q1);
        assert_eq!(snapshot.quarter_available, dec!(-2000));
        assert!(snapshot.is_overcommitted());
        assert_eq!(snapshot.display_quarter_available(), Decimal::ZERO);

        let mut updated = figures();
        updated.user_view = dec!(9000);
        snapshot.update_figures(updated);
        assert_eq!(snapshot.available_budget, dec!(-4000));
        assert_eq!(snapshot.yearly_available, dec!(-1000));
        assert_eq!(snapshot.display_available_budget(), Decimal::ZERO);
        assert_eq!(snapshot.display_yearly_available(), Decimal::ZERO);
    }

    #[test]
    fn test_figures_accept_legacy_column_names() {
        let json = r#"{
            "user_view": 100,
            "total_budget": 50000,
            "ethsia_pistosi": 8000,
            "katanomes_etous": 5000,
            "proip": 10000,
            "quarterly": [1000, 1000, 1000, 1000]
        }"#;
        let parsed: BudgetFigures = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.annual_credit, dec!(8000));
        assert_eq!(parsed.annual_allocation, dec!(5000));
        assert_eq!(parsed.ceiling, dec!(10000));
    }

    #[test]
    fn test_delta_projects_pending_amount() {
        let snapshot = BudgetSnapshot::for_quarter("5001234", figures(), Quarter::Q3);
        let delta = BudgetDelta::project(&snapshot, dec!(1500));
        assert_eq!(delta.available_budget, dec!(500));
        assert_eq!(delta.yearly_available, dec!(3500));
        assert_eq!(delta.quarter_available, dec!(-500));
    }
}
