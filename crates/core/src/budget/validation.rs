//! Tiered budget validation.
//!
//! `validate_amount` is a pure function of the requested amount and the
//! project figures. Tiers are checked tightest first and only the first
//! match fires:
//!
//! 1. amount above the ceiling (proip): error, creation blocked
//! 2. amount above the annual credit (ethsia_pistosi): warning, creation
//!    blocked, funding escalation
//! 3. amount above 20% of the annual allocation (katanomes_etous): warning,
//!    creation allowed, reallocation escalation
//! 4. otherwise success
//!
//! A non-positive amount short-circuits to a neutral "fill in" warning.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::budget_model::{BudgetFigures, BudgetSnapshot};
use crate::constants::REALLOCATION_REVIEW_RATIO;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Success,
    Warning,
    Error,
}

/// Kind of administrative notification a warning requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    /// Amount exceeds the annual credit; funding must be raised.
    FundingEscalation,
    /// Amount exceeds the reallocation threshold of the annual allocation.
    ReallocationEscalation,
}

/// Which tier a requested amount falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetTier {
    MissingAmount,
    ExceedsCeiling,
    ExceedsAnnualCredit,
    ExceedsReallocationThreshold,
    WithinBudget,
}

/// Extra data returned alongside a validation decision.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<BudgetTier>,
    /// Authoritative snapshot the server validated against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<BudgetSnapshot>,
}

/// Outcome of a single validation. Never persisted; recompute on every change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub status: ValidationStatus,
    pub can_create: bool,
    #[serde(rename = "allowDocx")]
    pub allow_document_export: bool,
    #[serde(default)]
    pub requires_notification: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_category: Option<NotificationCategory>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ValidationMetadata>,
}

impl ValidationResult {
    fn new(status: ValidationStatus, can_create: bool, message: impl Into<String>) -> Self {
        Self {
            status,
            can_create,
            allow_document_export: can_create,
            requires_notification: false,
            notification_category: None,
            message: message.into(),
            metadata: None,
        }
    }

    fn escalate(mut self, category: NotificationCategory) -> Self {
        self.requires_notification = true;
        self.notification_category = Some(category);
        self
    }

    fn with_tier(mut self, tier: BudgetTier) -> Self {
        self.metadata
            .get_or_insert_with(ValidationMetadata::default)
            .tier = Some(tier);
        self
    }

    /// Neutral result for an empty or non-positive amount.
    pub fn missing_amount() -> Self {
        Self::new(
            ValidationStatus::Warning,
            false,
            "Fill in a positive amount to check it against the project budget",
        )
        .with_tier(BudgetTier::MissingAmount)
    }

    /// Soft result when no snapshot is available to validate against.
    pub fn snapshot_unavailable(mis: &str) -> Self {
        Self::new(
            ValidationStatus::Warning,
            false,
            format!("Budget data for project {} is not loaded yet", mis),
        )
    }

    /// Soft result when the validation endpoint could not be reached.
    pub fn transport_unavailable(detail: impl Into<String>) -> Self {
        Self::new(
            ValidationStatus::Warning,
            false,
            format!(
                "Budget validation is temporarily unavailable: {}",
                detail.into()
            ),
        )
    }

    /// Soft result when the session has expired.
    pub fn session_expired() -> Self {
        Self::new(
            ValidationStatus::Warning,
            false,
            "Your session has expired. Sign in again to continue",
        )
    }

    pub fn tier(&self) -> Option<BudgetTier> {
        self.metadata.as_ref().and_then(|m| m.tier)
    }

    pub fn snapshot(&self) -> Option<&BudgetSnapshot> {
        self.metadata.as_ref().and_then(|m| m.snapshot.as_ref())
    }

    /// Attaches the snapshot used for the decision.
    pub fn with_snapshot(mut self, snapshot: BudgetSnapshot) -> Self {
        self.metadata
            .get_or_insert_with(ValidationMetadata::default)
            .snapshot = Some(snapshot);
        self
    }
}

/// Classifies an amount against the figures without building a result.
pub fn classify(amount: Decimal, figures: &BudgetFigures) -> BudgetTier {
    if amount <= Decimal::ZERO {
        BudgetTier::MissingAmount
    } else if amount > figures.ceiling {
        BudgetTier::ExceedsCeiling
    } else if amount > figures.annual_credit {
        BudgetTier::ExceedsAnnualCredit
    } else if amount > figures.annual_allocation * REALLOCATION_REVIEW_RATIO {
        BudgetTier::ExceedsReallocationThreshold
    } else {
        BudgetTier::WithinBudget
    }
}

/// Validates a requested amount against a project's figures.
pub fn validate_amount(amount: Decimal, figures: &BudgetFigures) -> ValidationResult {
    let tier = classify(amount, figures);
    let result = match tier {
        BudgetTier::MissingAmount => return ValidationResult::missing_amount(),
        BudgetTier::ExceedsCeiling => ValidationResult::new(
            ValidationStatus::Error,
            false,
            format!(
                "Amount {} exceeds the project ceiling of {}",
                amount, figures.ceiling
            ),
        ),
        BudgetTier::ExceedsAnnualCredit => ValidationResult::new(
            ValidationStatus::Warning,
            false,
            format!(
                "Amount {} exceeds the annual credit of {}; a funding request is required",
                amount, figures.annual_credit
            ),
        )
        .escalate(NotificationCategory::FundingEscalation),
        BudgetTier::ExceedsReallocationThreshold => ValidationResult::new(
            ValidationStatus::Warning,
            true,
            format!(
                "Amount {} exceeds 20% of the annual allocation of {}; reallocation will be reviewed",
                amount, figures.annual_allocation
            ),
        )
        .escalate(NotificationCategory::ReallocationEscalation),
        BudgetTier::WithinBudget => {
            ValidationResult::new(ValidationStatus::Success, true, "Amount is within budget")
        }
    };

    result.with_tier(tier)
}

/// Validates against a snapshot, attaching it to the result metadata.
pub fn validate_against_snapshot(amount: Decimal, snapshot: &BudgetSnapshot) -> ValidationResult {
    validate_amount(amount, &snapshot.figures).with_snapshot(snapshot.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn figures() -> BudgetFigures {
        BudgetFigures {
            user_view: dec!(0),
            total_budget: dec!(20000),
            annual_credit: dec!(8000),
            annual_allocation: dec!(5000),
            ceiling: dec!(10000),
            quarterly: [dec!(1250); 4],
        }
    }

    #[test]
    fn test_amount_above_ceiling_is_error() {
        let result = validate_amount(dec!(12000), &figures());
        assert_eq!(result.status, ValidationStatus::Error);
        assert!(!result.can_create);
        assert!(!result.allow_document_export);
        assert!(!result.requires_notification);
        assert_eq!(result.tier(), Some(BudgetTier::ExceedsCeiling));
    }

    #[test]
    fn test_amount_above_annual_credit_requires_funding_escalation() {
        let result = validate_amount(dec!(9000), &figures());
        assert_eq!(result.status, ValidationStatus::Warning);
        assert!(!result.can_create);
        assert!(!result.allow_document_export);
        assert!(result.requires_notification);
        assert_eq!(
            result.notification_category,
            Some(NotificationCategory::FundingEscalation)
        );
    }

    #[test]
    fn test_amount_above_reallocation_threshold_is_allowed_but_flagged() {
        let result = validate_amount(dec!(1200), &figures());
        assert_eq!(result.status, ValidationStatus::Warning);
        assert!(result.can_create);
        assert!(result.allow_document_export);
        assert!(result.requires_notification);
        assert_eq!(
            result.notification_category,
            Some(NotificationCategory::ReallocationEscalation)
        );
    }

    #[test]
    fn test_amount_within_budget_is_success() {
        let result = validate_amount(dec!(500), &figures());
        assert_eq!(result.status, ValidationStatus::Success);
        assert!(result.can_create);
        assert!(result.allow_document_export);
        assert!(!result.requires_notification);
        assert!(result.notification_category.is_none());
    }

    #[test]
    fn test_non_positive_amount_is_neutral_warning() {
        for amount in [dec!(0), dec!(-1), dec!(-5000)] {
            let result = validate_amount(amount, &figures());
            assert_eq!(result.status, ValidationStatus::Warning);
            assert!(!result.can_create);
            assert!(!result.requires_notification);
            assert_eq!(result.tier(), Some(BudgetTier::MissingAmount));
        }
    }

    #[test]
    fn test_boundaries_are_inclusive_of_the_limit() {
        let f = figures();
        assert_eq!(classify(dec!(10000), &f), BudgetTier::ExceedsAnnualCredit);
        assert_eq!(classify(dec!(8000), &f), BudgetTier::ExceedsReallocationThreshold);
        assert_eq!(classify(dec!(1000), &f), BudgetTier::WithinBudget);
        assert_eq!(classify(dec!(1000.01), &f), BudgetTier::ExceedsReallocationThreshold);
    }

    #[test]
    fn test_ceiling_check_wins_over_softer_tiers() {
        // Ceiling below the annual credit: an amount above both must still be an error.
        let mut f = figures();
        f.ceiling = dec!(6000);
        let result = validate_amount(dec!(7000), &f);
        assert_eq!(result.status, ValidationStatus::Error);
        assert!(!result.requires_notification);
    }

    #[test]
    fn test_wire_shape_uses_allow_docx() {
        let result = validate_amount(dec!(500), &figures());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["canCreate"], true);
        assert_eq!(json["allowDocx"], true);
        assert_eq!(json["metadata"]["tier"], "within_budget");
    }

    #[test]
    fn test_server_response_without_optional_fields_parses() {
        let json = r#"{"status":"warning","canCreate":false,"allowDocx":false}"#;
        let parsed: ValidationResult = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.status, ValidationStatus::Warning);
        assert!(!parsed.requires_notification);
        assert!(parsed.message.is_empty());
        assert!(parsed.metadata.is_none());
    }
}
