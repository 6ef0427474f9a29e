use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;
use crate::ids::{
    ExpectedTransactionId, MonthPlanId, PaymentMethodId, TagId, TemplateId, TransactionId, UserId,
    VendorId,
};
use crate::money::{Currency, Money};
use crate::transaction::TransactionType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedStatus {
    Pending,
    Matched,
    Skipped,
    Overdue,
}

impl ExpectedStatus {
    /// Statuses whose expectations are still waiting for an actual transaction.
    pub const OPEN: [ExpectedStatus; 2] = [ExpectedStatus::Pending, ExpectedStatus::Overdue];

    pub fn is_open(self) -> bool {
        matches!(self, ExpectedStatus::Pending | ExpectedStatus::Overdue)
    }

    /// Status an unmatched expectation should carry on `today`.
    pub fn open_for(expected_date: NaiveDate, today: NaiveDate) -> Self {
        if expected_date < today {
            ExpectedStatus::Overdue
        } else {
            ExpectedStatus::Pending
        }
    }
}

impl fmt::Display for ExpectedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedStatus::Pending => write!(f, "pending"),
            ExpectedStatus::Matched => write!(f, "matched"),
            ExpectedStatus::Skipped => write!(f, "skipped"),
            ExpectedStatus::Overdue => write!(f, "overdue"),
        }
    }
}

impl FromStr for ExpectedStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExpectedStatus::Pending),
            "matched" => Ok(ExpectedStatus::Matched),
            "skipped" => Ok(ExpectedStatus::Skipped),
            "overdue" => Ok(ExpectedStatus::Overdue),
            other => Err(format!("Unknown expected transaction status: '{other}'")),
        }
    }
}

/// Difference between the matched actual amount and the expected amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variance {
    /// `actual - expected`; negative when the actual came in under.
    pub amount: Money,
    /// `amount / expected * 100`, two decimal places.
    pub percentage: Decimal,
}

impl Variance {
    pub fn between(expected: Money, actual: Money) -> Self {
        let amount = actual - expected;
        let percentage = if expected.is_zero() {
            Decimal::ZERO
        } else {
            (amount.as_decimal() / expected.as_decimal() * Decimal::ONE_HUNDRED).round_dp(2)
        };
        Variance { amount, percentage }
    }
}

/// A predicted transaction awaiting reconciliation against real activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedTransaction {
    pub id: ExpectedTransactionId,
    pub user_id: UserId,
    pub month_plan_id: MonthPlanId,
    pub template_id: Option<TemplateId>,
    pub description: String,
    pub expected_amount: Money,
    pub original_currency: Currency,
    pub transaction_type: TransactionType,
    pub expected_date: NaiveDate,
    pub vendor_id: Option<VendorId>,
    pub vendor_name: Option<String>,
    pub payment_method_id: Option<PaymentMethodId>,
    pub tag_ids: Vec<TagId>,
    pub status: ExpectedStatus,
    /// Set if and only if `status == Matched`.
    pub matched_transaction_id: Option<TransactionId>,
    pub matched_at: Option<DateTime<Utc>>,
    pub actual_amount: Option<Money>,
    pub variance_amount: Option<Money>,
    pub variance_percentage: Option<Decimal>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExpectedTransaction {
    pub fn is_matched(&self) -> bool {
        self.status == ExpectedStatus::Matched
    }

    /// The reconciliation fields as one value, for writing back through a store.
    pub fn match_state(&self) -> MatchState {
        MatchState {
            status: self.status,
            matched_transaction_id: self.matched_transaction_id,
            matched_at: self.matched_at,
            actual_amount: self.actual_amount,
            variance: match (self.variance_amount, self.variance_percentage) {
                (Some(amount), Some(percentage)) => Some(Variance { amount, percentage }),
                _ => None,
            },
        }
    }

    pub fn apply_match_state(&mut self, state: &MatchState) {
        self.status = state.status;
        self.matched_transaction_id = state.matched_transaction_id;
        self.matched_at = state.matched_at;
        self.actual_amount = state.actual_amount;
        self.variance_amount = state.variance.map(|v| v.amount);
        self.variance_percentage = state.variance.map(|v| v.percentage);
    }

    /// Applies an already-validated patch in place.
    pub fn apply_patch(&mut self, patch: &ExpectationPatch) {
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(amount) = patch.expected_amount {
            self.expected_amount = amount;
            // Variance follows the planned amount once matched.
            if let Some(actual) = self.actual_amount.filter(|_| self.is_matched()) {
                let variance = Variance::between(amount, actual);
                self.variance_amount = Some(variance.amount);
                self.variance_percentage = Some(variance.percentage);
            }
        }
        if let Some(date) = patch.expected_date {
            self.expected_date = date;
        }
        if let Some(vendor_id) = patch.vendor_id {
            self.vendor_id = vendor_id;
        }
        if let Some(payment_method_id) = patch.payment_method_id {
            self.payment_method_id = payment_method_id;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(notes) = &patch.notes {
            self.notes = notes.clone();
        }
        if let Some(tag_ids) = &patch.tag_ids {
            self.tag_ids = tag_ids.clone();
        }
    }
}

/// Everything that changes together when a match is made or undone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchState {
    pub status: ExpectedStatus,
    pub matched_transaction_id: Option<TransactionId>,
    pub matched_at: Option<DateTime<Utc>>,
    pub actual_amount: Option<Money>,
    pub variance: Option<Variance>,
}

impl MatchState {
    pub fn matched(
        transaction_id: TransactionId,
        expected_amount: Money,
        actual_amount: Money,
        at: DateTime<Utc>,
    ) -> Self {
        MatchState {
            status: ExpectedStatus::Matched,
            matched_transaction_id: Some(transaction_id),
            matched_at: Some(at),
            actual_amount: Some(actual_amount),
            variance: Some(Variance::between(expected_amount, actual_amount)),
        }
    }

    pub fn cleared(status: ExpectedStatus) -> Self {
        MatchState {
            status,
            matched_transaction_id: None,
            matched_at: None,
            actual_amount: None,
            variance: None,
        }
    }
}

/// Input for a manually created expectation (`template_id` is set by template expansion).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewExpectedTransaction {
    pub month_plan_id: MonthPlanId,
    #[serde(default)]
    pub template_id: Option<TemplateId>,
    pub description: String,
    pub expected_amount: Money,
    pub original_currency: Currency,
    pub transaction_type: TransactionType,
    pub expected_date: NaiveDate,
    #[serde(default)]
    pub vendor_id: Option<VendorId>,
    #[serde(default)]
    pub payment_method_id: Option<PaymentMethodId>,
    #[serde(default)]
    pub tag_ids: Vec<TagId>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewExpectedTransaction {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.expected_amount.is_positive() {
            return Err(ValidationError::NonPositiveAmount(
                self.expected_amount.to_string(),
            ));
        }
        Ok(())
    }
}

/// Partial manual edit. `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpectationPatch {
    pub description: Option<String>,
    pub expected_amount: Option<Money>,
    pub expected_date: Option<NaiveDate>,
    pub vendor_id: Option<Option<VendorId>>,
    pub payment_method_id: Option<Option<PaymentMethodId>>,
    pub status: Option<ExpectedStatus>,
    pub notes: Option<Option<String>>,
    pub tag_ids: Option<Vec<TagId>>,
}

impl ExpectationPatch {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(amount) = self.expected_amount {
            if !amount.is_positive() {
                return Err(ValidationError::NonPositiveAmount(amount.to_string()));
            }
        }
        if self.status == Some(ExpectedStatus::Matched) {
            return Err(ValidationError::StatusNotEditable(ExpectedStatus::Matched));
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        *self == ExpectationPatch::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectationFilter {
    pub month_plan_id: MonthPlanId,
    /// Empty means any status.
    #[serde(default)]
    pub statuses: Vec<ExpectedStatus>,
    #[serde(default)]
    pub transaction_type: Option<TransactionType>,
    /// Empty means any vendor.
    #[serde(default)]
    pub vendor_ids: Vec<VendorId>,
}

impl ExpectationFilter {
    pub fn month(month_plan_id: MonthPlanId) -> Self {
        ExpectationFilter {
            month_plan_id,
            statuses: Vec::new(),
            transaction_type: None,
            vendor_ids: Vec::new(),
        }
    }

    pub fn with_statuses(mut self, statuses: &[ExpectedStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn accepts(&self, exp: &ExpectedTransaction) -> bool {
        if exp.month_plan_id != self.month_plan_id {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&exp.status) {
            return false;
        }
        if let Some(tt) = self.transaction_type {
            if exp.transaction_type != tt {
                return false;
            }
        }
        if !self.vendor_ids.is_empty() {
            return exp
                .vendor_id
                .is_some_and(|vendor| self.vendor_ids.contains(&vendor));
        }
        true
    }
}
