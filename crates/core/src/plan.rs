use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::expected::{ExpectedStatus, ExpectedTransaction};
use crate::ids::{MonthPlanId, UserId};
use crate::money::{Currency, Money};
use crate::period::DateRange;
use crate::transaction::TransactionType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MonthPlanStatus {
    #[default]
    Draft,
    Active,
    Closed,
    Archived,
}

impl fmt::Display for MonthPlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonthPlanStatus::Draft => write!(f, "draft"),
            MonthPlanStatus::Active => write!(f, "active"),
            MonthPlanStatus::Closed => write!(f, "closed"),
            MonthPlanStatus::Archived => write!(f, "archived"),
        }
    }
}

impl FromStr for MonthPlanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(MonthPlanStatus::Draft),
            "active" => Ok(MonthPlanStatus::Active),
            "closed" => Ok(MonthPlanStatus::Closed),
            "archived" => Ok(MonthPlanStatus::Archived),
            other => Err(format!("Unknown month plan status: '{other}'")),
        }
    }
}

/// One calendar month of expectations for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthPlan {
    pub id: MonthPlanId,
    pub user_id: UserId,
    /// First day of the planned month.
    pub month: NaiveDate,
    pub status: MonthPlanStatus,
    pub notes: Option<String>,
}

impl MonthPlan {
    pub fn date_range(&self) -> DateRange {
        DateRange::month_of(self.month)
    }
}

pub type CurrencyTotals = BTreeMap<Currency, Money>;

/// Per-month roll-up used by summaries; actual totals only count matched expectations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonthPlanStats {
    pub expected_count: usize,
    pub matched_count: usize,
    pub pending_count: usize,
    pub overdue_count: usize,
    pub skipped_count: usize,
    pub total_expected_expenses: CurrencyTotals,
    pub total_actual_expenses: CurrencyTotals,
    pub total_expected_income: CurrencyTotals,
    pub total_actual_income: CurrencyTotals,
}

impl MonthPlanStats {
    pub fn from_expectations<'a, I>(expectations: I) -> Self
    where
        I: IntoIterator<Item = &'a ExpectedTransaction>,
    {
        let mut stats = MonthPlanStats::default();
        for exp in expectations {
            stats.expected_count += 1;
            match exp.status {
                ExpectedStatus::Matched => stats.matched_count += 1,
                ExpectedStatus::Pending => stats.pending_count += 1,
                ExpectedStatus::Overdue => stats.overdue_count += 1,
                ExpectedStatus::Skipped => stats.skipped_count += 1,
            }

            let (expected_totals, actual_totals) = match exp.transaction_type {
                TransactionType::Expense => (
                    &mut stats.total_expected_expenses,
                    &mut stats.total_actual_expenses,
                ),
                TransactionType::Income => (
                    &mut stats.total_expected_income,
                    &mut stats.total_actual_income,
                ),
            };
            add_to(expected_totals, &exp.original_currency, exp.expected_amount);
            if let Some(actual) = exp.actual_amount.filter(|_| exp.is_matched()) {
                add_to(actual_totals, &exp.original_currency, actual);
            }
        }
        stats
    }
}

fn add_to(totals: &mut CurrencyTotals, currency: &Currency, amount: Money) {
    let entry = totals.entry(currency.clone()).or_insert_with(Money::zero);
    *entry = *entry + amount;
}
