use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ids::{ExpectedTransactionId, PaymentMethodId, TagId, TransactionId, UserId, VendorId};
use crate::money::{Currency, Money};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Expense,
    Income,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Expense => write!(f, "expense"),
            TransactionType::Income => write!(f, "income"),
        }
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "expense" => Ok(TransactionType::Expense),
            "income" => Ok(TransactionType::Income),
            other => Err(format!("Unknown transaction type: '{other}'")),
        }
    }
}

/// How an actual transaction entered the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    #[default]
    Manual,
    Matched,
    Imported,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceType::Manual => write!(f, "manual"),
            SourceType::Matched => write!(f, "matched"),
            SourceType::Imported => write!(f, "imported"),
        }
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(SourceType::Manual),
            "matched" => Ok(SourceType::Matched),
            "imported" => Ok(SourceType::Imported),
            other => Err(format!("Unknown source type: '{other}'")),
        }
    }
}

/// A recorded (actual) transaction. Read-mostly from the matcher's point of view:
/// only `expected_transaction_id` and `source_type` are ever written by it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub description: String,
    pub amount: Money,
    pub original_currency: Currency,
    pub transaction_type: TransactionType,
    pub transaction_date: NaiveDate,
    pub vendor_id: Option<VendorId>,
    /// Display name of `vendor_id`, joined by the store for fuzzy vendor scoring.
    pub vendor_name: Option<String>,
    pub payment_method_id: Option<PaymentMethodId>,
    pub tag_ids: Vec<TagId>,
    pub expected_transaction_id: Option<ExpectedTransactionId>,
    pub source_type: SourceType,
}

impl Transaction {
    pub fn is_linked(&self) -> bool {
        self.expected_transaction_id.is_some()
    }
}

/// The back-reference half of a match, written to the actual transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionLink {
    pub expected_transaction_id: Option<ExpectedTransactionId>,
    pub source_type: SourceType,
}

impl TransactionLink {
    pub fn matched(expected_id: ExpectedTransactionId) -> Self {
        TransactionLink {
            expected_transaction_id: Some(expected_id),
            source_type: SourceType::Matched,
        }
    }

    pub fn unlinked() -> Self {
        TransactionLink {
            expected_transaction_id: None,
            source_type: SourceType::Manual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_type_roundtrip() {
        for t in [TransactionType::Expense, TransactionType::Income] {
            assert_eq!(t.to_string().parse::<TransactionType>().unwrap(), t);
        }
        assert!("transfer".parse::<TransactionType>().is_err());
    }

    #[test]
    fn source_type_roundtrip() {
        for s in [SourceType::Manual, SourceType::Matched, SourceType::Imported] {
            assert_eq!(s.to_string().parse::<SourceType>().unwrap(), s);
        }
    }

    #[test]
    fn link_constructors() {
        let link = TransactionLink::matched(ExpectedTransactionId(3));
        assert_eq!(link.expected_transaction_id, Some(ExpectedTransactionId(3)));
        assert_eq!(link.source_type, SourceType::Matched);

        let cleared = TransactionLink::unlinked();
        assert_eq!(cleared.expected_transaction_id, None);
        assert_eq!(cleared.source_type, SourceType::Manual);
    }
}
