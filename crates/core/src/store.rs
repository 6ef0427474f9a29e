//! Persistence contracts consumed by the matching engine.
//!
//! Every call is scoped to one user; implementations must never return or
//! touch another user's rows.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::expected::{
    ExpectationFilter, ExpectationPatch, ExpectedStatus, ExpectedTransaction, MatchState,
    NewExpectedTransaction,
};
use crate::ids::{ExpectedTransactionId, MonthPlanId, TransactionId, UserId};
use crate::period::DateRange;
use crate::plan::MonthPlan;
use crate::transaction::{Transaction, TransactionLink};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub date_range: Option<DateRange>,
    /// Only transactions no expectation currently claims.
    pub unmatched_only: bool,
}

/// Links an open expectation to an unclaimed actual transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitMatch {
    pub expected_id: ExpectedTransactionId,
    pub transaction_id: TransactionId,
    pub state: MatchState,
}

/// Undoes a match, leaving the expectation in `next_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitUnmatch {
    pub expected_id: ExpectedTransactionId,
    pub transaction_id: TransactionId,
    pub next_status: ExpectedStatus,
    /// Replaces the expectation's notes when set.
    pub notes: Option<String>,
}

/// What happens to a matched actual transaction when its expectation is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkedTransaction {
    Unlink,
    Delete,
}

#[async_trait]
pub trait ExpectationStore: Send + Sync {
    async fn get_month_plan(
        &self,
        user: UserId,
        id: MonthPlanId,
    ) -> Result<Option<MonthPlan>, StoreError>;

    /// Results are ordered by `expected_date`, then id.
    async fn list_expectations(
        &self,
        user: UserId,
        filter: &ExpectationFilter,
    ) -> Result<Vec<ExpectedTransaction>, StoreError>;

    async fn get_expectation(
        &self,
        user: UserId,
        id: ExpectedTransactionId,
    ) -> Result<Option<ExpectedTransaction>, StoreError>;

    /// Persists a validated expectation with status `pending`.
    async fn create_expectation(
        &self,
        user: UserId,
        data: &NewExpectedTransaction,
    ) -> Result<ExpectedTransaction, StoreError>;

    /// Returns `None` when the expectation does not exist for this user.
    async fn update_expectation(
        &self,
        user: UserId,
        id: ExpectedTransactionId,
        patch: &ExpectationPatch,
    ) -> Result<Option<ExpectedTransaction>, StoreError>;

    /// Writes the reconciliation fields only; `notes` replaces notes when given.
    async fn set_match_state(
        &self,
        user: UserId,
        id: ExpectedTransactionId,
        state: &MatchState,
        notes: Option<&str>,
    ) -> Result<Option<ExpectedTransaction>, StoreError>;

    async fn delete_expectation(
        &self,
        user: UserId,
        id: ExpectedTransactionId,
    ) -> Result<bool, StoreError>;

    /// Flips every `pending` expectation dated strictly before `today` to
    /// `overdue`, returning how many rows changed.
    async fn mark_overdue(&self, user: UserId, today: NaiveDate) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Results are ordered by `transaction_date` descending, then id.
    async fn list_transactions(
        &self,
        user: UserId,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, StoreError>;

    async fn get_transaction(
        &self,
        user: UserId,
        id: TransactionId,
    ) -> Result<Option<Transaction>, StoreError>;

    async fn update_transaction_link(
        &self,
        user: UserId,
        id: TransactionId,
        link: &TransactionLink,
    ) -> Result<bool, StoreError>;

    async fn delete_transaction(&self, user: UserId, id: TransactionId)
        -> Result<bool, StoreError>;
}

/// Two-sided writes that keep an expectation and its actual transaction in agreement.
///
/// The provided implementations issue guarded sequential writes and undo the
/// first write when the second one fails. Stores with multi-row transactions
/// should override them with a single atomic unit.
#[async_trait]
pub trait LinkStore: ExpectationStore + TransactionStore {
    async fn commit_match(
        &self,
        user: UserId,
        cmd: &CommitMatch,
    ) -> Result<ExpectedTransaction, StoreError> {
        let current = self
            .get_expectation(user, cmd.expected_id)
            .await?
            .ok_or_else(|| StoreError::Missing(format!("expected transaction {}", cmd.expected_id)))?;
        if !current.status.is_open() {
            return Err(StoreError::Conflict(format!(
                "expected transaction {} is already {}",
                cmd.expected_id, current.status
            )));
        }

        let actual = self
            .get_transaction(user, cmd.transaction_id)
            .await?
            .ok_or_else(|| StoreError::Missing(format!("transaction {}", cmd.transaction_id)))?;
        if let Some(owner) = actual.expected_transaction_id {
            return Err(StoreError::Conflict(format!(
                "transaction {} is already linked to expected transaction {owner}",
                cmd.transaction_id
            )));
        }

        let updated = self
            .set_match_state(user, cmd.expected_id, &cmd.state, None)
            .await?
            .ok_or_else(|| StoreError::Missing(format!("expected transaction {}", cmd.expected_id)))?;

        let link = TransactionLink::matched(cmd.expected_id);
        let written = match self
            .update_transaction_link(user, cmd.transaction_id, &link)
            .await
        {
            Ok(written) => written,
            Err(e) => {
                self.set_match_state(user, cmd.expected_id, &current.match_state(), None)
                    .await?;
                return Err(e);
            }
        };

        let kept = written
            && self
                .get_transaction(user, cmd.transaction_id)
                .await?
                .and_then(|t| t.expected_transaction_id)
                == Some(cmd.expected_id);
        if !kept {
            // Put the expectation back so neither side claims the link.
            self.set_match_state(user, cmd.expected_id, &current.match_state(), None)
                .await?;
            return Err(StoreError::Conflict(format!(
                "transaction {} did not keep its link to expected transaction {}",
                cmd.transaction_id, cmd.expected_id
            )));
        }

        Ok(updated)
    }

    async fn commit_unmatch(
        &self,
        user: UserId,
        cmd: &CommitUnmatch,
    ) -> Result<ExpectedTransaction, StoreError> {
        let current = self
            .get_expectation(user, cmd.expected_id)
            .await?
            .ok_or_else(|| StoreError::Missing(format!("expected transaction {}", cmd.expected_id)))?;
        if current.matched_transaction_id != Some(cmd.transaction_id) {
            return Err(StoreError::Conflict(format!(
                "expected transaction {} is no longer matched to transaction {}",
                cmd.expected_id, cmd.transaction_id
            )));
        }

        // Release the transaction side first; nothing has changed if that fails.
        // It may also have been deleted out from under the match.
        let released = release_link(self, user, cmd.transaction_id, cmd.expected_id).await?;

        let cleared = self
            .set_match_state(
                user,
                cmd.expected_id,
                &MatchState::cleared(cmd.next_status),
                cmd.notes.as_deref(),
            )
            .await;
        match cleared {
            Ok(Some(updated)) => Ok(updated),
            Ok(None) => {
                restore_link(self, user, cmd.transaction_id, released).await?;
                Err(StoreError::Missing(format!("expected transaction {}", cmd.expected_id)))
            }
            Err(e) => {
                restore_link(self, user, cmd.transaction_id, released).await?;
                Err(e)
            }
        }
    }

    /// Deletes the expectation, unlinking or deleting its matched transaction.
    ///
    /// The link is released before the expectation goes away and put back if
    /// the delete does not happen, so the two sides never disagree.
    async fn remove_expectation(
        &self,
        user: UserId,
        id: ExpectedTransactionId,
        linked: Option<(TransactionId, LinkedTransaction)>,
    ) -> Result<bool, StoreError> {
        let Some((tx, action)) = linked else {
            return self.delete_expectation(user, id).await;
        };

        let released = release_link(self, user, tx, id).await?;
        let deleted = self.delete_expectation(user, id).await;
        match deleted {
            Ok(true) => {}
            Ok(false) => {
                restore_link(self, user, tx, released).await?;
                return Ok(false);
            }
            Err(e) => {
                restore_link(self, user, tx, released).await?;
                return Err(e);
            }
        }

        if action == LinkedTransaction::Delete {
            self.delete_transaction(user, tx).await?;
        }
        Ok(true)
    }
}

/// Clears `tx`'s back-reference if it points at `expected_id`, returning
/// the link it held so it can be put back.
async fn release_link<S: LinkStore + ?Sized>(
    store: &S,
    user: UserId,
    tx: TransactionId,
    expected_id: ExpectedTransactionId,
) -> Result<Option<TransactionLink>, StoreError> {
    let Some(actual) = store.get_transaction(user, tx).await? else {
        return Ok(None);
    };
    if actual.expected_transaction_id != Some(expected_id) {
        return Ok(None);
    }
    store
        .update_transaction_link(user, tx, &TransactionLink::unlinked())
        .await?;
    Ok(Some(TransactionLink {
        expected_transaction_id: actual.expected_transaction_id,
        source_type: actual.source_type,
    }))
}

async fn restore_link<S: LinkStore + ?Sized>(
    store: &S,
    user: UserId,
    tx: TransactionId,
    released: Option<TransactionLink>,
) -> Result<(), StoreError> {
    if let Some(link) = released {
        store.update_transaction_link(user, tx, &link).await?;
    }
    Ok(())
}
