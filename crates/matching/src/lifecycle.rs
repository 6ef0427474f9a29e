//! CRUD and state transitions for a single expected transaction.
//!
//! ```text
//! pending --match--> matched --unmatch--> pending | overdue
//! overdue --match--> matched
//! any     --skip---> skipped
//! pending --sweep--> overdue
//! ```
//!
//! Every change to match state goes through `LinkStore::commit_match` or
//! `LinkStore::commit_unmatch` so the actual transaction's back-reference is
//! updated in the same unit of work.

use std::sync::Arc;

use tally_core::{
    Clock, CommitMatch, CommitUnmatch, ExpectationFilter, ExpectationPatch, ExpectedStatus,
    ExpectedTransaction, ExpectedTransactionId, LinkStore, LinkedTransaction, MatchState,
    MonthPlan, MonthPlanId, MonthPlanStats, NewExpectedTransaction, TransactionId, UserId,
    ValidationError,
};

use crate::error::{MatchError, Result};

pub struct ExpectationManager<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S> Clone for ExpectationManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S: LinkStore> ExpectationManager<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub async fn month_plan(&self, user: UserId, id: MonthPlanId) -> Result<MonthPlan> {
        self.store
            .get_month_plan(user, id)
            .await?
            .ok_or_else(|| MatchError::not_found(format!("month plan {id}")))
    }

    /// Validates the input and stores a new `pending` expectation.
    pub async fn create_expected_transaction(
        &self,
        user: UserId,
        data: &NewExpectedTransaction,
    ) -> Result<ExpectedTransaction> {
        data.validate()?;
        self.month_plan(user, data.month_plan_id).await?;

        let created = self
            .store
            .create_expectation(user, data)
            .await
            .inspect_err(|e| tracing::warn!(%user, "Failed to store expected transaction: {e}"))?;
        tracing::info!(
            expected_id = %created.id,
            month_plan_id = %created.month_plan_id,
            "Created expected transaction"
        );
        Ok(created)
    }

    pub async fn get_expected_transaction(
        &self,
        user: UserId,
        id: ExpectedTransactionId,
    ) -> Result<ExpectedTransaction> {
        self.store
            .get_expectation(user, id)
            .await?
            .ok_or_else(|| MatchError::not_found(format!("expected transaction {id}")))
    }

    pub async fn list_expected_transactions(
        &self,
        user: UserId,
        filter: &ExpectationFilter,
    ) -> Result<Vec<ExpectedTransaction>> {
        Ok(self.store.list_expectations(user, filter).await?)
    }

    /// Manual edit. Match state can only change through match, unmatch and skip.
    pub async fn update_expected_transaction(
        &self,
        user: UserId,
        id: ExpectedTransactionId,
        patch: &ExpectationPatch,
    ) -> Result<ExpectedTransaction> {
        patch.validate()?;
        let current = self.get_expected_transaction(user, id).await?;
        if current.is_matched() && patch.status.is_some_and(|s| s != ExpectedStatus::Matched) {
            return Err(MatchError::InconsistentState(format!(
                "expected transaction {id} is matched; unmatch it before changing its status"
            )));
        }
        if patch.is_empty() {
            return Ok(current);
        }

        let updated = self
            .store
            .update_expectation(user, id, patch)
            .await
            .inspect_err(|e| tracing::warn!(expected_id = %id, "Update failed: {e}"))?
            .ok_or_else(|| MatchError::not_found(format!("expected transaction {id}")))?;
        if current.is_matched() && patch.expected_amount.is_some() {
            tracing::info!(
                expected_id = %id,
                variance = ?updated.variance_amount,
                "Recomputed variance after amount edit"
            );
        }
        Ok(updated)
    }

    /// Deletes the expectation. A matched actual transaction is deleted as well
    /// when `delete_matched_transaction` is set, otherwise it is only unlinked.
    pub async fn delete_expected_transaction(
        &self,
        user: UserId,
        id: ExpectedTransactionId,
        delete_matched_transaction: bool,
    ) -> Result<()> {
        let current = self.get_expected_transaction(user, id).await?;
        let linked = current.matched_transaction_id.map(|tx| {
            let action = if delete_matched_transaction {
                LinkedTransaction::Delete
            } else {
                LinkedTransaction::Unlink
            };
            (tx, action)
        });

        let removed = self
            .store
            .remove_expectation(user, id, linked)
            .await
            .inspect_err(|e| tracing::warn!(expected_id = %id, "Delete failed: {e}"))?;
        if !removed {
            return Err(MatchError::not_found(format!("expected transaction {id}")));
        }
        tracing::info!(expected_id = %id, ?linked, "Deleted expected transaction");
        Ok(())
    }

    /// Links an open expectation to an actual transaction and records the variance.
    pub async fn match_transaction(
        &self,
        user: UserId,
        expected_id: ExpectedTransactionId,
        transaction_id: TransactionId,
    ) -> Result<ExpectedTransaction> {
        let expected = self.get_expected_transaction(user, expected_id).await?;
        if !expected.status.is_open() {
            return Err(MatchError::InconsistentState(format!(
                "expected transaction {expected_id} is {} and cannot be matched",
                expected.status
            )));
        }

        let actual = self
            .store
            .get_transaction(user, transaction_id)
            .await?
            .ok_or_else(|| MatchError::not_found(format!("transaction {transaction_id}")))?;
        if let Some(owner) = actual.expected_transaction_id {
            return Err(MatchError::InconsistentState(format!(
                "transaction {transaction_id} is already matched to expected transaction {owner}"
            )));
        }

        let cmd = CommitMatch {
            expected_id,
            transaction_id,
            state: MatchState::matched(
                transaction_id,
                expected.expected_amount,
                actual.amount,
                self.clock.now(),
            ),
        };
        let matched = self
            .store
            .commit_match(user, &cmd)
            .await
            .inspect_err(|e| {
                tracing::warn!(%expected_id, %transaction_id, "Match commit failed: {e}");
            })?;

        tracing::info!(
            %expected_id,
            %transaction_id,
            variance = ?matched.variance_amount,
            "Matched expected transaction"
        );
        Ok(matched)
    }

    /// Clears the match; the expectation returns to `pending` or `overdue`
    /// depending on whether its date has passed.
    pub async fn unmatch_transaction(
        &self,
        user: UserId,
        expected_id: ExpectedTransactionId,
    ) -> Result<ExpectedTransaction> {
        let expected = self.get_expected_transaction(user, expected_id).await?;
        let Some(transaction_id) = expected.matched_transaction_id else {
            return Err(MatchError::InconsistentState(format!(
                "expected transaction {expected_id} is not matched"
            )));
        };

        let cmd = CommitUnmatch {
            expected_id,
            transaction_id,
            next_status: ExpectedStatus::open_for(expected.expected_date, self.clock.today()),
            notes: None,
        };
        let unmatched = self
            .store
            .commit_unmatch(user, &cmd)
            .await
            .inspect_err(|e| {
                tracing::warn!(%expected_id, %transaction_id, "Unmatch commit failed: {e}");
            })?;

        tracing::info!(%expected_id, status = %unmatched.status, "Unmatched expected transaction");
        Ok(unmatched)
    }

    /// Marks the expectation as not going to happen this month. A matched
    /// expectation releases its actual transaction first.
    pub async fn skip_expected_transaction(
        &self,
        user: UserId,
        expected_id: ExpectedTransactionId,
        notes: &str,
    ) -> Result<ExpectedTransaction> {
        let notes = notes.trim();
        if notes.is_empty() {
            return Err(ValidationError::MissingSkipReason.into());
        }
        let expected = self.get_expected_transaction(user, expected_id).await?;

        let skipped = match expected.matched_transaction_id {
            Some(transaction_id) => {
                let cmd = CommitUnmatch {
                    expected_id,
                    transaction_id,
                    next_status: ExpectedStatus::Skipped,
                    notes: Some(notes.to_string()),
                };
                self.store
                    .commit_unmatch(user, &cmd)
                    .await
                    .inspect_err(|e| {
                        tracing::warn!(%expected_id, %transaction_id, "Skip commit failed: {e}");
                    })?
            }
            None => {
                let patch = ExpectationPatch {
                    status: Some(ExpectedStatus::Skipped),
                    notes: Some(Some(notes.to_string())),
                    ..ExpectationPatch::default()
                };
                self.store
                    .update_expectation(user, expected_id, &patch)
                    .await
                    .inspect_err(|e| tracing::warn!(%expected_id, "Skip update failed: {e}"))?
                    .ok_or_else(|| {
                        MatchError::not_found(format!("expected transaction {expected_id}"))
                    })?
            }
        };

        tracing::info!(%expected_id, "Skipped expected transaction");
        Ok(skipped)
    }

    /// Flips every pending expectation dated before today to overdue.
    /// Safe to run repeatedly.
    pub async fn mark_overdue_transactions(&self, user: UserId) -> Result<u64> {
        let today = self.clock.today();
        let count = self
            .store
            .mark_overdue(user, today)
            .await
            .inspect_err(|e| tracing::warn!(%user, %today, "Overdue sweep failed: {e}"))?;
        tracing::info!(%user, %today, count, "Overdue sweep finished");
        Ok(count)
    }

    pub async fn summarize_month(&self, user: UserId, plan_id: MonthPlanId) -> Result<MonthPlanStats> {
        self.month_plan(user, plan_id).await?;
        let all = self
            .store
            .list_expectations(user, &ExpectationFilter::month(plan_id))
            .await?;
        Ok(MonthPlanStats::from_expectations(&all))
    }
}
