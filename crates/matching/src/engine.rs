//! Month-level matching: suggestion lookup and the auto-match pass.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use tally_core::{
    Clock, ExpectationFilter, ExpectedStatus, ExpectedTransactionId, LinkStore, MatchingConfig,
    MonthPlanId, TransactionFilter, TransactionId, UserId, ValidationError,
};

use crate::error::Result;
use crate::lifecycle::ExpectationManager;
use crate::ranker::{rank_suggestions, MatchSuggestion};
use crate::scorer::MatchScorer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoMatchOptions {
    /// Falls back to the configured auto-match threshold (85 by default).
    #[serde(default)]
    pub confidence_threshold: Option<u8>,
    #[serde(default)]
    pub require_manual_review: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedPair {
    pub expected_id: ExpectedTransactionId,
    pub transaction_id: TransactionId,
    pub confidence: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoMatchResult {
    pub matched_count: usize,
    pub suggestions_count: usize,
    pub message: String,
    pub matched_pairs: Vec<MatchedPair>,
    pub suggestions: Vec<MatchSuggestion>,
}

pub struct MatchingEngine<S> {
    store: Arc<S>,
    scorer: MatchScorer,
    expectations: ExpectationManager<S>,
}

impl<S: LinkStore> MatchingEngine<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: &MatchingConfig) -> Self {
        Self {
            expectations: ExpectationManager::new(Arc::clone(&store), clock),
            scorer: MatchScorer::new(config),
            store,
        }
    }

    /// Lifecycle operations on single expectations.
    pub fn expectations(&self) -> &ExpectationManager<S> {
        &self.expectations
    }

    pub fn scorer(&self) -> &MatchScorer {
        &self.scorer
    }

    pub fn scorer_mut(&mut self) -> &mut MatchScorer {
        &mut self.scorer
    }

    /// Ranked, de-duplicated suggestions for one month plan.
    ///
    /// Candidates are the plan's pending and overdue expectations against the
    /// user's unlinked transactions dated within the plan month plus the
    /// configured buffer on each side.
    pub async fn find_match_suggestions(
        &self,
        month_plan_id: MonthPlanId,
        user: UserId,
    ) -> Result<Vec<MatchSuggestion>> {
        let plan = self.expectations.month_plan(user, month_plan_id).await?;

        let filter = ExpectationFilter::month(month_plan_id).with_statuses(&ExpectedStatus::OPEN);
        let expectations = self
            .store
            .list_expectations(user, &filter)
            .await
            .inspect_err(|e| tracing::warn!(%month_plan_id, "Failed to load expectations: {e}"))?;
        if expectations.is_empty() {
            tracing::debug!(%month_plan_id, "No open expectations to match");
            return Ok(Vec::new());
        }

        let window = plan
            .date_range()
            .expand(self.scorer.thresholds().candidate_window_days);
        let actuals = self
            .store
            .list_transactions(
                user,
                &TransactionFilter {
                    date_range: Some(window),
                    unmatched_only: true,
                },
            )
            .await
            .inspect_err(|e| tracing::warn!(%month_plan_id, %window, "Failed to load transactions: {e}"))?;
        tracing::debug!(
            %month_plan_id,
            %window,
            expectations = expectations.len(),
            candidates = actuals.len(),
            "Loaded match candidates"
        );

        Ok(rank_suggestions(&self.scorer, &expectations, &actuals))
    }

    /// Commits suggestions at or above the threshold unless manual review is
    /// required; everything else is returned for review.
    ///
    /// A commit that fails (for example because another pass claimed the
    /// transaction first) drops that suggestion from both lists.
    pub async fn auto_match_transactions(
        &self,
        month_plan_id: MonthPlanId,
        user: UserId,
        options: &AutoMatchOptions,
    ) -> Result<AutoMatchResult> {
        let threshold = options
            .confidence_threshold
            .unwrap_or(self.scorer.thresholds().auto_match);
        if threshold > 100 {
            return Err(ValidationError::ThresholdOutOfRange(u32::from(threshold)).into());
        }

        let ranked = self.find_match_suggestions(month_plan_id, user).await?;
        let mut matched_pairs = Vec::new();
        let mut suggestions = Vec::new();

        for suggestion in ranked {
            if suggestion.confidence_score < threshold || options.require_manual_review {
                suggestions.push(suggestion);
                continue;
            }

            match self
                .expectations
                .match_transaction(
                    user,
                    suggestion.expected_transaction_id,
                    suggestion.transaction_id,
                )
                .await
            {
                Ok(_) => matched_pairs.push(MatchedPair {
                    expected_id: suggestion.expected_transaction_id,
                    transaction_id: suggestion.transaction_id,
                    confidence: suggestion.confidence_score,
                }),
                Err(e) => tracing::warn!(
                    expected_id = %suggestion.expected_transaction_id,
                    transaction_id = %suggestion.transaction_id,
                    "Dropping auto-match suggestion: {e}"
                ),
            }
        }

        let message = if options.require_manual_review {
            format!(
                "Found {} potential matches for manual review",
                suggestions.len()
            )
        } else {
            format!(
                "Automatically matched {} transactions, {} require manual review",
                matched_pairs.len(),
                suggestions.len()
            )
        };
        tracing::info!(%month_plan_id, threshold, "{message}");

        Ok(AutoMatchResult {
            matched_count: matched_pairs.len(),
            suggestions_count: suggestions.len(),
            message,
            matched_pairs,
            suggestions,
        })
    }
}
