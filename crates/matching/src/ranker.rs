//! Candidate filtering, ranking and de-duplication of match suggestions.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use tally_core::{ExpectedTransaction, ExpectedTransactionId, Transaction, TransactionId};

use crate::scorer::{MatchScorer, ScoreBreakdown};

/// A scored, unconfirmed pairing of one expected and one actual transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSuggestion {
    pub expected_transaction_id: ExpectedTransactionId,
    pub transaction_id: TransactionId,
    pub confidence_score: u8,
    pub match_reasons: Vec<String>,
    pub penalties: Vec<String>,
    pub breakdown: ScoreBreakdown,
    pub expected_transaction: ExpectedTransaction,
    pub actual_transaction: Transaction,
}

/// Cheap pre-check run before full scoring.
///
/// Rejects pairs whose type or currency differ and pairs whose best possible
/// confidence is still under the suggestion floor. With the default weights
/// this drops every pair more than 50% apart on amount; pairs more than 14
/// days apart survive only when vendor, payment method and tags could still
/// lift them over the floor.
pub fn is_candidate(scorer: &MatchScorer, expected: &ExpectedTransaction, actual: &Transaction) -> bool {
    if expected.transaction_type != actual.transaction_type
        || expected.original_currency != actual.original_currency
    {
        return false;
    }
    scorer.upper_bound(expected, actual) >= scorer.thresholds().min_confidence
}

/// Scores every candidate pair and returns suggestions ordered by confidence,
/// keeping only the best suggestion for each actual transaction.
///
/// Ties keep input order: expectations as given, then actuals as given.
/// Matched or skipped expectations and already-linked actuals are ignored.
pub fn rank_suggestions(
    scorer: &MatchScorer,
    expectations: &[ExpectedTransaction],
    actuals: &[Transaction],
) -> Vec<MatchSuggestion> {
    let floor = scorer.thresholds().min_confidence;
    let mut pruned = 0usize;
    let mut suggestions = Vec::new();

    for expected in expectations.iter().filter(|e| e.status.is_open()) {
        for actual in actuals.iter().filter(|a| !a.is_linked()) {
            if !is_candidate(scorer, expected, actual) {
                pruned += 1;
                continue;
            }

            let score = scorer.score(expected, actual);
            tracing::debug!(
                expected_id = %expected.id,
                transaction_id = %actual.id,
                confidence = score.confidence,
                "Scored candidate pair"
            );
            if score.confidence < floor {
                continue;
            }

            suggestions.push(MatchSuggestion {
                expected_transaction_id: expected.id,
                transaction_id: actual.id,
                confidence_score: score.confidence,
                match_reasons: score.reasons,
                penalties: score.penalties,
                breakdown: score.breakdown,
                expected_transaction: expected.clone(),
                actual_transaction: actual.clone(),
            });
        }
    }

    // Stable: equal confidences keep their input order.
    suggestions.sort_by(|a, b| b.confidence_score.cmp(&a.confidence_score));

    let mut claimed: HashSet<TransactionId> = HashSet::new();
    suggestions.retain(|s| claimed.insert(s.transaction_id));

    tracing::debug!(
        pruned,
        kept = suggestions.len(),
        "Ranked match suggestions"
    );
    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{actual, expected};
    use chrono::NaiveDate;
    use tally_core::{
        Currency, ExpectedStatus, MatchingConfig, PaymentMethodId, TagId, TransactionType, VendorId,
    };

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    fn scorer() -> MatchScorer {
        MatchScorer::new(&MatchingConfig::default())
    }

    #[test]
    fn one_suggestion_per_actual_transaction() {
        let mut rent = expected(1, 150_000, date(1));
        rent.vendor_id = Some(VendorId(1));
        let mut rent_again = expected(2, 150_000, date(3));
        rent_again.vendor_id = Some(VendorId(1));
        let mut paid = actual(10, 150_000, date(1));
        paid.vendor_id = Some(VendorId(1));

        let ranked = rank_suggestions(&scorer(), &[rent, rent_again], &[paid]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].expected_transaction_id, ExpectedTransactionId(1));
        assert_eq!(ranked[0].confidence_score, 90);
    }

    #[test]
    fn expectation_may_appear_for_several_actuals() {
        let mut gym = expected(1, 5_000, date(5));
        gym.vendor_id = Some(VendorId(3));
        let mut a = actual(10, 5_000, date(5));
        a.vendor_id = Some(VendorId(3));
        let mut b = actual(11, 5_000, date(6));
        b.vendor_id = Some(VendorId(3));

        let ranked = rank_suggestions(&scorer(), &[gym], &[a, b]);
        let ids: Vec<_> = ranked.iter().map(|s| s.transaction_id).collect();
        assert_eq!(ids, vec![TransactionId(10), TransactionId(11)]);
        assert!(ranked[0].confidence_score > ranked[1].confidence_score);
    }

    #[test]
    fn below_floor_is_not_a_suggestion() {
        // exact amount (30) and three days off (10): 40 < 60
        let ranked = rank_suggestions(
            &scorer(),
            &[expected(1, 2_000, date(10))],
            &[actual(10, 2_000, date(13))],
        );
        assert!(ranked.is_empty());
    }

    #[test]
    fn closed_expectations_and_linked_actuals_are_ignored() {
        let mut skipped = expected(1, 2_000, date(10));
        skipped.status = ExpectedStatus::Skipped;
        skipped.vendor_id = Some(VendorId(1));
        let mut open = expected(2, 2_000, date(10));
        open.vendor_id = Some(VendorId(1));

        let mut linked = actual(10, 2_000, date(10));
        linked.vendor_id = Some(VendorId(1));
        linked.expected_transaction_id = Some(ExpectedTransactionId(99));

        assert!(rank_suggestions(&scorer(), &[skipped.clone()], &[actual(11, 2_000, date(10))]).is_empty());
        assert!(rank_suggestions(&scorer(), &[open], &[linked]).is_empty());
    }

    #[test]
    fn filter_rejects_type_currency_and_wide_amounts() {
        let s = scorer();
        let e = expected(1, 10_000, date(15));

        let mut income = actual(10, 10_000, date(15));
        income.transaction_type = TransactionType::Income;
        assert!(!is_candidate(&s, &e, &income));

        let mut baht = actual(10, 10_000, date(15));
        baht.original_currency = Currency::new("THB").unwrap();
        assert!(!is_candidate(&s, &e, &baht));

        assert!(!is_candidate(&s, &e, &actual(10, 16_000, date(15))));
        assert!(is_candidate(&s, &e, &actual(10, 10_000, date(15))));
    }

    #[test]
    fn filter_never_hides_a_pair_the_scorer_would_suggest() {
        let s = scorer();
        let mut e = expected(1, 10_000, date(1));
        e.vendor_id = Some(VendorId(1));
        e.payment_method_id = Some(PaymentMethodId(2));
        e.tag_ids = vec![TagId(1), TagId(2)];

        // sixteen days late but otherwise identical: 40 + 30 - 10 + 10 + 10
        let mut late = actual(10, 10_000, NaiveDate::from_ymd_opt(2025, 1, 17).unwrap());
        late.vendor_id = Some(VendorId(1));
        late.payment_method_id = Some(PaymentMethodId(2));
        late.tag_ids = vec![TagId(1), TagId(2)];

        assert_eq!(s.score(&e, &late).confidence, 80);
        assert!(is_candidate(&s, &e, &late));
        let ranked = rank_suggestions(&s, &[e], &[late]);
        assert_eq!(ranked.len(), 1);
    }

    #[test]
    fn ties_keep_input_order() {
        let mut a = expected(1, 3_000, date(8));
        a.vendor_id = Some(VendorId(5));
        let mut b = expected(2, 3_000, date(8));
        b.vendor_id = Some(VendorId(5));
        let mut t1 = actual(10, 3_000, date(8));
        t1.vendor_id = Some(VendorId(5));
        let mut t2 = actual(11, 3_000, date(8));
        t2.vendor_id = Some(VendorId(5));

        let ranked = rank_suggestions(&scorer(), &[a, b], &[t1, t2]);
        // every pair scores 90; (1,10) wins t1, (1,11) wins t2
        assert_eq!(ranked.len(), 2);
        assert!(ranked.iter().all(|s| s.expected_transaction_id == ExpectedTransactionId(1)));
        assert_eq!(ranked[0].transaction_id, TransactionId(10));
    }
}
