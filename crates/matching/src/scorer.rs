//! Confidence scoring for one (expected, actual) pair.
//!
//! Type and currency mismatches are a hard veto: once their penalties drive
//! the running total negative no other factor is evaluated and the score is 0.
//! Otherwise the additive factors (vendor, amount, date, payment method, tags)
//! and their penalties are summed and clamped to 0-100.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use tally_core::{
    days_between, ExpectedTransaction, MatchingConfig, Money, ScoringWeights, Thresholds,
    Transaction,
};

use crate::vendor::{VendorMatchKind, VendorMatcher};

/// Amount tier upper bounds, in percent of the expected amount.
const AMOUNT_TIER_5_PCT: i64 = 5;
const AMOUNT_TIER_10_PCT: i64 = 10;
const AMOUNT_TIER_20_PCT: i64 = 20;

/// Date tier upper bounds, in days from `expected_date`.
const DATE_TIER_3_DAYS: u64 = 3;
const DATE_TIER_7_DAYS: u64 = 7;
const DATE_TIER_14_DAYS: u64 = 14;

/// Differences under one cent count as an exact amount.
const EXACT_AMOUNT_CENTS: i64 = 1;

/// Additive sub-score per factor, before penalties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub vendor_score: i32,
    pub amount_score: i32,
    pub date_score: i32,
    pub payment_method_score: i32,
    pub tags_score: i32,
}

impl ScoreBreakdown {
    pub fn total(&self) -> i32 {
        self.vendor_score
            + self.amount_score
            + self.date_score
            + self.payment_method_score
            + self.tags_score
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchScore {
    /// Clamped to 0-100.
    pub confidence: u8,
    pub reasons: Vec<String>,
    pub penalties: Vec<String>,
    pub breakdown: ScoreBreakdown,
}

#[derive(Debug, Default)]
struct Factor {
    score: i32,
    reason: Option<String>,
    penalty: i32,
    penalty_reason: Option<String>,
}

impl Factor {
    fn scored(score: i32, reason: String) -> Self {
        Factor {
            score,
            reason: Some(reason),
            ..Factor::default()
        }
    }
}

pub struct MatchScorer {
    weights: ScoringWeights,
    thresholds: Thresholds,
    vendors: VendorMatcher,
}

impl MatchScorer {
    pub fn new(config: &MatchingConfig) -> Self {
        Self {
            weights: config.weights.clone(),
            thresholds: config.thresholds.clone(),
            vendors: VendorMatcher::new(config.thresholds.vendor_similarity),
        }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// For registering user-specific vendor aliases.
    pub fn vendor_matcher_mut(&mut self) -> &mut VendorMatcher {
        &mut self.vendors
    }

    pub fn score(&self, expected: &ExpectedTransaction, actual: &Transaction) -> MatchScore {
        let mut confidence: i32 = 0;
        let mut reasons = Vec::new();
        let mut penalties = Vec::new();
        let mut breakdown = ScoreBreakdown::default();

        let disqualifier = self.disqualifier(expected, actual);
        if disqualifier.penalty != 0 {
            confidence -= disqualifier.penalty;
            penalties.extend(disqualifier.reasons);
        }
        if confidence < 0 {
            return MatchScore {
                confidence: 0,
                reasons,
                penalties,
                breakdown,
            };
        }

        let vendor = self.vendor_factor(expected, actual);
        let amount = self.amount_factor(expected.expected_amount, actual.amount);
        let date = self.date_factor(days_between(expected.expected_date, actual.transaction_date));
        let payment = self.payment_method_factor(expected, actual);
        let tags = self.tags_factor(expected, actual);

        breakdown.vendor_score = vendor.score;
        breakdown.amount_score = amount.score;
        breakdown.date_score = date.score;
        breakdown.payment_method_score = payment.score;
        breakdown.tags_score = tags.score;

        for factor in [vendor, amount, date, payment, tags] {
            confidence += factor.score - factor.penalty;
            reasons.extend(factor.reason);
            penalties.extend(factor.penalty_reason);
        }

        MatchScore {
            confidence: clamp_confidence(confidence),
            reasons,
            penalties,
            breakdown,
        }
    }

    /// Highest confidence the pair could possibly reach, without the
    /// vendor-name and tag work. Never below the real score.
    pub fn upper_bound(&self, expected: &ExpectedTransaction, actual: &Transaction) -> u8 {
        if self.disqualifier(expected, actual).penalty > 0 {
            return 0;
        }
        let amount = self.amount_factor(expected.expected_amount, actual.amount);
        let date = self.date_factor(days_between(expected.expected_date, actual.transaction_date));
        let payment = self.payment_method_factor(expected, actual);
        let optimistic = self.weights.vendor_max().max(0) + self.weights.tag_max.max(0);
        clamp_confidence(
            optimistic + amount.score - amount.penalty + date.score - date.penalty + payment.score,
        )
    }

    fn disqualifier(&self, expected: &ExpectedTransaction, actual: &Transaction) -> Disqualifier {
        let mut d = Disqualifier::default();
        if expected.transaction_type != actual.transaction_type {
            d.penalty += self.weights.different_type_penalty;
            d.reasons.push("Different transaction type".to_string());
        }
        if expected.original_currency != actual.original_currency {
            d.penalty += self.weights.different_currency_penalty;
            d.reasons.push("Different currency".to_string());
        }
        d
    }

    fn vendor_factor(&self, expected: &ExpectedTransaction, actual: &Transaction) -> Factor {
        if let (Some(e), Some(a)) = (expected.vendor_id, actual.vendor_id) {
            if e == a {
                return Factor::scored(self.weights.vendor_exact, "Exact vendor match".to_string());
            }
        }

        if !self.thresholds.fuzzy_vendor_matching {
            return Factor::default();
        }
        let (Some(e), Some(a)) = (expected.vendor_name.as_deref(), actual.vendor_name.as_deref())
        else {
            return Factor::default();
        };

        let result = self.vendors.compare(e, a);
        match result.kind {
            VendorMatchKind::None => Factor::default(),
            VendorMatchKind::Fuzzy => Factor::scored(
                self.weights.vendor_fuzzy,
                format!("Similar vendor name ({}%)", result.similarity),
            ),
            VendorMatchKind::Exact | VendorMatchKind::Normalized | VendorMatchKind::Alias => {
                Factor::scored(self.weights.vendor_fuzzy, "Vendor name match".to_string())
            }
        }
    }

    fn amount_factor(&self, expected: Money, actual: Money) -> Factor {
        let w = &self.weights;
        if expected.abs_diff(actual).to_cents() < EXACT_AMOUNT_CENTS {
            return Factor::scored(w.amount_exact, "Exact amount match".to_string());
        }

        let Some(pct) = expected.percent_difference(actual) else {
            return Factor {
                penalty: w.large_amount_variance_penalty,
                penalty_reason: Some("Large amount variance".to_string()),
                ..Factor::default()
            };
        };

        let mut factor = if pct <= Decimal::from(AMOUNT_TIER_5_PCT) {
            Factor::scored(w.amount_within_5pct, format!("Amount within 5% ({pct:.1}%)"))
        } else if pct <= Decimal::from(AMOUNT_TIER_10_PCT) {
            Factor::scored(w.amount_within_10pct, format!("Amount within 10% ({pct:.1}%)"))
        } else if pct <= Decimal::from(AMOUNT_TIER_20_PCT) {
            Factor::scored(w.amount_within_20pct, format!("Amount within 20% ({pct:.1}%)"))
        } else {
            Factor::default()
        };

        if pct > Decimal::from(self.thresholds.large_amount_variance_pct) {
            factor.penalty = w.large_amount_variance_penalty;
            factor.penalty_reason = Some(format!("Large amount variance ({pct:.1}%)"));
        }
        factor
    }

    fn date_factor(&self, days: u64) -> Factor {
        let w = &self.weights;
        let mut factor = if days == 0 {
            Factor::scored(w.date_same_day, "Same day".to_string())
        } else if days <= DATE_TIER_3_DAYS {
            Factor::scored(w.date_within_3_days, format!("Within 3 days ({days} days)"))
        } else if days <= DATE_TIER_7_DAYS {
            Factor::scored(w.date_within_7_days, format!("Within 7 days ({days} days)"))
        } else if days <= DATE_TIER_14_DAYS {
            Factor::scored(w.date_within_14_days, format!("Within 14 days ({days} days)"))
        } else {
            Factor::default()
        };

        if days > u64::from(self.thresholds.large_date_variance_days) {
            factor.penalty = w.large_date_variance_penalty;
            factor.penalty_reason = Some(format!("Large date variance ({days} days)"));
        }
        factor
    }

    fn payment_method_factor(&self, expected: &ExpectedTransaction, actual: &Transaction) -> Factor {
        match (expected.payment_method_id, actual.payment_method_id) {
            (Some(e), Some(a)) if e == a => {
                Factor::scored(self.weights.payment_method, "Same payment method".to_string())
            }
            _ => Factor::default(),
        }
    }

    fn tags_factor(&self, expected: &ExpectedTransaction, actual: &Transaction) -> Factor {
        if expected.tag_ids.is_empty() || actual.tag_ids.is_empty() {
            return Factor::default();
        }
        let actual_tags: HashSet<_> = actual.tag_ids.iter().collect();
        let shared = expected
            .tag_ids
            .iter()
            .collect::<HashSet<_>>()
            .intersection(&actual_tags)
            .count();
        if shared == 0 {
            return Factor::default();
        }

        let each = i64::from(self.weights.tag_each);
        let score = (shared as i64 * each).min(i64::from(self.weights.tag_max)) as i32;
        let plural = if shared > 1 { "s" } else { "" };
        Factor::scored(score, format!("{shared} matching tag{plural}"))
    }
}

#[derive(Debug, Default)]
struct Disqualifier {
    penalty: i32,
    reasons: Vec<String>,
}

fn clamp_confidence(raw: i32) -> u8 {
    raw.clamp(0, 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use tally_core::{
        Currency, ExpectedStatus, ExpectedTransactionId, MonthPlanId, PaymentMethodId, SourceType,
        TagId, TransactionId, TransactionType, UserId, VendorId,
    };

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn expected(cents: i64, on: NaiveDate) -> ExpectedTransaction {
        let now = Utc::now();
        ExpectedTransaction {
            id: ExpectedTransactionId(1),
            user_id: UserId(1),
            month_plan_id: MonthPlanId(1),
            template_id: None,
            description: "Electric bill".to_string(),
            expected_amount: Money::from_cents(cents),
            original_currency: Currency::new("USD").unwrap(),
            transaction_type: TransactionType::Expense,
            expected_date: on,
            vendor_id: None,
            vendor_name: None,
            payment_method_id: None,
            tag_ids: vec![],
            status: ExpectedStatus::Pending,
            matched_transaction_id: None,
            matched_at: None,
            actual_amount: None,
            variance_amount: None,
            variance_percentage: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn actual(cents: i64, on: NaiveDate) -> Transaction {
        Transaction {
            id: TransactionId(100),
            user_id: UserId(1),
            description: "ELECTRIC CO".to_string(),
            amount: Money::from_cents(cents),
            original_currency: Currency::new("USD").unwrap(),
            transaction_type: TransactionType::Expense,
            transaction_date: on,
            vendor_id: None,
            vendor_name: None,
            payment_method_id: None,
            tag_ids: vec![],
            expected_transaction_id: None,
            source_type: SourceType::Manual,
        }
    }

    fn scorer() -> MatchScorer {
        MatchScorer::new(&MatchingConfig::default())
    }

    fn full_match() -> (ExpectedTransaction, Transaction) {
        let day = date(2025, 1, 15);
        let mut e = expected(10_000, day);
        let mut a = actual(10_000, day);
        e.vendor_id = Some(VendorId(7));
        a.vendor_id = Some(VendorId(7));
        e.payment_method_id = Some(PaymentMethodId(3));
        a.payment_method_id = Some(PaymentMethodId(3));
        (e, a)
    }

    #[test]
    fn exact_match_on_every_factor_scores_100() {
        let (e, a) = full_match();
        let score = scorer().score(&e, &a);
        assert_eq!(score.confidence, 100);
        assert!(score.confidence > 80);
        assert_eq!(score.breakdown.vendor_score, 40);
        assert_eq!(score.breakdown.amount_score, 30);
        assert_eq!(score.breakdown.date_score, 20);
        assert_eq!(score.breakdown.payment_method_score, 10);
        assert!(score.reasons.contains(&"Exact vendor match".to_string()));
        assert!(score.penalties.is_empty());
    }

    #[test]
    fn different_type_is_vetoed() {
        let (e, mut a) = full_match();
        a.transaction_type = TransactionType::Income;
        let score = scorer().score(&e, &a);
        assert_eq!(score.confidence, 0);
        assert_eq!(score.penalties, vec!["Different transaction type".to_string()]);
        assert_eq!(score.breakdown, ScoreBreakdown::default());
        assert!(score.reasons.is_empty());
    }

    #[test]
    fn different_currency_is_vetoed() {
        let (e, mut a) = full_match();
        a.original_currency = Currency::new("THB").unwrap();
        let score = scorer().score(&e, &a);
        assert_eq!(score.confidence, 0);
        assert_eq!(score.penalties, vec!["Different currency".to_string()]);
    }

    #[test]
    fn amount_three_percent_off_is_second_tier() {
        let day = date(2025, 1, 15);
        let score = scorer().score(&expected(10_000, day), &actual(10_300, day));
        assert!(score.breakdown.amount_score > 0);
        assert!(score.breakdown.amount_score < 30);
        assert_eq!(score.breakdown.amount_score, 20);
        assert!(score.reasons.contains(&"Amount within 5% (3.0%)".to_string()));
    }

    #[test]
    fn amount_tiers() {
        let s = scorer();
        let day = date(2025, 1, 15);
        let tier = |cents| s.score(&expected(10_000, day), &actual(cents, day)).breakdown.amount_score;
        assert_eq!(tier(10_000), 30);
        assert_eq!(tier(10_500), 20);
        assert_eq!(tier(9_100), 10);
        assert_eq!(tier(11_900), 5);
        assert_eq!(tier(13_000), 0);
    }

    #[test]
    fn large_amount_variance_penalty_is_separate_from_tier() {
        let day = date(2025, 1, 15);
        let score = scorer().score(&expected(10_000, day), &actual(16_000, day));
        assert_eq!(score.breakdown.amount_score, 0);
        assert_eq!(score.penalties, vec!["Large amount variance (60.0%)".to_string()]);
        // same day (20) minus the variance penalty (30) clamps to zero
        assert_eq!(score.confidence, 0);
    }

    #[test]
    fn date_tiers_and_penalty() {
        let s = scorer();
        let base = date(2025, 1, 15);
        let at = |d: NaiveDate| s.score(&expected(10_000, base), &actual(10_000, d));
        assert_eq!(at(base).breakdown.date_score, 20);
        assert_eq!(at(date(2025, 1, 12)).breakdown.date_score, 10);
        assert_eq!(at(date(2025, 1, 22)).breakdown.date_score, 5);
        assert_eq!(at(date(2025, 1, 29)).breakdown.date_score, 2);

        let late = at(date(2025, 1, 31));
        assert_eq!(late.breakdown.date_score, 0);
        assert_eq!(late.penalties, vec!["Large date variance (16 days)".to_string()]);
        // exact amount (30) minus date penalty (10)
        assert_eq!(late.confidence, 20);
    }

    #[test]
    fn tags_score_caps_at_ten() {
        let day = date(2025, 1, 15);
        let mut e = expected(10_000, day);
        let mut a = actual(10_000, day);
        e.tag_ids = vec![TagId(1), TagId(2), TagId(3)];
        a.tag_ids = vec![TagId(1)];
        let one = scorer().score(&e, &a);
        assert_eq!(one.breakdown.tags_score, 5);
        assert!(one.reasons.contains(&"1 matching tag".to_string()));

        a.tag_ids = vec![TagId(1), TagId(2), TagId(3), TagId(9)];
        let three = scorer().score(&e, &a);
        assert_eq!(three.breakdown.tags_score, 10);
        assert!(three.reasons.contains(&"3 matching tags".to_string()));
    }

    #[test]
    fn fuzzy_vendor_name_scores_partial_credit() {
        let day = date(2025, 1, 15);
        let mut e = expected(10_000, day);
        let mut a = actual(10_000, day);
        e.vendor_id = Some(VendorId(1));
        e.vendor_name = Some("Netflix".to_string());
        a.vendor_id = Some(VendorId(2));
        a.vendor_name = Some("NETFLIX INC.".to_string());
        let score = scorer().score(&e, &a);
        assert_eq!(score.breakdown.vendor_score, 20);

        let mut strict = MatchingConfig::default();
        strict.thresholds.fuzzy_vendor_matching = false;
        let score = MatchScorer::new(&strict).score(&e, &a);
        assert_eq!(score.breakdown.vendor_score, 0);
    }

    #[test]
    fn missing_vendor_on_either_side_scores_zero() {
        let (mut e, a) = full_match();
        e.vendor_id = None;
        let score = scorer().score(&e, &a);
        assert_eq!(score.breakdown.vendor_score, 0);
        assert_eq!(score.confidence, 60);
    }

    #[test]
    fn upper_bound_never_below_score() {
        let s = scorer();
        let base = date(2025, 1, 15);
        let (mut e, mut a) = full_match();
        e.tag_ids = vec![TagId(1)];
        a.tag_ids = vec![TagId(1)];
        for (cents, day) in [
            (10_000, base),
            (12_500, date(2025, 1, 20)),
            (16_000, date(2025, 2, 3)),
            (5_000, date(2025, 1, 1)),
        ] {
            a.amount = Money::from_cents(cents);
            a.transaction_date = day;
            assert!(s.upper_bound(&e, &a) >= s.score(&e, &a).confidence);
        }
        a.transaction_type = TransactionType::Income;
        assert_eq!(s.upper_bound(&e, &a), 0);
    }
}
