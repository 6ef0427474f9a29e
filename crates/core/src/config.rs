use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Points awarded (or deducted) by each scoring factor.
///
/// Penalties are stored as positive magnitudes and subtracted by the scorer.
/// The defaults are load-bearing: tests and the auto-match threshold are
/// calibrated against them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub vendor_exact: i32,
    pub vendor_fuzzy: i32,
    pub amount_exact: i32,
    pub amount_within_5pct: i32,
    pub amount_within_10pct: i32,
    pub amount_within_20pct: i32,
    pub date_same_day: i32,
    pub date_within_3_days: i32,
    pub date_within_7_days: i32,
    pub date_within_14_days: i32,
    pub payment_method: i32,
    pub tag_each: i32,
    pub tag_max: i32,
    pub different_type_penalty: i32,
    pub different_currency_penalty: i32,
    pub large_amount_variance_penalty: i32,
    pub large_date_variance_penalty: i32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            vendor_exact: 40,
            vendor_fuzzy: 20,
            amount_exact: 30,
            amount_within_5pct: 20,
            amount_within_10pct: 10,
            amount_within_20pct: 5,
            date_same_day: 20,
            date_within_3_days: 10,
            date_within_7_days: 5,
            date_within_14_days: 2,
            payment_method: 10,
            tag_each: 5,
            tag_max: 10,
            different_type_penalty: 50,
            different_currency_penalty: 50,
            large_amount_variance_penalty: 30,
            large_date_variance_penalty: 10,
        }
    }
}

impl ScoringWeights {
    /// Highest score the vendor factor can contribute.
    pub fn vendor_max(&self) -> i32 {
        self.vendor_exact.max(self.vendor_fuzzy)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Suggestions scoring below this are discarded outright.
    pub min_confidence: u8,
    /// Default auto-accept threshold when the caller does not supply one.
    pub auto_match: u8,
    /// Days added before and after the plan month when loading candidates.
    pub candidate_window_days: u32,
    /// Percent difference above which the large-amount penalty applies.
    pub large_amount_variance_pct: u32,
    /// Day difference above which the large-date penalty applies.
    pub large_date_variance_days: u32,
    /// Minimum name similarity (0-100) for a fuzzy vendor match.
    pub vendor_similarity: u8,
    pub fuzzy_vendor_matching: bool,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_confidence: 60,
            auto_match: 85,
            candidate_window_days: 14,
            large_amount_variance_pct: 50,
            large_date_variance_days: 14,
            vendor_similarity: 80,
            fuzzy_vendor_matching: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub weights: ScoringWeights,
    pub thresholds: Thresholds,
}

impl MatchingConfig {
    pub fn from_toml(toml_content: &str) -> Result<Self, String> {
        let config: MatchingConfig =
            toml::from_str(toml_content).map_err(|e| format!("Failed to parse TOML: {e}"))?;
        config.validate().map_err(|e| e.to_string())?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for value in [
            self.thresholds.min_confidence,
            self.thresholds.auto_match,
            self.thresholds.vendor_similarity,
        ] {
            if value > 100 {
                return Err(ValidationError::ThresholdOutOfRange(u32::from(value)));
            }
        }
        Ok(())
    }
}
