//! Vendor display-name comparison for the fuzzy vendor factor.
//!
//! Statement names rarely equal the vendor a user picked for a template
//! ("AMZN Mktp US*2K4", "Amazon"), so names are normalized, checked against
//! an alias table, and finally compared by edit-distance similarity.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::util::similarity_percent;

const NORMALIZATION_PATTERNS: &[(&str, &str)] = &[
    (r"(?i)\s+(inc|llc|ltd|corp|co|company|corporation)\.?$", ""),
    (r"\s*#\d+$", ""),
    (r"\s*-\s*\d+$", ""),
    (r"\*", ""),
    (r"\s+", " "),
    (r"^[^\w]+|[^\w]+$", ""),
];

const DEFAULT_ALIASES: &[(&str, &[&str])] = &[
    ("starbucks", &["starbucks coffee", "sbux", "starbux"]),
    ("amazon", &["amzn", "amz", "amazon.com", "amazon marketplace", "amazon prime"]),
    ("uber", &["uber technologies", "uber trip", "uber eats"]),
    ("lyft", &["lyft ride"]),
    ("mcdonalds", &["mcdonald's", "mcd", "mcds"]),
    ("7-eleven", &["7-11", "7 eleven", "seven eleven"]),
    ("grab", &["grabpay", "grabfood"]),
    ("line", &["line pay", "linepay", "line man"]),
    ("lazada", &["lazada.co.th", "lazada thailand"]),
    ("shopee", &["shopee.co.th", "shopeepay"]),
    ("foodpanda", &["food panda", "pandamart"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorMatchKind {
    Exact,
    Normalized,
    Alias,
    Fuzzy,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorMatch {
    pub kind: VendorMatchKind,
    /// Similarity of the normalized names, 0-100.
    pub similarity: u8,
}

impl VendorMatch {
    pub fn is_match(&self) -> bool {
        self.kind != VendorMatchKind::None
    }
}

pub struct VendorMatcher {
    patterns: Vec<(Regex, &'static str)>,
    /// normalized alias -> canonical name
    aliases: HashMap<String, String>,
    min_similarity: u8,
}

impl VendorMatcher {
    pub fn new(min_similarity: u8) -> Self {
        let patterns = NORMALIZATION_PATTERNS
            .iter()
            .filter_map(|(pattern, replacement)| {
                Regex::new(pattern).ok().map(|re| (re, *replacement))
            })
            .collect();
        let mut matcher = Self {
            patterns,
            aliases: HashMap::new(),
            min_similarity,
        };
        for (canonical, aliases) in DEFAULT_ALIASES {
            matcher.add_aliases(canonical, aliases);
        }
        matcher
    }

    /// Registers extra spellings for a canonical vendor name.
    pub fn add_aliases(&mut self, canonical: &str, aliases: &[&str]) {
        let canonical = self.normalize(canonical);
        self.aliases.insert(canonical.clone(), canonical.clone());
        for alias in aliases {
            let alias = self.normalize(alias);
            self.aliases.insert(alias, canonical.clone());
        }
    }

    pub fn normalize(&self, name: &str) -> String {
        let mut normalized = name.trim().to_lowercase();
        for (re, replacement) in &self.patterns {
            normalized = re.replace_all(&normalized, *replacement).into_owned();
        }
        normalized.trim().to_string()
    }

    pub fn compare(&self, a: &str, b: &str) -> VendorMatch {
        if a == b {
            return VendorMatch {
                kind: VendorMatchKind::Exact,
                similarity: 100,
            };
        }

        let na = self.normalize(a);
        let nb = self.normalize(b);
        if na.is_empty() || nb.is_empty() {
            return VendorMatch {
                kind: VendorMatchKind::None,
                similarity: 0,
            };
        }
        if na == nb {
            return VendorMatch {
                kind: VendorMatchKind::Normalized,
                similarity: 100,
            };
        }

        if let (Some(ca), Some(cb)) = (self.aliases.get(&na), self.aliases.get(&nb)) {
            if ca == cb {
                return VendorMatch {
                    kind: VendorMatchKind::Alias,
                    similarity: 100,
                };
            }
        }

        let similarity = similarity_percent(&na, &nb);
        let kind = if similarity >= self.min_similarity {
            VendorMatchKind::Fuzzy
        } else {
            VendorMatchKind::None
        };
        VendorMatch { kind, similarity }
    }
}

impl Default for VendorMatcher {
    fn default() -> Self {
        Self::new(80)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_patterns_compile() {
        let matcher = VendorMatcher::default();
        assert_eq!(matcher.patterns.len(), NORMALIZATION_PATTERNS.len());
    }

    #[test]
    fn normalize_strips_noise() {
        let m = VendorMatcher::default();
        assert_eq!(m.normalize("  Starbucks Coffee Inc. "), "starbucks coffee");
        assert_eq!(m.normalize("SHELL #1234"), "shell");
        assert_eq!(m.normalize("GRAB*FOOD"), "grabfood");
        assert_eq!(m.normalize("Whole   Foods - 102"), "whole foods");
    }

    #[test]
    fn exact_and_normalized() {
        let m = VendorMatcher::default();
        assert_eq!(m.compare("Netflix", "Netflix").kind, VendorMatchKind::Exact);
        assert_eq!(m.compare("Netflix Inc", "NETFLIX").kind, VendorMatchKind::Normalized);
    }

    #[test]
    fn alias_table_links_spellings() {
        let m = VendorMatcher::default();
        assert_eq!(m.compare("AMZN", "Amazon").kind, VendorMatchKind::Alias);
        assert_eq!(m.compare("sbux", "Starbucks Coffee").kind, VendorMatchKind::Alias);
    }

    #[test]
    fn custom_aliases() {
        let mut m = VendorMatcher::default();
        assert_eq!(m.compare("PG&E", "Pacific Gas").kind, VendorMatchKind::None);
        m.add_aliases("Pacific Gas", &["PG&E"]);
        assert_eq!(m.compare("PG&E", "Pacific Gas").kind, VendorMatchKind::Alias);
    }

    #[test]
    fn fuzzy_requires_threshold() {
        let m = VendorMatcher::default();
        let close = m.compare("Spotify", "Spotfy");
        assert_eq!(close.kind, VendorMatchKind::Fuzzy);
        assert!(close.similarity >= 80);

        let far = m.compare("Spotify", "Safeway");
        assert_eq!(far.kind, VendorMatchKind::None);
        assert!(!far.is_match());
    }
}
