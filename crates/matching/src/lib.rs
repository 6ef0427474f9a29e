pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod ranker;
pub mod scorer;
pub(crate) mod util;
pub mod vendor;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use engine::{AutoMatchOptions, AutoMatchResult, MatchedPair, MatchingEngine};
pub use error::{MatchError, Result};
pub use lifecycle::ExpectationManager;
pub use ranker::{is_candidate, rank_suggestions, MatchSuggestion};
pub use scorer::{MatchScore, MatchScorer, ScoreBreakdown};
pub use vendor::{VendorMatch, VendorMatchKind, VendorMatcher};
