//! Feedrank Scoring — the numeric model that turns ratings and AI comment
//! analysis into persisted quality scores, plus the pattern detector that
//! raises review flags.

pub mod reducer;
pub mod review;
pub mod score;

pub use reducer::{FeedbackReducer, RescoreOutcome, ScoringMode};
pub use review::{detect_and_flag, ReviewPatternDetector, ReviewPatternSummary};
pub use score::{enhanced_score, final_ranking_score, rating_to_score};
