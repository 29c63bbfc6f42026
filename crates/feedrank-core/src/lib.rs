//! Feedrank Core — errors, configuration, and the feedback analysis vocabulary.

pub mod analysis;
pub mod config;
pub mod error;

pub use analysis::{CommentAnalysis, IssueType, Severity, FALLBACK_CONFIDENCE};
pub use config::{DataPaths, FeedrankConfig};
pub use error::{Error, Result};
