//! Closed vocabulary for AI comment analysis.
//!
//! The sentiment analyzer returns free-form JSON; everything crossing that
//! boundary is parsed into these types so downstream scoring never sees an
//! unvalidated payload.

use serde::{Deserialize, Serialize};

/// Confidence assigned to the rating-derived fallback when the analyzer
/// fails or returns malformed output. Sits below the scoring confidence
/// gate, so fallback analyses never influence enhanced scores.
pub const FALLBACK_CONFIDENCE: f64 = 0.3;

/// Severity of issues reported in a feedback comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    None,
    Minor,
    Moderate,
    Severe,
}

impl Severity {
    pub fn all() -> &'static [Severity] {
        &[Self::None, Self::Minor, Self::Moderate, Self::Severe]
    }

    pub fn label(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Minor => "minor",
            Severity::Moderate => "moderate",
            Severity::Severe => "severe",
        }
    }
}

/// Issue categories the analyzer is allowed to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Outdated,
    Incorrect,
    TooTechnical,
    TooSimple,
    MissingInfo,
    PoorCitation,
    OffTopic,
    Formatting,
    None,
}

impl IssueType {
    pub fn label(&self) -> &'static str {
        match self {
            IssueType::Outdated => "outdated",
            IssueType::Incorrect => "incorrect",
            IssueType::TooTechnical => "too_technical",
            IssueType::TooSimple => "too_simple",
            IssueType::MissingInfo => "missing_info",
            IssueType::PoorCitation => "poor_citation",
            IssueType::OffTopic => "off_topic",
            IssueType::Formatting => "formatting",
            IssueType::None => "none",
        }
    }
}

impl std::fmt::Display for IssueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Structured result of analyzing one feedback comment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentAnalysis {
    /// Overall sentiment in [-1, 1].
    pub sentiment_score: f64,
    #[serde(default)]
    pub issue_types: Vec<IssueType>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub needs_review: bool,
    /// Analyzer self-reported confidence in [0, 1].
    pub confidence: f64,
    #[serde(default)]
    pub summary: String,
}

impl CommentAnalysis {
    /// Clamp numeric fields into their documented ranges and bound the
    /// summary length. Enum fields are already closed by construction.
    pub fn normalize(mut self) -> Self {
        self.sentiment_score = self.sentiment_score.clamp(-1.0, 1.0);
        self.confidence = self.confidence.clamp(0.0, 1.0);
        if self.summary.len() > 100 {
            let mut end = 100;
            while !self.summary.is_char_boundary(end) {
                end -= 1;
            }
            self.summary.truncate(end);
        }
        self
    }

    /// Rating-only fallback analysis used when the analyzer is unavailable
    /// or its output fails validation.
    pub fn fallback(rating: i64, reason: &str) -> Self {
        Self {
            sentiment_score: (rating as f64 - 3.0) / 2.0,
            issue_types: vec![IssueType::None],
            severity: Severity::None,
            needs_review: false,
            confidence: FALLBACK_CONFIDENCE,
            summary: format!("Analysis unavailable: {}", truncate(reason, 50)),
        }
    }

    /// Analysis attached to feedback submitted without a comment.
    pub fn empty_comment() -> Self {
        Self {
            sentiment_score: 0.0,
            issue_types: Vec::new(),
            severity: Severity::None,
            needs_review: false,
            confidence: 1.0,
            summary: "No comment provided".into(),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
