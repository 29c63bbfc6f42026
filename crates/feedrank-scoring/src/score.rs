//! Pure scoring functions. No I/O, fully deterministic.

use feedrank_core::{CommentAnalysis, Error, IssueType, Result, Severity};

/// Weight of the rating-derived score in the enhanced blend.
const RATING_WEIGHT: f64 = 0.7;
/// Weight of the confidence-scaled sentiment signal.
const SENTIMENT_WEIGHT: f64 = 0.3;
/// Below this confidence the AI analysis is discarded entirely.
const CONFIDENCE_GATE: f64 = 0.3;
/// Issue penalties can never remove more than this from one comment.
const ISSUE_PENALTY_FLOOR: f64 = -0.5;

/// Map a 1-5 rating onto [-1, 1] with 3 as neutral.
pub fn rating_to_score(rating: i64) -> Result<f64> {
    if !(1..=5).contains(&rating) {
        return Err(Error::InvalidRating(rating));
    }
    Ok((rating as f64 - 3.0) / 2.0)
}

fn severity_penalty(severity: Severity) -> f64 {
    match severity {
        Severity::None => 0.0,
        Severity::Minor => -0.1,
        Severity::Moderate => -0.3,
        Severity::Severe => -0.5,
    }
}

fn issue_penalty(issue: IssueType) -> f64 {
    match issue {
        IssueType::Incorrect => -0.4,
        IssueType::Outdated => -0.3,
        IssueType::OffTopic => -0.3,
        IssueType::MissingInfo => -0.2,
        IssueType::PoorCitation => -0.15,
        IssueType::TooTechnical => -0.1,
        IssueType::TooSimple => -0.1,
        IssueType::Formatting => -0.05,
        IssueType::None => 0.0,
    }
}

/// Blend the rating score with AI comment analysis.
///
/// Ratings alone are noisy; the analysis adds resolution but is capped at
/// 30% of the blend and gated on confidence so a shaky model output can
/// never dominate a clear numeric rating.
pub fn enhanced_score(rating: i64, analysis: Option<&CommentAnalysis>) -> Result<f64> {
    let plain = rating_to_score(rating)?;
    let analysis = match analysis {
        Some(a) if a.confidence >= CONFIDENCE_GATE => a,
        _ => return Ok(plain),
    };

    let sentiment = analysis.sentiment_score.clamp(-1.0, 1.0) * analysis.confidence.clamp(0.0, 1.0);
    let issues: f64 = analysis
        .issue_types
        .iter()
        .map(|&i| issue_penalty(i))
        .sum::<f64>()
        .max(ISSUE_PENALTY_FLOOR);

    let score = RATING_WEIGHT * plain
        + SENTIMENT_WEIGHT * sentiment
        + severity_penalty(analysis.severity)
        + issues;
    Ok(score.clamp(-1.0, 1.0))
}

/// Hybrid ranking score: similarity scaled by the quality multiplier.
///
/// The feedback signal perturbs the base score by at most ±weight, so
/// similarity stays the dominant ordering signal and a few bad ratings
/// cannot bury a semantically perfect match.
pub fn final_ranking_score(
    similarity: f64,
    base_score: f64,
    feedback_score: f64,
    feedback_weight: f64,
) -> f64 {
    similarity * (base_score * (1.0 + feedback_weight * feedback_score))
}
