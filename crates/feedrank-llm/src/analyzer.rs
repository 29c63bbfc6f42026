//! AI analysis of free-text feedback comments.
//!
//! The model's reply is validated against the closed issue/severity
//! vocabularies at this boundary; anything it invents is rejected and the
//! caller gets the low-confidence fallback instead, so downstream scoring
//! never trusts a malformed payload.

use reqwest::Client;
use tracing::warn;

use crate::config::LLMConfig;
use crate::providers::complete;
use crate::types::ChatMessage;
use feedrank_core::CommentAnalysis;

const ANALYSIS_SYSTEM_PROMPT: &str = "You analyze user feedback on answers from a \
document question-answering system. Reply with a single JSON object and nothing else:\n\
{\n\
  \"sentiment_score\": number in [-1, 1],\n\
  \"issue_types\": array drawn from [\"outdated\", \"incorrect\", \"too_technical\", \
\"too_simple\", \"missing_info\", \"poor_citation\", \"off_topic\", \"formatting\", \"none\"],\n\
  \"severity\": one of \"none\", \"minor\", \"moderate\", \"severe\",\n\
  \"needs_review\": boolean, true only if the source material itself seems wrong,\n\
  \"confidence\": number in [0, 1],\n\
  \"summary\": one sentence, at most 100 characters\n\
}";

/// Analyze a feedback comment in the context of its rating and the
/// answered question. Falls back to a rating-only analysis on any
/// provider or parse failure, so feedback submission is never blocked.
pub async fn analyze_comment(
    client: &Client,
    config: &LLMConfig,
    rating: i64,
    comment: &str,
    query_text: &str,
) -> CommentAnalysis {
    if comment.trim().is_empty() {
        return CommentAnalysis::empty_comment();
    }

    let (provider, model, api_key) = match config.resolve_provider() {
        Some(resolved) => resolved,
        None => {
            warn!("No LLM provider configured; using rating-only analysis");
            return CommentAnalysis::fallback(rating, "no provider configured");
        }
    };

    let user = format!(
        "Question asked: {}\nUser rating: {}/5\nUser comment: {}",
        query_text, rating, comment
    );
    let messages = vec![
        ChatMessage::system(ANALYSIS_SYSTEM_PROMPT),
        ChatMessage::user(user),
    ];

    let raw = match complete(client, provider, &messages, &model, &api_key, 0.0, 500).await {
        Ok(text) => text,
        Err(e) => {
            warn!("Comment analysis call failed: {}", e);
            return CommentAnalysis::fallback(rating, "analyzer unavailable");
        }
    };

    match parse_analysis(&raw) {
        Some(analysis) => analysis.normalize(),
        None => {
            warn!("Comment analysis returned unparseable payload");
            CommentAnalysis::fallback(rating, "malformed analysis")
        }
    }
}

/// Parse the model reply, tolerating markdown code fences but nothing
/// else. Unknown issue types or severities fail deserialization.
fn parse_analysis(raw: &str) -> Option<CommentAnalysis> {
    serde_json::from_str(extract_json(raw)).ok()
}

fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed);
    inner.trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedrank_core::{IssueType, Severity, FALLBACK_CONFIDENCE};

    #[test]
    fn test_parse_plain_json() {
        let raw = r#"{"sentiment_score": -0.7, "issue_types": ["outdated"], "severity": "moderate",
                      "needs_review": false, "confidence": 0.85, "summary": "Rates are stale"}"#;
        let analysis = parse_analysis(raw).unwrap();
        assert_eq!(analysis.sentiment_score, -0.7);
        assert_eq!(analysis.issue_types, vec![IssueType::Outdated]);
        assert_eq!(analysis.severity, Severity::Moderate);
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = "```json\n{\"sentiment_score\": 0.5, \"issue_types\": [\"none\"], \
                   \"severity\": \"none\", \"needs_review\": false, \"confidence\": 0.9, \
                   \"summary\": \"Positive\"}\n```";
        let analysis = parse_analysis(raw).unwrap();
        assert_eq!(analysis.sentiment_score, 0.5);
    }

    #[test]
    fn test_unknown_issue_type_rejected() {
        let raw = r#"{"sentiment_score": 0.0, "issue_types": ["hallucinated_category"],
                      "severity": "none", "needs_review": false, "confidence": 0.9, "summary": ""}"#;
        assert!(parse_analysis(raw).is_none());
    }

    #[test]
    fn test_unknown_severity_rejected() {
        let raw = r#"{"sentiment_score": 0.0, "issue_types": ["none"], "severity": "catastrophic",
                      "needs_review": false, "confidence": 0.9, "summary": ""}"#;
        assert!(parse_analysis(raw).is_none());
    }

    #[test]
    fn test_prose_rejected() {
        assert!(parse_analysis("The user seems unhappy about outdated data.").is_none());
    }

    #[test]
    fn test_fallback_confidence_below_gate() {
        let fallback = CommentAnalysis::fallback(4, "analyzer unavailable");
        assert_eq!(fallback.confidence, FALLBACK_CONFIDENCE);
        assert_eq!(fallback.sentiment_score, 0.5);
    }
}
