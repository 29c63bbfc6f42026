//! Data types for chunks, scores, the feedback log, and review flags.

use serde::{Deserialize, Serialize};

use feedrank_core::{CommentAnalysis, IssueType, Severity};

/// A retrievable chunk row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: i64,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub created_at: i64,
}

impl Chunk {
    pub fn source_url(&self) -> Option<&str> {
        self.metadata.as_ref()?.get("source_url")?.as_str()
    }

    pub fn source_title(&self) -> Option<&str> {
        self.metadata.as_ref()?.get("source_title")?.as_str()
    }
}

/// Options for adding a chunk.
#[derive(Debug, Clone, Default)]
pub struct AddChunkOptions {
    pub metadata: Option<serde_json::Value>,
    pub content_hash: Option<String>,
    pub created_at: Option<i64>,
}

/// Persisted quality score for one chunk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkScore {
    pub chunk_id: i64,
    /// Manually adjustable prior, default neutral.
    pub base_score: f64,
    /// Derived from rating history, clamped to [-1, 1].
    pub feedback_score: f64,
    /// Rating + AI comment analysis blend, clamped to [-1, 1].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enhanced_feedback_score: Option<f64>,
    /// Feedback items pooled into the scores at the last rescore. A score
    /// of exactly 0.0 with a nonzero count is real feedback, not absence.
    pub feedback_count: i64,
    pub last_updated: i64,
}

impl ChunkScore {
    /// Neutral score used when a chunk has no persisted row.
    pub fn neutral(chunk_id: i64) -> Self {
        Self {
            chunk_id,
            base_score: 1.0,
            feedback_score: 0.0,
            enhanced_feedback_score: None,
            feedback_count: 0,
            last_updated: 0,
        }
    }

    /// The feedback signal used for ranking: enhanced when present.
    pub fn ranking_feedback(&self) -> f64 {
        self.enhanced_feedback_score.unwrap_or(self.feedback_score)
    }
}

/// Recomputed score values written by the feedback reducer.
#[derive(Debug, Clone, Copy)]
pub struct ChunkScoreUpdate {
    pub chunk_id: i64,
    pub feedback_score: f64,
    pub enhanced_feedback_score: Option<f64>,
    pub feedback_count: i64,
}

/// Aggregate quality score for one source URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceScore {
    pub source_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    pub feedback_score: f64,
    pub enhanced_feedback_score: f64,
    /// Distinct feedback-bearing chunks contributing at last recomputation.
    pub feedback_count: i64,
    pub last_updated: i64,
}

/// A stored (already redacted) query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub id: i64,
    pub query_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub has_pii: bool,
    pub redaction_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redaction_details: Option<serde_json::Value>,
    pub created_at: i64,
}

/// A generated response joined with its query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub id: i64,
    pub query_id: i64,
    pub query_text: String,
    pub response_text: String,
    pub retrieved_chunk_ids: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    pub created_at: i64,
}

/// One feedback row; analysis fields are back-filled asynchronously.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: i64,
    pub response_id: i64,
    pub rating: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<CommentAnalysis>,
    pub created_at: i64,
}

/// Reducer input: one feedback item plus the chunks its response used.
#[derive(Debug, Clone)]
pub struct FeedbackWithChunks {
    pub feedback: FeedbackRecord,
    pub chunk_ids: Vec<i64>,
}

/// Review flag status lifecycle; only humans move a flag out of pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagStatus {
    Pending,
    Resolved,
    Dismissed,
}

impl FlagStatus {
    pub fn label(&self) -> &'static str {
        match self {
            FlagStatus::Pending => "pending",
            FlagStatus::Resolved => "resolved",
            FlagStatus::Dismissed => "dismissed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "resolved" => Some(Self::Resolved),
            "dismissed" => Some(Self::Dismissed),
            _ => None,
        }
    }
}

/// A persisted review flag with its supporting evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewFlag {
    pub id: i64,
    pub chunk_id: i64,
    pub reason: String,
    /// Top issue types with occurrence counts, most frequent first.
    pub common_issues: Vec<(IssueType, usize)>,
    /// Counts per severity bucket across the considered feedback.
    pub severity_distribution: Vec<(Severity, usize)>,
    pub total_feedbacks: i64,
    pub status: FlagStatus,
    pub flagged_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewer_notes: Option<String>,
}

/// Counts of rows removed or reset by the user-data purge.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PurgeReport {
    pub feedback: usize,
    pub responses: usize,
    pub queries: usize,
    pub review_flags: usize,
    pub chunk_scores_reset: usize,
    pub source_scores: usize,
}

/// A chunk ranked against the final score in analytics output.
#[derive(Debug, Clone, Serialize)]
pub struct TopChunk {
    pub chunk_id: i64,
    pub base_score: f64,
    pub feedback_score: f64,
    pub final_score: f64,
}

/// System analytics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct Analytics {
    pub total_chunks: i64,
    pub total_queries: i64,
    pub total_responses: i64,
    pub total_feedback: i64,
    pub average_rating: f64,
    pub recent_avg_rating: f64,
    pub recent_feedback_count: i64,
    pub top_chunks: Vec<TopChunk>,
}

/// Response listing entry with aggregated feedback.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseSummary {
    pub id: i64,
    pub query_id: i64,
    pub query_text: String,
    pub response_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    pub created_at: i64,
    pub avg_rating: f64,
    pub feedback_count: i64,
    pub comment_count: i64,
}

/// Store-level statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_chunks: i64,
    pub embeddings_stored: i64,
    pub embedding_dimension: usize,
    pub pending_review_flags: i64,
    pub db_path: String,
    pub db_size_mb: f64,
    pub matrix_loaded: bool,
    pub matrix_rows: usize,
}
