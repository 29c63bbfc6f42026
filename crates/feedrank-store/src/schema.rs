//! Database schema SQL.

/// Content tables: chunks and their quantized embeddings.
pub const CONTENT_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content TEXT NOT NULL,
    metadata_json TEXT,
    content_hash TEXT UNIQUE,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_hash ON chunks(content_hash);

CREATE TABLE IF NOT EXISTS chunk_embeddings (
    chunk_id INTEGER PRIMARY KEY REFERENCES chunks(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL,
    scale REAL NOT NULL,
    offset_val REAL NOT NULL
);
"#;

/// Scoring tables: per-chunk and per-source quality aggregates.
pub const SCORE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS chunk_scores (
    chunk_id INTEGER PRIMARY KEY REFERENCES chunks(id) ON DELETE CASCADE,
    base_score REAL NOT NULL DEFAULT 1.0,
    feedback_score REAL NOT NULL DEFAULT 0.0,
    enhanced_feedback_score REAL,
    feedback_count INTEGER NOT NULL DEFAULT 0,
    last_updated INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS source_scores (
    source_url TEXT PRIMARY KEY,
    source_type TEXT,
    feedback_score REAL NOT NULL DEFAULT 0.0,
    enhanced_feedback_score REAL NOT NULL DEFAULT 0.0,
    feedback_count INTEGER NOT NULL DEFAULT 0,
    last_updated INTEGER NOT NULL
);
"#;

/// Interaction log: queries, responses, feedback.
pub const INTERACTION_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS queries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    query_text TEXT NOT NULL,
    category TEXT,
    has_pii INTEGER NOT NULL DEFAULT 0,
    redaction_count INTEGER NOT NULL DEFAULT 0,
    redaction_details_json TEXT,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS responses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    query_id INTEGER NOT NULL REFERENCES queries(id),
    response_text TEXT NOT NULL,
    retrieved_chunk_ids TEXT NOT NULL,
    model_version TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_responses_query ON responses(query_id);

CREATE TABLE IF NOT EXISTS feedback (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    response_id INTEGER NOT NULL REFERENCES responses(id),
    rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
    comment TEXT,
    sentiment_score REAL,
    issues_json TEXT,
    severity TEXT,
    needs_review INTEGER,
    confidence REAL,
    summary TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_feedback_response ON feedback(response_id);
CREATE INDEX IF NOT EXISTS idx_feedback_severity ON feedback(severity);
"#;

/// Review flags raised by the pattern detector, resolved by humans.
pub const REVIEW_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS review_flags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chunk_id INTEGER NOT NULL UNIQUE REFERENCES chunks(id) ON DELETE CASCADE,
    reason TEXT NOT NULL,
    common_issues_json TEXT NOT NULL,
    severity_distribution_json TEXT NOT NULL,
    total_feedbacks INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    flagged_at INTEGER NOT NULL,
    reviewed_at INTEGER,
    reviewer_notes TEXT
);

CREATE INDEX IF NOT EXISTS idx_review_flags_status ON review_flags(status);
"#;
