//! Feedrank Store — SQLite persistence for chunks, embeddings, the feedback
//! log, quality scores, and review flags.
//!
//! The store doubles as the in-process vector index (normalized embedding
//! matrix, cosine similarity via dot product) and as the ScoreStore that
//! owns score upserts, source-level aggregation, and the user-data purge.

pub mod embedding;
pub mod feedback;
pub mod schema;
pub mod scores;
pub mod sqlite;
pub mod types;

pub use sqlite::{SimilarChunk, SqliteStore};
pub use types::*;
