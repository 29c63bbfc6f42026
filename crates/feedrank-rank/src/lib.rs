//! Feedrank Rank — hybrid reranking of similarity-search candidates by
//! persisted quality scores.

pub mod ranker;

pub use ranker::{RankedChunk, RetrievalRanker};
