//! The retrieval ranker: over-fetch by similarity, rerank by the hybrid
//! score, return top-k.

use std::sync::Arc;

use ndarray::Array1;
use serde::Serialize;
use tracing::debug;

use feedrank_core::Result;
use feedrank_scoring::final_ranking_score;
use feedrank_store::{ChunkScore, SqliteStore};

/// A candidate after hybrid reranking.
#[derive(Debug, Clone, Serialize)]
pub struct RankedChunk {
    pub chunk_id: i64,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub similarity: f64,
    pub base_score: f64,
    pub feedback_score: f64,
    pub final_score: f64,
}

impl RankedChunk {
    pub fn source_url(&self) -> Option<&str> {
        self.metadata.as_ref()?.get("source_url")?.as_str()
    }

    pub fn source_title(&self) -> Option<&str> {
        self.metadata.as_ref()?.get("source_title")?.as_str()
    }
}

/// Reranks vector-index candidates by `similarity × base × (1 + w × fb)`.
pub struct RetrievalRanker {
    store: Arc<SqliteStore>,
    feedback_weight: f64,
    /// Candidates fetched per requested result. Fetching exactly k would
    /// bias recall toward pure similarity, since reranking never expands
    /// the candidate pool; a larger factor trades fetch latency for the
    /// chance to promote well-rated lower-similarity chunks into the top-k.
    overfetch_factor: usize,
}

impl RetrievalRanker {
    pub fn new(store: Arc<SqliteStore>, feedback_weight: f64, overfetch_factor: usize) -> Self {
        Self {
            store,
            feedback_weight,
            overfetch_factor: overfetch_factor.max(1),
        }
    }

    /// Retrieve the top-k chunks for a query embedding, hybrid-ranked.
    pub fn search(&self, query_embedding: &Array1<f32>, k: usize) -> Result<Vec<RankedChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        // k comes straight from the request; saturate instead of
        // overflowing on absurd values.
        let candidates = self
            .store
            .similarity_search(query_embedding, k.saturating_mul(self.overfetch_factor))?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let chunk_ids: Vec<i64> = candidates.iter().map(|c| c.chunk_id).collect();
        let scores = self.store.chunk_scores_for(&chunk_ids)?;

        // Candidates arrive similarity-descending; the stable sort keeps
        // that order as the tie-break, so identical inputs always produce
        // identical rankings.
        let mut ranked: Vec<RankedChunk> = candidates
            .into_iter()
            .map(|c| {
                let score = scores
                    .get(&c.chunk_id)
                    .copied()
                    .unwrap_or_else(|| ChunkScore::neutral(c.chunk_id));
                let feedback = score.ranking_feedback();
                let final_score = final_ranking_score(
                    c.similarity,
                    score.base_score,
                    feedback,
                    self.feedback_weight,
                );
                RankedChunk {
                    chunk_id: c.chunk_id,
                    content: c.content,
                    metadata: c.metadata,
                    similarity: c.similarity,
                    base_score: score.base_score,
                    feedback_score: feedback,
                    final_score,
                }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(k);

        debug!(
            "Reranked {} candidates to top-{} (weight={})",
            chunk_ids.len(),
            ranked.len(),
            self.feedback_weight
        );
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedrank_store::{AddChunkOptions, ChunkScoreUpdate};
    use tempfile::TempDir;

    const DIM: usize = 4;

    fn test_store() -> (Arc<SqliteStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path(), DIM).unwrap());
        (store, dir)
    }

    /// A vector at a known cosine similarity to the x axis.
    fn vec_at(cos: f32) -> Array1<f32> {
        let sin = (1.0 - cos * cos).sqrt();
        Array1::from(vec![cos, sin, 0.0, 0.0])
    }

    fn query() -> Array1<f32> {
        Array1::from(vec![1.0, 0.0, 0.0, 0.0])
    }

    fn add(store: &SqliteStore, content: &str, cos: f32) -> i64 {
        store
            .add_chunk(content, Some(&vec_at(cos)), AddChunkOptions::default())
            .unwrap()
    }

    fn set_feedback(store: &SqliteStore, chunk_id: i64, fb: f64) {
        store
            .upsert_feedback_scores(&[ChunkScoreUpdate {
                chunk_id,
                feedback_score: fb,
                enhanced_feedback_score: None,
                feedback_count: 1,
            }])
            .unwrap();
    }

    #[test]
    fn test_unscored_chunks_rank_by_similarity() {
        let (store, _dir) = test_store();
        let hi = add(&store, "close", 0.95);
        let lo = add(&store, "far", 0.5);

        let ranker = RetrievalRanker::new(store, 0.3, 3);
        let results = ranker.search(&query(), 2).unwrap();
        assert_eq!(results[0].chunk_id, hi);
        assert_eq!(results[1].chunk_id, lo);
        assert_eq!(results[0].base_score, 1.0);
        assert_eq!(results[0].feedback_score, 0.0);
    }

    #[test]
    fn test_feedback_reorders_close_candidates() {
        let (store, _dir) = test_store();
        let slightly_closer = add(&store, "a", 0.90);
        let well_rated = add(&store, "b", 0.85);
        set_feedback(&store, slightly_closer, -1.0);
        set_feedback(&store, well_rated, 1.0);

        let ranker = RetrievalRanker::new(store, 0.3, 3);
        let results = ranker.search(&query(), 2).unwrap();
        // 0.90 * 0.7 = 0.63 < 0.85 * 1.3 = 1.105
        assert_eq!(results[0].chunk_id, well_rated);
        assert_eq!(results[1].chunk_id, slightly_closer);
    }

    #[test]
    fn test_feedback_cannot_bury_dominant_similarity() {
        let (store, _dir) = test_store();
        let perfect = add(&store, "perfect match", 1.0);
        let weak = add(&store, "weak match", 0.4);
        set_feedback(&store, perfect, -1.0);
        set_feedback(&store, weak, 1.0);

        let ranker = RetrievalRanker::new(store, 0.3, 3);
        let results = ranker.search(&query(), 2).unwrap();
        // 1.0 * 0.7 = 0.7 > 0.4 * 1.3 = 0.52
        assert_eq!(results[0].chunk_id, perfect);
    }

    #[test]
    fn test_overfetch_promotes_beyond_k() {
        let (store, _dir) = test_store();
        let a = add(&store, "a", 0.95);
        let b = add(&store, "b", 0.90);
        let promoted = add(&store, "c", 0.80);
        set_feedback(&store, a, 0.0);
        set_feedback(&store, b, -1.0);
        set_feedback(&store, promoted, 1.0);

        // With k=2 and overfetch 3, the third candidate is in the pool and
        // its rating lifts it past b: 0.80 * 1.3 = 1.04 > 0.90 * 0.7 = 0.63.
        let ranker = RetrievalRanker::new(Arc::clone(&store), 0.3, 3);
        let results = ranker.search(&query(), 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_id, promoted);
        assert_eq!(results[1].chunk_id, a);

        // With no over-fetch the pool is just the top-2 by similarity.
        let tight = RetrievalRanker::new(store, 0.3, 1);
        let results = tight.search(&query(), 2).unwrap();
        assert!(!results.iter().any(|r| r.chunk_id == promoted));
    }

    #[test]
    fn test_never_returns_more_than_k() {
        let (store, _dir) = test_store();
        for i in 0..5 {
            add(&store, &format!("chunk {}", i), 0.9 - 0.1 * i as f32);
        }
        let ranker = RetrievalRanker::new(store, 0.3, 3);
        assert_eq!(ranker.search(&query(), 3).unwrap().len(), 3);
        assert!(ranker.search(&query(), 0).unwrap().is_empty());
    }

    #[test]
    fn test_huge_k_does_not_overflow() {
        let (store, _dir) = test_store();
        add(&store, "only chunk", 0.9);
        let ranker = RetrievalRanker::new(store, 0.3, 3);
        let results = ranker.search(&query(), usize::MAX).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_empty_index() {
        let (store, _dir) = test_store();
        let ranker = RetrievalRanker::new(store, 0.3, 3);
        assert!(ranker.search(&query(), 5).unwrap().is_empty());
    }

    #[test]
    fn test_enhanced_score_preferred_when_present() {
        let (store, _dir) = test_store();
        let cid = add(&store, "x", 0.9);
        store
            .upsert_feedback_scores(&[ChunkScoreUpdate {
                chunk_id: cid,
                feedback_score: 1.0,
                enhanced_feedback_score: Some(-0.5),
                feedback_count: 1,
            }])
            .unwrap();

        let ranker = RetrievalRanker::new(store, 0.3, 3);
        let results = ranker.search(&query(), 1).unwrap();
        assert_eq!(results[0].feedback_score, -0.5);
    }
}
