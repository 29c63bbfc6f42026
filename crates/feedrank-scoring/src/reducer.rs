//! Feedback reduction: recompute persisted chunk scores from the full
//! feedback history, then roll them up to source level.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::info;

use crate::score::{enhanced_score, rating_to_score};
use feedrank_core::Result;
use feedrank_store::{ChunkScoreUpdate, FeedbackWithChunks, SqliteStore};

/// Which signals the recomputation uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringMode {
    /// Ratings only.
    Plain,
    /// Ratings blended with AI comment analysis where available.
    Enhanced,
}

/// What a rescore run touched.
#[derive(Debug, Clone, Serialize)]
pub struct RescoreOutcome {
    pub mode: ScoringMode,
    pub chunks_updated: usize,
    pub sources_updated: usize,
    pub feedback_considered: usize,
}

/// Recomputes quality scores from scratch on every run. Stateless between
/// runs, so the stored values are always a pure function of the feedback
/// log — idempotent by construction.
pub struct FeedbackReducer<'a> {
    store: &'a SqliteStore,
}

impl<'a> FeedbackReducer<'a> {
    pub fn new(store: &'a SqliteStore) -> Self {
        Self { store }
    }

    /// Full recomputation: pool feedback per chunk, average the scores,
    /// write every chunk row in one transaction, then refresh the
    /// source-level aggregates.
    pub fn recompute(&self, mode: ScoringMode) -> Result<RescoreOutcome> {
        let feedback = self.store.feedback_with_chunks()?;
        let updates = Self::reduce(&feedback, mode)?;

        let chunks_updated = self.store.upsert_feedback_scores(&updates)?;
        let sources_updated = self.store.aggregate_to_source()?;

        info!(
            "Rescore ({:?}): {} feedback items -> {} chunks, {} sources",
            mode,
            feedback.len(),
            chunks_updated,
            sources_updated
        );
        Ok(RescoreOutcome {
            mode,
            chunks_updated,
            sources_updated,
            feedback_considered: feedback.len(),
        })
    }

    /// Pure reduction step: group feedback by the chunks its response used
    /// and average per chunk. A chunk referenced by several responses pools
    /// all their feedback.
    fn reduce(feedback: &[FeedbackWithChunks], mode: ScoringMode) -> Result<Vec<ChunkScoreUpdate>> {
        // (plain sum, enhanced sum, count) per chunk; BTreeMap keeps the
        // update order deterministic.
        let mut groups: BTreeMap<i64, (f64, f64, usize)> = BTreeMap::new();

        for item in feedback {
            let plain = rating_to_score(item.feedback.rating)?;
            let enhanced = match mode {
                ScoringMode::Plain => plain,
                ScoringMode::Enhanced => {
                    enhanced_score(item.feedback.rating, item.feedback.analysis.as_ref())?
                }
            };
            for &chunk_id in &item.chunk_ids {
                let entry = groups.entry(chunk_id).or_insert((0.0, 0.0, 0));
                entry.0 += plain;
                entry.1 += enhanced;
                entry.2 += 1;
            }
        }

        Ok(groups
            .into_iter()
            .map(|(chunk_id, (plain_sum, enhanced_sum, count))| {
                let n = count as f64;
                ChunkScoreUpdate {
                    chunk_id,
                    feedback_score: (plain_sum / n).clamp(-1.0, 1.0),
                    enhanced_feedback_score: match mode {
                        ScoringMode::Plain => None,
                        ScoringMode::Enhanced => Some((enhanced_sum / n).clamp(-1.0, 1.0)),
                    },
                    feedback_count: count as i64,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedrank_core::{CommentAnalysis, IssueType, Severity};
    use feedrank_store::AddChunkOptions;
    use tempfile::TempDir;

    fn test_store() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path(), 8).unwrap();
        (store, dir)
    }

    fn chunk(store: &SqliteStore, url: Option<&str>) -> i64 {
        let metadata = url.map(|u| serde_json::json!({"source_url": u}));
        store
            .add_chunk(
                "text",
                None,
                AddChunkOptions {
                    metadata,
                    ..Default::default()
                },
            )
            .unwrap()
    }

    fn rate(store: &SqliteStore, chunk_ids: &[i64], rating: i64) -> i64 {
        let qid = store.add_query("q", None, false, 0, None).unwrap();
        let rid = store.add_response(qid, "a", chunk_ids, None).unwrap();
        store.add_feedback(rid, rating, None).unwrap()
    }

    #[test]
    fn test_plain_single_ratings() {
        let (store, _dir) = test_store();
        let c = chunk(&store, None);
        rate(&store, &[c], 5);

        let outcome = FeedbackReducer::new(&store).recompute(ScoringMode::Plain).unwrap();
        assert_eq!(outcome.chunks_updated, 1);
        let score = store.get_chunk_score(c).unwrap().unwrap();
        assert_eq!(score.feedback_score, 1.0);
        assert!(score.enhanced_feedback_score.is_none());
    }

    #[test]
    fn test_plain_average_over_ratings() {
        let (store, _dir) = test_store();
        let c = chunk(&store, None);
        rate(&store, &[c], 5);
        rate(&store, &[c], 3);
        rate(&store, &[c], 1);

        FeedbackReducer::new(&store).recompute(ScoringMode::Plain).unwrap();
        let score = store.get_chunk_score(c).unwrap().unwrap();
        assert_eq!(score.feedback_score, 0.0);
    }

    #[test]
    fn test_pooling_across_responses() {
        let (store, _dir) = test_store();
        let shared = chunk(&store, None);
        let other = chunk(&store, None);
        rate(&store, &[shared, other], 5);
        rate(&store, &[shared], 1);

        FeedbackReducer::new(&store).recompute(ScoringMode::Plain).unwrap();
        let shared_score = store.get_chunk_score(shared).unwrap().unwrap();
        let other_score = store.get_chunk_score(other).unwrap().unwrap();
        assert_eq!(shared_score.feedback_score, 0.0);
        assert_eq!(other_score.feedback_score, 1.0);
    }

    #[test]
    fn test_enhanced_uses_analysis_where_present() {
        let (store, _dir) = test_store();
        let c = chunk(&store, None);
        let qid = store.add_query("q", None, false, 0, None).unwrap();
        let rid = store.add_response(qid, "a", &[c], None).unwrap();
        let fid = store.add_feedback(rid, 5, Some("wrong numbers")).unwrap();
        store
            .update_feedback_analysis(
                fid,
                &CommentAnalysis {
                    sentiment_score: -0.8,
                    issue_types: vec![IssueType::Incorrect],
                    severity: Severity::Moderate,
                    needs_review: false,
                    confidence: 1.0,
                    summary: "wrong".into(),
                },
            )
            .unwrap();

        FeedbackReducer::new(&store).recompute(ScoringMode::Enhanced).unwrap();
        let score = store.get_chunk_score(c).unwrap().unwrap();
        assert_eq!(score.feedback_score, 1.0);
        // 0.7 * 1.0 + 0.3 * (-0.8) - 0.3 - 0.4 = -0.24
        let enhanced = score.enhanced_feedback_score.unwrap();
        assert!((enhanced - (-0.24)).abs() < 1e-9);
    }

    #[test]
    fn test_enhanced_falls_back_without_analysis() {
        let (store, _dir) = test_store();
        let c = chunk(&store, None);
        rate(&store, &[c], 4);

        FeedbackReducer::new(&store).recompute(ScoringMode::Enhanced).unwrap();
        let score = store.get_chunk_score(c).unwrap().unwrap();
        assert_eq!(score.feedback_score, 0.5);
        assert_eq!(score.enhanced_feedback_score, Some(0.5));
    }

    #[test]
    fn test_zero_average_chunk_still_rolls_up() {
        let (store, _dir) = test_store();
        let c = chunk(&store, Some("https://example.gov/mixed"));
        // Ratings 5 and 1 average to exactly 0.0; the chunk still has
        // feedback and must appear in the source aggregate.
        rate(&store, &[c], 5);
        rate(&store, &[c], 1);

        FeedbackReducer::new(&store).recompute(ScoringMode::Plain).unwrap();

        let score = store.get_chunk_score(c).unwrap().unwrap();
        assert_eq!(score.feedback_score, 0.0);
        assert_eq!(score.feedback_count, 2);

        let src = store
            .get_source_score("https://example.gov/mixed")
            .unwrap()
            .unwrap();
        assert_eq!(src.feedback_score, 0.0);
        assert_eq!(src.feedback_count, 1);
    }

    #[test]
    fn test_recompute_idempotent() {
        let (store, _dir) = test_store();
        let c = chunk(&store, Some("https://example.gov/page"));
        rate(&store, &[c], 2);

        let reducer = FeedbackReducer::new(&store);
        reducer.recompute(ScoringMode::Enhanced).unwrap();
        let first = store.get_chunk_score(c).unwrap().unwrap();
        let first_src = store.get_source_score("https://example.gov/page").unwrap().unwrap();

        reducer.recompute(ScoringMode::Enhanced).unwrap();
        let second = store.get_chunk_score(c).unwrap().unwrap();
        let second_src = store.get_source_score("https://example.gov/page").unwrap().unwrap();

        assert_eq!(first.feedback_score, second.feedback_score);
        assert_eq!(first.enhanced_feedback_score, second.enhanced_feedback_score);
        assert_eq!(first_src.feedback_score, second_src.feedback_score);
        assert_eq!(first_src.feedback_count, second_src.feedback_count);
    }

    #[test]
    fn test_empty_feedback_is_noop() {
        let (store, _dir) = test_store();
        chunk(&store, None);
        let outcome = FeedbackReducer::new(&store).recompute(ScoringMode::Plain).unwrap();
        assert_eq!(outcome.chunks_updated, 0);
        assert_eq!(outcome.sources_updated, 0);
    }
}
