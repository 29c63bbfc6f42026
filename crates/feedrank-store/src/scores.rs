//! Score persistence: chunk scores, source-level aggregation, review flags.

use std::collections::HashMap;

use rusqlite::{params, OptionalExtension};
use tracing::{debug, info};

use crate::sqlite::{db_err, now_ms, SqliteStore};
use crate::types::*;
use feedrank_core::{Error, Result};

impl SqliteStore {
    // ---------------------------------------------------------------
    // Chunk scores
    // ---------------------------------------------------------------

    /// Fetch the persisted score row for one chunk.
    pub fn get_chunk_score(&self, chunk_id: i64) -> Result<Option<ChunkScore>> {
        let conn = self.lock_conn();
        let mut stmt = conn
            .prepare_cached(
                "SELECT chunk_id, base_score, feedback_score, enhanced_feedback_score, \
                        feedback_count, last_updated \
                 FROM chunk_scores WHERE chunk_id = ?1",
            )
            .map_err(db_err)?;
        stmt.query_row(params![chunk_id], Self::row_to_chunk_score)
            .optional()
            .map_err(db_err)
    }

    /// Scores for a set of chunks. Missing rows are simply absent; callers
    /// substitute `ChunkScore::neutral` so unscored chunks rank by
    /// similarity alone.
    pub fn chunk_scores_for(&self, chunk_ids: &[i64]) -> Result<HashMap<i64, ChunkScore>> {
        let mut out = HashMap::with_capacity(chunk_ids.len());
        if chunk_ids.is_empty() {
            return Ok(out);
        }
        let conn = self.lock_conn();
        let mut stmt = conn
            .prepare_cached(
                "SELECT chunk_id, base_score, feedback_score, enhanced_feedback_score, \
                        feedback_count, last_updated \
                 FROM chunk_scores WHERE chunk_id = ?1",
            )
            .map_err(db_err)?;
        for &cid in chunk_ids {
            if let Some(score) = stmt
                .query_row(params![cid], Self::row_to_chunk_score)
                .optional()
                .map_err(db_err)?
            {
                out.insert(cid, score);
            }
        }
        Ok(out)
    }

    /// Manually adjust a chunk's base score. The chunk must exist.
    pub fn set_base_score(&self, chunk_id: i64, base_score: f64) -> Result<()> {
        if !(base_score.is_finite() && base_score > 0.0) {
            return Err(Error::Validation(format!(
                "base_score must be a positive number, got {}",
                base_score
            )));
        }
        let conn = self.lock_conn();
        let updated = conn
            .prepare_cached(
                "INSERT INTO chunk_scores (chunk_id, base_score, feedback_score, last_updated) \
                 SELECT id, ?2, 0.0, ?3 FROM chunks WHERE id = ?1 \
                 ON CONFLICT(chunk_id) DO UPDATE SET base_score = ?2, last_updated = ?3",
            )
            .map_err(db_err)?
            .execute(params![chunk_id, base_score, now_ms()])
            .map_err(db_err)?;
        if updated == 0 {
            return Err(Error::NotFound(format!("chunk {}", chunk_id)));
        }
        Ok(())
    }

    /// Write a batch of recomputed feedback scores in one transaction, so a
    /// rescore either lands completely or not at all. Base scores are
    /// preserved for existing rows.
    pub fn upsert_feedback_scores(&self, updates: &[ChunkScoreUpdate]) -> Result<usize> {
        if updates.is_empty() {
            return Ok(0);
        }
        let now = now_ms();
        let mut conn = self.lock_conn();
        let tx = conn.transaction().map_err(db_err)?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO chunk_scores \
                     (chunk_id, base_score, feedback_score, enhanced_feedback_score, \
                      feedback_count, last_updated) \
                     VALUES (?1, 1.0, ?2, ?3, ?4, ?5) \
                     ON CONFLICT(chunk_id) DO UPDATE SET \
                       feedback_score = ?2, enhanced_feedback_score = ?3, \
                       feedback_count = ?4, last_updated = ?5",
                )
                .map_err(db_err)?;
            for u in updates {
                stmt.execute(params![
                    u.chunk_id,
                    u.feedback_score,
                    u.enhanced_feedback_score,
                    u.feedback_count,
                    now
                ])
                .map_err(db_err)?;
            }
        }
        tx.commit().map_err(db_err)?;
        debug!("Upserted {} chunk scores", updates.len());
        Ok(updates.len())
    }

    fn row_to_chunk_score(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChunkScore> {
        Ok(ChunkScore {
            chunk_id: row.get(0)?,
            base_score: row.get(1)?,
            feedback_score: row.get(2)?,
            enhanced_feedback_score: row.get(3)?,
            feedback_count: row.get(4)?,
            last_updated: row.get(5)?,
        })
    }

    // ---------------------------------------------------------------
    // Source-level aggregation
    // ---------------------------------------------------------------

    /// Roll chunk scores up to their source URLs: average the feedback
    /// signals over feedback-bearing chunks, grouped by
    /// `metadata.source_url`. Upserts, so reruns are idempotent and never
    /// destroy existing rows for sources with no new data. Returns the
    /// number of sources written.
    pub fn aggregate_to_source(&self) -> Result<usize> {
        let conn = self.lock_conn();
        let written = conn
            .execute(
                "INSERT INTO source_scores \
                 (source_url, source_type, feedback_score, enhanced_feedback_score, \
                  feedback_count, last_updated) \
                 SELECT json_extract(c.metadata_json, '$.source_url'), \
                        MAX(json_extract(c.metadata_json, '$.source_type')), \
                        AVG(s.feedback_score), \
                        AVG(COALESCE(s.enhanced_feedback_score, s.feedback_score)), \
                        COUNT(*), \
                        ?1 \
                 FROM chunk_scores s \
                 JOIN chunks c ON c.id = s.chunk_id \
                 WHERE json_extract(c.metadata_json, '$.source_url') IS NOT NULL \
                   AND s.feedback_count > 0 \
                 GROUP BY json_extract(c.metadata_json, '$.source_url') \
                 ON CONFLICT(source_url) DO UPDATE SET \
                   source_type = excluded.source_type, \
                   feedback_score = excluded.feedback_score, \
                   enhanced_feedback_score = excluded.enhanced_feedback_score, \
                   feedback_count = excluded.feedback_count, \
                   last_updated = excluded.last_updated",
                params![now_ms()],
            )
            .map_err(db_err)?;
        info!("Aggregated chunk scores into {} source rows", written);
        Ok(written)
    }

    /// Fetch the aggregate score for one source URL.
    pub fn get_source_score(&self, source_url: &str) -> Result<Option<SourceScore>> {
        let conn = self.lock_conn();
        let mut stmt = conn
            .prepare_cached(
                "SELECT source_url, source_type, feedback_score, enhanced_feedback_score, \
                        feedback_count, last_updated \
                 FROM source_scores WHERE source_url = ?1",
            )
            .map_err(db_err)?;
        stmt.query_row(params![source_url], Self::row_to_source_score)
            .optional()
            .map_err(db_err)
    }

    /// List source scores, best enhanced score first.
    pub fn list_source_scores(&self, limit: usize) -> Result<Vec<SourceScore>> {
        let conn = self.lock_conn();
        let mut stmt = conn
            .prepare_cached(
                "SELECT source_url, source_type, feedback_score, enhanced_feedback_score, \
                        feedback_count, last_updated \
                 FROM source_scores ORDER BY enhanced_feedback_score DESC LIMIT ?1",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![limit as i64], Self::row_to_source_score)
            .map_err(db_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn row_to_source_score(row: &rusqlite::Row<'_>) -> rusqlite::Result<SourceScore> {
        Ok(SourceScore {
            source_url: row.get(0)?,
            source_type: row.get(1)?,
            feedback_score: row.get(2)?,
            enhanced_feedback_score: row.get(3)?,
            feedback_count: row.get(4)?,
            last_updated: row.get(5)?,
        })
    }

    // ---------------------------------------------------------------
    // Review flags
    // ---------------------------------------------------------------

    /// Create or refresh the review flag for a chunk. A re-flag overwrites
    /// the evidence and returns the flag to pending, since the new pattern
    /// supersedes whatever a reviewer previously decided.
    pub fn upsert_review_flag(
        &self,
        chunk_id: i64,
        reason: &str,
        common_issues: &[(feedrank_core::IssueType, usize)],
        severity_distribution: &[(feedrank_core::Severity, usize)],
        total_feedbacks: i64,
    ) -> Result<()> {
        let issues_json = serde_json::to_string(common_issues)?;
        let severity_json = serde_json::to_string(severity_distribution)?;
        let conn = self.lock_conn();
        conn.prepare_cached(
            "INSERT INTO review_flags \
             (chunk_id, reason, common_issues_json, severity_distribution_json, \
              total_feedbacks, status, flagged_at, reviewed_at, reviewer_notes) \
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, NULL, NULL) \
             ON CONFLICT(chunk_id) DO UPDATE SET \
               reason = ?2, common_issues_json = ?3, severity_distribution_json = ?4, \
               total_feedbacks = ?5, status = 'pending', flagged_at = ?6, \
               reviewed_at = NULL, reviewer_notes = NULL",
        )
        .map_err(db_err)?
        .execute(params![
            chunk_id,
            reason,
            issues_json,
            severity_json,
            total_feedbacks,
            now_ms()
        ])
        .map_err(db_err)?;
        Ok(())
    }

    /// List flags in a given status, newest first.
    pub fn flags_by_status(&self, status: FlagStatus) -> Result<Vec<ReviewFlag>> {
        let conn = self.lock_conn();
        let mut stmt = conn
            .prepare_cached(
                "SELECT id, chunk_id, reason, common_issues_json, severity_distribution_json, \
                        total_feedbacks, status, flagged_at, reviewed_at, reviewer_notes \
                 FROM review_flags WHERE status = ?1 ORDER BY flagged_at DESC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![status.label()], Self::row_to_review_flag)
            .map_err(db_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Move a flag to resolved or dismissed, recording the reviewer's notes.
    pub fn update_flag_status(
        &self,
        flag_id: i64,
        status: FlagStatus,
        reviewer_notes: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock_conn();
        let updated = conn
            .prepare_cached(
                "UPDATE review_flags SET status = ?1, reviewed_at = ?2, reviewer_notes = ?3 \
                 WHERE id = ?4",
            )
            .map_err(db_err)?
            .execute(params![status.label(), now_ms(), reviewer_notes, flag_id])
            .map_err(db_err)?;
        if updated == 0 {
            return Err(Error::NotFound(format!("review flag {}", flag_id)));
        }
        Ok(())
    }

    fn row_to_review_flag(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReviewFlag> {
        let issues_json: String = row.get(3)?;
        let severity_json: String = row.get(4)?;
        let status: String = row.get(6)?;
        Ok(ReviewFlag {
            id: row.get(0)?,
            chunk_id: row.get(1)?,
            reason: row.get(2)?,
            common_issues: serde_json::from_str(&issues_json).unwrap_or_default(),
            severity_distribution: serde_json::from_str(&severity_json).unwrap_or_default(),
            total_feedbacks: row.get(5)?,
            status: FlagStatus::parse(&status).unwrap_or(FlagStatus::Pending),
            flagged_at: row.get(7)?,
            reviewed_at: row.get(8)?,
            reviewer_notes: row.get(9)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedrank_core::{IssueType, Severity};
    use tempfile::TempDir;

    fn test_store() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path(), 8).unwrap();
        (store, dir)
    }

    fn chunk_with_source(store: &SqliteStore, url: &str) -> i64 {
        store
            .add_chunk(
                "content",
                None,
                AddChunkOptions {
                    metadata: Some(serde_json::json!({
                        "source_url": url,
                        "source_type": "web",
                    })),
                    ..Default::default()
                },
            )
            .unwrap()
    }

    #[test]
    fn test_upsert_preserves_base_score() {
        let (store, _dir) = test_store();
        let cid = store.add_chunk("x", None, AddChunkOptions::default()).unwrap();
        store.set_base_score(cid, 1.5).unwrap();

        store
            .upsert_feedback_scores(&[ChunkScoreUpdate {
                chunk_id: cid,
                feedback_score: 0.4,
                enhanced_feedback_score: Some(0.3),
                feedback_count: 1,
            }])
            .unwrap();

        let score = store.get_chunk_score(cid).unwrap().unwrap();
        assert_eq!(score.base_score, 1.5);
        assert_eq!(score.feedback_score, 0.4);
        assert_eq!(score.enhanced_feedback_score, Some(0.3));
    }

    #[test]
    fn test_set_base_score_unknown_chunk() {
        let (store, _dir) = test_store();
        assert!(matches!(
            store.set_base_score(42, 1.2),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_set_base_score_rejects_nonpositive() {
        let (store, _dir) = test_store();
        let cid = store.add_chunk("x", None, AddChunkOptions::default()).unwrap();
        assert!(matches!(
            store.set_base_score(cid, 0.0),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            store.set_base_score(cid, f64::NAN),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_ranking_feedback_prefers_enhanced() {
        let (store, _dir) = test_store();
        let cid = store.add_chunk("x", None, AddChunkOptions::default()).unwrap();
        store
            .upsert_feedback_scores(&[ChunkScoreUpdate {
                chunk_id: cid,
                feedback_score: 0.2,
                enhanced_feedback_score: Some(-0.1),
                feedback_count: 1,
            }])
            .unwrap();
        let score = store.get_chunk_score(cid).unwrap().unwrap();
        assert_eq!(score.ranking_feedback(), -0.1);
    }

    #[test]
    fn test_aggregate_to_source_averages_per_url() {
        let (store, _dir) = test_store();
        let a = chunk_with_source(&store, "https://example.gov/a");
        let b = chunk_with_source(&store, "https://example.gov/a");
        let c = chunk_with_source(&store, "https://example.gov/b");
        // A chunk without feedback does not drag the average down.
        let _quiet = chunk_with_source(&store, "https://example.gov/a");

        store
            .upsert_feedback_scores(&[
                ChunkScoreUpdate {
                    chunk_id: a,
                    feedback_score: 1.0,
                    enhanced_feedback_score: Some(0.8),
                    feedback_count: 2,
                },
                ChunkScoreUpdate {
                    chunk_id: b,
                    feedback_score: 0.5,
                    enhanced_feedback_score: None,
                    feedback_count: 1,
                },
                ChunkScoreUpdate {
                    chunk_id: c,
                    feedback_score: -0.5,
                    enhanced_feedback_score: Some(-0.5),
                    feedback_count: 1,
                },
            ])
            .unwrap();

        let written = store.aggregate_to_source().unwrap();
        assert_eq!(written, 2);

        let sa = store.get_source_score("https://example.gov/a").unwrap().unwrap();
        assert!((sa.feedback_score - 0.75).abs() < 1e-9);
        // Enhanced average falls back to plain where enhanced is NULL.
        assert!((sa.enhanced_feedback_score - 0.65).abs() < 1e-9);
        assert_eq!(sa.feedback_count, 2);
        assert_eq!(sa.source_type.as_deref(), Some("web"));

        let sb = store.get_source_score("https://example.gov/b").unwrap().unwrap();
        assert_eq!(sb.feedback_count, 1);
    }

    #[test]
    fn test_aggregate_keeps_zero_score_feedback_chunks() {
        let (store, _dir) = test_store();
        let mixed = chunk_with_source(&store, "https://example.gov/mixed");
        let _quiet = chunk_with_source(&store, "https://example.gov/quiet");

        store
            .upsert_feedback_scores(&[ChunkScoreUpdate {
                chunk_id: mixed,
                feedback_score: 0.0,
                enhanced_feedback_score: None,
                feedback_count: 2,
            }])
            .unwrap();

        assert_eq!(store.aggregate_to_source().unwrap(), 1);
        let src = store.get_source_score("https://example.gov/mixed").unwrap().unwrap();
        assert_eq!(src.feedback_score, 0.0);
        assert_eq!(src.feedback_count, 1);
        // A chunk with no feedback at all still stays out of the roll-up.
        assert!(store.get_source_score("https://example.gov/quiet").unwrap().is_none());
    }

    #[test]
    fn test_aggregate_rerun_is_idempotent() {
        let (store, _dir) = test_store();
        let a = chunk_with_source(&store, "https://example.gov/a");
        store
            .upsert_feedback_scores(&[ChunkScoreUpdate {
                chunk_id: a,
                feedback_score: 0.6,
                enhanced_feedback_score: None,
                feedback_count: 1,
            }])
            .unwrap();

        store.aggregate_to_source().unwrap();
        store.aggregate_to_source().unwrap();

        let scores = store.list_source_scores(10).unwrap();
        assert_eq!(scores.len(), 1);
        assert!((scores[0].feedback_score - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_reflag_resets_status_to_pending() {
        let (store, _dir) = test_store();
        let cid = store.add_chunk("x", None, AddChunkOptions::default()).unwrap();

        store
            .upsert_review_flag(
                cid,
                "Severe issues reported",
                &[(IssueType::Incorrect, 2)],
                &[(Severity::Severe, 1), (Severity::Minor, 1)],
                2,
            )
            .unwrap();
        let flag = &store.flags_by_status(FlagStatus::Pending).unwrap()[0];
        store
            .update_flag_status(flag.id, FlagStatus::Resolved, Some("fixed upstream"))
            .unwrap();
        assert!(store.flags_by_status(FlagStatus::Pending).unwrap().is_empty());

        store
            .upsert_review_flag(
                cid,
                "3 users flagged for review",
                &[(IssueType::Outdated, 3)],
                &[(Severity::Moderate, 3)],
                3,
            )
            .unwrap();
        let pending = store.flags_by_status(FlagStatus::Pending).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].reason, "3 users flagged for review");
        assert_eq!(pending[0].total_feedbacks, 3);
        assert!(pending[0].reviewed_at.is_none());
        assert!(pending[0].reviewer_notes.is_none());
    }
}
