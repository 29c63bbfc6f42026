//! Interaction log: queries, responses, feedback, analytics, and the
//! user-data purge.

use rusqlite::{params, OptionalExtension};
use tracing::info;

use crate::sqlite::{db_err, now_ms, SqliteStore};
use crate::types::*;
use feedrank_core::{CommentAnalysis, Error, Result};

impl SqliteStore {
    // ---------------------------------------------------------------
    // Queries and responses
    // ---------------------------------------------------------------

    /// Store an already-redacted query. Returns the query ID.
    pub fn add_query(
        &self,
        query_text: &str,
        category: Option<&str>,
        has_pii: bool,
        redaction_count: i64,
        redaction_details: Option<&serde_json::Value>,
    ) -> Result<i64> {
        let details_json = match redaction_details {
            Some(d) => Some(serde_json::to_string(d)?),
            None => None,
        };
        let conn = self.lock_conn();
        let id = conn
            .prepare_cached(
                "INSERT INTO queries \
                 (query_text, category, has_pii, redaction_count, redaction_details_json, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .map_err(db_err)?
            .insert(params![
                query_text,
                category,
                has_pii as i64,
                redaction_count,
                details_json,
                now_ms()
            ])
            .map_err(db_err)?;
        Ok(id)
    }

    /// Store a generated response with the chunk IDs that produced it.
    pub fn add_response(
        &self,
        query_id: i64,
        response_text: &str,
        retrieved_chunk_ids: &[i64],
        model_version: Option<&str>,
    ) -> Result<i64> {
        let ids_json = serde_json::to_string(retrieved_chunk_ids)?;
        let conn = self.lock_conn();
        let id = conn
            .prepare_cached(
                "INSERT INTO responses \
                 (query_id, response_text, retrieved_chunk_ids, model_version, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .map_err(db_err)?
            .insert(params![query_id, response_text, ids_json, model_version, now_ms()])
            .map_err(db_err)?;
        Ok(id)
    }

    /// Fetch a response joined with its query text.
    pub fn get_response(&self, response_id: i64) -> Result<Option<ResponseRecord>> {
        let conn = self.lock_conn();
        let mut stmt = conn
            .prepare_cached(
                "SELECT r.id, r.query_id, q.query_text, r.response_text, \
                        r.retrieved_chunk_ids, r.model_version, r.created_at \
                 FROM responses r JOIN queries q ON q.id = r.query_id \
                 WHERE r.id = ?1",
            )
            .map_err(db_err)?;
        stmt.query_row(params![response_id], |row| {
            let ids_json: String = row.get(4)?;
            Ok(ResponseRecord {
                id: row.get(0)?,
                query_id: row.get(1)?,
                query_text: row.get(2)?,
                response_text: row.get(3)?,
                retrieved_chunk_ids: serde_json::from_str(&ids_json).unwrap_or_default(),
                model_version: row.get(5)?,
                created_at: row.get(6)?,
            })
        })
        .optional()
        .map_err(db_err)
    }

    /// List recent responses with feedback aggregates, newest first.
    pub fn list_responses(&self, limit: usize) -> Result<Vec<ResponseSummary>> {
        let conn = self.lock_conn();
        let mut stmt = conn
            .prepare_cached(
                "SELECT r.id, r.query_id, q.query_text, r.response_text, r.model_version, \
                        r.created_at, \
                        COALESCE(AVG(f.rating), 0.0), \
                        COUNT(f.id), \
                        COUNT(f.comment) \
                 FROM responses r \
                 JOIN queries q ON q.id = r.query_id \
                 LEFT JOIN feedback f ON f.response_id = r.id \
                 GROUP BY r.id \
                 ORDER BY r.created_at DESC \
                 LIMIT ?1",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(ResponseSummary {
                    id: row.get(0)?,
                    query_id: row.get(1)?,
                    query_text: row.get(2)?,
                    response_text: row.get(3)?,
                    model_version: row.get(4)?,
                    created_at: row.get(5)?,
                    avg_rating: row.get(6)?,
                    feedback_count: row.get(7)?,
                    comment_count: row.get(8)?,
                })
            })
            .map_err(db_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Delete a single response and its feedback. Returns false if absent.
    pub fn delete_response(&self, response_id: i64) -> Result<bool> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute("DELETE FROM feedback WHERE response_id = ?1", params![response_id])
            .map_err(db_err)?;
        let deleted = tx
            .execute("DELETE FROM responses WHERE id = ?1", params![response_id])
            .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(deleted > 0)
    }

    /// Delete responses at least `days` old together with their feedback.
    /// The cutoff is inclusive so `days = 0` clears everything up to now.
    /// Returns the number of responses removed.
    pub fn delete_old_responses(&self, days: i64) -> Result<usize> {
        let cutoff = now_ms() - days * 24 * 60 * 60 * 1000;
        let mut conn = self.lock_conn();
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            "DELETE FROM feedback WHERE response_id IN \
             (SELECT id FROM responses WHERE created_at <= ?1)",
            params![cutoff],
        )
        .map_err(db_err)?;
        let deleted = tx
            .execute("DELETE FROM responses WHERE created_at <= ?1", params![cutoff])
            .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        if deleted > 0 {
            info!("Deleted {} responses older than {} days", deleted, days);
        }
        Ok(deleted)
    }

    // ---------------------------------------------------------------
    // Feedback
    // ---------------------------------------------------------------

    /// Record a user rating for a response. Rating must be 1..=5.
    pub fn add_feedback(
        &self,
        response_id: i64,
        rating: i64,
        comment: Option<&str>,
    ) -> Result<i64> {
        if !(1..=5).contains(&rating) {
            return Err(Error::InvalidRating(rating));
        }
        let conn = self.lock_conn();
        let exists: bool = conn
            .prepare_cached("SELECT 1 FROM responses WHERE id = ?1")
            .map_err(db_err)?
            .query_row(params![response_id], |_| Ok(true))
            .optional()
            .map_err(db_err)?
            .unwrap_or(false);
        if !exists {
            return Err(Error::NotFound(format!("response {}", response_id)));
        }

        let comment = comment.map(str::trim).filter(|c| !c.is_empty());
        let id = conn
            .prepare_cached(
                "INSERT INTO feedback (response_id, rating, comment, created_at) \
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .map_err(db_err)?
            .insert(params![response_id, rating, comment, now_ms()])
            .map_err(db_err)?;
        Ok(id)
    }

    /// Back-fill the analysis columns for one feedback row.
    pub fn update_feedback_analysis(
        &self,
        feedback_id: i64,
        analysis: &CommentAnalysis,
    ) -> Result<()> {
        let issues_json = serde_json::to_string(&analysis.issue_types)?;
        let conn = self.lock_conn();
        let updated = conn
            .prepare_cached(
                "UPDATE feedback SET sentiment_score = ?1, issues_json = ?2, severity = ?3, \
                 needs_review = ?4, confidence = ?5, summary = ?6 WHERE id = ?7",
            )
            .map_err(db_err)?
            .execute(params![
                analysis.sentiment_score,
                issues_json,
                analysis.severity.label(),
                analysis.needs_review as i64,
                analysis.confidence,
                analysis.summary,
                feedback_id
            ])
            .map_err(db_err)?;
        if updated == 0 {
            return Err(Error::NotFound(format!("feedback {}", feedback_id)));
        }
        Ok(())
    }

    /// All feedback for one response, oldest first.
    pub fn feedback_for_response(&self, response_id: i64) -> Result<Vec<FeedbackRecord>> {
        let conn = self.lock_conn();
        let mut stmt = conn
            .prepare_cached(
                "SELECT id, response_id, rating, comment, sentiment_score, issues_json, \
                        severity, needs_review, confidence, summary, created_at \
                 FROM feedback WHERE response_id = ?1 ORDER BY created_at ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![response_id], Self::row_to_feedback)
            .map_err(db_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Every feedback row joined with the chunk IDs its response used.
    /// This is the reducer's input.
    pub fn feedback_with_chunks(&self) -> Result<Vec<FeedbackWithChunks>> {
        let conn = self.lock_conn();
        let mut stmt = conn
            .prepare_cached(
                "SELECT f.id, f.response_id, f.rating, f.comment, f.sentiment_score, \
                        f.issues_json, f.severity, f.needs_review, f.confidence, f.summary, \
                        f.created_at, r.retrieved_chunk_ids \
                 FROM feedback f JOIN responses r ON r.id = f.response_id \
                 ORDER BY f.id ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                let feedback = Self::row_to_feedback(row)?;
                let ids_json: String = row.get(11)?;
                Ok(FeedbackWithChunks {
                    feedback,
                    chunk_ids: serde_json::from_str(&ids_json).unwrap_or_default(),
                })
            })
            .map_err(db_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Analyzed feedback whose severity warrants a human look, newest first.
    pub fn feedback_needing_review(&self, limit: usize) -> Result<Vec<FeedbackRecord>> {
        let conn = self.lock_conn();
        let mut stmt = conn
            .prepare_cached(
                "SELECT id, response_id, rating, comment, sentiment_score, issues_json, \
                        severity, needs_review, confidence, summary, created_at \
                 FROM feedback \
                 WHERE severity IN ('severe', 'moderate') OR needs_review = 1 \
                 ORDER BY created_at DESC LIMIT ?1",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![limit as i64], Self::row_to_feedback)
            .map_err(db_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Feedback rows with a comment but no analysis yet (backfill queue).
    pub fn feedback_pending_analysis(&self, limit: usize) -> Result<Vec<FeedbackRecord>> {
        let conn = self.lock_conn();
        let mut stmt = conn
            .prepare_cached(
                "SELECT id, response_id, rating, comment, sentiment_score, issues_json, \
                        severity, needs_review, confidence, summary, created_at \
                 FROM feedback \
                 WHERE comment IS NOT NULL AND sentiment_score IS NULL \
                 ORDER BY id ASC LIMIT ?1",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![limit as i64], Self::row_to_feedback)
            .map_err(db_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn row_to_feedback(row: &rusqlite::Row<'_>) -> rusqlite::Result<FeedbackRecord> {
        let sentiment: Option<f64> = row.get(4)?;
        let analysis = match sentiment {
            Some(sentiment_score) => {
                let issues_json: Option<String> = row.get(5)?;
                let severity: Option<String> = row.get(6)?;
                Some(CommentAnalysis {
                    sentiment_score,
                    issue_types: issues_json
                        .and_then(|s| serde_json::from_str(&s).ok())
                        .unwrap_or_default(),
                    severity: severity
                        .and_then(|s| serde_json::from_str(&format!("\"{}\"", s)).ok())
                        .unwrap_or_default(),
                    needs_review: row.get::<_, Option<i64>>(7)?.unwrap_or(0) != 0,
                    confidence: row.get::<_, Option<f64>>(8)?.unwrap_or(0.0),
                    summary: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
                })
            }
            None => None,
        };
        Ok(FeedbackRecord {
            id: row.get(0)?,
            response_id: row.get(1)?,
            rating: row.get(2)?,
            comment: row.get(3)?,
            analysis,
            created_at: row.get(10)?,
        })
    }

    // ---------------------------------------------------------------
    // Purge
    // ---------------------------------------------------------------

    /// Remove all user-generated data in one transaction: the interaction
    /// log, review flags, and source scores go away; chunk scores reset to
    /// their neutral defaults. Chunks and embeddings are untouched.
    pub fn purge_user_data(&self) -> Result<PurgeReport> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction().map_err(db_err)?;

        let feedback = tx.execute("DELETE FROM feedback", []).map_err(db_err)?;
        let responses = tx.execute("DELETE FROM responses", []).map_err(db_err)?;
        let queries = tx.execute("DELETE FROM queries", []).map_err(db_err)?;
        let review_flags = tx.execute("DELETE FROM review_flags", []).map_err(db_err)?;
        let source_scores = tx.execute("DELETE FROM source_scores", []).map_err(db_err)?;
        let chunk_scores_reset = tx
            .execute(
                "UPDATE chunk_scores SET base_score = 1.0, feedback_score = 0.0, \
                 enhanced_feedback_score = NULL, feedback_count = 0, last_updated = ?1",
                params![now_ms()],
            )
            .map_err(db_err)?;

        tx.commit().map_err(db_err)?;

        let report = PurgeReport {
            feedback,
            responses,
            queries,
            review_flags,
            chunk_scores_reset,
            source_scores,
        };
        info!(
            "Purged user data: {} feedback, {} responses, {} queries, {} flags, {} scores reset",
            report.feedback,
            report.responses,
            report.queries,
            report.review_flags,
            report.chunk_scores_reset
        );
        Ok(report)
    }

    // ---------------------------------------------------------------
    // Analytics
    // ---------------------------------------------------------------

    /// System-wide usage and quality snapshot.
    pub fn analytics(&self, top_n: usize, feedback_weight: f64) -> Result<Analytics> {
        let total_chunks = self.count_chunks()?;
        let conn = self.lock_conn();

        let total_queries: i64 = conn
            .query_row("SELECT COUNT(*) FROM queries", [], |r| r.get(0))
            .map_err(db_err)?;
        let total_responses: i64 = conn
            .query_row("SELECT COUNT(*) FROM responses", [], |r| r.get(0))
            .map_err(db_err)?;
        let (total_feedback, average_rating): (i64, f64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(AVG(rating), 0.0) FROM feedback",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .map_err(db_err)?;

        let week_ago = now_ms() - 7 * 24 * 60 * 60 * 1000;
        let (recent_feedback_count, recent_avg_rating): (i64, f64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(AVG(rating), 0.0) FROM feedback WHERE created_at >= ?1",
                params![week_ago],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .map_err(db_err)?;

        let mut stmt = conn
            .prepare_cached(
                "SELECT chunk_id, base_score, feedback_score, \
                        COALESCE(enhanced_feedback_score, feedback_score) AS fb \
                 FROM chunk_scores \
                 ORDER BY base_score * (1.0 + ?1 * COALESCE(enhanced_feedback_score, feedback_score)) DESC \
                 LIMIT ?2",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![feedback_weight, top_n as i64], |row| {
                let base: f64 = row.get(1)?;
                let fb: f64 = row.get(3)?;
                Ok(TopChunk {
                    chunk_id: row.get(0)?,
                    base_score: base,
                    feedback_score: row.get(2)?,
                    final_score: base * (1.0 + feedback_weight * fb),
                })
            })
            .map_err(db_err)?;
        let top_chunks: Vec<TopChunk> = rows.filter_map(|r| r.ok()).collect();

        Ok(Analytics {
            total_chunks,
            total_queries,
            total_responses,
            total_feedback,
            average_rating,
            recent_avg_rating,
            recent_feedback_count,
            top_chunks,
        })
    }

    /// Query counts per category, most common first.
    pub fn category_statistics(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.lock_conn();
        let mut stmt = conn
            .prepare_cached(
                "SELECT COALESCE(category, 'Other'), COUNT(*) FROM queries \
                 GROUP BY category ORDER BY COUNT(*) DESC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(db_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
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

    fn seed_response(store: &SqliteStore, chunk_ids: &[i64]) -> i64 {
        let qid = store.add_query("what is the rate?", Some("Rates"), false, 0, None).unwrap();
        store
            .add_response(qid, "The rate is 4%.", chunk_ids, Some("claude-test"))
            .unwrap()
    }

    #[test]
    fn test_response_roundtrip() {
        let (store, _dir) = test_store();
        let rid = seed_response(&store, &[1, 2, 3]);

        let resp = store.get_response(rid).unwrap().unwrap();
        assert_eq!(resp.query_text, "what is the rate?");
        assert_eq!(resp.retrieved_chunk_ids, vec![1, 2, 3]);
        assert_eq!(resp.model_version.as_deref(), Some("claude-test"));
    }

    #[test]
    fn test_feedback_rating_bounds() {
        let (store, _dir) = test_store();
        let rid = seed_response(&store, &[]);

        assert!(matches!(
            store.add_feedback(rid, 0, None),
            Err(feedrank_core::Error::InvalidRating(0))
        ));
        assert!(matches!(
            store.add_feedback(rid, 6, None),
            Err(feedrank_core::Error::InvalidRating(6))
        ));
        assert!(store.add_feedback(rid, 5, None).is_ok());
    }

    #[test]
    fn test_feedback_unknown_response() {
        let (store, _dir) = test_store();
        assert!(matches!(
            store.add_feedback(999, 3, None),
            Err(feedrank_core::Error::NotFound(_))
        ));
    }

    #[test]
    fn test_empty_comment_stored_as_null() {
        let (store, _dir) = test_store();
        let rid = seed_response(&store, &[]);
        let fid = store.add_feedback(rid, 4, Some("   ")).unwrap();

        let feedback = store.feedback_for_response(rid).unwrap();
        assert_eq!(feedback[0].id, fid);
        assert!(feedback[0].comment.is_none());
    }

    #[test]
    fn test_analysis_backfill_roundtrip() {
        let (store, _dir) = test_store();
        let rid = seed_response(&store, &[]);
        let fid = store.add_feedback(rid, 2, Some("outdated numbers")).unwrap();

        let pending = store.feedback_pending_analysis(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, fid);

        let analysis = CommentAnalysis {
            sentiment_score: -0.6,
            issue_types: vec![IssueType::Outdated],
            severity: Severity::Moderate,
            needs_review: false,
            confidence: 0.9,
            summary: "Numbers out of date".into(),
        };
        store.update_feedback_analysis(fid, &analysis).unwrap();

        assert!(store.feedback_pending_analysis(10).unwrap().is_empty());
        let stored = store.feedback_for_response(rid).unwrap();
        let got = stored[0].analysis.as_ref().unwrap();
        assert_eq!(got.sentiment_score, -0.6);
        assert_eq!(got.issue_types, vec![IssueType::Outdated]);
        assert_eq!(got.severity, Severity::Moderate);
        assert_eq!(got.confidence, 0.9);
    }

    #[test]
    fn test_feedback_needing_review_filter() {
        let (store, _dir) = test_store();
        let rid = seed_response(&store, &[]);

        let analysis = |severity, needs_review| CommentAnalysis {
            sentiment_score: -0.5,
            issue_types: vec![IssueType::Incorrect],
            severity,
            needs_review,
            confidence: 0.9,
            summary: String::new(),
        };

        let severe = store.add_feedback(rid, 1, Some("wrong")).unwrap();
        store
            .update_feedback_analysis(severe, &analysis(Severity::Severe, false))
            .unwrap();
        let minor = store.add_feedback(rid, 4, Some("typo")).unwrap();
        store
            .update_feedback_analysis(minor, &analysis(Severity::Minor, false))
            .unwrap();
        let voted = store.add_feedback(rid, 3, Some("check this")).unwrap();
        store
            .update_feedback_analysis(voted, &analysis(Severity::None, true))
            .unwrap();

        let ids: Vec<i64> = store
            .feedback_needing_review(10)
            .unwrap()
            .iter()
            .map(|f| f.id)
            .collect();
        assert!(ids.contains(&severe));
        assert!(ids.contains(&voted));
        assert!(!ids.contains(&minor));
    }

    #[test]
    fn test_feedback_with_chunks_join() {
        let (store, _dir) = test_store();
        let rid = seed_response(&store, &[7, 9]);
        store.add_feedback(rid, 5, None).unwrap();

        let joined = store.feedback_with_chunks().unwrap();
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].chunk_ids, vec![7, 9]);
        assert_eq!(joined[0].feedback.rating, 5);
    }

    #[test]
    fn test_purge_resets_scores_keeps_chunks() {
        let (store, _dir) = test_store();
        let cid = store
            .add_chunk("content", None, AddChunkOptions::default())
            .unwrap();
        store
            .upsert_feedback_scores(&[ChunkScoreUpdate {
                chunk_id: cid,
                feedback_score: 0.8,
                enhanced_feedback_score: Some(0.7),
                feedback_count: 1,
            }])
            .unwrap();
        let rid = seed_response(&store, &[cid]);
        store.add_feedback(rid, 5, Some("great")).unwrap();

        let report = store.purge_user_data().unwrap();
        assert_eq!(report.feedback, 1);
        assert_eq!(report.responses, 1);
        assert_eq!(report.queries, 1);
        assert_eq!(report.chunk_scores_reset, 1);

        assert!(store.get_chunk(cid).unwrap().is_some());
        let score = store.get_chunk_score(cid).unwrap().unwrap();
        assert_eq!(score.feedback_score, 0.0);
        assert!(score.enhanced_feedback_score.is_none());
    }

    #[test]
    fn test_analytics_counts() {
        let (store, _dir) = test_store();
        let rid = seed_response(&store, &[]);
        store.add_feedback(rid, 5, None).unwrap();
        store.add_feedback(rid, 3, None).unwrap();

        let analytics = store.analytics(5, 0.3).unwrap();
        assert_eq!(analytics.total_queries, 1);
        assert_eq!(analytics.total_responses, 1);
        assert_eq!(analytics.total_feedback, 2);
        assert!((analytics.average_rating - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_delete_old_responses() {
        let (store, _dir) = test_store();
        let rid = seed_response(&store, &[]);
        store.add_feedback(rid, 4, None).unwrap();

        // Fresh data survives a 30-day cutoff.
        assert_eq!(store.delete_old_responses(30).unwrap(), 0);
        assert!(store.get_response(rid).unwrap().is_some());

        assert_eq!(store.delete_old_responses(0).unwrap(), 1);
        assert!(store.get_response(rid).unwrap().is_none());
        assert!(store.feedback_for_response(rid).unwrap().is_empty());
    }
}
