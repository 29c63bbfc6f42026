//! Core SQLite store: chunk persistence and the in-memory vector index.

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, Axis};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};

use crate::embedding::{dequantize, quantize};
use crate::schema::{
    CONTENT_SCHEMA_SQL, INTERACTION_SCHEMA_SQL, REVIEW_SCHEMA_SQL, SCORE_SCHEMA_SQL,
};
use crate::types::*;
use feedrank_core::{Error, Result};

/// A similarity-search candidate as returned by the vector index.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarChunk {
    pub chunk_id: i64,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Cosine similarity in [0, 1] for normalized embeddings.
    pub similarity: f64,
}

/// SQLite store with an in-memory normalized embedding matrix.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    embedding_dim: usize,
    embedding_matrix: Mutex<EmbeddingMatrix>,
}

struct EmbeddingMatrix {
    /// Normalized embeddings, shape (N, dim).
    matrix: Array2<f32>,
    /// Chunk IDs corresponding to each row.
    chunk_ids: Vec<i64>,
    /// Whether the matrix needs reloading.
    dirty: bool,
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn db_err(e: impl std::fmt::Display) -> Error {
    Error::Database(e.to_string())
}

impl SqliteStore {
    /// Open or create the store. `db_dir` is the directory (e.g.,
    /// `data/vectordb/`); the file will be `db_dir/feedrank.db`.
    pub fn open(db_dir: impl AsRef<Path>, embedding_dim: usize) -> Result<Self> {
        let db_dir = db_dir.as_ref();
        std::fs::create_dir_all(db_dir).map_err(|e| Error::Storage(e.to_string()))?;
        let db_path = db_dir.join("feedrank.db");

        let conn = Self::create_connection(&db_path)?;
        Self::init_schema(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path,
            embedding_dim,
            embedding_matrix: Mutex::new(EmbeddingMatrix {
                matrix: Array2::zeros((0, embedding_dim)),
                chunk_ids: Vec::new(),
                dirty: true,
            }),
        };

        store.load_embedding_matrix()?;

        let chunk_count = store.count_chunks()?;
        info!(
            "SqliteStore initialized: {} chunks, dim={}, path={}",
            chunk_count,
            embedding_dim,
            store.db_path.display()
        );

        Ok(store)
    }

    fn create_connection(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path).map_err(db_err)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -65536;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(db_err)?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        let full_schema = format!(
            "{}\n{}\n{}\n{}",
            CONTENT_SCHEMA_SQL, SCORE_SCHEMA_SQL, INTERACTION_SCHEMA_SQL, REVIEW_SCHEMA_SQL
        );
        conn.execute_batch(&full_schema)
            .map_err(|e| Error::Database(format!("Schema init failed: {}", e)))?;
        Ok(())
    }

    pub(crate) fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    pub(crate) fn mark_matrix_dirty(&self) {
        self.embedding_matrix.lock().dirty = true;
    }

    // ---------------------------------------------------------------
    // Chunk CRUD
    // ---------------------------------------------------------------

    /// Insert a chunk together with its neutral score row and, when given,
    /// its embedding. Returns the new chunk ID.
    pub fn add_chunk(
        &self,
        content: &str,
        embedding: Option<&Array1<f32>>,
        opts: AddChunkOptions,
    ) -> Result<i64> {
        let now = opts.created_at.unwrap_or_else(now_ms);
        let meta_json = match opts.metadata.as_ref() {
            Some(m) => Some(serde_json::to_string(m)?),
            None => None,
        };

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;

        let id = tx
            .prepare_cached(
                "INSERT INTO chunks (content, metadata_json, content_hash, created_at) \
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .map_err(db_err)?
            .insert(params![content, meta_json, opts.content_hash, now])
            .map_err(|e| {
                if e.to_string().contains("UNIQUE constraint") {
                    Error::DuplicateContent(opts.content_hash.clone().unwrap_or_default())
                } else {
                    db_err(e)
                }
            })?;

        // Score row exists from ingestion on, with neutral priors.
        tx.execute(
            "INSERT OR IGNORE INTO chunk_scores (chunk_id, base_score, feedback_score, last_updated) \
             VALUES (?1, 1.0, 0.0, ?2)",
            params![id, now],
        )
        .map_err(db_err)?;

        if let Some(emb) = embedding {
            let (bytes, scale, offset) = quantize(emb);
            tx.execute(
                "INSERT OR REPLACE INTO chunk_embeddings (chunk_id, embedding, scale, offset_val) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, bytes, scale, offset],
            )
            .map_err(db_err)?;
        }

        tx.commit().map_err(db_err)?;
        drop(conn);

        if embedding.is_some() {
            self.mark_matrix_dirty();
        }
        Ok(id)
    }

    /// Find a chunk by content hash (ingest dedup).
    pub fn find_chunk_by_hash(&self, content_hash: &str) -> Result<Option<Chunk>> {
        let conn = self.conn.lock();
        let row = conn
            .prepare_cached("SELECT * FROM chunks WHERE content_hash = ?1")
            .map_err(db_err)?
            .query_row(params![content_hash], |row| Ok(Self::row_to_chunk(row)))
            .optional()
            .map_err(db_err)?;
        Ok(row)
    }

    /// Get a chunk by ID.
    pub fn get_chunk(&self, chunk_id: i64) -> Result<Option<Chunk>> {
        let conn = self.conn.lock();
        let row = conn
            .prepare_cached("SELECT * FROM chunks WHERE id = ?1")
            .map_err(db_err)?
            .query_row(params![chunk_id], |row| Ok(Self::row_to_chunk(row)))
            .optional()
            .map_err(db_err)?;
        Ok(row)
    }

    /// Store or replace the embedding for an existing chunk.
    pub fn add_chunk_embedding(&self, chunk_id: i64, embedding: &Array1<f32>) -> Result<()> {
        let (bytes, scale, offset) = quantize(embedding);
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO chunk_embeddings (chunk_id, embedding, scale, offset_val) \
             VALUES (?1, ?2, ?3, ?4)",
            params![chunk_id, bytes, scale, offset],
        )
        .map_err(db_err)?;
        drop(conn);
        self.mark_matrix_dirty();
        Ok(())
    }

    /// Count total chunks.
    pub fn count_chunks(&self) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .map_err(db_err)
    }

    /// Get chunks with pagination, newest first. Returns (chunks, total).
    pub fn get_chunks_paginated(&self, page: usize, page_size: usize) -> Result<(Vec<Chunk>, i64)> {
        let total = self.count_chunks()?;
        let offset = page.saturating_sub(1) * page_size;

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT * FROM chunks ORDER BY created_at DESC LIMIT ?1 OFFSET ?2")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![page_size as i64, offset as i64], |row| {
                Ok(Self::row_to_chunk(row))
            })
            .map_err(db_err)?;
        let chunks: Vec<Chunk> = rows.filter_map(|r| r.ok()).collect();
        Ok((chunks, total))
    }

    // ---------------------------------------------------------------
    // Vector index
    // ---------------------------------------------------------------

    /// Load and normalize all chunk embeddings into a matrix.
    fn load_embedding_matrix(&self) -> Result<()> {
        let mut chunk_ids = Vec::new();
        let mut embeddings: Vec<Array1<f32>> = Vec::new();

        {
            let conn = self.conn.lock();
            let mut stmt = conn
                .prepare("SELECT chunk_id, embedding, scale, offset_val FROM chunk_embeddings")
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |row| {
                    let chunk_id: i64 = row.get(0)?;
                    let blob: Vec<u8> = row.get(1)?;
                    let scale: f64 = row.get(2)?;
                    let offset: f64 = row.get(3)?;
                    Ok((chunk_id, blob, scale as f32, offset as f32))
                })
                .map_err(db_err)?;

            for row in rows {
                let (cid, blob, scale, offset) = row.map_err(db_err)?;
                chunk_ids.push(cid);
                embeddings.push(dequantize(&blob, scale, offset));
            }
        }

        let mut mat = self.embedding_matrix.lock();
        if embeddings.is_empty() {
            mat.matrix = Array2::zeros((0, self.embedding_dim));
            mat.chunk_ids = Vec::new();
            mat.dirty = false;
            return Ok(());
        }

        let n = embeddings.len();
        let mut matrix = Array2::zeros((n, self.embedding_dim));
        for (i, emb) in embeddings.iter().enumerate() {
            matrix.row_mut(i).assign(emb);
        }

        // Normalize rows so cosine similarity reduces to a dot product.
        for mut row in matrix.rows_mut() {
            let norm = row.dot(&row).sqrt();
            if norm > 1e-9 {
                row /= norm;
            }
        }

        mat.matrix = matrix;
        mat.chunk_ids = chunk_ids;
        mat.dirty = false;
        debug!("Loaded {} embeddings into matrix", n);
        Ok(())
    }

    fn ensure_matrix_loaded(&self) -> Result<()> {
        if self.embedding_matrix.lock().dirty {
            self.load_embedding_matrix()?;
        }
        Ok(())
    }

    /// Append a single embedding to the in-memory matrix without a reload.
    pub fn append_to_matrix(&self, chunk_id: i64, embedding: &Array1<f32>) -> Result<()> {
        self.ensure_matrix_loaded()?;

        let norm = embedding.dot(embedding).sqrt();
        if norm < 1e-9 {
            return Ok(());
        }
        let normalized = embedding / norm;

        let mut mat = self.embedding_matrix.lock();
        if mat.chunk_ids.contains(&chunk_id) {
            return Ok(());
        }
        if mat.matrix.nrows() == 0 {
            mat.matrix = normalized.insert_axis(Axis(0)).to_owned();
        } else {
            mat.matrix
                .push(Axis(0), normalized.view())
                .map_err(|e| Error::Internal(format!("Matrix append failed: {}", e)))?;
        }
        mat.chunk_ids.push(chunk_id);
        mat.dirty = false;
        Ok(())
    }

    /// Cosine similarity search over all stored embeddings, descending.
    pub fn similarity_search(
        &self,
        query_embedding: &Array1<f32>,
        limit: usize,
    ) -> Result<Vec<SimilarChunk>> {
        self.ensure_matrix_loaded()?;

        let mat = self.embedding_matrix.lock();
        if mat.matrix.nrows() == 0 {
            return Ok(Vec::new());
        }

        let q_norm = query_embedding.dot(query_embedding).sqrt();
        if q_norm < 1e-9 {
            return Err(Error::Search("query embedding has zero norm".into()));
        }
        let q = query_embedding / q_norm;

        let similarities = mat.matrix.dot(&q);
        let k = limit.min(similarities.len());
        let mut indexed: Vec<(usize, f32)> =
            similarities.iter().enumerate().map(|(i, &s)| (i, s)).collect();
        indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        indexed.truncate(k);

        let top: Vec<(i64, f64)> = indexed
            .iter()
            .map(|&(i, s)| (mat.chunk_ids[i], s as f64))
            .collect();
        drop(mat);

        let mut results = Vec::with_capacity(k);
        for (cid, similarity) in top {
            if let Some(chunk) = self.get_chunk(cid)? {
                results.push(SimilarChunk {
                    chunk_id: chunk.id,
                    content: chunk.content,
                    metadata: chunk.metadata,
                    similarity,
                });
            }
        }
        Ok(results)
    }

    // ---------------------------------------------------------------
    // Stats
    // ---------------------------------------------------------------

    /// Get store statistics.
    pub fn get_stats(&self) -> Result<StoreStats> {
        let chunk_count = self.count_chunks()?;

        let conn = self.conn.lock();
        let emb_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunk_embeddings", [], |row| row.get(0))
            .map_err(db_err)?;
        let pending_flags: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM review_flags WHERE status = 'pending'",
                [],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        drop(conn);

        let db_size = std::fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0);

        let mat = self.embedding_matrix.lock();
        let matrix_rows = mat.matrix.nrows();

        Ok(StoreStats {
            total_chunks: chunk_count,
            embeddings_stored: emb_count,
            embedding_dimension: self.embedding_dim,
            pending_review_flags: pending_flags,
            db_path: self.db_path.to_string_lossy().to_string(),
            db_size_mb: db_size as f64 / (1024.0 * 1024.0),
            matrix_loaded: matrix_rows > 0,
            matrix_rows,
        })
    }

    // ---------------------------------------------------------------
    // Row mapping
    // ---------------------------------------------------------------

    pub(crate) fn row_to_chunk(row: &rusqlite::Row<'_>) -> Chunk {
        Chunk {
            id: row.get("id").unwrap_or(0),
            content: row.get("content").unwrap_or_default(),
            metadata: row
                .get::<_, Option<String>>("metadata_json")
                .ok()
                .flatten()
                .and_then(|s| serde_json::from_str(&s).ok()),
            content_hash: row.get("content_hash").ok().flatten(),
            created_at: row.get("created_at").unwrap_or(0),
        }
    }
}
