//! Document ingestion routes.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use ndarray::Array1;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::routes::error_response;
use crate::state::AppState;
use feedrank_store::AddChunkOptions;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/documents", post(add_document).get(list_documents))
}

#[derive(Debug, Deserialize)]
struct AddDocumentRequest {
    content: String,
    metadata: Option<serde_json::Value>,
    /// Pre-computed embedding; documents arrive pre-chunked with their
    /// vectors when no in-process embedder is configured.
    embedding: Option<Vec<f32>>,
}

/// Validate a client-supplied embedding against the configured dimension.
fn parse_embedding(values: Vec<f32>, dim: usize) -> Result<Array1<f32>, String> {
    if values.len() != dim {
        return Err(format!(
            "embedding has {} dimensions, expected {}",
            values.len(),
            dim
        ));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err("embedding contains non-finite values".into());
    }
    Ok(Array1::from_vec(values))
}

/// POST /api/documents — ingest one chunk of source text, with its
/// pre-computed embedding when the caller has one.
async fn add_document(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddDocumentRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let content = req.content.trim();
    if content.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "content must not be empty" })),
        ));
    }

    // A supplied embedding wins over the in-process backend.
    let supplied = match req.embedding {
        Some(values) => match parse_embedding(values, state.config.embedding_dim) {
            Ok(emb) => Some(emb),
            Err(msg) => {
                return Err((
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "error": msg })),
                ));
            }
        },
        None => None,
    };

    let content_hash = hex::encode(Sha256::digest(content.as_bytes()));
    if let Some(existing) = state
        .store
        .find_chunk_by_hash(&content_hash)
        .map_err(error_response)?
    {
        // Re-submitting known content with an embedding backfills the
        // vector for a chunk ingested before one was available.
        let mut embedded = false;
        if let Some(emb) = supplied.as_ref() {
            state
                .store
                .add_chunk_embedding(existing.id, emb)
                .map_err(error_response)?;
            state
                .store
                .append_to_matrix(existing.id, emb)
                .map_err(error_response)?;
            embedded = true;
        }
        return Ok(Json(serde_json::json!({
            "chunk_id": existing.id,
            "duplicate": true,
            "embedded": embedded,
        })));
    }

    let embedding = supplied.or_else(|| state.embedder.embed(content).map(|r| r.embedding));
    let embedded = embedding.is_some();

    let chunk_id = state
        .store
        .add_chunk(
            content,
            embedding.as_ref(),
            AddChunkOptions {
                metadata: req.metadata,
                content_hash: Some(content_hash),
                ..Default::default()
            },
        )
        .map_err(error_response)?;

    if let Some(emb) = embedding {
        state.store.append_to_matrix(chunk_id, &emb).map_err(error_response)?;
    }

    info!("Ingested chunk {} (embedded: {})", chunk_id, embedded);
    Ok(Json(serde_json::json!({
        "chunk_id": chunk_id,
        "duplicate": false,
        "embedded": embedded,
    })))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default = "default_page")]
    page: usize,
    #[serde(default = "default_page_size")]
    page_size: usize,
}

fn default_page() -> usize {
    1
}
fn default_page_size() -> usize {
    20
}

/// GET /api/documents?page=1&page_size=20
async fn list_documents(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let (chunks, total) = state
        .store
        .get_chunks_paginated(params.page.max(1), params.page_size.clamp(1, 200))
        .map_err(error_response)?;
    Ok(Json(serde_json::json!({
        "chunks": chunks,
        "total": total,
        "page": params.page.max(1),
    })))
}
