//! Score management: rescoring, source aggregation, manual priors.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;

use crate::routes::error_response;
use crate::state::AppState;
use feedrank_scoring::{detect_and_flag, FeedbackReducer, ScoringMode};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/scores/rescore", post(rescore))
        .route("/scores/migrate", post(migrate_to_sources))
        .route("/scores/sources", get(list_source_scores))
        .route("/scores/chunks/{id}", get(get_chunk_score))
        .route("/scores/chunks/{id}/base", put(set_base_score))
}

#[derive(Debug, Deserialize)]
struct RescoreRequest {
    #[serde(default = "default_mode")]
    mode: String,
}

fn default_mode() -> String {
    "enhanced".into()
}

/// POST /api/scores/rescore — recompute all scores from the feedback log,
/// then re-run review detection. Rejects a concurrent run outright.
async fn rescore(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RescoreRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let mode = match req.mode.as_str() {
        "plain" => ScoringMode::Plain,
        "enhanced" => ScoringMode::Enhanced,
        other => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": format!("unknown mode '{}': expected 'plain' or 'enhanced'", other)
                })),
            ));
        }
    };

    let guard = match state.rescore_lock.try_lock() {
        Some(guard) => guard,
        None => {
            return Err((
                StatusCode::CONFLICT,
                Json(serde_json::json!({ "error": "a rescore is already running" })),
            ));
        }
    };

    let outcome = FeedbackReducer::new(&state.store).recompute(mode).map_err(error_response)?;
    let flagged = detect_and_flag(&state.store).map_err(error_response)?;
    drop(guard);

    Ok(Json(serde_json::json!({
        "mode": outcome.mode,
        "chunks_updated": outcome.chunks_updated,
        "sources_updated": outcome.sources_updated,
        "feedback_considered": outcome.feedback_considered,
        "chunks_flagged": flagged,
    })))
}

/// POST /api/scores/migrate — roll existing chunk scores up to source
/// level. Non-destructive and safe to rerun.
async fn migrate_to_sources(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let guard = match state.rescore_lock.try_lock() {
        Some(guard) => guard,
        None => {
            return Err((
                StatusCode::CONFLICT,
                Json(serde_json::json!({ "error": "a rescore is already running" })),
            ));
        }
    };
    let sources = state.store.aggregate_to_source().map_err(error_response)?;
    drop(guard);
    Ok(Json(serde_json::json!({ "sources_updated": sources })))
}

#[derive(Debug, Deserialize)]
struct SourceParams {
    #[serde(default = "default_source_limit")]
    limit: usize,
}

fn default_source_limit() -> usize {
    100
}

/// GET /api/scores/sources
async fn list_source_scores(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SourceParams>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let sources = state.store.list_source_scores(params.limit).map_err(error_response)?;
    Ok(Json(serde_json::json!({ "sources": sources })))
}

/// GET /api/scores/chunks/{id}
async fn get_chunk_score(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    match state.store.get_chunk_score(id).map_err(error_response)? {
        Some(score) => Ok(Json(serde_json::json!({ "score": score }))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("no score for chunk {}", id) })),
        )),
    }
}

#[derive(Debug, Deserialize)]
struct BaseScoreRequest {
    base_score: f64,
}

/// PUT /api/scores/chunks/{id}/base — adjust the manual prior.
async fn set_base_score(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<BaseScoreRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    state.store.set_base_score(id, req.base_score).map_err(error_response)?;
    Ok(Json(serde_json::json!({ "chunk_id": id, "base_score": req.base_score })))
}
