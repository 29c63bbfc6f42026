//! Feedback submission and response inspection routes.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::routes::error_response;
use crate::state::{AnalysisRequest, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/feedback", post(submit_feedback))
        .route("/responses", get(list_responses))
        .route("/responses/cleanup", post(cleanup_responses))
        .route("/responses/{id}", get(get_response).delete(delete_response))
        .route("/responses/{id}/feedback", get(response_feedback))
}

#[derive(Debug, Deserialize)]
struct FeedbackRequest {
    response_id: i64,
    rating: i64,
    comment: Option<String>,
}

/// POST /api/feedback — record a rating, queue comment analysis.
async fn submit_feedback(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FeedbackRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let feedback_id = state
        .store
        .add_feedback(req.response_id, req.rating, req.comment.as_deref())
        .map_err(error_response)?;

    // Analysis is back-filled asynchronously; submission never blocks on it.
    let comment = req.comment.as_deref().map(str::trim).unwrap_or_default();
    if !comment.is_empty() {
        let query_text = state
            .store
            .get_response(req.response_id)
            .ok()
            .flatten()
            .map(|r| r.query_text)
            .unwrap_or_default();
        let _ = state.analysis_tx.send(AnalysisRequest {
            feedback_id,
            rating: req.rating,
            comment: comment.to_string(),
            query_text,
        });
    }

    Ok(Json(serde_json::json!({
        "feedback_id": feedback_id,
        "analysis_queued": !comment.is_empty(),
    })))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

/// GET /api/responses — recent responses with feedback aggregates.
async fn list_responses(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let responses = state.store.list_responses(params.limit).map_err(error_response)?;
    Ok(Json(serde_json::json!({ "responses": responses })))
}

/// GET /api/responses/{id}
async fn get_response(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    match state.store.get_response(id).map_err(error_response)? {
        Some(response) => Ok(Json(serde_json::json!({ "response": response }))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("response {} not found", id) })),
        )),
    }
}

/// GET /api/responses/{id}/feedback
async fn response_feedback(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let feedback = state.store.feedback_for_response(id).map_err(error_response)?;
    Ok(Json(serde_json::json!({ "feedback": feedback })))
}

/// DELETE /api/responses/{id}
async fn delete_response(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let deleted = state.store.delete_response(id).map_err(error_response)?;
    if deleted {
        Ok(Json(serde_json::json!({ "deleted": true })))
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("response {} not found", id) })),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct CleanupRequest {
    days: i64,
}

/// POST /api/responses/cleanup — delete responses older than N days.
async fn cleanup_responses(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CleanupRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    if req.days < 0 {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "days must be non-negative" })),
        ));
    }
    let deleted = state.store.delete_old_responses(req.days).map_err(error_response)?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}
