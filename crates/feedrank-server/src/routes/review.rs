//! Review flag routes: list pending flags, resolve or dismiss them.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;

use crate::routes::error_response;
use crate::state::AppState;
use feedrank_store::FlagStatus;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/review/flags", get(list_flags))
        .route("/review/flags/{id}", put(update_flag))
        .route("/review/feedback", get(list_review_feedback))
}

#[derive(Debug, Deserialize)]
struct FlagParams {
    #[serde(default = "default_status")]
    status: String,
}

fn default_status() -> String {
    "pending".into()
}

/// GET /api/review/flags?status=pending
async fn list_flags(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FlagParams>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let status = FlagStatus::parse(&params.status).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": format!("unknown status '{}'", params.status)
            })),
        )
    })?;
    let flags = state.store.flags_by_status(status).map_err(error_response)?;
    Ok(Json(serde_json::json!({ "flags": flags })))
}

#[derive(Debug, Deserialize)]
struct ReviewFeedbackParams {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

/// GET /api/review/feedback — analyzed feedback with moderate or worse
/// severity, or an explicit needs_review vote.
async fn list_review_feedback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ReviewFeedbackParams>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let feedback = state
        .store
        .feedback_needing_review(params.limit.min(500))
        .map_err(error_response)?;
    Ok(Json(serde_json::json!({ "feedback": feedback })))
}

#[derive(Debug, Deserialize)]
struct FlagUpdate {
    status: String,
    notes: Option<String>,
}

/// PUT /api/review/flags/{id} — a human reviewer resolves or dismisses.
async fn update_flag(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<FlagUpdate>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let status = match FlagStatus::parse(&req.status) {
        Some(FlagStatus::Pending) | None => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": "status must be 'resolved' or 'dismissed'"
                })),
            ));
        }
        Some(status) => status,
    };
    state
        .store
        .update_flag_status(id, status, req.notes.as_deref())
        .map_err(error_response)?;
    Ok(Json(serde_json::json!({ "flag_id": id, "status": req.status })))
}
