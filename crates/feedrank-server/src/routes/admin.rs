//! Administrative routes: stats, analytics, purge, LLM configuration.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};
use tracing::warn;

use crate::routes::error_response;
use crate::state::AppState;
use feedrank_llm::LLMConfigUpdate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stats", get(get_stats))
        .route("/analytics", get(get_analytics))
        .route("/analytics/categories", get(get_categories))
        .route("/admin/user-data", delete(purge_user_data))
        .route("/config/llm", get(get_llm_config).put(update_llm_config))
}

/// GET /api/stats — store statistics.
async fn get_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let stats = state.store.get_stats().map_err(error_response)?;
    Ok(Json(serde_json::json!({
        "store": stats,
        "feedback_weight": state.config.feedback_weight,
        "overfetch_factor": state.config.overfetch_factor,
        "embedder_available": state.embedder.is_available(),
    })))
}

/// GET /api/analytics — usage and quality snapshot.
async fn get_analytics(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let analytics = state
        .store
        .analytics(10, state.config.feedback_weight)
        .map_err(error_response)?;
    Ok(Json(serde_json::json!({ "analytics": analytics })))
}

/// GET /api/analytics/categories — query counts per category.
async fn get_categories(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let categories = state.store.category_statistics().map_err(error_response)?;
    let entries: Vec<serde_json::Value> = categories
        .into_iter()
        .map(|(category, count)| serde_json::json!({ "category": category, "count": count }))
        .collect();
    Ok(Json(serde_json::json!({ "categories": entries })))
}

/// DELETE /api/admin/user-data — remove every trace of user interaction
/// and reset derived scores. Source chunks survive.
async fn purge_user_data(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let report = state.store.purge_user_data().map_err(error_response)?;
    Ok(Json(serde_json::json!({ "purged": report })))
}

/// GET /api/config/llm — current configuration, keys masked.
async fn get_llm_config(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let view = state.llm_config.read().to_view();
    Json(serde_json::json!({ "config": view }))
}

/// PUT /api/config/llm — merge an update and persist.
async fn update_llm_config(
    State(state): State<Arc<AppState>>,
    Json(update): Json<LLMConfigUpdate>,
) -> Json<serde_json::Value> {
    let view = {
        let mut config = state.llm_config.write();
        config.apply_update(&update);
        if let Err(e) = config.save() {
            warn!("Failed to persist LLM config: {}", e);
        }
        config.to_view()
    };
    Json(serde_json::json!({ "config": view }))
}
