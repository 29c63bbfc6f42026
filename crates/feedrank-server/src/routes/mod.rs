//! HTTP route handlers.

pub mod admin;
pub mod ask;
pub mod documents;
pub mod feedback;
pub mod review;
pub mod scores;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use crate::state::AppState;
use feedrank_core::Error;

/// Build the main Axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", api_routes())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(ask::routes())
        .merge(feedback::routes())
        .merge(scores::routes())
        .merge(review::routes())
        .merge(documents::routes())
        .merge(admin::routes())
}

/// Map engine errors onto HTTP responses.
pub fn error_response(e: Error) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &e {
        Error::InvalidRating(_) | Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::DuplicateContent(_) => StatusCode::CONFLICT,
        Error::Search(_) | Error::Config(_) | Error::Http(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": e.to_string() })))
}
