//! Background comment-analysis worker.
//!
//! Feedback submission never waits on the LLM: comments are queued here
//! and the analysis columns are back-filled asynchronously. A catch-up
//! pass on startup drains anything left unanalyzed by a prior session.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::state::{AnalysisRequest, AppState};

/// Start the background analysis worker task.
pub fn start_analysis_worker(state: Arc<AppState>) {
    let mut rx = match state.take_analysis_rx() {
        Some(rx) => rx,
        None => {
            error!("Analysis worker already started");
            return;
        }
    };

    // Re-queue comments left unanalyzed by a previous session.
    let catchup_state = state.clone();
    tokio::spawn(async move {
        match catchup_state.store.feedback_pending_analysis(100) {
            Ok(pending) if !pending.is_empty() => {
                info!("Queueing {} unanalyzed comments from prior sessions", pending.len());
                for record in pending {
                    let query_text = catchup_state
                        .store
                        .get_response(record.response_id)
                        .ok()
                        .flatten()
                        .map(|r| r.query_text)
                        .unwrap_or_default();
                    let _ = catchup_state.analysis_tx.send(AnalysisRequest {
                        feedback_id: record.id,
                        rating: record.rating,
                        comment: record.comment.unwrap_or_default(),
                        query_text,
                    });
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Could not load pending analyses: {}", e),
        }
    });

    tokio::spawn(async move {
        info!("Background analysis worker started");
        while let Some(request) = rx.recv().await {
            process_analysis(&state, request).await;
        }
    });
}

async fn process_analysis(state: &AppState, request: AnalysisRequest) {
    let config = state.llm_config.read().clone();
    let analysis = feedrank_llm::analyze_comment(
        &state.http,
        &config,
        request.rating,
        &request.comment,
        &request.query_text,
    )
    .await;

    match state.store.update_feedback_analysis(request.feedback_id, &analysis) {
        Ok(()) => info!(
            "Analyzed feedback {} (sentiment {:.2}, severity {})",
            request.feedback_id,
            analysis.sentiment_score,
            analysis.severity.label()
        ),
        Err(e) => warn!("Failed to store analysis for feedback {}: {}", request.feedback_id, e),
    }
}
