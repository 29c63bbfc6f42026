//! The question-answering routes: redact, categorize, retrieve, answer.
//! Blocking JSON at /ask, token streaming over SSE at /ask/stream.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::routing::post;
use axum::{Json, Router};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tracing::{info, warn};

use crate::routes::error_response;
use crate::state::AppState;
use feedrank_llm::{AnswerContext, StreamChunk};
use feedrank_rank::RankedChunk;

const DEFAULT_TOP_K: usize = 5;
const NO_MATERIAL_ANSWER: &str = "No relevant source material was found for this question.";

type SseStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ask", post(ask))
        .route("/ask/stream", post(ask_stream))
}

#[derive(Debug, Deserialize)]
struct AskRequest {
    question: String,
    #[serde(default = "default_top_k")]
    top_k: usize,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

/// POST /api/ask — answer a question with cited sources.
async fn ask(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AskRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "question must not be empty" })),
        ));
    }

    // PII never reaches the embedding, storage, or LLM paths.
    let redacted = state.redactor.redact(question);
    if redacted.had_pii {
        info!("Redacted {} PII items from query", redacted.redaction_count);
    }

    let llm_config = state.llm_config.read().clone();
    let category =
        feedrank_llm::categorize_query(&state.http, &llm_config, &redacted.text).await;

    let embedding = match state.embedder.embed(&redacted.text) {
        Some(result) => result.embedding,
        None => {
            return Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "error": "embedding model unavailable" })),
            ));
        }
    };

    let query_id = state
        .store
        .add_query(
            &redacted.text,
            Some(&category),
            redacted.had_pii,
            redacted.redaction_count as i64,
            Some(&redacted.details_json()),
        )
        .map_err(error_response)?;

    let ranked = state
        .ranker
        .search(&embedding, req.top_k)
        .map_err(error_response)?;

    if ranked.is_empty() {
        return Ok(Json(serde_json::json!({
            "query_id": query_id,
            "category": category,
            "answer": NO_MATERIAL_ANSWER,
            "sources": [],
        })));
    }

    let context: Vec<AnswerContext> = ranked
        .iter()
        .map(|r| AnswerContext {
            content: r.content.clone(),
            source_url: r.source_url().map(str::to_string),
            source_title: r.source_title().map(str::to_string),
        })
        .collect();

    let (answer, model) =
        feedrank_llm::generate_answer(&state.http, &llm_config, &redacted.text, &context)
            .await
            .map_err(error_response)?;

    let chunk_ids: Vec<i64> = ranked.iter().map(|r| r.chunk_id).collect();
    let response_id = state
        .store
        .add_response(query_id, &answer, &chunk_ids, Some(&model))
        .map_err(error_response)?;

    let sources = source_listing(&ranked);

    Ok(Json(serde_json::json!({
        "query_id": query_id,
        "response_id": response_id,
        "category": category,
        "answer": answer,
        "model": model,
        "sources": sources,
        "pii_redacted": redacted.had_pii,
    })))
}

fn source_listing(ranked: &[RankedChunk]) -> Vec<serde_json::Value> {
    ranked
        .iter()
        .enumerate()
        .map(|(i, r)| {
            serde_json::json!({
                "number": i + 1,
                "chunk_id": r.chunk_id,
                "source_url": r.source_url(),
                "source_title": r.source_title(),
                "similarity": r.similarity,
                "final_score": r.final_score,
            })
        })
        .collect()
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    Sources {
        query_id: i64,
        category: String,
        pii_redacted: bool,
        sources: Vec<serde_json::Value>,
    },
    Token {
        content: String,
    },
    Done {
        response_id: Option<i64>,
        model: String,
        tokens_used: usize,
    },
    Error {
        error: String,
    },
}

fn sse_error(message: String) -> Sse<SseStream> {
    let stream: SseStream = Box::pin(async_stream::stream! {
        let event = StreamEvent::Error { error: message };
        yield Ok::<_, Infallible>(Event::default().data(
            serde_json::to_string(&event).unwrap()
        ));
    });
    Sse::new(stream)
}

/// POST /api/ask/stream — same pipeline as /ask, but tokens arrive as
/// SSE events. The response row is persisted once the stream completes,
/// and its id is carried in the final `done` event.
async fn ask_stream(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AskRequest>,
) -> Sse<SseStream> {
    let question = req.question.trim().to_string();
    if question.is_empty() {
        return sse_error("question must not be empty".into());
    }

    let redacted = state.redactor.redact(&question);
    if redacted.had_pii {
        info!("Redacted {} PII items from query", redacted.redaction_count);
    }

    let llm_config = state.llm_config.read().clone();
    let (provider, model, api_key) = match llm_config.resolve_provider() {
        Some(resolved) => resolved,
        None => return sse_error("no LLM provider configured".into()),
    };

    let category =
        feedrank_llm::categorize_query(&state.http, &llm_config, &redacted.text).await;

    let embedding = match state.embedder.embed(&redacted.text) {
        Some(result) => result.embedding,
        None => return sse_error("embedding model unavailable".into()),
    };

    let query_id = match state.store.add_query(
        &redacted.text,
        Some(&category),
        redacted.had_pii,
        redacted.redaction_count as i64,
        Some(&redacted.details_json()),
    ) {
        Ok(id) => id,
        Err(e) => return sse_error(e.to_string()),
    };

    let ranked = match state.ranker.search(&embedding, req.top_k) {
        Ok(r) => r,
        Err(e) => return sse_error(e.to_string()),
    };

    let sources = source_listing(&ranked);
    let had_pii = redacted.had_pii;

    if ranked.is_empty() {
        let stream: SseStream = Box::pin(async_stream::stream! {
            let event = StreamEvent::Sources {
                query_id,
                category,
                pii_redacted: had_pii,
                sources: Vec::new(),
            };
            yield Ok::<_, Infallible>(Event::default().data(
                serde_json::to_string(&event).unwrap()
            ));
            let event = StreamEvent::Token { content: NO_MATERIAL_ANSWER.into() };
            yield Ok(Event::default().data(serde_json::to_string(&event).unwrap()));
            let event = StreamEvent::Done { response_id: None, model, tokens_used: 0 };
            yield Ok(Event::default().data(serde_json::to_string(&event).unwrap()));
            yield Ok(Event::default().data("[DONE]".to_string()));
        });
        return Sse::new(stream);
    }

    let context: Vec<AnswerContext> = ranked
        .iter()
        .map(|r| AnswerContext {
            content: r.content.clone(),
            source_url: r.source_url().map(str::to_string),
            source_title: r.source_title().map(str::to_string),
        })
        .collect();
    let messages = feedrank_llm::answer_messages(&redacted.text, &context);
    let chunk_ids: Vec<i64> = ranked.iter().map(|r| r.chunk_id).collect();

    let llm_stream =
        feedrank_llm::stream_llm(&state.http, provider, messages, &model, &api_key, 0.2, 1024);

    let sse: SseStream = Box::pin(async_stream::stream! {
        let event = StreamEvent::Sources {
            query_id,
            category,
            pii_redacted: had_pii,
            sources,
        };
        yield Ok::<_, Infallible>(Event::default().data(
            serde_json::to_string(&event).unwrap()
        ));

        let mut answer = String::new();
        tokio::pin!(llm_stream);
        while let Some(chunk) = llm_stream.next().await {
            match chunk {
                StreamChunk::Token(text) => {
                    answer.push_str(&text);
                    let event = StreamEvent::Token { content: text };
                    yield Ok(Event::default().data(serde_json::to_string(&event).unwrap()));
                }
                StreamChunk::Done { tokens_used } => {
                    let response_id = match state
                        .store
                        .add_response(query_id, &answer, &chunk_ids, Some(&model))
                    {
                        Ok(id) => Some(id),
                        Err(e) => {
                            warn!("Failed to persist streamed response: {}", e);
                            None
                        }
                    };
                    let event = StreamEvent::Done {
                        response_id,
                        model: model.clone(),
                        tokens_used,
                    };
                    yield Ok(Event::default().data(serde_json::to_string(&event).unwrap()));
                    yield Ok(Event::default().data("[DONE]".to_string()));
                    return;
                }
                StreamChunk::Error(e) => {
                    let event = StreamEvent::Error { error: e };
                    yield Ok(Event::default().data(serde_json::to_string(&event).unwrap()));
                    return;
                }
            }
        }
    });

    Sse::new(sse)
}
