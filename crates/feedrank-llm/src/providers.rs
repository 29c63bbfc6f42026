//! External LLM provider implementations: SSE streaming plus a
//! non-streaming completion call.
//!
//! OpenAI and Groq share a wire format. Anthropic uses its own.

use std::pin::Pin;

use futures::Stream;
use reqwest::Client;
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{debug, error};

use crate::types::{ChatMessage, LLMProvider};
use feedrank_core::{Error, Result};

/// Boxed stream type for returning different stream implementations.
pub type BoxedStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// A single streamed token or error.
pub enum StreamChunk {
    Token(String),
    Done { tokens_used: usize },
    Error(String),
}

const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const GROQ_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Run a completion and return the full response text.
pub async fn complete(
    client: &Client,
    provider: LLMProvider,
    messages: &[ChatMessage],
    model: &str,
    api_key: &str,
    temperature: f64,
    max_tokens: usize,
) -> Result<String> {
    match provider {
        LLMProvider::Anthropic => {
            complete_anthropic(client, messages, model, api_key, temperature, max_tokens).await
        }
        LLMProvider::OpenAI => {
            complete_openai_compat(client, OPENAI_URL, messages, model, api_key, temperature, max_tokens)
                .await
        }
        LLMProvider::Groq => {
            complete_openai_compat(client, GROQ_URL, messages, model, api_key, temperature, max_tokens)
                .await
        }
    }
}

async fn complete_openai_compat(
    client: &Client,
    url: &str,
    messages: &[ChatMessage],
    model: &str,
    api_key: &str,
    temperature: f64,
    max_tokens: usize,
) -> Result<String> {
    let msgs: Vec<serde_json::Value> = messages
        .iter()
        .map(|m| json!({"role": m.role, "content": m.content}))
        .collect();
    let body = json!({
        "model": model,
        "messages": msgs,
        "temperature": temperature,
        "max_tokens": max_tokens,
    });

    let response = client
        .post(url)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("Content-Type", "application/json")
        .json(&body)
        .send()
        .await
        .map_err(|e| Error::Http(format!("Request failed: {}", e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Http(format!("API error {}: {}", status, body)));
    }

    let parsed: serde_json::Value = response
        .json()
        .await
        .map_err(|e| Error::Http(format!("Invalid response body: {}", e)))?;
    parsed["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::Http("No content in completion response".into()))
}

async fn complete_anthropic(
    client: &Client,
    messages: &[ChatMessage],
    model: &str,
    api_key: &str,
    temperature: f64,
    max_tokens: usize,
) -> Result<String> {
    let (system_msg, conv_msgs) = split_system(messages);
    let mut body = json!({
        "model": model,
        "messages": conv_msgs,
        "temperature": temperature,
        "max_tokens": max_tokens,
    });
    if let Some(sys) = system_msg {
        body["system"] = json!(sys);
    }

    let response = client
        .post(ANTHROPIC_URL)
        .header("x-api-key", api_key)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .header("Content-Type", "application/json")
        .json(&body)
        .send()
        .await
        .map_err(|e| Error::Http(format!("Request failed: {}", e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Http(format!("API error {}: {}", status, body)));
    }

    let parsed: serde_json::Value = response
        .json()
        .await
        .map_err(|e| Error::Http(format!("Invalid response body: {}", e)))?;
    parsed["content"][0]["text"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::Http("No content in completion response".into()))
}

fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<serde_json::Value>) {
    let system_msg = messages
        .iter()
        .find(|m| m.role == "system")
        .map(|m| m.content.clone());
    let conv_msgs = messages
        .iter()
        .filter(|m| m.role != "system")
        .map(|m| json!({"role": m.role, "content": m.content}))
        .collect();
    (system_msg, conv_msgs)
}

/// Stream tokens from the appropriate provider.
pub fn stream_llm(
    client: &Client,
    provider: LLMProvider,
    messages: Vec<ChatMessage>,
    model: &str,
    api_key: &str,
    temperature: f64,
    max_tokens: usize,
) -> BoxedStream {
    match provider {
        LLMProvider::OpenAI => Box::pin(stream_openai_compat(
            client.clone(),
            OPENAI_URL,
            messages,
            model.to_string(),
            api_key.to_string(),
            temperature,
            max_tokens,
        )),
        LLMProvider::Groq => Box::pin(stream_openai_compat(
            client.clone(),
            GROQ_URL,
            messages,
            model.to_string(),
            api_key.to_string(),
            temperature,
            max_tokens,
        )),
        LLMProvider::Anthropic => Box::pin(stream_anthropic(
            client.clone(),
            messages,
            model.to_string(),
            api_key.to_string(),
            temperature,
            max_tokens,
        )),
    }
}

/// Stream from OpenAI-compatible APIs (OpenAI, Groq).
fn stream_openai_compat(
    client: Client,
    url: &str,
    messages: Vec<ChatMessage>,
    model: String,
    api_key: String,
    temperature: f64,
    max_tokens: usize,
) -> impl Stream<Item = StreamChunk> + Send + 'static {
    let url = url.to_string();
    let msgs: Vec<serde_json::Value> = messages
        .iter()
        .map(|m| json!({"role": m.role, "content": m.content}))
        .collect();

    async_stream::stream! {
        let body = json!({
            "model": model,
            "messages": msgs,
            "temperature": temperature,
            "max_tokens": max_tokens,
            "stream": true,
        });

        debug!("Streaming from {} with model {}", url, model);

        let response = match client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                yield StreamChunk::Error(format!("Request failed: {}", e));
                return;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            yield StreamChunk::Error(format!("API error {}: {}", status, body));
            return;
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut token_count = 0usize;

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    yield StreamChunk::Error(format!("Stream read error: {}", e));
                    return;
                }
            };

            buffer.push_str(&String::from_utf8_lossy(&bytes));

            // Process complete SSE lines
            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer = buffer[line_end + 1..].to_string();

                if line.is_empty() || line.starts_with(':') {
                    continue;
                }

                if let Some(data) = line.strip_prefix("data: ") {
                    if data.trim() == "[DONE]" {
                        yield StreamChunk::Done { tokens_used: token_count };
                        return;
                    }

                    if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(data) {
                        if let Some(content) = parsed["choices"][0]["delta"]["content"].as_str() {
                            if !content.is_empty() {
                                token_count += 1;
                                yield StreamChunk::Token(content.to_string());
                            }
                        }
                    }
                }
            }
        }

        yield StreamChunk::Done { tokens_used: token_count };
    }
}

/// Stream from Anthropic's Messages API.
fn stream_anthropic(
    client: Client,
    messages: Vec<ChatMessage>,
    model: String,
    api_key: String,
    temperature: f64,
    max_tokens: usize,
) -> impl Stream<Item = StreamChunk> + Send + 'static {
    let (system_msg, conv_msgs) = split_system(&messages);

    async_stream::stream! {
        let mut body = json!({
            "model": model,
            "messages": conv_msgs,
            "temperature": temperature,
            "max_tokens": max_tokens,
            "stream": true,
        });

        if let Some(sys) = system_msg {
            body["system"] = json!(sys);
        }

        debug!("Streaming from Anthropic with model {}", model);

        let response = match client
            .post(ANTHROPIC_URL)
            .header("x-api-key", &api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                yield StreamChunk::Error(format!("Request failed: {}", e));
                return;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            yield StreamChunk::Error(format!("API error {}: {}", status, body));
            return;
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut token_count = 0usize;

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    yield StreamChunk::Error(format!("Stream read error: {}", e));
                    return;
                }
            };

            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer = buffer[line_end + 1..].to_string();

                if line.is_empty() || line.starts_with(':') {
                    continue;
                }

                // Anthropic uses "event: " lines followed by "data: " lines
                if let Some(data) = line.strip_prefix("data: ") {
                    if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(data) {
                        match parsed["type"].as_str() {
                            Some("content_block_delta") => {
                                if let Some(text) = parsed["delta"]["text"].as_str() {
                                    if !text.is_empty() {
                                        token_count += 1;
                                        yield StreamChunk::Token(text.to_string());
                                    }
                                }
                            }
                            Some("message_stop") => {
                                yield StreamChunk::Done { tokens_used: token_count };
                                return;
                            }
                            Some("error") => {
                                let msg = parsed["error"]["message"]
                                    .as_str()
                                    .unwrap_or("Unknown error");
                                error!("Anthropic error: {}", msg);
                                yield StreamChunk::Error(msg.to_string());
                                return;
                            }
                            _ => {}
                        }
                    }
                }
            }
        }

        yield StreamChunk::Done { tokens_used: token_count };
    }
}
