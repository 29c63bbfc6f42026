//! Query categorization and cited answer generation.

use reqwest::Client;
use tracing::warn;

use crate::config::LLMConfig;
use crate::providers::complete;
use crate::types::ChatMessage;
use feedrank_core::{Error, Result};

/// Fixed query categories for the analytics breakdown.
pub const CATEGORIES: &[&str] = &[
    "Monetary Policy",
    "Banking Regulation",
    "Payments",
    "Economic Data",
    "Consumer Information",
    "Other",
];

const ANSWER_SYSTEM_PROMPT: &str = "You answer questions using only the numbered source \
excerpts provided. Cite sources inline as [1], [2], etc. matching the excerpt numbers. \
If the excerpts do not contain the answer, say so plainly instead of guessing. \
Keep answers concise and factual.";

/// One retrieved excerpt handed to the model as context.
#[derive(Debug, Clone)]
pub struct AnswerContext {
    pub content: String,
    pub source_url: Option<String>,
    pub source_title: Option<String>,
}

/// Classify a query into one of the fixed categories. Any failure or
/// unexpected reply maps to "Other"; categorization never blocks a query.
pub async fn categorize_query(client: &Client, config: &LLMConfig, query_text: &str) -> String {
    let (provider, model, api_key) = match config.resolve_provider() {
        Some(resolved) => resolved,
        None => return "Other".to_string(),
    };

    let system = format!(
        "Classify the question into exactly one of these categories: {}. \
         Reply with the category name only.",
        CATEGORIES.join(", ")
    );
    let messages = vec![ChatMessage::system(system), ChatMessage::user(query_text)];

    match complete(client, provider, &messages, &model, &api_key, 0.0, 20).await {
        Ok(reply) => {
            let reply = reply.trim();
            CATEGORIES
                .iter()
                .find(|c| c.eq_ignore_ascii_case(reply))
                .map(|c| c.to_string())
                .unwrap_or_else(|| "Other".to_string())
        }
        Err(e) => {
            warn!("Query categorization failed: {}", e);
            "Other".to_string()
        }
    }
}

/// Generate a cited answer from the retrieved context. Returns the answer
/// text and the model identifier used.
pub async fn generate_answer(
    client: &Client,
    config: &LLMConfig,
    query_text: &str,
    context: &[AnswerContext],
) -> Result<(String, String)> {
    let (provider, model, api_key) = config
        .resolve_provider()
        .ok_or_else(|| Error::Config("no LLM provider configured".into()))?;

    let messages = answer_messages(query_text, context);
    let answer = complete(client, provider, &messages, &model, &api_key, 0.2, 1024).await?;
    Ok((answer, model))
}

/// Build the prompt messages for an answer call. Shared by the blocking
/// and streaming paths.
pub fn answer_messages(query_text: &str, context: &[AnswerContext]) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(ANSWER_SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "{}\n\nQuestion: {}",
            build_context_block(context),
            query_text
        )),
    ]
}

/// Render excerpts as numbered sections with their source headers, in
/// ranking order, so inline [N] citations map back to sources.
fn build_context_block(context: &[AnswerContext]) -> String {
    let mut block = String::from("Source excerpts:\n");
    for (i, ctx) in context.iter().enumerate() {
        let header = match (&ctx.source_title, &ctx.source_url) {
            (Some(title), Some(url)) => format!("{} ({})", title, url),
            (Some(title), None) => title.clone(),
            (None, Some(url)) => url.clone(),
            (None, None) => "Untitled source".to_string(),
        };
        block.push_str(&format!("\n[{}] {}\n{}\n", i + 1, header, ctx.content));
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_block_numbering() {
        let context = vec![
            AnswerContext {
                content: "The discount rate is 4%.".into(),
                source_url: Some("https://example.gov/rates".into()),
                source_title: Some("Rates FAQ".into()),
            },
            AnswerContext {
                content: "Rates are reviewed quarterly.".into(),
                source_url: None,
                source_title: None,
            },
        ];
        let block = build_context_block(&context);
        assert!(block.contains("[1] Rates FAQ (https://example.gov/rates)"));
        assert!(block.contains("The discount rate is 4%."));
        assert!(block.contains("[2] Untitled source"));
    }

    #[test]
    fn test_categories_include_other() {
        assert!(CATEGORIES.contains(&"Other"));
    }
}
