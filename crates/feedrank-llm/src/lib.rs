//! Feedrank LLM — provider plumbing for the three external language-model
//! calls the engine consumes: query categorization, cited answer
//! generation, and feedback comment analysis.

pub mod analyzer;
pub mod answer;
pub mod config;
pub mod providers;
pub mod types;

pub use analyzer::analyze_comment;
pub use answer::{answer_messages, categorize_query, generate_answer, AnswerContext, CATEGORIES};
pub use config::LLMConfig;
pub use providers::{complete, stream_llm, BoxedStream, StreamChunk};
pub use types::{ChatMessage, LLMConfigUpdate, LLMConfigView, LLMProvider};
