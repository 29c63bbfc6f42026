//! Feedrank Embed — embedding backend seam.
//!
//! The embedding model is an external collaborator: the engine only needs
//! a way to turn text into a vector. `EmbedderBackend` is that seam.
//! Deployments wire in a real backend; without one, `NoopEmbedder` signals
//! that no embeddings are available and queries fail at the candidate
//! fetch rather than silently returning nothing.

pub mod embedder;

pub use embedder::{EmbedderBackend, EmbeddingResult, NoopEmbedder};

use std::sync::Arc;

/// Create the default embedder. There is no in-process model; this returns
/// the noop backend unless the caller substitutes its own implementation.
pub fn create_embedder(dim: usize) -> Arc<dyn EmbedderBackend> {
    tracing::info!("No embedding model configured; queries require precomputed embeddings");
    Arc::new(NoopEmbedder::new(dim))
}
