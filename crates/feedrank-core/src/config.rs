//! Configuration and data directory management.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Paths to all Feedrank data directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root data directory (e.g., `data/`).
    pub root: PathBuf,
    /// Vector database directory (`data/vectordb/`).
    pub vectordb: PathBuf,
    /// LLM configuration (`data/llm-config.json`).
    pub llm_config_file: PathBuf,
}

impl DataPaths {
    /// Create data paths from a root directory. Creates directories if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let paths = Self {
            vectordb: root.join("vectordb"),
            llm_config_file: root.join("llm-config.json"),
            root,
        };
        std::fs::create_dir_all(&paths.vectordb)?;
        Ok(paths)
    }
}

/// Top-level Feedrank configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedrankConfig {
    /// HTTP server port.
    pub port: u16,
    /// Data directory paths.
    pub data_paths: DataPaths,
    /// Embedding dimension (384 for all-MiniLM-L6-v2).
    pub embedding_dim: usize,
    /// Multiplicative influence of feedback on ranking, documented range (0, 1].
    pub feedback_weight: f64,
    /// How many times `top_k` candidates to fetch from the vector index
    /// before reranking. Higher values trade latency for recall: with
    /// factor 1 the rerank can only reorder the pure-similarity top-k and
    /// a low-quality chunk can never be displaced by the (k+1)th match.
    pub overfetch_factor: usize,
}

pub const DEFAULT_FEEDBACK_WEIGHT: f64 = 0.3;
pub const DEFAULT_OVERFETCH_FACTOR: usize = 3;

impl FeedrankConfig {
    /// Create configuration from environment and defaults.
    pub fn from_env(data_dir: impl AsRef<Path>) -> Result<Self> {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3010);

        let feedback_weight = std::env::var("FEEDBACK_WEIGHT")
            .ok()
            .and_then(|w| w.parse().ok())
            .unwrap_or(DEFAULT_FEEDBACK_WEIGHT);
        if !(feedback_weight > 0.0 && feedback_weight <= 1.0) {
            return Err(Error::Config(format!(
                "FEEDBACK_WEIGHT must be in (0, 1], got {}",
                feedback_weight
            )));
        }

        let overfetch_factor = std::env::var("RERANK_OVERFETCH_FACTOR")
            .ok()
            .and_then(|f| f.parse().ok())
            .unwrap_or(DEFAULT_OVERFETCH_FACTOR)
            .max(1);

        let data_paths = DataPaths::new(data_dir)?;

        Ok(Self {
            port,
            data_paths,
            embedding_dim: 384,
            feedback_weight,
            overfetch_factor,
        })
    }
}
