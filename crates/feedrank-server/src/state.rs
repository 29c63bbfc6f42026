//! Shared application state.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use feedrank_core::FeedrankConfig;
use feedrank_embed::EmbedderBackend;
use feedrank_llm::LLMConfig;
use feedrank_privacy::PiiRedactor;
use feedrank_rank::RetrievalRanker;
use feedrank_store::SqliteStore;

/// A queued request to analyze one feedback comment.
pub struct AnalysisRequest {
    pub feedback_id: i64,
    pub rating: i64,
    pub comment: String,
    pub query_text: String,
}

/// Shared application state accessible from all route handlers.
pub struct AppState {
    pub config: FeedrankConfig,
    pub store: Arc<SqliteStore>,
    pub embedder: Arc<dyn EmbedderBackend>,
    pub ranker: RetrievalRanker,
    pub redactor: PiiRedactor,
    pub llm_config: RwLock<LLMConfig>,
    pub http: reqwest::Client,
    /// Single-writer discipline for rescoring. Held for the duration of a
    /// rescore run; a second run is rejected rather than queued.
    pub rescore_lock: Mutex<()>,
    pub analysis_tx: mpsc::UnboundedSender<AnalysisRequest>,
    analysis_rx: Mutex<Option<mpsc::UnboundedReceiver<AnalysisRequest>>>,
}

impl AppState {
    pub fn new(
        config: FeedrankConfig,
        store: Arc<SqliteStore>,
        embedder: Arc<dyn EmbedderBackend>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let llm_config = LLMConfig::load(&config.data_paths.llm_config_file);
        let ranker = RetrievalRanker::new(
            Arc::clone(&store),
            config.feedback_weight,
            config.overfetch_factor,
        );

        Self {
            config,
            store,
            embedder,
            ranker,
            redactor: PiiRedactor::new(),
            llm_config: RwLock::new(llm_config),
            http: reqwest::Client::new(),
            rescore_lock: Mutex::new(()),
            analysis_tx: tx,
            analysis_rx: Mutex::new(Some(rx)),
        }
    }

    /// Take the analysis receiver (can only be called once, by the worker).
    pub fn take_analysis_rx(&self) -> Option<mpsc::UnboundedReceiver<AnalysisRequest>> {
        self.analysis_rx.lock().take()
    }
}
