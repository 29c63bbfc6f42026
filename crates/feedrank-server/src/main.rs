//! Feedrank — retrieval ranking and feedback-driven rescoring server.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

mod analysis;
mod routes;
mod state;

use state::AppState;

fn resolve_data_dir() -> PathBuf {
    std::env::var("FEEDRANK_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"))
}

fn open_store(data_dir: &PathBuf) -> anyhow::Result<(feedrank_core::FeedrankConfig, Arc<feedrank_store::SqliteStore>)> {
    let config = feedrank_core::FeedrankConfig::from_env(data_dir)?;
    let store = feedrank_store::SqliteStore::open(&config.data_paths.vectordb, config.embedding_dim)
        .map_err(|e| anyhow::anyhow!("Failed to open store: {}", e))?;
    Ok((config, Arc::new(store)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    // Handle CLI subcommands
    if args.len() > 1 {
        match args[1].as_str() {
            "rescore" => {
                let mode = match args.get(2).map(String::as_str) {
                    Some("plain") => feedrank_scoring::ScoringMode::Plain,
                    Some("enhanced") | None => feedrank_scoring::ScoringMode::Enhanced,
                    Some(other) => {
                        eprintln!("Unknown mode: {}. Use 'plain' or 'enhanced'.", other);
                        std::process::exit(1);
                    }
                };
                let (_, store) = open_store(&resolve_data_dir())?;
                let outcome = feedrank_scoring::FeedbackReducer::new(&store)
                    .recompute(mode)
                    .map_err(|e| anyhow::anyhow!("Rescore failed: {}", e))?;
                let flagged = feedrank_scoring::detect_and_flag(&store)
                    .map_err(|e| anyhow::anyhow!("Review detection failed: {}", e))?;
                println!(
                    "Rescored {} chunks, {} sources from {} feedback items; {} chunks flagged",
                    outcome.chunks_updated,
                    outcome.sources_updated,
                    outcome.feedback_considered,
                    flagged
                );
                return Ok(());
            }
            "migrate-scores" => {
                let (_, store) = open_store(&resolve_data_dir())?;
                let sources = store
                    .aggregate_to_source()
                    .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;
                println!("Aggregated chunk scores into {} source rows", sources);
                return Ok(());
            }
            "purge" => {
                let (_, store) = open_store(&resolve_data_dir())?;
                let report = store
                    .purge_user_data()
                    .map_err(|e| anyhow::anyhow!("Purge failed: {}", e))?;
                println!(
                    "Purged {} feedback, {} responses, {} queries, {} flags; reset {} chunk scores",
                    report.feedback,
                    report.responses,
                    report.queries,
                    report.review_flags,
                    report.chunk_scores_reset
                );
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("Feedrank — retrieval ranking and feedback rescoring server");
                println!();
                println!("Usage: feedrank [command]");
                println!();
                println!("Commands:");
                println!("  (none)                   Start the server");
                println!("  rescore [plain|enhanced] Recompute all quality scores");
                println!("  migrate-scores           Roll chunk scores up to source level");
                println!("  purge                    Delete all user data, reset scores");
                println!("  help                     Show this help message");
                return Ok(());
            }
            _ => {
                eprintln!("Unknown command: {}. Use 'feedrank help' for usage.", args[1]);
                std::process::exit(1);
            }
        }
    }

    // Normal server startup
    let data_dir = resolve_data_dir();
    info!("Data directory: {}", data_dir.display());

    let (config, store) = open_store(&data_dir)?;
    let port = config.port;

    let embedder = feedrank_embed::create_embedder(config.embedding_dim);

    let state = Arc::new(AppState::new(config, store, embedder));

    // Start background comment-analysis worker
    analysis::start_analysis_worker(state.clone());

    let app = routes::build_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Feedrank server listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
