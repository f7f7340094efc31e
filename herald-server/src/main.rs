use anyhow::Result;
use clap::Parser;
use herald_server::storage::{FileQueueStore, MemoryMessageStore, MemoryOffsetManager};
use herald_server::{BrokerConfig, MessageStore, QueueService};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "herald-server")]
#[command(about = "Herald - Topic/Queue Message Broker", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yml")]
    config: String,

    /// Queue chunk base path (overrides the config file)
    #[arg(long)]
    base_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if std::path::Path::new(&args.config).exists() {
        BrokerConfig::from_file(&args.config)?
    } else {
        BrokerConfig::default()
    };

    // Override with CLI args
    if let Some(base_path) = args.base_path {
        config.chunk.base_path = base_path;
    }

    // Initialize tracing based on config
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());

    match config.logging.format.as_str() {
        "json" => {
            // JSON format for production (structured logging)
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(tracing_subscriber::EnvFilter::new(log_level))
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .init();
        }
        _ => {
            // Pretty format for development (human-readable)
            tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(tracing_subscriber::EnvFilter::new(log_level))
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .init();
        }
    }

    info!("Starting Herald Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from: {}", args.config);
    info!("Queue chunk base path: {:?}", config.chunk.base_path);

    let queue_store = Arc::new(FileQueueStore::new(config.chunk.base_path.clone()));
    let message_store = Arc::new(MemoryMessageStore::new(true));
    let offset_manager = Arc::new(MemoryOffsetManager::new());

    let queue_service = Arc::new(QueueService::new(
        config.queue.clone(),
        config.chunk.clone(),
        queue_store,
        message_store.clone(),
        offset_manager,
    ));
    queue_service.start()?;

    let stats = queue_service.stats();
    info!(
        "Queue population: {} topics, {} queues, {} resident index entries, {} unconsumed",
        stats.topic_count, stats.queue_count, stats.queue_index_count, stats.unconsumed_message_count
    );
    info!(
        "Message log position: {}",
        message_store.current_message_position()
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    queue_service.shutdown();

    Ok(())
}
