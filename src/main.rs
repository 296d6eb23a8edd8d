//! # Ragmill CLI
//!
//! The `ragmill` binary runs the content-ingestion worker. It provides
//! two commands: `init` bootstraps the SQLite schema and the vector
//! collection, `run` starts the polling loop.
//!
//! ## Usage
//!
//! ```bash
//! ragmill --config ./config/ragmill.toml init
//! ragmill --config ./config/ragmill.toml run
//! ```
//!
//! Provider credentials come from the environment: `OPENAI_API_KEY`
//! (embedding/extraction), `GEMINI_API_KEY` (gemini extraction),
//! `FIRECRAWL_API_KEY` (scraping), `BILLING_API_KEY` (billing),
//! `QDRANT_API_KEY` (optional), and the standard AWS variables for S3
//! uploads.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use ragmill::billing::{Billing, HttpBilling};
use ragmill::config::{self, Config};
use ragmill::embedding::OpenAiEmbedder;
use ragmill::extract;
use ragmill::files::{FileStore, LocalFileStore, S3FileStore};
use ragmill::ingest::Pipelines;
use ragmill::scrape::FirecrawlScraper;
use ragmill::store::sqlite::SqliteStore;
use ragmill::vector::{QdrantStore, VectorStore};
use ragmill::worker::Worker;
use ragmill::{db, migrate};

/// Ragmill — a content-ingestion worker for retrieval-augmented
/// generation.
#[derive(Parser)]
#[command(
    name = "ragmill",
    about = "Ragmill — a content-ingestion worker turning files, URLs, and text into vector embeddings",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragmill.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and the vector collection.
    ///
    /// Creates the SQLite database file, the `sources` and `documents`
    /// tables, and the Qdrant collection with the configured embedding
    /// dimensionality. Idempotent — running it multiple times is safe.
    Init,

    /// Start the worker's polling loop.
    ///
    /// Runs until killed. Claims one job at a time, deletion jobs first,
    /// and sleeps `worker.poll_interval_secs` between empty polls.
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ragmill=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;

            let vectors = QdrantStore::new(
                &cfg.vector.url,
                &cfg.vector.collection,
                cfg.vector.timeout_secs,
            )?;
            vectors.ensure_collection(cfg.embedding.dims as u32).await?;

            println!("Database and vector collection initialized successfully.");
        }
        Commands::Run => {
            let worker = build_worker(&cfg).await?;
            worker.run().await;
        }
    }

    Ok(())
}

async fn build_worker(cfg: &Config) -> anyhow::Result<Worker> {
    let pool = db::connect(&cfg.db.path).await?;
    migrate::run_migrations(&pool).await?;
    let store = Arc::new(SqliteStore::new(pool));

    let vectors: Arc<dyn VectorStore> = Arc::new(QdrantStore::new(
        &cfg.vector.url,
        &cfg.vector.collection,
        cfg.vector.timeout_secs,
    )?);

    let local_files: Option<Arc<dyn FileStore>> = cfg
        .uploads
        .dir
        .as_ref()
        .map(|dir| Arc::new(LocalFileStore::new(dir)) as Arc<dyn FileStore>);
    let s3_files: Option<Arc<dyn FileStore>> = if cfg.uploads.bucket.is_some() {
        Some(Arc::new(S3FileStore::new(&cfg.uploads)?))
    } else {
        None
    };

    let billing: Option<Arc<dyn Billing>> = if cfg.billing.enabled {
        Some(Arc::new(HttpBilling::new(&cfg.billing)?))
    } else {
        None
    };

    let pipelines = Pipelines {
        local_files,
        s3_files,
        extractor: Arc::from(extract::create_extractor(&cfg.extraction)?),
        scraper: Arc::new(FirecrawlScraper::new(&cfg.scrape)?),
        embedder: Arc::new(OpenAiEmbedder::new(&cfg.embedding)?),
        vectors: Arc::clone(&vectors),
        docs: store.clone(),
        chunking: cfg.chunking.clone(),
        scrape_max_attempts: cfg.worker.scrape_max_attempts,
    };

    Ok(Worker::new(
        store,
        vectors,
        billing,
        pipelines,
        Duration::from_secs(cfg.worker.poll_interval_secs),
        cfg.worker.page_size,
    ))
}
