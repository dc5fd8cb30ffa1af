//! # Trawl CLI
//!
//! The `trawl` binary is the primary interface to the search service.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `trawl serve` | Run the HTTP service (build, status, search endpoints) |
//! | `trawl index <path>` | Build or update the index for a directory and wait for completion |
//! | `trawl search "<query>"` | Search indexed files |
//! | `trawl status <request-id>` | Show the status of a build request |
//!
//! ## Examples
//!
//! ```bash
//! # Run the HTTP service
//! trawl serve --config ./config/trawl.toml
//!
//! # Index a directory, excluding a subtree
//! trawl index ~/documents --exclude ~/documents/archive
//!
//! # Search
//! trawl search "quarterly report"
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use trawl::config::{load_config, Config};
use trawl::indexer::{
    request_status, IndexService, PROGRESS_STATUS_COMPLETE, PROGRESS_STATUS_FAILED,
};
use trawl::kvstore::MetadataStore;
use trawl::searchdb::SearchDb;
use trawl::server::{run_server, validate_exclude_paths, validate_root_path};

/// Trawl — a local filesystem content search service.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file with the storage layout and server bind address.
#[derive(Parser)]
#[command(
    name = "trawl",
    about = "Trawl — a local filesystem content search service",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// When the file does not exist, built-in defaults are used
    /// (`./data` storage, `127.0.0.1:8192` bind).
    #[arg(long, global = true, default_value = "./config/trawl.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service.
    ///
    /// Exposes `POST /index`, `GET /index/status/{request_id}`,
    /// `GET /search`, and `GET /health`.
    Serve,

    /// Build or incrementally update the index for a directory.
    ///
    /// Submits the build and polls its status to completion, printing
    /// progress on stderr.
    Index {
        /// Directory to index.
        path: PathBuf,
        /// Absolute folder paths under the root to skip. Repeatable.
        #[arg(long = "exclude")]
        exclude: Vec<String>,
    },

    /// Search indexed files by content, name, and path.
    Search {
        /// Query string; double-quoted phrases are matched as phrases.
        query: String,
        /// Results per page (1-100).
        #[arg(long, default_value_t = 20)]
        per_page: usize,
        /// Page number, starting at 1.
        #[arg(long, default_value_t = 1)]
        page: usize,
    },

    /// Show the recorded status of a build request.
    Status {
        /// The request id returned when the build was submitted.
        request_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        load_config(&cli.config)?
    } else {
        warn!(path = %cli.config.display(), "config file not found, using defaults");
        Config::default()
    };

    match cli.command {
        Commands::Serve => run_server(&config).await,
        Commands::Index { path, exclude } => run_index(&config, &path, exclude).await,
        Commands::Search {
            query,
            per_page,
            page,
        } => run_search(&config, &query, per_page, page),
        Commands::Status { request_id } => run_status(&config, &request_id).await,
    }
}

async fn run_index(config: &Config, path: &Path, exclude: Vec<String>) -> Result<()> {
    let root = std::fs::canonicalize(path)
        .with_context(|| format!("cannot resolve path: {}", path.display()))?;
    let root = root.to_string_lossy().into_owned();

    validate_root_path(&root).map_err(|err| anyhow::anyhow!(err))?;
    validate_exclude_paths(&root, &exclude).map_err(|err| anyhow::anyhow!(err))?;

    let store = MetadataStore::open(config).await?;
    let index = Arc::new(SearchDb::open(config)?);
    let shutdown = CancellationToken::new();
    let service = IndexService::new(store.clone(), index.clone(), shutdown.clone()).await;

    let request_id = uuid::Uuid::new_v4().to_string();
    service.build(&root, exclude, &request_id).await?;
    println!("indexing {} (request {})", root, request_id);

    let mut last_status = None;
    let final_status = loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let status = service.get_status(&request_id).await?;
        if last_status != Some(status) {
            eprintln!("  progress: {}", status);
            last_status = Some(status);
        }
        if status == PROGRESS_STATUS_COMPLETE || status == PROGRESS_STATUS_FAILED {
            break status;
        }
    };

    shutdown.cancel();
    store.close().await;
    if let Err(err) = index.close() {
        warn!(err = %err, "error closing search index");
    }

    if final_status == PROGRESS_STATUS_FAILED {
        anyhow::bail!("indexing failed (request {})", request_id);
    }
    println!("ok");
    Ok(())
}

fn run_search(config: &Config, query: &str, per_page: usize, page: usize) -> Result<()> {
    anyhow::ensure!(
        (1..=100).contains(&per_page),
        "per-page must be between 1 and 100"
    );
    anyhow::ensure!(page >= 1, "page must be at least 1");

    let index = SearchDb::open(config)?;
    let offset = (page - 1) * per_page;
    let response = index.search(query, per_page, offset)?;

    if response.results.is_empty() {
        println!("No results");
        return Ok(());
    }

    println!("{} results ({})", response.total, response.search_time);
    for result in &response.results {
        println!("{:>7.3}  {}", result.score, result.path);
        if !result.snippet.is_empty() {
            println!("         {}", result.snippet);
        }
    }
    Ok(())
}

async fn run_status(config: &Config, request_id: &str) -> Result<()> {
    let store = MetadataStore::open(config).await?;
    let status = request_status(&store, request_id)
        .await
        .with_context(|| format!("request not found: {}", request_id))?;
    store.close().await;

    println!("request {}: status {}", request_id, status);
    Ok(())
}
