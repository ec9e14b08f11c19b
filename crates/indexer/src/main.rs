//! Operational CLI for the eosearch index.
//!
//! The ingestion core itself is a library embedded by the host chain; this
//! binary covers the cluster-side chores: creating the index with its
//! mappings, dropping it, and reporting per-collection document counts.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use eosearch_indexer::{collections, mappings};
use eosearch_indexer::{ElasticClient, IndexerConfig, SearchBackend};

#[derive(Parser)]
#[command(name = "eosearch-indexer")]
#[command(version, about = "Operational tooling for the eosearch index", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "eosearch.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the physical index with its mapping schema
    InitIndex,

    /// Drop the physical index
    DeleteIndex,

    /// Show per-collection document counts
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.debug);

    let config = load_config(&cli.config)?;
    let client = ElasticClient::new(
        config.elasticsearch.endpoints.clone(),
        config.elasticsearch.index_name.clone(),
    );

    match cli.command {
        Commands::InitIndex => init_index(&client).await?,
        Commands::DeleteIndex => delete_index(&client).await?,
        Commands::Status => show_status(&client).await?,
    }

    Ok(())
}

/// Initialize tracing subscriber for logging
fn init_logging(debug: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = if debug {
        EnvFilter::new("eosearch_indexer=debug,eosearch_core=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("eosearch_indexer=info"))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();
}

fn load_config(path: &str) -> Result<IndexerConfig> {
    if std::path::Path::new(path).exists() {
        IndexerConfig::from_file(path)
    } else {
        info!(path, "config file not found, using defaults");
        Ok(IndexerConfig::default())
    }
}

async fn init_index(client: &ElasticClient) -> Result<()> {
    info!(index = client.index_name(), "creating index");
    client
        .init_index(&mappings::index_mappings())
        .await
        .context("failed to initialize index")?;
    info!("index ready");
    Ok(())
}

async fn delete_index(client: &ElasticClient) -> Result<()> {
    info!(index = client.index_name(), "dropping index");
    client.delete_index().await.context("failed to delete index")?;
    info!("index dropped");
    Ok(())
}

async fn show_status(client: &ElasticClient) -> Result<()> {
    println!("\n=== eosearch index status ===\n");
    println!("Index: {}", client.index_name());
    println!();
    for collection in collections::ALL {
        let count = client
            .count_doc(collection)
            .await
            .with_context(|| format!("failed to count {collection}"))?;
        println!("  {collection:<20} {count}");
    }
    println!();
    Ok(())
}
