mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use hazard_index::config::HazardConfig;

#[derive(Parser)]
#[command(name = "hazard-index", version, about = "Vector index over construction hazard templates")]
struct Cli {
    /// Config file (default: ~/.hazard-index/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drop and rebuild a collection from a directory of record files
    Build {
        /// Directory of record files (default: ingest.input_dir)
        #[arg(long)]
        input: Option<PathBuf>,
        /// Collection name (default: storage.collection)
        #[arg(long)]
        collection: Option<String>,
    },
    /// Find the stored hazard situations closest to a description
    Search {
        query: String,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        nprobe: Option<usize>,
        #[arg(long)]
        collection: Option<String>,
    },
    /// Show catalog details for one collection, or list all of them
    Inspect {
        #[arg(long)]
        collection: Option<String>,
    },
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to the configured cache directory
    Download,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => HazardConfig::load_from(path)?,
        None => HazardConfig::load()?,
    };

    // Logs go to stderr so stdout carries only reports and search results.
    let filter = EnvFilter::try_new(&config.logging.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Build { input, collection } => {
            cli::build::build(config, input, collection).await?;
        }
        Command::Search {
            query,
            limit,
            nprobe,
            collection,
        } => {
            cli::search::search(&config, &query, limit, nprobe, collection).await?;
        }
        Command::Inspect { collection } => {
            cli::inspect::inspect(&config, collection.as_deref())?;
        }
        Command::Model { action } => match action {
            ModelAction::Download => {
                cli::model_download(&config.embedding).await?;
            }
        },
    }

    Ok(())
}
