//! CLI `build` command: drop, recreate, ingest, index and load a collection.

use anyhow::{Context, Result};
use std::path::PathBuf;

use hazard_index::config::HazardConfig;
use hazard_index::embedding;
use hazard_index::pipeline::{self, RebuildOptions};
use hazard_index::store::VectorStore;

/// Run a full rebuild and print the final report.
pub async fn build(
    config: HazardConfig,
    input: Option<PathBuf>,
    collection: Option<String>,
) -> Result<()> {
    let options = RebuildOptions {
        collection: collection.unwrap_or_else(|| config.storage.collection.clone()),
        dimensions: config.embedding.dimensions,
        input_dir: input.unwrap_or_else(|| config.resolved_input_dir()),
        extension: config.ingest.extension.clone(),
        batch_size: config.ingest.batch_size,
        index: config.index.params(),
        embedding_model: config.embedding.model.clone(),
    };

    let db_path = config.resolved_db_path();
    let mut store = VectorStore::open(&db_path).context("failed to open vector store")?;

    let provider = embedding::create_provider(&config.embedding)
        .context("failed to create embedding provider")?;

    println!(
        "Rebuilding collection '{}' from {}...",
        options.collection,
        options.input_dir.display()
    );

    let pb = super::progress_spinner()?;
    let bar = pb.clone();
    let report = tokio::task::spawn_blocking(move || {
        pipeline::rebuild(&mut store, provider.as_ref(), &options, &mut |n| {
            bar.inc(n as u64)
        })
    })
    .await?
    .context("rebuild failed")?;
    pb.finish_and_clear();

    let ingest = &report.ingest;
    println!("Rebuild complete:");
    println!("  Collection:     {} (build {})", report.collection, report.build_id);
    println!("  Records seen:   {}", ingest.total);
    println!("  Inserted:       {}", ingest.inserted);
    println!("  Filtered:       {} (no description)", ingest.filtered);
    println!("  Malformed:      {}", ingest.malformed.len());
    for failure in &ingest.malformed {
        println!("    {}: {}", failure.path.display(), failure.reason);
    }
    match &report.index {
        Some(index) => println!(
            "  Index:          {} lists over {} rows ({} k-means iterations)",
            index.lists, index.rows, index.iterations
        ),
        None => println!("  Index:          skipped (no records inserted)"),
    }
    println!("  State:          {}", report.state);

    Ok(())
}
