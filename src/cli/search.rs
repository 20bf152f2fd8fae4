use anyhow::{Context, Result};
use std::sync::Arc;

use hazard_index::config::HazardConfig;
use hazard_index::embedding::{self, EmbeddingProvider};
use hazard_index::store::schema::{DESCRIPTION_FIELD, SOURCE_IMAGE_FIELD, TEMPLATE_BODY_FIELD};
use hazard_index::store::VectorStore;

/// Embed a free-text situation and print the closest stored hazard templates.
pub async fn search(
    config: &HazardConfig,
    query: &str,
    limit: Option<usize>,
    nprobe: Option<usize>,
    collection: Option<String>,
) -> Result<()> {
    let name = collection.unwrap_or_else(|| config.storage.collection.clone());
    let db_path = config.resolved_db_path();
    let store = VectorStore::open(&db_path).context("failed to open vector store")?;

    let handle = store.collection(&name)?;
    let info = store.describe(&name)?;
    if let Some(ref stored) = info.embedding_model {
        if stored != &config.embedding.model {
            tracing::warn!(
                stored = %stored,
                configured = %config.embedding.model,
                "collection was built with a different embedding model; rebuild it for meaningful scores"
            );
        }
    }
    let metric = info
        .index_params
        .map(|p| p.metric)
        .unwrap_or(config.index.metric);

    let provider = embedding::create_provider(&config.embedding)?;
    let provider: Arc<dyn EmbeddingProvider> = Arc::from(provider);

    let query_text = query.to_string();
    let ep = Arc::clone(&provider);
    let query_embedding = tokio::task::spawn_blocking(move || ep.embed(&query_text)).await??;

    let mut params = config.search.params(metric);
    if let Some(limit) = limit {
        params.limit = limit;
    }
    if let Some(nprobe) = nprobe {
        params.nprobe = nprobe;
    }

    let hits = store.search(&handle, &query_embedding, &params)?;
    if hits.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!("Found {} result(s) in '{}'\n", hits.len(), name);
    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [{:.4}] id {}", i + 1, hit.score, hit.id);
        if let Some(image) = hit.get(SOURCE_IMAGE_FIELD) {
            println!("   Image:       {image}");
        }
        if let Some(description) = hit.get(DESCRIPTION_FIELD) {
            println!("   Description: {description}");
        }
        if let Some(template) = hit.get(TEMPLATE_BODY_FIELD) {
            println!("   Template:    {template}");
        }
        for (field, value) in &hit.fields {
            if ![SOURCE_IMAGE_FIELD, DESCRIPTION_FIELD, TEMPLATE_BODY_FIELD].contains(&field.as_str()) {
                println!("   {field}: {value}");
            }
        }
        println!();
    }

    Ok(())
}
