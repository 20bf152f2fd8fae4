//! Full-rebuild pipeline: schema → ingest → index → load.
//!
//! [`rebuild`] is the single entry point. Every run drops and recreates the
//! collection; there is no incremental append path.

pub mod ingest;
pub mod record;

use serde::Serialize;
use std::path::PathBuf;

use crate::embedding::EmbeddingProvider;
use crate::error::{IndexError, Result};
use crate::store::index::{IndexParams, IndexSummary};
use crate::store::{CollectionSchema, CollectionState, VectorStore};
pub use ingest::{ingest, IngestReport};
pub use record::{read_records, serialize_tags, LoadedRecord, RecordFailure, RecordScan, SourceRecord};

/// Inputs for one rebuild.
#[derive(Debug, Clone)]
pub struct RebuildOptions {
    pub collection: String,
    /// Vector width declared by the schema. Must match the embedder.
    pub dimensions: usize,
    pub input_dir: PathBuf,
    pub extension: String,
    pub batch_size: usize,
    pub index: IndexParams,
    /// Recorded in the catalog so searches can detect a model change.
    pub embedding_model: String,
}

/// Final state of one rebuild, reported once at the end of the run.
#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub collection: String,
    pub build_id: String,
    pub state: CollectionState,
    pub ingest: IngestReport,
    /// `None` when the corpus was empty and indexing was skipped.
    pub index: Option<IndexSummary>,
}

impl RebuildReport {
    pub fn indexed(&self) -> bool {
        self.index.is_some()
    }
}

/// Drop and recreate the collection, ingest every record file, then index and
/// load it.
///
/// Configuration problems and an unreadable input directory are reported
/// before the existing collection is touched. An empty corpus leaves the new
/// collection in `Created` with no index; that is a warning, not an error.
pub fn rebuild(
    store: &mut VectorStore,
    embedder: &dyn EmbeddingProvider,
    options: &RebuildOptions,
    on_progress: &mut dyn FnMut(usize),
) -> Result<RebuildReport> {
    if embedder.dimensions() != options.dimensions {
        return Err(IndexError::Schema(format!(
            "embedder produces {} dimensions, schema declares {}",
            embedder.dimensions(),
            options.dimensions
        )));
    }
    let schema = CollectionSchema::hazard_templates(options.dimensions);
    schema.validate()?;
    options.index.validate()?;

    let scan = read_records(&options.input_dir, &options.extension)?;

    let collection = store.ensure_collection(&options.collection, schema)?;
    store.set_embedding_model(&collection, &options.embedding_model)?;

    let mut report = ingest(
        store,
        &collection,
        embedder,
        &scan.records,
        options.batch_size,
        on_progress,
    )?;
    // Unparsable files count toward the same total as parsed ones.
    report.total += scan.failures.len();
    let mut malformed = scan.failures;
    malformed.append(&mut report.malformed);
    report.malformed = malformed;

    let index = if report.inserted > 0 {
        let summary = store.build_index(&collection, &options.index)?;
        store.load(&collection)?;
        Some(summary)
    } else {
        tracing::warn!(
            collection = collection.name(),
            "empty dataset: skipping index construction and load"
        );
        None
    };

    let info = store.describe(collection.name())?;
    tracing::info!(
        collection = collection.name(),
        total = report.total,
        inserted = report.inserted,
        filtered = report.filtered,
        malformed = report.malformed.len(),
        indexed = index.is_some(),
        state = %info.state,
        "rebuild finished"
    );

    Ok(RebuildReport {
        collection: info.name,
        build_id: info.build_id,
        state: info.state,
        ingest: report,
        index,
    })
}
