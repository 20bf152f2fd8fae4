//! Filter, embed, and bulk-insert source records.

use serde::Serialize;

use super::record::{LoadedRecord, RecordFailure};
use crate::embedding::EmbeddingProvider;
use crate::error::{IndexError, Result};
use crate::store::schema::{DESCRIPTION_FIELD, HAZARD_TAGS_FIELD, SOURCE_IMAGE_FIELD, TEMPLATE_BODY_FIELD};
use crate::store::{Collection, CollectionSchema, EntityBatch, VectorStore};

/// Counts for one ingestion pass.
///
/// `inserted + filtered + malformed.len() == total` whenever the store
/// accepts the whole batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub total: usize,
    pub inserted: usize,
    /// Records skipped for having no description.
    pub filtered: usize,
    pub malformed: Vec<RecordFailure>,
}

/// Embed and insert `records` into a freshly created collection.
///
/// Records without a description are filtered; records exceeding the schema's
/// string bounds are skipped as malformed. Descriptions are embedded in chunks
/// of `batch_size`; a zero-vector embedding has no direction to rank by and
/// marks its record malformed. Every surviving row goes to the store in a
/// single bulk insert. An embedding failure aborts the whole call. `on_progress` receives
/// the number of records embedded after each chunk.
pub fn ingest(
    store: &mut VectorStore,
    collection: &Collection,
    embedder: &dyn EmbeddingProvider,
    records: &[LoadedRecord],
    batch_size: usize,
    on_progress: &mut dyn FnMut(usize),
) -> Result<IngestReport> {
    let schema = collection.schema();
    let dim = schema.vector_dim()?;
    if embedder.dimensions() != dim {
        return Err(IndexError::Schema(format!(
            "embedder produces {} dimensions, collection {} declares {dim}",
            embedder.dimensions(),
            collection.name()
        )));
    }

    let mut report = IngestReport {
        total: records.len(),
        ..Default::default()
    };

    let mut accepted = Vec::with_capacity(records.len());
    for loaded in records {
        if !loaded.record.has_description() {
            tracing::debug!(path = %loaded.path.display(), "no description, filtered");
            report.filtered += 1;
            continue;
        }
        if let Err(reason) = check_bounds(loaded, schema) {
            tracing::warn!(path = %loaded.path.display(), %reason, "skipping malformed record");
            report.malformed.push(RecordFailure {
                path: loaded.path.clone(),
                reason,
            });
            continue;
        }
        accepted.push(loaded);
    }

    if accepted.is_empty() {
        tracing::warn!(
            collection = collection.name(),
            total = report.total,
            filtered = report.filtered,
            malformed = report.malformed.len(),
            "no records to insert"
        );
        return Ok(report);
    }

    let mut batch = EntityBatch::with_capacity(accepted.len());
    for chunk in accepted.chunks(batch_size.max(1)) {
        let texts: Vec<&str> = chunk.iter().map(|r| r.record.description()).collect();
        let vectors = embedder.embed_batch(&texts).map_err(IndexError::Embedding)?;
        if vectors.len() != texts.len() {
            return Err(IndexError::Embedding(anyhow::anyhow!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }

        for (loaded, vector) in chunk.iter().zip(vectors) {
            if vector.len() != dim {
                return Err(IndexError::Schema(format!(
                    "{}: embedding has {} dimensions, collection declares {dim}",
                    loaded.path.display(),
                    vector.len()
                )));
            }
            if vector.iter().all(|&x| x == 0.0) {
                let reason = "embedding is the zero vector".to_string();
                tracing::warn!(path = %loaded.path.display(), %reason, "skipping malformed record");
                report.malformed.push(RecordFailure {
                    path: loaded.path.clone(),
                    reason,
                });
                continue;
            }
            let record = &loaded.record;
            batch.push(
                vector,
                &record.template_body,
                &record.serialized_tags(),
                &record.source_image,
                record.description(),
            );
            tracing::debug!(path = %loaded.path.display(), "record embedded");
        }
        on_progress(chunk.len());
    }

    if batch.is_empty() {
        tracing::warn!(
            collection = collection.name(),
            malformed = report.malformed.len(),
            "every embedding was degenerate, nothing to insert"
        );
        return Ok(report);
    }

    report.inserted = store.insert(collection, &batch)?;
    if report.inserted != batch.len() {
        tracing::warn!(
            attempted = batch.len(),
            inserted = report.inserted,
            "store inserted fewer rows than attempted"
        );
    }
    Ok(report)
}

/// Check a record's string fields against the schema's max lengths.
fn check_bounds(loaded: &LoadedRecord, schema: &CollectionSchema) -> Result<(), String> {
    let record = &loaded.record;
    let tags = record.serialized_tags();
    let fields = [
        (TEMPLATE_BODY_FIELD, record.template_body.as_str()),
        (HAZARD_TAGS_FIELD, tags.as_str()),
        (SOURCE_IMAGE_FIELD, record.source_image.as_str()),
        (DESCRIPTION_FIELD, record.description()),
    ];
    for (field, value) in fields {
        let max = schema
            .max_length(field)
            .ok_or_else(|| format!("schema has no string field {field}"))?;
        let len = value.chars().count();
        if len > max {
            return Err(format!("{field} is {len} chars, max {max}"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::record::SourceRecord;
    use std::path::PathBuf;

    fn loaded(description: &str) -> LoadedRecord {
        LoadedRecord {
            path: PathBuf::from("r.json"),
            record: SourceRecord {
                description: Some(description.to_string()),
                ..Default::default()
            },
        }
    }

    /// Returns the zero vector for descriptions mentioning "빈", a unit vector otherwise.
    struct SometimesZero;

    impl EmbeddingProvider for SometimesZero {
        fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            let mut v = vec![0.0; 4];
            if !text.contains('빈') {
                v[0] = 1.0;
            }
            Ok(v)
        }

        fn dimensions(&self) -> usize {
            4
        }
    }

    #[test]
    fn zero_embeddings_are_malformed() {
        let mut store = VectorStore::open_in_memory().unwrap();
        let collection = store
            .ensure_collection("c1", CollectionSchema::hazard_templates(4))
            .unwrap();
        let records = vec![loaded("근로자가 걷고 있다."), loaded("빈 문장")];

        let report = ingest(&mut store, &collection, &SometimesZero, &records, 8, &mut |_| {}).unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.malformed.len(), 1);
        assert!(report.malformed[0].reason.contains("zero vector"));
        assert_eq!(store.describe("c1").unwrap().row_count, 1);
    }

    #[test]
    fn all_zero_embeddings_leave_collection_created() {
        let mut store = VectorStore::open_in_memory().unwrap();
        let collection = store
            .ensure_collection("c1", CollectionSchema::hazard_templates(4))
            .unwrap();
        let records = vec![loaded("빈 문장")];

        let report = ingest(&mut store, &collection, &SometimesZero, &records, 8, &mut |_| {}).unwrap();
        assert_eq!(report.inserted, 0);
        assert_eq!(
            store.describe("c1").unwrap().state,
            crate::store::CollectionState::Created
        );
    }

    #[test]
    fn bounds_accept_reference_sizes() {
        let schema = CollectionSchema::hazard_templates(4);
        assert!(check_bounds(&loaded(&"가".repeat(2000)), &schema).is_ok());
    }

    #[test]
    fn bounds_reject_long_description() {
        let schema = CollectionSchema::hazard_templates(4);
        let reason = check_bounds(&loaded(&"가".repeat(2001)), &schema).unwrap_err();
        assert!(reason.starts_with("description is 2001 chars"));
    }

    #[test]
    fn bounds_measure_serialized_tags() {
        let schema = CollectionSchema::hazard_templates(4);
        let mut record = loaded("근로자");
        // 250 one-char tags join to 499 chars; 251 join to 501.
        record.record.hazard_tags = vec!["a".to_string(); 250];
        assert!(check_bounds(&record, &schema).is_ok());
        record.record.hazard_tags.push("b".into());
        assert!(check_bounds(&record, &schema).is_err());
    }
}
