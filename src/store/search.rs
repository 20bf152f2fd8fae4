//! Similarity search over a loaded collection.

use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::collection::{Collection, CollectionState};
use super::index::{IndexKind, Metric};
use super::schema::{DESCRIPTION_FIELD, SCALAR_FIELDS, SOURCE_IMAGE_FIELD, TEMPLATE_BODY_FIELD, VECTOR_FIELD};
use super::{embedding_to_bytes, VectorStore};
use crate::error::{IndexError, Result};

/// Query configuration knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParams {
    pub metric: Metric,
    /// Number of inverted lists probed. Ignored by flat indexes.
    pub nprobe: usize,
    pub limit: usize,
    pub output_fields: Vec<String>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            metric: Metric::Cosine,
            nprobe: 10,
            limit: 1,
            output_fields: vec![
                TEMPLATE_BODY_FIELD.into(),
                SOURCE_IMAGE_FIELD.into(),
                DESCRIPTION_FIELD.into(),
            ],
        }
    }
}

/// One ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct Hit {
    pub id: i64,
    /// Higher is closer. Cosine similarity for [`Metric::Cosine`].
    pub score: f32,
    /// Requested output fields by name.
    pub fields: BTreeMap<String, String>,
}

impl Hit {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

impl VectorStore {
    /// Top-`limit` entities closest to `query`, best first.
    ///
    /// Results are ordered by score descending, then by id (insertion order).
    /// Only a `Loaded` collection can be searched.
    pub fn search(
        &self,
        collection: &Collection,
        query: &[f32],
        params: &SearchParams,
    ) -> Result<Vec<Hit>> {
        let info = self.current(collection, "search")?;
        if info.state != CollectionState::Loaded {
            return Err(IndexError::InvalidState {
                name: collection.name().to_string(),
                state: info.state.to_string(),
                operation: "search",
            });
        }
        let index = info.index_params.ok_or_else(|| {
            IndexError::Schema(format!("{} is loaded but has no index params", info.name))
        })?;

        validate_params(params)?;
        let dim = collection.schema().vector_dim()?;
        if query.len() != dim {
            return Err(IndexError::Schema(format!(
                "query has {} dimensions, collection {} declares {dim}",
                query.len(),
                collection.name()
            )));
        }
        if params.metric != index.metric {
            return Err(IndexError::InvalidParams(format!(
                "search metric {} does not match index metric {}",
                params.metric, index.metric
            )));
        }
        if params.metric == Metric::Cosine && query.iter().all(|&x| x == 0.0) {
            return Err(IndexError::InvalidParams(
                "cosine query must not be the zero vector".into(),
            ));
        }

        let tables = collection.tables();
        let distance_fn = params.metric.sql_distance_fn();
        let query_bytes = embedding_to_bytes(query);

        let projection: String = params
            .output_fields
            .iter()
            .map(|f| format!(", e.{f}"))
            .collect();

        let probe_filter = match index.kind {
            IndexKind::Flat => String::new(),
            IndexKind::IvfFlat => {
                let lists = self.probe_lists(collection, query_bytes, distance_fn, params.nprobe)?;
                tracing::debug!(collection = collection.name(), ?lists, "probing lists");
                let ids: Vec<String> = lists.iter().map(i64::to_string).collect();
                format!(
                    "JOIN {} l ON l.entity_id = e.id WHERE l.list_id IN ({})",
                    tables.lists,
                    ids.join(", ")
                )
            }
        };

        // Cosine distance to a zero vector is NaN, which SQLite reads back as
        // NULL; such rows have no defined rank and are skipped.
        let sql = format!(
            "SELECT * FROM ( \
                 SELECT e.id AS id, {distance_fn}(e.{VECTOR_FIELD}, ?1) AS distance{projection} \
                 FROM {} e {probe_filter} \
             ) WHERE distance IS NOT NULL \
             ORDER BY distance, id \
             LIMIT ?2",
            tables.entities
        );

        let mut stmt = self.conn().prepare(&sql)?;
        let hits = stmt
            .query_map(params![query_bytes, params.limit as i64], |row| {
                to_hit(row, params)
            })
            .map_err(IndexError::from_backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(IndexError::from_backend)?;

        tracing::debug!(
            collection = collection.name(),
            hits = hits.len(),
            top_score = hits.first().map(|h| h.score),
            "search complete"
        );
        Ok(hits)
    }

    /// The `nprobe` list ids whose centroids are closest to the query.
    fn probe_lists(
        &self,
        collection: &Collection,
        query_bytes: &[u8],
        distance_fn: &str,
        nprobe: usize,
    ) -> Result<Vec<i64>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT list_id FROM ( \
                 SELECT list_id, {distance_fn}(centroid, ?1) AS distance FROM {} \
             ) WHERE distance IS NOT NULL \
             ORDER BY distance, list_id LIMIT ?2",
            collection.tables().centroids
        ))?;
        let lists = stmt
            .query_map(params![query_bytes, nprobe as i64], |row| row.get(0))
            .map_err(IndexError::from_backend)?
            .collect::<Result<Vec<i64>, _>>()
            .map_err(IndexError::from_backend)?;
        Ok(lists)
    }
}

fn validate_params(params: &SearchParams) -> Result<()> {
    if params.limit == 0 {
        return Err(IndexError::InvalidParams("limit must be at least 1".into()));
    }
    if params.nprobe == 0 {
        return Err(IndexError::InvalidParams("nprobe must be at least 1".into()));
    }
    if let Some(unknown) = params
        .output_fields
        .iter()
        .find(|f| !SCALAR_FIELDS.contains(&f.as_str()))
    {
        return Err(IndexError::InvalidParams(format!(
            "unknown output field {unknown:?}; expected one of {}",
            SCALAR_FIELDS.join(", ")
        )));
    }
    Ok(())
}

fn to_hit(row: &Row<'_>, params: &SearchParams) -> rusqlite::Result<Hit> {
    let distance: f64 = row.get(1)?;
    let mut fields = BTreeMap::new();
    for (i, name) in params.output_fields.iter().enumerate() {
        fields.insert(name.clone(), row.get::<_, String>(i + 2)?);
    }
    Ok(Hit {
        id: row.get(0)?,
        score: params.metric.score(distance),
        fields,
    })
}
