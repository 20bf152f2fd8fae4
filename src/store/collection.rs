//! Collection handle, lifecycle state, and bulk insertion.

use rusqlite::{params, Connection, OptionalExtension, ToSql};
use serde::Serialize;

use super::index::IndexParams;
use super::schema::{
    CollectionSchema, TableNames, DESCRIPTION_FIELD, HAZARD_TAGS_FIELD, SCALAR_FIELDS,
    SOURCE_IMAGE_FIELD, TEMPLATE_BODY_FIELD, VECTOR_FIELD,
};
use super::{embedding_to_bytes, VectorStore};
use crate::error::{IndexError, Result};

/// Lifecycle of a collection. A dropped collection has no state at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionState {
    /// Schema exists, no rows inserted yet.
    Created,
    /// Bulk insert committed.
    Populated,
    /// IVF (or flat) index built over every row.
    Indexed,
    /// Serving queries.
    Loaded,
}

impl CollectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Populated => "populated",
            Self::Indexed => "indexed",
            Self::Loaded => "loaded",
        }
    }
}

impl std::fmt::Display for CollectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CollectionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "populated" => Ok(Self::Populated),
            "indexed" => Ok(Self::Indexed),
            "loaded" => Ok(Self::Loaded),
            _ => Err(format!("unknown collection state: {s}")),
        }
    }
}

/// Handle to one build of a named collection. Obtained from
/// [`VectorStore::ensure_collection`] or [`VectorStore::collection`].
///
/// A rebuild under the same name invalidates older handles: every store call
/// checks the handle's build id against the catalog.
#[derive(Debug, Clone)]
pub struct Collection {
    name: String,
    schema: CollectionSchema,
    build_id: String,
}

impl Collection {
    pub(crate) fn new(name: &str, schema: CollectionSchema, build_id: &str) -> Self {
        Self {
            name: name.to_string(),
            schema,
            build_id: build_id.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn build_id(&self) -> &str {
        &self.build_id
    }

    pub fn schema(&self) -> &CollectionSchema {
        &self.schema
    }

    pub(crate) fn tables(&self) -> TableNames {
        TableNames::for_name(&self.name)
    }
}

/// Catalog entry for one collection.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub state: CollectionState,
    pub row_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_params: Option<IndexParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    pub build_id: String,
    pub created_at: String,
    pub updated_at: String,
}

pub(crate) fn read_info(conn: &Connection, name: &str) -> Result<Option<CollectionInfo>> {
    let row = conn
        .query_row(
            "SELECT state, row_count, index_params, embedding_model, build_id, created_at, updated_at \
             FROM collections WHERE name = ?1",
            params![name],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            },
        )
        .optional()?;

    let Some((state, row_count, index_params, embedding_model, build_id, created_at, updated_at)) =
        row
    else {
        return Ok(None);
    };

    let state = state
        .parse::<CollectionState>()
        .map_err(|e| IndexError::Schema(format!("corrupt catalog entry for {name}: {e}")))?;
    let index_params = index_params
        .map(|json| serde_json::from_str::<IndexParams>(&json))
        .transpose()
        .map_err(|e| IndexError::Schema(format!("corrupt index params for {name}: {e}")))?;

    Ok(Some(CollectionInfo {
        name: name.to_string(),
        state,
        row_count: row_count.max(0) as u64,
        index_params,
        embedding_model,
        build_id,
        created_at,
        updated_at,
    }))
}

/// Move a collection to `state`, stamping `updated_at`.
pub(crate) fn set_state(conn: &Connection, name: &str, state: CollectionState) -> Result<()> {
    conn.execute(
        "UPDATE collections SET state = ?1, updated_at = ?2 WHERE name = ?3",
        params![state.as_str(), chrono::Utc::now().to_rfc3339(), name],
    )?;
    Ok(())
}

/// Column-oriented rows for one bulk insert. Position `i` of every column
/// describes the same entity.
#[derive(Debug, Clone, Default)]
pub struct EntityBatch {
    pub vectors: Vec<Vec<f32>>,
    pub template_bodies: Vec<String>,
    pub hazard_tags: Vec<String>,
    pub source_images: Vec<String>,
    pub descriptions: Vec<String>,
}

impl EntityBatch {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            vectors: Vec::with_capacity(n),
            template_bodies: Vec::with_capacity(n),
            hazard_tags: Vec::with_capacity(n),
            source_images: Vec::with_capacity(n),
            descriptions: Vec::with_capacity(n),
        }
    }

    /// Append one entity across all columns.
    pub fn push(
        &mut self,
        vector: Vec<f32>,
        template_body: &str,
        hazard_tags: &str,
        source_image: &str,
        description: &str,
    ) {
        self.vectors.push(vector);
        self.template_bodies.push(template_body.to_string());
        self.hazard_tags.push(hazard_tags.to_string());
        self.source_images.push(source_image.to_string());
        self.descriptions.push(description.to_string());
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// String column by field name.
    pub fn column(&self, field: &str) -> Option<&[String]> {
        match field {
            TEMPLATE_BODY_FIELD => Some(&self.template_bodies),
            HAZARD_TAGS_FIELD => Some(&self.hazard_tags),
            SOURCE_IMAGE_FIELD => Some(&self.source_images),
            DESCRIPTION_FIELD => Some(&self.descriptions),
            _ => None,
        }
    }

    /// Check column alignment, vector widths and string bounds against `schema`.
    pub fn validate(&self, schema: &CollectionSchema) -> Result<()> {
        let n = self.len();
        let dim = schema.vector_dim()?;

        for field in SCALAR_FIELDS {
            let column = self
                .column(field)
                .ok_or_else(|| IndexError::Schema(format!("batch has no column {field}")))?;
            if column.len() != n {
                return Err(IndexError::Schema(format!(
                    "column {field} has {} values, expected {n}",
                    column.len()
                )));
            }
            let max = schema
                .max_length(field)
                .ok_or_else(|| IndexError::Schema(format!("schema has no string field {field}")))?;
            if let Some((i, value)) = column
                .iter()
                .enumerate()
                .find(|(_, v)| v.chars().count() > max)
            {
                return Err(IndexError::Schema(format!(
                    "row {i}: {field} is {} chars, max {max}",
                    value.chars().count()
                )));
            }
        }

        if let Some((i, v)) = self.vectors.iter().enumerate().find(|(_, v)| v.len() != dim) {
            return Err(IndexError::Schema(format!(
                "row {i}: {VECTOR_FIELD} has {} dimensions, schema declares {dim}",
                v.len()
            )));
        }

        Ok(())
    }
}

impl VectorStore {
    /// Bulk-insert `batch` into a freshly created collection in one transaction.
    ///
    /// Returns the number of rows the store inserted. The whole batch is
    /// rejected if any row violates the schema; nothing is truncated or padded.
    pub fn insert(&mut self, collection: &Collection, batch: &EntityBatch) -> Result<usize> {
        let state = self.current(collection, "insert into")?.state;
        if state != CollectionState::Created {
            return Err(IndexError::InvalidState {
                name: collection.name().to_string(),
                state: state.to_string(),
                operation: "insert into",
            });
        }
        batch.validate(collection.schema())?;

        let columns: Vec<&[String]> = SCALAR_FIELDS
            .iter()
            .filter_map(|field| batch.column(field))
            .collect();
        let placeholders: Vec<String> = (1..=SCALAR_FIELDS.len() + 1)
            .map(|i| format!("?{i}"))
            .collect();
        let sql = format!(
            "INSERT INTO {} ({VECTOR_FIELD}, {}) VALUES ({})",
            collection.tables().entities,
            SCALAR_FIELDS.join(", "),
            placeholders.join(", ")
        );

        let tx = self.conn_mut().transaction()?;
        let mut inserted = 0usize;
        {
            let mut stmt = tx.prepare(&sql)?;
            for (i, vector) in batch.vectors.iter().enumerate() {
                let bytes = embedding_to_bytes(vector);
                let mut values: Vec<&dyn ToSql> = Vec::with_capacity(columns.len() + 1);
                values.push(&bytes);
                for column in &columns {
                    values.push(&column[i]);
                }
                inserted += stmt
                    .execute(values.as_slice())
                    .map_err(IndexError::from_backend)?;
            }
        }
        tx.execute(
            "UPDATE collections SET state = ?1, row_count = ?2, updated_at = ?3 WHERE name = ?4",
            params![
                CollectionState::Populated.as_str(),
                inserted as i64,
                chrono::Utc::now().to_rfc3339(),
                collection.name()
            ],
        )?;
        tx.commit()?;

        tracing::info!(
            collection = collection.name(),
            attempted = batch.len(),
            inserted,
            "bulk insert committed"
        );
        Ok(inserted)
    }
}
