//! Collection schema declaration and SQL DDL.
//!
//! A [`CollectionSchema`] lists typed fields with explicit bounds: the vector
//! field has a fixed width and every string field a maximum length in
//! characters. The catalog table and per-collection tables are defined here.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::collection::Collection;
use crate::error::{IndexError, Result};

pub const ID_FIELD: &str = "id";
pub const VECTOR_FIELD: &str = "vector";
pub const TEMPLATE_BODY_FIELD: &str = "template_body";
pub const HAZARD_TAGS_FIELD: &str = "hazard_tags";
pub const SOURCE_IMAGE_FIELD: &str = "source_image";
pub const DESCRIPTION_FIELD: &str = "description";

/// String fields every hazard collection stores, in column order.
pub const SCALAR_FIELDS: [&str; 4] = [
    TEMPLATE_BODY_FIELD,
    HAZARD_TAGS_FIELD,
    SOURCE_IMAGE_FIELD,
    DESCRIPTION_FIELD,
];

/// Catalog of collections and their lifecycle state.
const CATALOG_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY,
    schema TEXT NOT NULL,
    state TEXT NOT NULL CHECK(state IN ('created','populated','indexed','loaded')),
    row_count INTEGER NOT NULL DEFAULT 0,
    index_params TEXT,
    embedding_model TEXT,
    build_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Initialize the catalog. Idempotent (uses IF NOT EXISTS).
pub fn init_catalog(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(CATALOG_SQL)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldType {
    Int64,
    FloatVector { dim: usize },
    VarChar { max_length: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(flatten)]
    pub field_type: FieldType,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub auto_id: bool,
}

impl FieldSchema {
    /// Auto-assigned 64-bit primary key.
    pub fn primary_key(name: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type: FieldType::Int64,
            is_primary: true,
            auto_id: true,
        }
    }

    pub fn float_vector(name: &str, dim: usize) -> Self {
        Self {
            name: name.to_string(),
            field_type: FieldType::FloatVector { dim },
            is_primary: false,
            auto_id: false,
        }
    }

    pub fn varchar(name: &str, max_length: usize) -> Self {
        Self {
            name: name.to_string(),
            field_type: FieldType::VarChar { max_length },
            is_primary: false,
            auto_id: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub description: String,
    pub fields: Vec<FieldSchema>,
}

impl CollectionSchema {
    /// The hazard template layout with reference field bounds.
    pub fn hazard_templates(dim: usize) -> Self {
        Self {
            description: "Construction-site hazard situation templates".into(),
            fields: vec![
                FieldSchema::primary_key(ID_FIELD),
                FieldSchema::float_vector(VECTOR_FIELD, dim),
                FieldSchema::varchar(TEMPLATE_BODY_FIELD, 1000),
                FieldSchema::varchar(HAZARD_TAGS_FIELD, 500),
                FieldSchema::varchar(SOURCE_IMAGE_FIELD, 200),
                FieldSchema::varchar(DESCRIPTION_FIELD, 2000),
            ],
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Width of the vector field.
    pub fn vector_dim(&self) -> Result<usize> {
        self.fields
            .iter()
            .find_map(|f| match f.field_type {
                FieldType::FloatVector { dim } => Some(dim),
                _ => None,
            })
            .ok_or_else(|| IndexError::Schema("schema has no vector field".into()))
    }

    /// Maximum length of a string field, if `name` is one.
    pub fn max_length(&self, name: &str) -> Option<usize> {
        match self.field(name)?.field_type {
            FieldType::VarChar { max_length } => Some(max_length),
            _ => None,
        }
    }

    /// Check the declared fields against the stored entity layout.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(IndexError::Schema(format!("duplicate field {}", field.name)));
            }
            match field.field_type {
                FieldType::FloatVector { dim: 0 } => {
                    return Err(IndexError::Schema(format!(
                        "vector field {} has zero width",
                        field.name
                    )))
                }
                FieldType::VarChar { max_length: 0 } => {
                    return Err(IndexError::Schema(format!(
                        "string field {} has zero max length",
                        field.name
                    )))
                }
                _ => {}
            }
        }

        let primary: Vec<_> = self.fields.iter().filter(|f| f.is_primary).collect();
        match primary.as_slice() {
            [pk] if pk.name == ID_FIELD && pk.field_type == FieldType::Int64 && pk.auto_id => {}
            [] => return Err(IndexError::Schema("schema has no primary key".into())),
            _ => {
                return Err(IndexError::Schema(
                    "schema must have exactly one auto-id int64 primary key named id".into(),
                ))
            }
        }

        if !matches!(
            self.field(VECTOR_FIELD).map(|f| f.field_type),
            Some(FieldType::FloatVector { .. })
        ) {
            return Err(IndexError::Schema(format!(
                "schema must declare a float vector field named {VECTOR_FIELD}"
            )));
        }

        for name in SCALAR_FIELDS {
            if self.max_length(name).is_none() {
                return Err(IndexError::Schema(format!(
                    "schema must declare string field {name}"
                )));
            }
        }

        if self.fields.len() != SCALAR_FIELDS.len() + 2 {
            return Err(IndexError::Schema(
                "schema declares fields outside the hazard entity layout".into(),
            ));
        }

        Ok(())
    }
}

/// Quoted table identifiers owned by one collection.
///
/// The `:` separator cannot appear in a valid collection name, so generated
/// tables never collide with each other or with the catalog.
pub(crate) struct TableNames {
    pub entities: String,
    pub centroids: String,
    pub lists: String,
    pub lists_index: String,
}

impl TableNames {
    pub fn for_name(name: &str) -> Self {
        Self {
            entities: format!("\"entities:{name}\""),
            centroids: format!("\"centroids:{name}\""),
            lists: format!("\"ivf_lists:{name}\""),
            lists_index: format!("\"idx_ivf_lists:{name}\""),
        }
    }
}

/// DDL for a collection's entities table, derived from its schema.
///
/// Bounds are enforced by CHECK constraints as well as by insert validation.
pub(crate) fn entities_ddl(collection: &Collection) -> String {
    let schema = collection.schema();
    let columns: Vec<String> = schema
        .fields
        .iter()
        .map(|f| match f.field_type {
            FieldType::Int64 => format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", f.name),
            FieldType::FloatVector { dim } => format!(
                "{name} BLOB NOT NULL CHECK(length({name}) = {bytes})",
                name = f.name,
                bytes = dim * std::mem::size_of::<f32>()
            ),
            FieldType::VarChar { max_length } => format!(
                "{name} TEXT NOT NULL CHECK(length({name}) <= {max_length})",
                name = f.name
            ),
        })
        .collect();

    format!(
        "CREATE TABLE {} (\n    {}\n);",
        collection.tables().entities,
        columns.join(",\n    ")
    )
}

/// DDL for the IVF artifacts of a collection. Drops any previous index first.
pub(crate) fn index_ddl(collection: &Collection) -> String {
    let t = collection.tables();
    format!(
        "DROP TABLE IF EXISTS {lists};
         DROP TABLE IF EXISTS {centroids};
         CREATE TABLE {centroids} (
             list_id INTEGER PRIMARY KEY,
             centroid BLOB NOT NULL,
             size INTEGER NOT NULL
         );
         CREATE TABLE {lists} (
             entity_id INTEGER PRIMARY KEY,
             list_id INTEGER NOT NULL
         );
         CREATE INDEX {lists_index} ON {lists}(list_id);",
        lists = t.lists,
        centroids = t.centroids,
        lists_index = t.lists_index,
    )
}
