//! Embedded vector store: named collections in a SQLite database.
//!
//! Each collection owns an entities table plus, once indexed, a centroid table
//! and an inverted-list table. A `collections` catalog table tracks schema,
//! lifecycle state, row count and index configuration, so state survives
//! across processes. Vector distances are computed by the sqlite-vec
//! extension's scalar functions.

pub mod collection;
pub mod index;
pub mod schema;
pub mod search;

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Once;
use std::time::Duration;

use crate::error::{IndexError, Result};
pub use collection::{Collection, CollectionInfo, CollectionState, EntityBatch};
pub use schema::{CollectionSchema, FieldSchema, FieldType};

static SQLITE_VEC_INIT: Once = Once::new();

/// How long a call waits on a locked database before failing.
pub const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

const MAX_NAME_LEN: usize = 255;

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Convert an f32 embedding slice to raw bytes for sqlite-vec.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            embedding.len() * std::mem::size_of::<f32>(),
        )
    }
}

/// Decode a vector blob written by [`embedding_to_bytes`].
pub fn bytes_to_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(IndexError::Schema(format!(
            "vector blob of {} bytes is not a whole number of f32 values",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Check a collection name against `[A-Za-z_][A-Za-z0-9_]*`.
///
/// Names are interpolated into table identifiers, so this is the only gate
/// between user input and DDL.
pub fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_tail = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid_head && valid_tail && name.len() <= MAX_NAME_LEN {
        Ok(())
    } else {
        Err(IndexError::InvalidName(name.to_string()))
    }
}

/// A handle to the vector store. Owns one SQLite connection.
pub struct VectorStore {
    conn: Connection,
}

impl VectorStore {
    /// Open (or create) the store at the given path, with sqlite-vec loaded and
    /// the catalog initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        load_sqlite_vec();

        let conn = Connection::open(path).map_err(|source| IndexError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        // WAL lets searches in other processes read during a rebuild.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        schema::init_catalog(&conn)?;

        tracing::info!(path = %path.display(), "vector store opened");
        Ok(Self { conn })
    }

    /// Open a throwaway in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        load_sqlite_vec();
        let conn = Connection::open_in_memory().map_err(|source| IndexError::Open {
            path: ":memory:".into(),
            source,
        })?;
        schema::init_catalog(&conn)?;
        Ok(Self { conn })
    }

    /// Version string reported by the sqlite-vec extension.
    pub fn vec_version(&self) -> Result<String> {
        Ok(self.conn.query_row("SELECT vec_version()", [], |r| r.get(0))?)
    }

    pub fn has_collection(&self, name: &str) -> Result<bool> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) > 0 FROM collections WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?)
    }

    /// Names of all collections, sorted.
    pub fn list_collections(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM collections ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    /// Drop a collection and everything it owns. Returns `false` if it did not exist.
    pub fn drop_collection(&mut self, name: &str) -> Result<bool> {
        validate_name(name)?;
        let tx = self.conn.transaction()?;
        let existed = drop_in(&tx, name)?;
        tx.commit()?;
        if existed {
            tracing::info!(collection = name, "collection dropped");
        }
        Ok(existed)
    }

    /// Create `name` with `schema`, discarding any existing collection of that name.
    ///
    /// Drop and create share one transaction: if creation fails the previous
    /// collection is left untouched.
    pub fn ensure_collection(
        &mut self,
        name: &str,
        schema: CollectionSchema,
    ) -> Result<Collection> {
        validate_name(name)?;
        schema.validate()?;
        let build_id = uuid::Uuid::now_v7().to_string();
        let collection = Collection::new(name, schema, &build_id);

        let tx = self.conn.transaction()?;
        let replaced = drop_in(&tx, name)?;
        tx.execute_batch(&schema::entities_ddl(&collection))?;

        let schema_json = serde_json::to_string(collection.schema())
            .map_err(|e| IndexError::Schema(format!("failed to encode schema: {e}")))?;
        let now = chrono::Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO collections (name, schema, state, row_count, build_id, created_at, updated_at) \
             VALUES (?1, ?2, ?3, 0, ?4, ?5, ?5)",
            params![name, schema_json, CollectionState::Created.as_str(), build_id, now],
        )?;
        tx.commit()?;

        tracing::info!(
            collection = name,
            build_id = %build_id,
            replaced,
            dim = collection.schema().vector_dim().unwrap_or_default(),
            "collection created"
        );
        Ok(collection)
    }

    /// Open a handle to an existing collection.
    pub fn collection(&self, name: &str) -> Result<Collection> {
        let (schema_json, build_id): (String, String) = self
            .conn
            .query_row(
                "SELECT schema, build_id FROM collections WHERE name = ?1",
                params![name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or_else(|| IndexError::CollectionNotFound(name.to_string()))?;
        let schema: CollectionSchema = serde_json::from_str(&schema_json)
            .map_err(|e| IndexError::Schema(format!("corrupt catalog schema for {name}: {e}")))?;
        Ok(Collection::new(name, schema, &build_id))
    }

    /// Catalog entry for a collection.
    pub fn describe(&self, name: &str) -> Result<CollectionInfo> {
        collection::read_info(&self.conn, name)?
            .ok_or_else(|| IndexError::CollectionNotFound(name.to_string()))
    }

    /// Record which embedding model produced a collection's vectors.
    pub fn set_embedding_model(&self, collection: &Collection, model: &str) -> Result<()> {
        self.current(collection, "record the model of")?;
        let rows = self.conn.execute(
            "UPDATE collections SET embedding_model = ?1 WHERE name = ?2",
            params![model, collection.name()],
        )?;
        if rows == 0 {
            return Err(IndexError::CollectionNotFound(collection.name().to_string()));
        }
        Ok(())
    }

    /// Catalog entry for the build `collection` was opened on. Fails with
    /// `InvalidState` if the name has since been rebuilt.
    pub(crate) fn current(
        &self,
        collection: &Collection,
        operation: &'static str,
    ) -> Result<CollectionInfo> {
        let info = self.describe(collection.name())?;
        if info.build_id != collection.build_id() {
            return Err(IndexError::InvalidState {
                name: collection.name().to_string(),
                state: format!(
                    "replaced (handle is build {}, current build is {})",
                    collection.build_id(),
                    info.build_id
                ),
                operation,
            });
        }
        Ok(info)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

/// Drop all tables of `name` and its catalog row inside `tx`.
fn drop_in(tx: &Transaction, name: &str) -> Result<bool> {
    let collection_tables = schema::TableNames::for_name(name);
    tx.execute_batch(&format!(
        "DROP TABLE IF EXISTS {lists};
         DROP TABLE IF EXISTS {centroids};
         DROP TABLE IF EXISTS {entities};",
        lists = collection_tables.lists,
        centroids = collection_tables.centroids,
        entities = collection_tables.entities,
    ))?;
    let removed = tx.execute("DELETE FROM collections WHERE name = ?1", params![name])?;
    Ok(removed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_name_accepts_identifiers() {
        assert!(validate_name("construction_safety_v1").is_ok());
        assert!(validate_name("_shadow").is_ok());
    }

    #[test]
    fn validate_name_rejects_injection_and_empty() {
        for bad in ["", "1abc", "a-b", "a\"; DROP TABLE collections; --", "안전"] {
            assert!(
                matches!(validate_name(bad), Err(IndexError::InvalidName(_))),
                "{bad:?} should be rejected"
            );
        }
        assert!(validate_name(&"a".repeat(256)).is_err());
    }

    #[test]
    fn vector_bytes_decode() {
        let v = vec![0.25f32, -1.5, 3.0];
        assert_eq!(bytes_to_embedding(embedding_to_bytes(&v)).unwrap(), v);
        assert!(bytes_to_embedding(&[0u8; 5]).is_err());
    }

    #[test]
    fn in_memory_store_has_sqlite_vec() {
        let store = VectorStore::open_in_memory().unwrap();
        assert!(!store.vec_version().unwrap().is_empty());
        assert!(store.list_collections().unwrap().is_empty());
    }

    #[test]
    fn drop_missing_collection_reports_false() {
        let mut store = VectorStore::open_in_memory().unwrap();
        assert!(!store.drop_collection("nothing_here").unwrap());
    }
}
