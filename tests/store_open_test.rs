mod helpers;

use hazard_index::embedding::EmbeddingProvider;
use hazard_index::pipeline::rebuild;
use hazard_index::store::search::SearchParams;
use hazard_index::store::{CollectionState, VectorStore};
use helpers::{rebuild_options, write_hazard, HashEmbedder, SITUATIONS};

#[test]
fn open_creates_missing_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("deeper").join("vectors.db");

    let store = VectorStore::open(&path).unwrap();
    assert!(path.exists());
    assert!(store.list_collections().unwrap().is_empty());
    assert!(store.vec_version().unwrap().starts_with('v'));
}

#[test]
fn file_store_uses_write_ahead_logging() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vectors.db");
    drop(VectorStore::open(&path).unwrap());

    let conn = rusqlite::Connection::open(&path).unwrap();
    let mode: String = conn
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
}

#[test]
fn loaded_collection_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("records");
    std::fs::create_dir(&input).unwrap();
    for (i, text) in SITUATIONS.iter().take(4).enumerate() {
        write_hazard(&input, &format!("{i:03}"), text, &["추락"]);
    }
    let db_path = dir.path().join("vectors.db");

    {
        let mut store = VectorStore::open(&db_path).unwrap();
        rebuild(&mut store, &HashEmbedder::new(), &rebuild_options(&input, "hazards"), &mut |_| {})
            .unwrap();
    }

    let store = VectorStore::open(&db_path).unwrap();
    let info = store.describe("hazards").unwrap();
    assert_eq!(info.state, CollectionState::Loaded);
    assert_eq!(info.row_count, 4);
    assert!(info.index_params.is_some());

    let query = HashEmbedder::new().embed(SITUATIONS[2]).unwrap();
    let collection = store.collection("hazards").unwrap();
    let hits = store.search(&collection, &query, &SearchParams::default()).unwrap();
    assert_eq!(hits[0].get("source_image"), Some("002.jpg"));
}
