mod helpers;

use hazard_index::embedding::EmbeddingProvider;
use hazard_index::pipeline::rebuild;
use hazard_index::store::index::{IndexKind, IndexParams, Metric};
use hazard_index::store::search::SearchParams;
use hazard_index::store::{CollectionState, VectorStore};
use hazard_index::IndexError;
use helpers::{rebuild_options, test_store, write_hazard, HashEmbedder, SITUATIONS, TEST_DIM};

const SCAFFOLD: &str = "근로자가 안전모를 착용하지 않고 2층 비계 위를 걷고 있다.";

/// A loaded collection holding every entry of [`SITUATIONS`].
fn loaded(index: IndexParams) -> (tempfile::TempDir, VectorStore) {
    let dir = tempfile::tempdir().unwrap();
    for (i, text) in SITUATIONS.iter().enumerate() {
        write_hazard(dir.path(), &format!("{i:03}"), text, &["추락"]);
    }
    let mut store = test_store();
    let mut options = rebuild_options(dir.path(), "hazards");
    options.index = index;
    rebuild(&mut store, &HashEmbedder::new(), &options, &mut |_| {}).unwrap();
    (dir, store)
}

fn embed(text: &str) -> Vec<f32> {
    HashEmbedder::new().embed(text).unwrap()
}

#[test]
fn stored_description_retrieves_itself_first() {
    let (_dir, store) = loaded(IndexParams::default());
    let collection = store.collection("hazards").unwrap();

    let hits = store
        .search(&collection, &embed(SCAFFOLD), &SearchParams::default())
        .unwrap();

    assert_eq!(hits.len(), 1, "default limit is 1");
    assert!((hits[0].score - 1.0).abs() < 1e-4, "score was {}", hits[0].score);
    assert_eq!(hits[0].get("description"), Some(SCAFFOLD));
    assert_eq!(hits[0].get("source_image"), Some("000.jpg"));
    assert!(hits[0].get("template_body").is_some());
}

#[test]
fn every_situation_is_its_own_nearest_neighbor() {
    let (_dir, store) = loaded(IndexParams::default());
    let collection = store.collection("hazards").unwrap();

    for (i, text) in SITUATIONS.iter().enumerate() {
        let hits = store
            .search(&collection, &embed(text), &SearchParams::default())
            .unwrap();
        assert_eq!(hits[0].get("source_image"), Some(format!("{i:03}.jpg").as_str()));
    }
}

#[test]
fn results_are_capped_and_ranked_best_first() {
    let (_dir, store) = loaded(IndexParams::default());
    let collection = store.collection("hazards").unwrap();
    let params = SearchParams {
        limit: 5,
        nprobe: 128,
        ..SearchParams::default()
    };

    let hits = store
        .search(&collection, &embed("작업자가 비계 위에서 안전모 없이 이동"), &params)
        .unwrap();

    assert_eq!(hits.len(), 5);
    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score, "scores must not increase");
    }
    for hit in &hits {
        assert!(hit.score <= 1.0 + 1e-4 && hit.score >= -1.0 - 1e-4);
    }
}

#[test]
fn limit_larger_than_collection_returns_every_row() {
    let (_dir, store) = loaded(IndexParams::default());
    let collection = store.collection("hazards").unwrap();
    let params = SearchParams {
        limit: 50,
        nprobe: 128,
        ..SearchParams::default()
    };

    let hits = store.search(&collection, &embed(SCAFFOLD), &params).unwrap();
    assert_eq!(hits.len(), SITUATIONS.len());
}

#[test]
fn query_width_must_match_schema() {
    let (_dir, store) = loaded(IndexParams::default());
    let collection = store.collection("hazards").unwrap();

    let result = store.search(&collection, &vec![0.5; TEST_DIM + 1], &SearchParams::default());
    assert!(matches!(result, Err(IndexError::Schema(_))));
}

#[test]
fn search_metric_must_match_index_metric() {
    let (_dir, store) = loaded(IndexParams::default());
    let collection = store.collection("hazards").unwrap();
    let params = SearchParams {
        metric: Metric::L2,
        ..SearchParams::default()
    };

    let result = store.search(&collection, &embed(SCAFFOLD), &params);
    assert!(matches!(result, Err(IndexError::InvalidParams(_))));
}

#[test]
fn flat_index_ranks_like_ivf() {
    let flat = IndexParams {
        kind: IndexKind::Flat,
        ..IndexParams::default()
    };
    let (_dir, store) = loaded(flat);
    let collection = store.collection("hazards").unwrap();

    let hits = store
        .search(&collection, &embed(SITUATIONS[3]), &SearchParams::default())
        .unwrap();
    assert_eq!(hits[0].get("source_image"), Some("003.jpg"));
    assert!((hits[0].score - 1.0).abs() < 1e-4);
}

#[test]
fn l2_index_scores_exact_match_at_zero() {
    let l2 = IndexParams {
        metric: Metric::L2,
        nlist: 4,
        ..IndexParams::default()
    };
    let (_dir, store) = loaded(l2);
    let collection = store.collection("hazards").unwrap();
    let params = SearchParams {
        metric: Metric::L2,
        limit: 3,
        ..SearchParams::default()
    };

    let hits = store.search(&collection, &embed(SITUATIONS[5]), &params).unwrap();
    assert_eq!(hits[0].get("source_image"), Some("005.jpg"));
    assert!(hits[0].score.abs() < 1e-4);
    assert!(hits.iter().all(|h| h.score <= 1e-4), "l2 scores are negated distances");
}

#[test]
fn released_collection_rejects_search_until_reloaded() {
    let (_dir, store) = loaded(IndexParams::default());
    let collection = store.collection("hazards").unwrap();

    store.release(&collection).unwrap();
    assert_eq!(store.describe("hazards").unwrap().state, CollectionState::Indexed);
    let result = store.search(&collection, &embed(SCAFFOLD), &SearchParams::default());
    assert!(matches!(result, Err(IndexError::InvalidState { .. })));

    store.load(&collection).unwrap();
    store.load(&collection).unwrap();
    assert_eq!(store.describe("hazards").unwrap().state, CollectionState::Loaded);
    assert!(store
        .search(&collection, &embed(SCAFFOLD), &SearchParams::default())
        .is_ok());
}

#[test]
fn loaded_collection_must_be_released_before_reindexing() {
    let (_dir, mut store) = loaded(IndexParams::default());
    let collection = store.collection("hazards").unwrap();

    let result = store.build_index(&collection, &IndexParams::default());
    assert!(matches!(result, Err(IndexError::InvalidState { .. })));

    store.release(&collection).unwrap();
    let summary = store
        .build_index(&collection, &IndexParams { nlist: 3, ..IndexParams::default() })
        .unwrap();
    assert_eq!(summary.rows, SITUATIONS.len());
    assert_eq!(summary.lists, 3);
}

#[test]
fn unknown_output_field_is_rejected() {
    let (_dir, store) = loaded(IndexParams::default());
    let collection = store.collection("hazards").unwrap();
    let params = SearchParams {
        output_fields: vec!["variables".into()],
        ..SearchParams::default()
    };

    let result = store.search(&collection, &embed(SCAFFOLD), &params);
    assert!(matches!(result, Err(IndexError::InvalidParams(_))));
}

#[test]
fn probing_one_list_still_finds_each_situation() {
    let pruned = IndexParams {
        nlist: 4,
        ..IndexParams::default()
    };
    let (_dir, store) = loaded(pruned);
    let collection = store.collection("hazards").unwrap();
    let params = SearchParams {
        nprobe: 1,
        limit: SITUATIONS.len(),
        ..SearchParams::default()
    };

    for (i, text) in SITUATIONS.iter().enumerate() {
        let hits = store.search(&collection, &embed(text), &params).unwrap();
        assert_eq!(hits[0].get("source_image"), Some(format!("{i:03}.jpg").as_str()));
        assert!((hits[0].score - 1.0).abs() < 1e-4, "score was {}", hits[0].score);
        assert!(
            hits.len() < SITUATIONS.len(),
            "one probed list of four must not cover all rows, got {}",
            hits.len()
        );
    }
}

#[test]
fn handle_from_a_previous_build_is_rejected() {
    let (dir, mut store) = loaded(IndexParams::default());
    let stale = store.collection("hazards").unwrap();

    let mut options = rebuild_options(dir.path(), "hazards");
    options.dimensions = TEST_DIM / 2;
    rebuild(&mut store, &HashEmbedder { dims: TEST_DIM / 2 }, &options, &mut |_| {}).unwrap();

    let result = store.search(&stale, &embed(SCAFFOLD), &SearchParams::default());
    assert!(matches!(result, Err(IndexError::InvalidState { operation: "search", .. })));

    let fresh = store.collection("hazards").unwrap();
    assert_ne!(fresh.build_id(), stale.build_id());
    let narrow = HashEmbedder { dims: TEST_DIM / 2 }.embed(SCAFFOLD).unwrap();
    let hits = store.search(&fresh, &narrow, &SearchParams::default()).unwrap();
    assert_eq!(hits[0].get("description"), Some(SCAFFOLD));
}
