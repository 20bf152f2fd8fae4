#![allow(dead_code)]

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

use hazard_index::embedding::EmbeddingProvider;
use hazard_index::pipeline::RebuildOptions;
use hazard_index::store::index::IndexParams;
use hazard_index::store::VectorStore;

/// Small width so tests stay fast; the schema accepts any positive dimension.
pub const TEST_DIM: usize = 64;

/// Open a fresh in-memory store with the catalog initialized.
pub fn test_store() -> VectorStore {
    VectorStore::open_in_memory().unwrap()
}

/// Deterministic embedder: hashes character bigrams into buckets and
/// L2-normalizes. Identical text yields identical vectors, and texts sharing
/// many bigrams land close together.
pub struct HashEmbedder {
    pub dims: usize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self { dims: TEST_DIM }
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dims];
        let chars: Vec<char> = text.chars().collect();
        if chars.len() < 2 {
            v[0] = 1.0;
        }
        for pair in chars.windows(2) {
            let bucket = fnv1a(pair) % self.dims as u64;
            v[bucket as usize] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        for x in &mut v {
            *x /= norm;
        }
        Ok(v)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

fn fnv1a(chars: &[char]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for c in chars {
        for byte in (*c as u32).to_le_bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
    }
    hash
}

/// Fails on every call, like an unreachable model.
pub struct FailingEmbedder;

impl EmbeddingProvider for FailingEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("model unavailable")
    }

    fn dimensions(&self) -> usize {
        TEST_DIM
    }
}

/// Claims the schema width but returns shorter vectors.
pub struct ShortEmbedder;

impl EmbeddingProvider for ShortEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![1.0; TEST_DIM / 2])
    }

    fn dimensions(&self) -> usize {
        TEST_DIM
    }
}

/// Write one record file under `dir`.
pub fn write_record(dir: &Path, name: &str, json: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, json).unwrap();
    path
}

/// Write a well-formed record with the given description and tags.
pub fn write_hazard(dir: &Path, name: &str, description: &str, tags: &[&str]) -> PathBuf {
    let record = serde_json::json!({
        "description": description,
        "template_body": format!("{{worker}}: {description}"),
        "variables": { "worker": "근로자" },
        "hazard_tags": tags,
        "source_image": format!("{name}.jpg"),
    });
    write_record(dir, &format!("{name}.json"), &record.to_string())
}

/// Rebuild options pointing at `input_dir`, sized for [`HashEmbedder`].
pub fn rebuild_options(input_dir: &Path, collection: &str) -> RebuildOptions {
    RebuildOptions {
        collection: collection.to_string(),
        dimensions: TEST_DIM,
        input_dir: input_dir.to_path_buf(),
        extension: "json".into(),
        batch_size: 4,
        index: IndexParams::default(),
        embedding_model: "hash-bigram".into(),
    }
}

/// Ten distinct site situations used by the search tests.
pub const SITUATIONS: [&str; 10] = [
    "근로자가 안전모를 착용하지 않고 2층 비계 위를 걷고 있다.",
    "개구부 주변에 안전난간이 설치되어 있지 않다.",
    "굴착기 선회 반경 안에 작업자가 서 있다.",
    "용접 작업 중 주변에 가연물이 방치되어 있다.",
    "사다리 상부에서 작업자가 안전대 없이 작업하고 있다.",
    "자재가 통로에 적재되어 보행이 어렵다.",
    "타워크레인 인양물 아래로 근로자가 지나가고 있다.",
    "전선 피복이 손상된 채 물웅덩이에 놓여 있다.",
    "거푸집 동바리가 기울어진 상태로 방치되어 있다.",
    "밀폐공간 진입 전 산소 농도를 측정하지 않았다.",
];
