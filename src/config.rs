use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::store::index::{IndexKind, IndexParams, Metric};
use crate::store::search::SearchParams;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HazardConfig {
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub ingest: IngestConfig,
    pub index: IndexConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    pub collection: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
    pub dimensions: usize,
    pub model_url: String,
    pub tokenizer_url: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    pub input_dir: String,
    pub extension: String,
    pub batch_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndexConfig {
    pub metric: Metric,
    pub kind: IndexKind,
    pub nlist: usize,
    pub max_iterations: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub nprobe: usize,
    pub limit: usize,
    pub output_fields: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_data_dir()
            .join("vectors.db")
            .to_string_lossy()
            .into_owned();
        Self {
            db_path,
            collection: "construction_safety_v1".into(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_data_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: "snunlp/KR-SBERT-V40K-klueNLI-augSTS".into(),
            cache_dir,
            dimensions: 768,
            model_url:
                "https://huggingface.co/snunlp/KR-SBERT-V40K-klueNLI-augSTS/resolve/main/onnx/model.onnx"
                    .into(),
            tokenizer_url:
                "https://huggingface.co/snunlp/KR-SBERT-V40K-klueNLI-augSTS/resolve/main/tokenizer.json"
                    .into(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            input_dir: "./output".into(),
            extension: "json".into(),
            batch_size: 32,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        let params = IndexParams::default();
        Self {
            metric: params.metric,
            kind: params.kind,
            nlist: params.nlist,
            max_iterations: params.max_iterations,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        let params = SearchParams::default();
        Self {
            nprobe: params.nprobe,
            limit: params.limit,
            output_fields: params.output_fields,
        }
    }
}

impl IndexConfig {
    pub fn params(&self) -> IndexParams {
        IndexParams {
            metric: self.metric,
            kind: self.kind,
            nlist: self.nlist,
            max_iterations: self.max_iterations,
        }
    }
}

impl SearchConfig {
    /// Query parameters; the metric always follows the index configuration.
    pub fn params(&self, metric: Metric) -> SearchParams {
        SearchParams {
            metric,
            nprobe: self.nprobe,
            limit: self.limit,
            output_fields: self.output_fields.clone(),
        }
    }
}

/// Returns `~/.hazard-index/`
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hazard-index")
}

/// Returns the default config file path: `~/.hazard-index/config.toml`
pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}

impl HazardConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            HazardConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    /// (HAZARD_DB, HAZARD_COLLECTION, HAZARD_INPUT_DIR, HAZARD_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("HAZARD_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("HAZARD_COLLECTION") {
            self.storage.collection = val;
        }
        if let Ok(val) = std::env::var("HAZARD_INPUT_DIR") {
            self.ingest.input_dir = val;
        }
        if let Ok(val) = std::env::var("HAZARD_LOG_LEVEL") {
            self.logging.log_level = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    pub fn resolved_input_dir(&self) -> PathBuf {
        expand_tilde(&self.ingest.input_dir)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
