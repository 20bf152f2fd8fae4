//! Source records written by the image-to-template producer.
//!
//! One JSON object per file:
//! `{"description", "template_body", "variables", "hazard_tags", "source_image"}`.
//! Files are read independently; one bad file never stops the scan.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{IndexError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Factual sentence that gets embedded. `null` or missing reads as empty.
    #[serde(default)]
    pub description: Option<String>,
    /// Warning caption with Jinja-style placeholders.
    #[serde(default)]
    pub template_body: String,
    /// Placeholder values extracted by the producer. Not indexed.
    #[serde(default)]
    pub variables: Option<serde_json::Value>,
    #[serde(default)]
    pub hazard_tags: Vec<String>,
    #[serde(default)]
    pub source_image: String,
}

impl SourceRecord {
    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or_default()
    }

    /// Whether the record carries text worth embedding.
    pub fn has_description(&self) -> bool {
        !self.description().trim().is_empty()
    }

    /// Tags joined with `,` in their original order.
    pub fn serialized_tags(&self) -> String {
        serialize_tags(&self.hazard_tags)
    }
}

/// Join tags with a comma. Lossy: `[]` and `[""]` both become `""`.
pub fn serialize_tags(tags: &[String]) -> String {
    tags.join(",")
}

/// A parsed record and the file it came from.
#[derive(Debug, Clone)]
pub struct LoadedRecord {
    pub path: PathBuf,
    pub record: SourceRecord,
}

/// A record that was skipped, and why.
#[derive(Debug, Clone, Serialize)]
pub struct RecordFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Result of scanning an input directory.
#[derive(Debug, Default)]
pub struct RecordScan {
    pub records: Vec<LoadedRecord>,
    pub failures: Vec<RecordFailure>,
}

impl RecordScan {
    /// Files seen, parsed or not.
    pub fn total(&self) -> usize {
        self.records.len() + self.failures.len()
    }
}

/// Parse one record file.
pub fn parse_record(path: &Path) -> Result<SourceRecord> {
    let malformed = |reason: String| IndexError::MalformedRecord {
        path: path.to_path_buf(),
        reason,
    };
    let contents = std::fs::read_to_string(path).map_err(|e| malformed(e.to_string()))?;
    serde_json::from_str(&contents).map_err(|e| malformed(e.to_string()))
}

/// Read every file in `dir` whose extension matches `extension`
/// (case-insensitive), in file-name order.
///
/// Fails only if the directory itself cannot be listed. Entries that cannot
/// be read are recorded as failures against `dir`.
pub fn read_records(dir: &Path, extension: &str) -> Result<RecordScan> {
    let entries = std::fs::read_dir(dir)?.map(|entry| entry.map(|e| e.path()));
    let (paths, failures) = select_paths(dir, entries, extension);

    tracing::info!(dir = %dir.display(), files = paths.len(), "scanning source records");

    let mut scan = RecordScan {
        failures,
        ..Default::default()
    };
    for (i, path) in paths.into_iter().enumerate() {
        match parse_record(&path) {
            Ok(record) => {
                tracing::debug!(n = i + 1, path = %path.display(), "record parsed");
                scan.records.push(LoadedRecord { path, record });
            }
            Err(IndexError::MalformedRecord { path, reason }) => {
                tracing::warn!(path = %path.display(), %reason, "skipping malformed record");
                scan.failures.push(RecordFailure { path, reason });
            }
            Err(other) => return Err(other),
        }
    }
    Ok(scan)
}

/// Sorted record paths among `entries`, plus a failure per unreadable entry.
fn select_paths(
    dir: &Path,
    entries: impl IntoIterator<Item = std::io::Result<PathBuf>>,
    extension: &str,
) -> (Vec<PathBuf>, Vec<RecordFailure>) {
    let mut paths = Vec::new();
    let mut failures = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) if path.is_file() && has_extension(&path, extension) => paths.push(path),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "skipping unreadable directory entry");
                failures.push(RecordFailure {
                    path: dir.to_path_buf(),
                    reason: format!("unreadable directory entry: {e}"),
                });
            }
        }
    }
    paths.sort();
    (paths, failures)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension.trim_start_matches('.')))
}
