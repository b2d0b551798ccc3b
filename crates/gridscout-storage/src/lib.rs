//! File-system archive for GridScout runs.
//!
//! Every batch (a single run, a benchmark, or a compare) gets a timestamped
//! folder under the data root:
//!
//! ```text
//! data/20260802_142501_benchmark_frontier/
//!     config.json      batch parameters
//!     summary.csv      one row per run, stable columns
//!     <uuid>.json      full replayable RunRecord per run
//! ```
//!
//! Storage failures never fail a simulation; callers log and continue.

use chrono::Local;
use gridscout_core::RunRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

/// Errors raised by the run archive.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("summary csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("batch folder not found: {0}")]
    MissingBatch(String),
}

/// One row of `summary.csv`. Field order is the column order and is stable;
/// new columns may only be appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRow {
    pub seed: u64,
    pub policy: String,
    pub success: bool,
    pub steps: u32,
    pub coverage: f64,
    pub efficiency: f64,
    pub turns: u64,
    pub collisions: u64,
}

impl SummaryRow {
    /// Project a full record down to its summary columns.
    #[must_use]
    pub fn from_record(record: &RunRecord) -> Self {
        Self {
            seed: record.config.seed,
            policy: record.config.policy.clone(),
            success: record.stats.success,
            steps: record.stats.steps,
            coverage: record.stats.coverage,
            efficiency: record.stats.efficiency,
            turns: record.stats.turns,
            collisions: record.stats.collisions,
        }
    }
}

/// Listing entry for one archived batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchInfo {
    pub name: String,
    pub count: usize,
}

/// Per-run listing entry surfaced by the history endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRunSummary {
    pub id: String,
    #[serde(flatten)]
    pub row: SummaryRow,
}

/// A batch folder's config plus its run summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchContents {
    pub config: Value,
    pub runs: Vec<StoredRunSummary>,
}

/// Handle on the archive root directory.
#[derive(Debug, Clone)]
pub struct RunStore {
    root: PathBuf,
}

impl RunStore {
    /// Open (creating if needed) an archive rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a timestamped batch folder, e.g. `20260802_142501_compare_custom`.
    pub fn create_batch(&self, kind: &str, label: &str) -> Result<BatchWriter, StorageError> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let name = format!("{stamp}_{kind}_{label}");
        let dir = self.root.join(&name);
        fs::create_dir_all(&dir)?;
        Ok(BatchWriter { dir, name })
    }

    /// List archived batches, newest first.
    pub fn list_batches(&self) -> Result<Vec<BatchInfo>, StorageError> {
        let mut batches = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let count = fs::read_dir(entry.path())?
                .filter_map(Result::ok)
                .filter(|e| {
                    let file_name = e.file_name();
                    let file_name = file_name.to_string_lossy();
                    file_name.ends_with(".json") && file_name != "config.json"
                })
                .count();
            batches.push(BatchInfo { name, count });
        }
        // Names lead with the timestamp, so lexicographic descending is
        // newest first.
        batches.sort_by(|a, b| b.name.cmp(&a.name));
        Ok(batches)
    }

    fn batch_dir(&self, folder: &str) -> Result<PathBuf, StorageError> {
        if folder.is_empty()
            || folder.contains(['/', '\\'])
            || folder.contains("..")
        {
            return Err(StorageError::MissingBatch(folder.to_string()));
        }
        let dir = self.root.join(folder);
        if !dir.is_dir() {
            return Err(StorageError::MissingBatch(folder.to_string()));
        }
        Ok(dir)
    }

    /// Read a batch's config and per-run summaries.
    pub fn batch_contents(&self, folder: &str) -> Result<BatchContents, StorageError> {
        let dir = self.batch_dir(folder)?;
        let config = match fs::read(dir.join("config.json")) {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(_) => Value::Null,
        };
        let mut runs = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if !file_name.ends_with(".json") || file_name == "config.json" {
                continue;
            }
            let raw = match fs::read(entry.path()) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(file = %file_name, %err, "skipping unreadable run file");
                    continue;
                }
            };
            match serde_json::from_slice::<RunRecord>(&raw) {
                Ok(record) => runs.push(StoredRunSummary {
                    id: file_name.trim_end_matches(".json").to_string(),
                    row: SummaryRow::from_record(&record),
                }),
                Err(err) => warn!(file = %file_name, %err, "skipping malformed run file"),
            }
        }
        runs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(BatchContents { config, runs })
    }

    /// Read a batch's `summary.csv` verbatim.
    pub fn summary_csv(&self, folder: &str) -> Result<String, StorageError> {
        let dir = self.batch_dir(folder)?;
        let path = dir.join("summary.csv");
        if !path.is_file() {
            return Err(StorageError::MissingBatch(folder.to_string()));
        }
        Ok(fs::read_to_string(path)?)
    }

    /// Locate a run record by id across all batch folders.
    pub fn find_run(&self, id: Uuid) -> Result<Option<RunRecord>, StorageError> {
        let file_name = format!("{id}.json");
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let candidate = entry.path().join(&file_name);
            if candidate.is_file() {
                let raw = fs::read(candidate)?;
                return Ok(Some(serde_json::from_slice(&raw)?));
            }
        }
        Ok(None)
    }
}

/// Writer bound to one batch folder.
#[derive(Debug, Clone)]
pub struct BatchWriter {
    dir: PathBuf,
    name: String,
}

impl BatchWriter {
    /// The folder name, including its timestamp prefix.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Persist the batch-level configuration as pretty JSON.
    pub fn write_config(&self, config: &Value) -> Result<(), StorageError> {
        let mut file = fs::File::create(self.dir.join("config.json"))?;
        file.write_all(serde_json::to_string_pretty(config)?.as_bytes())?;
        Ok(())
    }

    /// Persist one full run record under `<id>.json`.
    pub fn write_run(&self, id: Uuid, record: &RunRecord) -> Result<(), StorageError> {
        let mut file = fs::File::create(self.dir.join(format!("{id}.json")))?;
        file.write_all(serde_json::to_vec(record)?.as_slice())?;
        Ok(())
    }

    /// Persist the batch summary CSV, one row per run.
    pub fn write_summary(&self, rows: &[SummaryRow]) -> Result<(), StorageError> {
        let mut writer = csv::Writer::from_path(self.dir.join("summary.csv"))?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_names_with_traversal_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = RunStore::open(temp.path()).expect("store");
        assert!(matches!(
            store.batch_contents("../evil"),
            Err(StorageError::MissingBatch(_))
        ));
        assert!(matches!(
            store.summary_csv("a/b"),
            Err(StorageError::MissingBatch(_))
        ));
    }

    #[test]
    fn summary_rows_keep_column_order() {
        let row = SummaryRow {
            seed: 42,
            policy: "frontier".into(),
            success: true,
            steps: 17,
            coverage: 0.98,
            efficiency: 0.5,
            turns: 3,
            collisions: 0,
        };
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.serialize(&row).expect("serialize");
        let bytes = writer.into_inner().expect("inner");
        let text = String::from_utf8(bytes).expect("utf8");
        assert!(text.starts_with(
            "seed,policy,success,steps,coverage,efficiency,turns,collisions"
        ));
        assert!(text.contains("42,frontier,true,17,0.98,0.5,3,0"));
    }

    #[test]
    fn empty_store_lists_no_batches() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = RunStore::open(temp.path()).expect("store");
        assert!(store.list_batches().expect("list").is_empty());
        assert!(store.find_run(Uuid::new_v4()).expect("find").is_none());
    }
}
