//! Load collaborators: where a finished run's records are handed off.

use std::collections::BTreeMap;
use std::path::PathBuf;

use jobs_core::{CanonicalRecord, RunRecord};
use serde_json::json;

use crate::persist::{write_jsonl, AtomicFileWriter, PersistError};

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("sink {sink}: {source}")]
    Persist {
        sink: String,
        #[source]
        source: PersistError,
    },
    #[error("sink {sink} rejected the batch: {message}")]
    Rejected { sink: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReceipt {
    pub sink: String,
    pub records: usize,
    pub location: Option<PathBuf>,
}

pub trait LoadSink: Send + Sync {
    fn name(&self) -> &str;

    /// Takes the deduplicated records of `run`. May be called again on failure.
    fn load(&self, records: &[CanonicalRecord], run: &RunRecord) -> Result<LoadReceipt, LoadError>;
}

/// Writes `jobs-<run_id>.jsonl` and a `jobs-<run_id>.manifest.json` summary.
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    dir: PathBuf,
}

impl JsonLinesSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn persist_error(&self, source: PersistError) -> LoadError {
        LoadError::Persist {
            sink: self.name().to_string(),
            source,
        }
    }
}

impl LoadSink for JsonLinesSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn load(&self, records: &[CanonicalRecord], run: &RunRecord) -> Result<LoadReceipt, LoadError> {
        let data_path = self.dir.join(format!("jobs-{}.jsonl", run.run_id));
        write_jsonl(&data_path, records).map_err(|e| self.persist_error(e))?;

        let mut per_site: BTreeMap<&str, usize> = BTreeMap::new();
        for record in records {
            *per_site.entry(record.site.as_str()).or_default() += 1;
        }
        let manifest = json!({
            "run_id": run.run_id,
            "state": run.state().to_string(),
            "started_at": run.started_at,
            "finished_at": run.finished_at,
            "record_count": records.len(),
            "records_by_site": per_site,
            "totals": run.totals(),
            "error_count": run.errors.len(),
            "data_file": data_path.file_name().and_then(|n| n.to_str()),
        });
        AtomicFileWriter::new(self.dir.clone())
            .write(&format!("jobs-{}.manifest.json", run.run_id), manifest.to_string())
            .map_err(|e| self.persist_error(e))?;

        Ok(LoadReceipt {
            sink: self.name().to_string(),
            records: records.len(),
            location: Some(data_path),
        })
    }
}

/// Replaces the canonical staging file; used by the `transform` stage command.
#[derive(Debug, Clone)]
pub struct StagingSink {
    path: PathBuf,
}

impl StagingSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl LoadSink for StagingSink {
    fn name(&self) -> &str {
        "staging"
    }

    fn load(&self, records: &[CanonicalRecord], _run: &RunRecord) -> Result<LoadReceipt, LoadError> {
        write_jsonl(&self.path, records).map_err(|source| LoadError::Persist {
            sink: self.name().to_string(),
            source,
        })?;
        Ok(LoadReceipt {
            sink: self.name().to_string(),
            records: records.len(),
            location: Some(self.path.clone()),
        })
    }
}
