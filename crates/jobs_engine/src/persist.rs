//! On-disk state: atomic writes, the fingerprint index, run history and staging files.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use jobs_core::{FingerprintIndex, RunRecord};
use pipeline_logging::{pipeline_debug, pipeline_info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("directory missing or not writable: {0}")]
    Directory(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("{path}:{line}: {source}")]
    Json {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("fingerprint index {path} is unreadable: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Where a data directory keeps each file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn staging_raw(&self) -> PathBuf {
        self.root.join("staging").join("raw.jsonl")
    }

    pub fn staging_canonical(&self) -> PathBuf {
        self.root.join("staging").join("canonical.jsonl")
    }

    pub fn run_history(&self) -> PathBuf {
        self.root.join("state").join("runs.jsonl")
    }

    pub fn fingerprint_index(&self) -> PathBuf {
        self.root.join("state").join("fingerprints.json")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }
}

/// Ensure a directory exists and is writable; create it if missing.
pub fn ensure_dir(dir: &Path) -> Result<(), PersistError> {
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| PersistError::Directory(e.to_string()))?;
        if !meta.is_dir() {
            return Err(PersistError::Directory(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| PersistError::Directory(e.to_string()))?;
    }
    NamedTempFile::new_in(dir).map_err(|e| PersistError::Directory(e.to_string()))?;
    Ok(())
}

/// Writes `{dir}/{filename}` through a temp file and rename, so readers never see half a file.
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn write(&self, filename: &str, content: impl AsRef<[u8]>) -> Result<PathBuf, PersistError> {
        ensure_dir(&self.dir)?;

        let target = self.dir.join(filename);
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_ref())?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;
        tmp.persist(&target).map_err(|e| PersistError::Io(e.error))?;
        Ok(target)
    }
}

fn split_path(path: &Path) -> Result<(PathBuf, String), PersistError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PersistError::Directory(format!("{} has no file name", path.display())))?;
    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((dir, name.to_string()))
}

/// Atomically replaces `path` with one JSON document per line.
pub fn write_jsonl<T: Serialize>(path: &Path, items: &[T]) -> Result<(), PersistError> {
    let mut body = Vec::new();
    for (line, item) in items.iter().enumerate() {
        serde_json::to_writer(&mut body, item).map_err(|source| PersistError::Json {
            path: path.to_path_buf(),
            line: line + 1,
            source,
        })?;
        body.push(b'\n');
    }
    let (dir, name) = split_path(path)?;
    AtomicFileWriter::new(dir).write(&name, body)?;
    Ok(())
}

/// Reads a JSON-lines file; blank lines are skipped.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, PersistError> {
    let reader = BufReader::new(fs::File::open(path)?);
    let mut items = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let item = serde_json::from_str(&line).map_err(|source| PersistError::Json {
            path: path.to_path_buf(),
            line: index + 1,
            source,
        })?;
        items.push(item);
    }
    Ok(items)
}

/// The fingerprint index file.
#[derive(Debug, Clone)]
pub struct IndexStore {
    path: PathBuf,
}

impl IndexStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the index, rebuilding it from `history` when the file does not exist yet.
    /// A file that exists but cannot be parsed is an error, never silently replaced.
    pub fn load(&self, history: &[RunRecord]) -> Result<FingerprintIndex, IndexError> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                let index: FingerprintIndex =
                    serde_json::from_slice(&bytes).map_err(|source| IndexError::Corrupt {
                        path: self.path.clone(),
                        source,
                    })?;
                pipeline_debug!("loaded {} fingerprints from {}", index.len(), self.path.display());
                Ok(index)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let index = FingerprintIndex::rebuild(history);
                pipeline_info!(
                    "no fingerprint index at {}, rebuilt {} entries from {} run(s)",
                    self.path.display(),
                    index.len(),
                    history.len()
                );
                Ok(index)
            }
            Err(err) => Err(PersistError::Io(err).into()),
        }
    }

    pub fn persist(&self, index: &FingerprintIndex) -> Result<(), IndexError> {
        let body = serde_json::to_vec(index).map_err(|source| PersistError::Json {
            path: self.path.clone(),
            line: 0,
            source,
        })?;
        let (dir, name) = split_path(&self.path)?;
        AtomicFileWriter::new(dir).write(&name, body)?;
        Ok(())
    }
}

/// Append-only JSON-lines log of finished runs.
#[derive(Debug, Clone)]
pub struct RunHistory {
    path: PathBuf,
}

impl RunHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, run: &RunRecord) -> Result<(), PersistError> {
        let (dir, _) = split_path(&self.path)?;
        ensure_dir(&dir)?;
        let mut line = serde_json::to_vec(run).map_err(|source| PersistError::Json {
            path: self.path.clone(),
            line: 0,
            source,
        })?;
        line.push(b'\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(&line)?;
        file.sync_data()?;
        Ok(())
    }

    /// Every recorded run, oldest first. A missing file is an empty history.
    pub fn load_all(&self) -> Result<Vec<RunRecord>, PersistError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        read_jsonl(&self.path)
    }

    pub fn latest(&self) -> Result<Option<RunRecord>, PersistError> {
        Ok(self.load_all()?.pop())
    }
}
