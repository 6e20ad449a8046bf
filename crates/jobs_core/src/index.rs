use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::run::{RunId, RunRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub run_id: RunId,
    pub first_seen: DateTime<Utc>,
    /// Source URL after URL normalization.
    pub source_url: String,
}

/// Fingerprint -> where and when a listing was first admitted.
///
/// Shared across runs. Only the dedup stage of the active run mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FingerprintIndex {
    entries: HashMap<String, IndexEntry>,
}

impl FingerprintIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replays the admitted fingerprints of past runs, oldest first.
    pub fn rebuild<'a>(history: impl IntoIterator<Item = &'a RunRecord>) -> Self {
        let mut index = Self::new();
        for run in history {
            for admitted in &run.admitted {
                index.upsert(
                    admitted.fingerprint.clone(),
                    IndexEntry {
                        run_id: run.run_id.clone(),
                        first_seen: admitted.first_seen,
                        source_url: admitted.source_url.clone(),
                    },
                );
            }
        }
        index
    }

    pub fn get(&self, fingerprint: &str) -> Option<&IndexEntry> {
        self.entries.get(fingerprint)
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.entries.contains_key(fingerprint)
    }

    /// Inserts or replaces the entry, returning the previous one.
    pub fn upsert(&mut self, fingerprint: String, entry: IndexEntry) -> Option<IndexEntry> {
        self.entries.insert(fingerprint, entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &IndexEntry)> {
        self.entries.iter()
    }
}
