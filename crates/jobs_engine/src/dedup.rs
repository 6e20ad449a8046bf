//! Fingerprinting and the single-writer dedup stage.

use std::collections::HashSet;
use std::fmt::Write;

use jobs_core::{
    normalize_url, AdmittedFingerprint, CanonicalRecord, FingerprintIndex, IndexEntry, RunId,
    UrlPolicy,
};
use pipeline_logging::{pipeline_debug, pipeline_trace};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const FINGERPRINT_BYTES: usize = 16;
const FIELD_SEPARATOR: char = '\u{1F}';

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupPolicy {
    /// Keep a listing seen in an earlier run when it is now posted under another URL.
    pub relisted_override: bool,
    /// Makes the normalized source URL part of the fingerprint.
    pub include_url_in_fingerprint: bool,
    pub url: UrlPolicy,
}

/// Computes record fingerprints under a [`DedupPolicy`].
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    include_url: bool,
    url_policy: UrlPolicy,
}

impl Fingerprinter {
    pub fn new(policy: &DedupPolicy) -> Self {
        Self {
            include_url: policy.include_url_in_fingerprint,
            url_policy: policy.url.clone(),
        }
    }

    /// Hex digest of the lower-cased, whitespace-collapsed identity fields.
    pub fn fingerprint(&self, title: &str, company: &str, location: &str, source_url: &str) -> String {
        let mut key = String::new();
        for field in [title, company, location] {
            key.push_str(&canonical_field(field));
            key.push(FIELD_SEPARATOR);
        }
        if self.include_url {
            key.push_str(&normalize_url(source_url, &self.url_policy));
        }

        let digest = Sha256::digest(key.as_bytes());
        let mut hex = String::with_capacity(FINGERPRINT_BYTES * 2);
        for byte in digest.iter().take(FINGERPRINT_BYTES) {
            let _ = write!(&mut hex, "{byte:02x}");
        }
        hex
    }

    pub fn of(&self, record: &CanonicalRecord) -> String {
        self.fingerprint(
            &record.title,
            &record.company,
            &record.location_text(),
            &record.source_url,
        )
    }
}

fn canonical_field(value: &str) -> String {
    value
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupDecision {
    Admitted,
    /// Seen in an earlier run under a different URL; kept because of the override.
    Relisted { previous_url: String },
    DuplicateInRun,
    DuplicateAcrossRuns { first_run: RunId },
}

impl DedupDecision {
    pub fn is_kept(&self) -> bool {
        matches!(self, DedupDecision::Admitted | DedupDecision::Relisted { .. })
    }
}

/// Lookup-then-insert against the fingerprint index for one run.
///
/// Holding `&mut FingerprintIndex` makes this the only writer for the run's lifetime.
pub struct Deduplicator<'a> {
    index: &'a mut FingerprintIndex,
    policy: DedupPolicy,
    run_id: RunId,
    seen: HashSet<String>,
    admitted: Vec<AdmittedFingerprint>,
}

impl<'a> Deduplicator<'a> {
    pub fn new(index: &'a mut FingerprintIndex, policy: DedupPolicy, run_id: impl Into<RunId>) -> Self {
        Self {
            index,
            policy,
            run_id: run_id.into(),
            seen: HashSet::new(),
            admitted: Vec::new(),
        }
    }

    /// Decides whether `record` is kept. A relisted record takes over the
    /// `first_seen` of the listing it repeats.
    pub fn offer(&mut self, record: &mut CanonicalRecord) -> DedupDecision {
        let fingerprint = &record.fingerprint;
        if self.seen.contains(fingerprint) {
            pipeline_trace!("duplicate within run: {} ({})", fingerprint, record.source_url);
            return DedupDecision::DuplicateInRun;
        }
        let source_url = normalize_url(&record.source_url, &self.policy.url);

        let (decision, first_seen) = match self.index.get(fingerprint) {
            None => (DedupDecision::Admitted, record.first_seen),
            Some(entry) if entry.run_id == self.run_id => return DedupDecision::DuplicateInRun,
            Some(entry) if self.policy.relisted_override && entry.source_url != source_url => {
                pipeline_debug!(
                    "relisted {}: {} -> {}",
                    fingerprint,
                    entry.source_url,
                    source_url
                );
                (
                    DedupDecision::Relisted {
                        previous_url: entry.source_url.clone(),
                    },
                    entry.first_seen,
                )
            }
            Some(entry) => {
                return DedupDecision::DuplicateAcrossRuns {
                    first_run: entry.run_id.clone(),
                }
            }
        };

        record.first_seen = first_seen;
        let fingerprint = &record.fingerprint;
        self.index.upsert(
            fingerprint.clone(),
            IndexEntry {
                run_id: self.run_id.clone(),
                first_seen,
                source_url: source_url.clone(),
            },
        );
        self.seen.insert(fingerprint.clone());
        self.admitted.push(AdmittedFingerprint {
            fingerprint: fingerprint.clone(),
            source_url,
            first_seen,
        });
        decision
    }

    /// Fingerprints written to the index by this run, in admission order.
    pub fn into_admitted(self) -> Vec<AdmittedFingerprint> {
        self.admitted
    }
}
