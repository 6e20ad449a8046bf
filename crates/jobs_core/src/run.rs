use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type RunId = String;

/// Lifecycle of a single pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Pending,
    Extracting,
    Normalizing,
    Deduping,
    LoadingHandoff,
    Completed,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }

    /// Whether `self -> next` is an edge of the run state machine.
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Pending, Extracting)
            | (Extracting, Normalizing)
            | (Normalizing, Deduping)
            | (Deduping, LoadingHandoff)
            | (LoadingHandoff, Completed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunState::Pending => "PENDING",
            RunState::Extracting => "EXTRACTING",
            RunState::Normalizing => "NORMALIZING",
            RunState::Deduping => "DEDUPING",
            RunState::LoadingHandoff => "LOADING_HANDOFF",
            RunState::Completed => "COMPLETED",
            RunState::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid run transition {from} -> {to}")]
pub struct TransitionError {
    pub from: RunState,
    pub to: RunState,
}

/// Error taxonomy recorded against a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientFetch,
    PermanentFetch,
    Parse,
    Validation,
    Load,
    Orchestration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    pub stage: RunState,
    pub site: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SiteCounts {
    /// Pages fetched successfully.
    pub fetched: u64,
    /// Raw records handed to normalization.
    pub extracted: u64,
    /// Canonical records admitted by dedup.
    pub kept: u64,
    /// Records dropped as duplicates, within or across runs.
    pub deduped: u64,
    /// Listings, records, or site aborts that failed.
    pub failed: u64,
    /// Salary bounds swapped during normalization.
    pub corrected: u64,
}

impl SiteCounts {
    fn accumulate(&mut self, other: &SiteCounts) {
        self.fetched += other.fetched;
        self.extracted += other.extracted;
        self.kept += other.kept;
        self.deduped += other.deduped;
        self.failed += other.failed;
        self.corrected += other.corrected;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub state: RunState,
    pub at: DateTime<Utc>,
    pub totals: SiteCounts,
}

/// A fingerprint this run wrote into the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmittedFingerprint {
    pub fingerprint: String,
    pub source_url: String,
    pub first_seen: DateTime<Utc>,
}

/// Bookkeeping for one run, persisted to the run history when the run ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    state: RunState,
    pub transitions: Vec<StageTransition>,
    pub sites: BTreeMap<String, SiteCounts>,
    pub errors: Vec<StageError>,
    #[serde(default)]
    pub admitted: Vec<AdmittedFingerprint>,
}

impl RunRecord {
    pub fn new(run_id: impl Into<RunId>, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at,
            finished_at: None,
            state: RunState::Pending,
            transitions: vec![StageTransition {
                state: RunState::Pending,
                at: started_at,
                totals: SiteCounts::default(),
            }],
            sites: BTreeMap::new(),
            errors: Vec::new(),
            admitted: Vec::new(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn transition(&mut self, to: RunState, at: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(to) {
            return Err(TransitionError {
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.transitions.push(StageTransition {
            state: to,
            at,
            totals: self.totals(),
        });
        if to.is_terminal() {
            self.finished_at = Some(at);
        }
        Ok(())
    }

    /// Moves the run to `FAILED` and records why.
    pub fn fail(&mut self, message: impl Into<String>, at: DateTime<Utc>) -> Result<(), TransitionError> {
        let stage = self.state;
        self.transition(RunState::Failed, at)?;
        self.errors.push(StageError {
            stage,
            site: None,
            kind: ErrorKind::Orchestration,
            message: message.into(),
            at,
        });
        Ok(())
    }

    pub fn site_mut(&mut self, site: &str) -> &mut SiteCounts {
        self.sites.entry(site.to_string()).or_default()
    }

    pub fn site(&self, site: &str) -> SiteCounts {
        self.sites.get(site).copied().unwrap_or_default()
    }

    /// Records an error against the current state; errors tied to a site also
    /// bump that site's `failed`.
    pub fn record_error(
        &mut self,
        site: Option<&str>,
        kind: ErrorKind,
        message: impl Into<String>,
        at: DateTime<Utc>,
    ) {
        self.record_stage_error(self.state, site, kind, message, at);
    }

    /// Like [`RunRecord::record_error`], for work that belongs to `stage` but is
    /// reported after the run has moved on.
    pub fn record_stage_error(
        &mut self,
        stage: RunState,
        site: Option<&str>,
        kind: ErrorKind,
        message: impl Into<String>,
        at: DateTime<Utc>,
    ) {
        if let Some(site) = site {
            self.site_mut(site).failed += 1;
        }
        self.errors.push(StageError {
            stage,
            site: site.map(str::to_string),
            kind,
            message: message.into(),
            at,
        });
    }

    pub fn admit(&mut self, entry: AdmittedFingerprint) {
        self.admitted.push(entry);
    }

    pub fn totals(&self) -> SiteCounts {
        let mut totals = SiteCounts::default();
        for counts in self.sites.values() {
            totals.accumulate(counts);
        }
        totals
    }

    pub fn errors_of(&self, kind: ErrorKind) -> impl Iterator<Item = &StageError> {
        self.errors.iter().filter(move |e| e.kind == kind)
    }
}
