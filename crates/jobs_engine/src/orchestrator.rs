//! Drives one pipeline run through its states and owns its [`RunRecord`].

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use jobs_core::{
    CanonicalRecord, ErrorKind, FingerprintIndex, RawRecord, RunRecord, RunState, TransitionError,
};
use pipeline_logging::{pipeline_debug, pipeline_error, pipeline_info, pipeline_warn};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{ConfigError, PipelineConfig, SiteConfig};
use crate::coordinator::{ExtractionCoordinator, ExtractionEvent, ExtractionSummary, SiteReport};
use crate::dedup::{Deduplicator, Fingerprinter};
use crate::fetch::{Fetcher, ReqwestFetcher};
use crate::load::{LoadReceipt, LoadSink};
use crate::normalize::{NormalizationPipeline, Normalized, ValidationError};
use crate::persist::{DataLayout, IndexError, IndexStore, PersistError, RunHistory};
use crate::rate_limit::RateLimiter;
use crate::scrape::ScraperRegistry;
use crate::FetchError;

/// Run-level fault. Everything below this level is recorded in the run instead.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("no sites enabled")]
    NoSitesEnabled,
    #[error("unknown site {0}")]
    UnknownSite(String),
    #[error("no scraper registered for site {0}")]
    MissingScraper(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("http client setup failed: {0}")]
    Client(#[from] FetchError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("run history unavailable: {0}")]
    History(#[source] PersistError),
    #[error("no run recorded yet")]
    NoRunRecorded,
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteSelection {
    All,
    Only(Vec<String>),
}

#[derive(Debug)]
pub struct RunReport {
    pub record: RunRecord,
    /// Records admitted by dedup and handed to the sinks.
    pub records: Vec<CanonicalRecord>,
    pub receipts: Vec<LoadReceipt>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.record.state() == RunState::Completed
    }
}

/// Outcome of [`RunOrchestrator::reload`].
#[derive(Debug)]
pub struct ReloadReport {
    pub record: RunRecord,
    pub receipts: Vec<LoadReceipt>,
    pub failed_sinks: usize,
}

enum NormalizeOutcome {
    Done(Normalized),
    Invalid(ValidationError),
    Panicked { source_url: String },
}

enum StageEvent {
    ListingFailed { site: String, message: String },
    SiteFinished(SiteReport),
    ExtractionDone,
    Normalized { site: String, outcome: NormalizeOutcome },
}

pub struct RunOrchestrator {
    config: PipelineConfig,
    layout: DataLayout,
    registry: Arc<ScraperRegistry>,
    fetcher: Arc<dyn Fetcher>,
    pipeline: Arc<NormalizationPipeline>,
    sinks: Vec<Box<dyn LoadSink>>,
    cancel: CancellationToken,
}

impl RunOrchestrator {
    /// Builds the HTTP stack and selector scrapers described by `config`.
    pub fn new(config: PipelineConfig) -> Result<Self, OrchestrationError> {
        config.validate()?;
        let registry = ScraperRegistry::from_config(&config)?;
        let limiter = Arc::new(RateLimiter::new(
            config.default_rate.clone(),
            config.rate_overrides(),
        ));
        let cancel = CancellationToken::new();
        let mut fetcher =
            ReqwestFetcher::new(config.fetch.clone(), limiter)?.with_cancellation(cancel.clone());
        for (name, site) in &config.sites {
            if !site.headers.is_empty() {
                fetcher = fetcher.with_site_headers(name.clone(), &site.headers)?;
            }
        }
        let mut orchestrator = Self::with_parts(config, registry, Arc::new(fetcher))?;
        orchestrator.cancel = cancel;
        Ok(orchestrator)
    }

    /// Uses caller-supplied scrapers and fetcher instead of the configured ones.
    pub fn with_parts(
        config: PipelineConfig,
        registry: ScraperRegistry,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, OrchestrationError> {
        config.validate()?;
        let pipeline = NormalizationPipeline::new(&config.rules, Fingerprinter::new(&config.dedup))?;
        Ok(Self {
            layout: DataLayout::new(config.data_dir.clone()),
            config,
            registry: Arc::new(registry),
            fetcher,
            pipeline: Arc::new(pipeline),
            sinks: Vec::new(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_sink(mut self, sink: impl LoadSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Cancelling stops new page fetches; extracted records still finish the run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Extraction only, for the `extract` stage command. No run is recorded.
    pub async fn extract(&self, selection: &SiteSelection) -> Result<ExtractionSummary, OrchestrationError> {
        let sites = self.select_sites(selection)?;
        let events = self.coordinator().start(sites, self.cancel.clone());
        Ok(ExtractionSummary::drain(events).await)
    }

    /// Full run: extract, normalize, dedup, hand off.
    pub async fn run(&self, selection: SiteSelection) -> Result<RunReport, OrchestrationError> {
        let mut run = self.new_run();
        let sites = match self.select_sites(&selection) {
            Ok(sites) => sites,
            Err(err) => return Err(self.abort(run, err)),
        };
        let mut index = match self.load_index() {
            Ok(index) => index,
            Err(err) => return Err(self.abort(run, err)),
        };
        pipeline_info!(
            "run {} started for {} site(s)",
            run.run_id,
            sites.len()
        );
        run.transition(RunState::Extracting, Utc::now())?;
        let events = self.coordinator().start(sites, self.cancel.clone());
        self.drive(run, events, &mut index).await
    }

    /// Runs normalize, dedup and hand-off over previously extracted records.
    pub async fn run_staged(&self, raw: Vec<RawRecord>) -> Result<RunReport, OrchestrationError> {
        let mut run = self.new_run();
        let mut index = match self.load_index() {
            Ok(index) => index,
            Err(err) => return Err(self.abort(run, err)),
        };
        pipeline_info!("run {} started from {} staged record(s)", run.run_id, raw.len());
        run.transition(RunState::Extracting, Utc::now())?;

        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        tokio::spawn(async move {
            for record in raw {
                if tx.send(ExtractionEvent::Record(record)).await.is_err() {
                    break;
                }
            }
        });
        self.drive(run, rx, &mut index).await
    }

    /// Hands records to every sink with stage retry. Failures are recorded on `run`.
    pub async fn handoff(&self, records: &[CanonicalRecord], run: &mut RunRecord) -> Vec<LoadReceipt> {
        let mut receipts = Vec::new();
        for sink in &self.sinks {
            let what = format!("sink {}", sink.name());
            let outcome = self.with_stage_retry(&what, || sink.load(records, &*run)).await;
            match outcome {
                Ok(receipt) => {
                    pipeline_info!("{} loaded {} record(s)", what, receipt.records);
                    receipts.push(receipt);
                }
                Err(err) => {
                    pipeline_error!("{} failed: {}", what, err);
                    run.record_stage_error(
                        RunState::LoadingHandoff,
                        None,
                        ErrorKind::Load,
                        err.to_string(),
                        Utc::now(),
                    );
                }
            }
        }
        receipts
    }

    /// Hands `records` to the sinks on behalf of the latest recorded run, for the
    /// `load` stage command.
    ///
    /// Sink failures are recorded by appending the updated run to the history;
    /// the later entry supersedes the earlier one for that run id.
    pub async fn reload(
        &self,
        records: &[CanonicalRecord],
    ) -> Result<ReloadReport, OrchestrationError> {
        let history = RunHistory::new(self.layout.run_history());
        let mut run = history
            .latest()
            .map_err(OrchestrationError::History)?
            .ok_or(OrchestrationError::NoRunRecorded)?;
        if run.state() != RunState::Completed {
            pipeline_warn!("run {} ended {}, loading its records anyway", run.run_id, run.state());
        }

        let load_errors_before = run.errors_of(ErrorKind::Load).count();
        let receipts = self.handoff(records, &mut run).await;
        let failed_sinks = run.errors_of(ErrorKind::Load).count() - load_errors_before;
        if failed_sinks > 0 {
            self.with_stage_retry("history append", || history.append(&run))
                .await
                .map_err(OrchestrationError::History)?;
        }
        Ok(ReloadReport {
            record: run,
            receipts,
            failed_sinks,
        })
    }

    fn new_run(&self) -> RunRecord {
        RunRecord::new(Uuid::new_v4().to_string(), Utc::now())
    }

    fn coordinator(&self) -> ExtractionCoordinator {
        ExtractionCoordinator::new(
            self.registry.clone(),
            self.fetcher.clone(),
            self.config.max_workers,
            self.config.channel_capacity,
        )
    }

    fn select_sites(&self, selection: &SiteSelection) -> Result<Vec<(String, SiteConfig)>, OrchestrationError> {
        let chosen: Vec<(String, SiteConfig)> = match selection {
            SiteSelection::All => self
                .config
                .enabled_sites()
                .map(|(name, site)| (name.clone(), site.clone()))
                .collect(),
            SiteSelection::Only(names) => {
                let mut chosen = Vec::new();
                for name in names {
                    let site = self
                        .config
                        .sites
                        .get(name)
                        .ok_or_else(|| OrchestrationError::UnknownSite(name.clone()))?;
                    if site.enabled {
                        chosen.push((name.clone(), site.clone()));
                    } else {
                        pipeline_warn!("site {} is disabled, skipping", name);
                    }
                }
                chosen
            }
        };
        if chosen.is_empty() {
            return Err(OrchestrationError::NoSitesEnabled);
        }
        if let Some((name, _)) = chosen.iter().find(|(name, _)| !self.registry.contains(name)) {
            return Err(OrchestrationError::MissingScraper(name.clone()));
        }
        Ok(chosen)
    }

    fn load_index(&self) -> Result<FingerprintIndex, OrchestrationError> {
        let history = RunHistory::new(self.layout.run_history())
            .load_all()
            .map_err(OrchestrationError::History)?;
        Ok(IndexStore::new(self.layout.fingerprint_index()).load(&history)?)
    }

    /// Marks the run failed, records it as far as possible and hands back `err`.
    fn abort(&self, mut run: RunRecord, err: OrchestrationError) -> OrchestrationError {
        pipeline_error!("run {} failed: {}", run.run_id, err);
        if let Err(transition) = run.fail(err.to_string(), Utc::now()) {
            pipeline_warn!("run {}: {}", run.run_id, transition);
        }
        if let Err(history) = RunHistory::new(self.layout.run_history()).append(&run) {
            pipeline_warn!("run {} could not be recorded: {}", run.run_id, history);
        }
        err
    }

    async fn drive(
        &self,
        mut run: RunRecord,
        events: mpsc::Receiver<ExtractionEvent>,
        index: &mut FingerprintIndex,
    ) -> Result<RunReport, OrchestrationError> {
        let (stage_tx, mut stage_rx) = mpsc::channel(self.config.channel_capacity);
        let dispatcher = tokio::spawn(dispatch_normalization(
            self.pipeline.clone(),
            self.config.normalization_workers,
            events,
            stage_tx,
        ));

        let mut normalized = Vec::new();
        while let Some(event) = stage_rx.recv().await {
            let now = Utc::now();
            match event {
                StageEvent::ListingFailed { site, message } => {
                    run.record_stage_error(
                        RunState::Extracting,
                        Some(&site),
                        ErrorKind::Parse,
                        message,
                        now,
                    );
                }
                StageEvent::SiteFinished(report) => {
                    run.site_mut(&report.site).fetched += report.pages_fetched;
                    if let Some(failure) = report.failure {
                        run.record_stage_error(
                            RunState::Extracting,
                            Some(&report.site),
                            failure.kind,
                            failure.message,
                            now,
                        );
                    }
                }
                StageEvent::ExtractionDone => {
                    pipeline_debug!("run {}: extraction finished", run.run_id);
                }
                StageEvent::Normalized { site, outcome } => {
                    // Normalization overlaps extraction; the first result opens the stage.
                    if run.state() == RunState::Extracting {
                        run.transition(RunState::Normalizing, now)?;
                    }
                    run.site_mut(&site).extracted += 1;
                    match outcome {
                        NormalizeOutcome::Done(done) => {
                            run.site_mut(&site).corrected += done.corrections.len() as u64;
                            normalized.push(done.record);
                        }
                        NormalizeOutcome::Invalid(err) => {
                            pipeline_debug!("dropped record: {}", err);
                            run.record_error(Some(&site), ErrorKind::Validation, err.to_string(), now);
                        }
                        NormalizeOutcome::Panicked { source_url } => {
                            run.record_error(
                                Some(&site),
                                ErrorKind::Validation,
                                format!("normalization panicked for {source_url}"),
                                now,
                            );
                        }
                    }
                }
            }
        }
        if let Err(err) = dispatcher.await {
            pipeline_error!("run {}: normalization dispatcher aborted: {}", run.run_id, err);
        }
        if run.state() == RunState::Extracting {
            run.transition(RunState::Normalizing, Utc::now())?;
        }

        run.transition(RunState::Deduping, Utc::now())?;
        let mut kept = Vec::with_capacity(normalized.len());
        let mut dedup = Deduplicator::new(index, self.config.dedup.clone(), run.run_id.clone());
        for mut record in normalized {
            let decision = dedup.offer(&mut record);
            let counts = run.site_mut(&record.site);
            if decision.is_kept() {
                counts.kept += 1;
                kept.push(record);
            } else {
                counts.deduped += 1;
            }
        }
        for admitted in dedup.into_admitted() {
            run.admit(admitted);
        }

        let store = IndexStore::new(self.layout.fingerprint_index());
        if let Err(err) = self.with_stage_retry("index persist", || store.persist(index)).await {
            return Err(self.abort(run, err.into()));
        }

        run.transition(RunState::LoadingHandoff, Utc::now())?;
        let receipts = self.handoff(&kept, &mut run).await;

        if self.cancel.is_cancelled() {
            run.fail("run cancelled", Utc::now())?;
        } else {
            run.transition(RunState::Completed, Utc::now())?;
        }

        let history = RunHistory::new(self.layout.run_history());
        self.with_stage_retry("history append", || history.append(&run))
            .await
            .map_err(OrchestrationError::History)?;

        let totals = run.totals();
        pipeline_info!(
            "run {} {}: fetched={} extracted={} kept={} deduped={} failed={} corrected={}",
            run.run_id,
            run.state(),
            totals.fetched,
            totals.extracted,
            totals.kept,
            totals.deduped,
            totals.failed,
            totals.corrected
        );
        Ok(RunReport {
            record: run,
            records: kept,
            receipts,
        })
    }

    async fn with_stage_retry<T, E: fmt::Display>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, E>,
    ) -> Result<T, E> {
        let policy = &self.config.stage_retry;
        let attempts = policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < attempts => {
                    pipeline_warn!("{} failed (attempt {}/{}): {}", what, attempt, attempts, err);
                    tokio::time::sleep(policy.delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Fans raw records out to at most `workers` normalization tasks and forwards
/// everything else. The stage channel closes after the last result.
async fn dispatch_normalization(
    pipeline: Arc<NormalizationPipeline>,
    workers: usize,
    mut events: mpsc::Receiver<ExtractionEvent>,
    out: mpsc::Sender<StageEvent>,
) {
    let slots = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();

    while let Some(event) = events.recv().await {
        let forwarded = match event {
            ExtractionEvent::Record(raw) => {
                let Ok(slot) = slots.clone().acquire_owned().await else {
                    break;
                };
                let pipeline = pipeline.clone();
                let out = out.clone();
                tasks.spawn(async move {
                    let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| pipeline.normalize(&raw))) {
                        Ok(Ok(done)) => NormalizeOutcome::Done(done),
                        Ok(Err(invalid)) => NormalizeOutcome::Invalid(invalid),
                        Err(_) => NormalizeOutcome::Panicked {
                            source_url: raw.source_url.clone(),
                        },
                    };
                    drop(slot);
                    let _ = out
                        .send(StageEvent::Normalized {
                            site: raw.site,
                            outcome,
                        })
                        .await;
                });
                continue;
            }
            ExtractionEvent::ListingFailed { site, message, page_url } => StageEvent::ListingFailed {
                site,
                message: format!("{page_url}: {message}"),
            },
            ExtractionEvent::SiteFinished(report) => StageEvent::SiteFinished(report),
        };
        if out.send(forwarded).await.is_err() {
            break;
        }
    }

    let _ = out.send(StageEvent::ExtractionDone).await;
    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            pipeline_error!("normalization task aborted: {}", err);
        }
    }
}
