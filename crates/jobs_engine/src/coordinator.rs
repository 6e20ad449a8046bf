//! Concurrent per-site extraction.
//!
//! One worker per site, at most `max_workers` at a time. Records stream out over a
//! bounded channel as soon as a page is parsed. A site that fails or panics ends
//! with a [`SiteFailure`] in its report; the other workers never see it.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures_util::FutureExt;
use jobs_core::{ErrorKind, RawRecord};
use pipeline_logging::{pipeline_debug, pipeline_error, pipeline_info, pipeline_warn};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::SiteConfig;
use crate::decode::decode_page;
use crate::fetch::Fetcher;
use crate::types::FailureKind;
use crate::scrape::{ListingPage, PageParseError, ScraperRegistry, SiteScraper};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteFailure {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteReport {
    pub site: String,
    pub pages_fetched: u64,
    pub extracted: u64,
    pub listing_errors: u64,
    pub failure: Option<SiteFailure>,
}

#[derive(Debug)]
pub enum ExtractionEvent {
    Record(RawRecord),
    ListingFailed {
        site: String,
        page_url: String,
        message: String,
    },
    SiteFinished(SiteReport),
}

/// Everything one extraction produced, for callers that do not stream.
#[derive(Debug, Default)]
pub struct ExtractionSummary {
    pub records: Vec<RawRecord>,
    pub sites: Vec<SiteReport>,
    pub listing_failures: Vec<(String, String)>,
}

impl ExtractionSummary {
    pub async fn drain(mut events: mpsc::Receiver<ExtractionEvent>) -> Self {
        let mut summary = Self::default();
        while let Some(event) = events.recv().await {
            match event {
                ExtractionEvent::Record(record) => summary.records.push(record),
                ExtractionEvent::ListingFailed { site, message, .. } => {
                    summary.listing_failures.push((site, message))
                }
                ExtractionEvent::SiteFinished(report) => summary.sites.push(report),
            }
        }
        summary
    }
}

pub struct ExtractionCoordinator {
    registry: Arc<ScraperRegistry>,
    fetcher: Arc<dyn Fetcher>,
    max_workers: usize,
    channel_capacity: usize,
}

impl ExtractionCoordinator {
    pub fn new(
        registry: Arc<ScraperRegistry>,
        fetcher: Arc<dyn Fetcher>,
        max_workers: usize,
        channel_capacity: usize,
    ) -> Self {
        Self {
            registry,
            fetcher,
            max_workers: max_workers.max(1),
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Spawns the site workers and returns the event stream.
    ///
    /// The stream closes once every site has sent its `SiteFinished`. Must be
    /// called from within a tokio runtime.
    pub fn start(
        &self,
        sites: Vec<(String, SiteConfig)>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<ExtractionEvent> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let slots = Arc::new(Semaphore::new(self.max_workers));
        let mut workers = JoinSet::new();

        for (site, config) in sites {
            let tx = tx.clone();
            let slots = slots.clone();
            let cancel = cancel.clone();
            let fetcher = self.fetcher.clone();
            let scraper = self.registry.get(&site);

            workers.spawn(async move {
                // Queue behind the global worker ceiling.
                let _slot = slots.acquire_owned().await.ok();
                let mut report = SiteReport {
                    site: site.clone(),
                    ..SiteReport::default()
                };
                match scraper {
                    Some(scraper) => {
                        let worker = SiteWorker {
                            site: &site,
                            config: &config,
                            scraper: scraper.as_ref(),
                            fetcher: fetcher.as_ref(),
                            events: &tx,
                            cancel: &cancel,
                        };
                        // Counts gathered before a panic stay in `report`.
                        if AssertUnwindSafe(worker.run(&mut report))
                            .catch_unwind()
                            .await
                            .is_err()
                        {
                            pipeline_error!(
                                "site={} worker panicked after {} page(s)",
                                site,
                                report.pages_fetched
                            );
                            report.failure = Some(SiteFailure {
                                kind: ErrorKind::Orchestration,
                                message: "site worker panicked".into(),
                            });
                        }
                    }
                    None => {
                        report.failure = Some(SiteFailure {
                            kind: ErrorKind::Orchestration,
                            message: format!("no scraper registered for site {site}"),
                        });
                    }
                }
                let _ = tx.send(ExtractionEvent::SiteFinished(report)).await;
            });
        }
        drop(tx);

        tokio::spawn(async move {
            while let Some(joined) = workers.join_next().await {
                if let Err(err) = joined {
                    pipeline_error!("extraction worker aborted: {}", err);
                }
            }
            pipeline_debug!("all extraction workers finished");
        });

        rx
    }
}

struct SiteWorker<'a> {
    site: &'a str,
    config: &'a SiteConfig,
    scraper: &'a dyn SiteScraper,
    fetcher: &'a dyn Fetcher,
    events: &'a mpsc::Sender<ExtractionEvent>,
    cancel: &'a CancellationToken,
}

impl SiteWorker<'_> {
    async fn run(self, report: &mut SiteReport) {
        let site = self.site;
        pipeline_info!("site={} extraction started", site);

        for (offset, url) in self.scraper.list_pages(self.config).enumerate() {
            if self.cancel.is_cancelled() {
                pipeline_warn!("site={} cancelled before {}", site, url);
                break;
            }

            let output = match self.fetcher.fetch(&url, site).await {
                Ok(output) => output,
                Err(err) if err.kind == FailureKind::Cancelled => {
                    pipeline_warn!("site={} cancelled while retrying {}", site, url);
                    break;
                }
                Err(err) => {
                    let kind = if err.is_transient() {
                        ErrorKind::TransientFetch
                    } else {
                        ErrorKind::PermanentFetch
                    };
                    pipeline_warn!("site={} aborted at {}: {}", site, url, err);
                    report.failure = Some(SiteFailure {
                        kind,
                        message: format!("{url}: {err}"),
                    });
                    break;
                }
            };
            report.pages_fetched += 1;

            let page_number = self.config.start_page.saturating_add(offset as u32);
            let parsed = decode_page(&output.bytes, output.metadata.content_type.as_deref())
                .map_err(PageParseError::from)
                .and_then(|decoded| {
                    self.scraper.parse_listing(&ListingPage {
                        site,
                        url: &url,
                        body: &decoded.text,
                        page_number,
                        fetched_at: Utc::now(),
                    })
                });
            let parsed = match parsed {
                Ok(parsed) => parsed,
                Err(err) => {
                    pipeline_warn!("site={} page {} unusable: {}", site, url, err);
                    report.failure = Some(SiteFailure {
                        kind: ErrorKind::Parse,
                        message: format!("{url}: {err}"),
                    });
                    break;
                }
            };

            for failure in parsed.listing_errors {
                report.listing_errors += 1;
                let event = ExtractionEvent::ListingFailed {
                    site: site.to_string(),
                    page_url: url.clone(),
                    message: format!("listing #{}: {}", failure.position, failure.reason),
                };
                if self.events.send(event).await.is_err() {
                    return;
                }
            }

            let empty = parsed.records.is_empty();
            for record in parsed.records {
                if self.events.send(ExtractionEvent::Record(record)).await.is_err() {
                    return;
                }
                report.extracted += 1;
            }

            if empty || parsed.exhausted {
                pipeline_debug!("site={} exhausted at page {}", site, page_number);
                break;
            }
        }

        pipeline_info!(
            "site={} extraction finished: pages={} records={} failed={}",
            site,
            report.pages_fetched,
            report.extracted,
            report.failure.is_some()
        );
    }
}
