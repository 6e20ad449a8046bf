//! Jobs engine: fetching, scraping, normalization, dedup and run orchestration.
mod config;
mod coordinator;
mod decode;
mod dedup;
mod fetch;
mod load;
mod normalize;
mod orchestrator;
mod persist;
mod rate_limit;
mod scrape;
mod types;

pub use config::{ConfigError, PipelineConfig, SiteConfig, StageRetry};
pub use coordinator::{
    ExtractionCoordinator, ExtractionEvent, ExtractionSummary, SiteFailure, SiteReport,
};
pub use decode::{decode_page, DecodeError, DecodedPage};
pub use dedup::{DedupDecision, DedupPolicy, Deduplicator, Fingerprinter};
pub use fetch::{FetchSettings, Fetcher, ReqwestFetcher, RetryPolicy};
pub use load::{JsonLinesSink, LoadError, LoadReceipt, LoadSink, StagingSink};
pub use normalize::{
    default_countries, default_employment_rules, default_remote_keywords,
    default_seniority_rules, default_tag_dictionary, Correction, EmploymentRule,
    NormalizationPipeline, NormalizationRules, Normalized, PeriodRule, SalaryRules,
    SeniorityRule, ValidationError,
};
pub use orchestrator::{OrchestrationError, ReloadReport, RunOrchestrator, RunReport, SiteSelection};
pub use persist::{
    ensure_dir, read_jsonl, write_jsonl, AtomicFileWriter, DataLayout, IndexError, IndexStore,
    PersistError, RunHistory,
};
pub use rate_limit::{RateLimiter, RatePermit, RatePolicy};
pub use scrape::{
    page_urls, ListingError, ListingPage, PageParseError, ParsedListing, ScraperRegistry,
    SelectorRules, SelectorScraper, SiteScraper,
};
pub use types::{AttemptOutcome, FailureKind, FetchError, FetchMetadata, FetchOutput};
