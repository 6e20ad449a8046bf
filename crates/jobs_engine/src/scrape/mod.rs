//! Site scrapers and the registry the coordinator resolves them from.

mod template;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use jobs_core::RawRecord;

use crate::config::{ConfigError, PipelineConfig, SiteConfig};
use crate::decode::DecodeError;

pub use template::{SelectorRules, SelectorScraper};

/// One fetched and decoded listing page handed to a scraper.
#[derive(Debug, Clone, Copy)]
pub struct ListingPage<'a> {
    pub site: &'a str,
    pub url: &'a str,
    pub body: &'a str,
    pub page_number: u32,
    pub fetched_at: DateTime<Utc>,
}

/// A single listing on a page that could not be turned into a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingError {
    pub position: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedListing {
    pub records: Vec<RawRecord>,
    pub listing_errors: Vec<ListingError>,
    /// Set when the page carries an explicit "no more results" marker.
    pub exhausted: bool,
}

/// The page as a whole is unusable. Aborts the site for the run.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PageParseError {
    #[error("required container {selector:?} not found")]
    MissingContainer { selector: String },
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("malformed page: {0}")]
    Malformed(String),
}

pub trait SiteScraper: Send + Sync {
    /// Candidate page URLs, in order. Calling again starts over.
    fn list_pages(&self, site: &SiteConfig) -> Box<dyn Iterator<Item = String> + Send>;

    fn parse_listing(&self, page: &ListingPage<'_>) -> Result<ParsedListing, PageParseError>;
}

/// Page URLs from `page_url_template`, or the base URL alone.
pub fn page_urls(site: &SiteConfig) -> Box<dyn Iterator<Item = String> + Send> {
    match site.page_url_template.clone() {
        Some(template) => {
            let last = site.start_page.saturating_add(site.max_pages);
            Box::new(
                (site.start_page..last).map(move |page| template.replace("{page}", &page.to_string())),
            )
        }
        None => Box::new(std::iter::once(site.base_url.clone())),
    }
}

#[derive(Default, Clone)]
pub struct ScraperRegistry {
    scrapers: HashMap<String, Arc<dyn SiteScraper>>,
}

impl ScraperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a [`SelectorScraper`] for every configured site that declares selectors.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for (name, site) in &config.sites {
            if let Some(rules) = &site.selectors {
                let scraper = SelectorScraper::new(name, rules)?;
                registry.register(name.clone(), Arc::new(scraper));
            }
        }
        Ok(registry)
    }

    /// Registers or replaces the scraper for `site`.
    pub fn register(&mut self, site: impl Into<String>, scraper: Arc<dyn SiteScraper>) {
        self.scrapers.insert(site.into(), scraper);
    }

    pub fn get(&self, site: &str) -> Option<Arc<dyn SiteScraper>> {
        self.scrapers.get(site).cloned()
    }

    pub fn contains(&self, site: &str) -> bool {
        self.scrapers.contains_key(site)
    }

    pub fn len(&self) -> usize {
        self.scrapers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scrapers.is_empty()
    }
}
