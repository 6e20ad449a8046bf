use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::dedup::DedupPolicy;
use crate::fetch::FetchSettings;
use crate::normalize::NormalizationRules;
use crate::rate_limit::RatePolicy;
use crate::scrape::SelectorRules;

const MIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_FETCH_ATTEMPTS: u32 = 10;
const MAX_REQUESTS_PER_INTERVAL: u32 = 100;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
    #[error("site {site}: invalid selector {selector:?}: {message}")]
    Selector {
        site: String,
        selector: String,
        message: String,
    },
    #[error("invalid pattern: {0}")]
    Pattern(String),
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Retry applied around whole stage hand-offs (index persist, sink loads).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageRetry {
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub delay: Duration,
}

impl Default for StageRetry {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub enabled: bool,
    pub base_url: String,
    /// Page URL with a `{page}` placeholder. Without it only `base_url` is fetched.
    pub page_url_template: Option<String>,
    pub start_page: u32,
    pub max_pages: u32,
    /// Falls back to the global default policy when absent.
    pub rate: Option<RatePolicy>,
    pub headers: BTreeMap<String, String>,
    pub selectors: Option<SelectorRules>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: String::new(),
            page_url_template: None,
            start_page: 1,
            max_pages: 5,
            rate: None,
            headers: BTreeMap::new(),
            selectors: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    /// Sites scraped at the same time.
    pub max_workers: usize,
    pub normalization_workers: usize,
    pub channel_capacity: usize,
    pub default_rate: RatePolicy,
    pub fetch: FetchSettings,
    pub stage_retry: StageRetry,
    pub dedup: DedupPolicy,
    pub rules: NormalizationRules,
    pub sites: BTreeMap<String, SiteConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            max_workers: 4,
            normalization_workers: 4,
            channel_capacity: 256,
            default_rate: RatePolicy::default(),
            fetch: FetchSettings::default(),
            stage_retry: StageRetry::default(),
            dedup: DedupPolicy::default(),
            rules: NormalizationRules::default(),
            sites: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    pub fn enabled_sites(&self) -> impl Iterator<Item = (&String, &SiteConfig)> {
        self.sites.iter().filter(|(_, site)| site.enabled)
    }

    /// Per-site rate policies for sites that override the default.
    pub fn rate_overrides(&self) -> BTreeMap<String, RatePolicy> {
        self.sites
            .iter()
            .filter_map(|(name, site)| site.rate.clone().map(|rate| (name.clone(), rate)))
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let timeout = self.fetch.request_timeout;
        if !(MIN_REQUEST_TIMEOUT..=MAX_REQUEST_TIMEOUT).contains(&timeout) {
            return Err(ConfigError::invalid(
                "fetch.request_timeout",
                format!("must be between 5 and 120 seconds, got {timeout:?}"),
            ));
        }
        let attempts = self.fetch.retry.max_attempts;
        if !(1..=MAX_FETCH_ATTEMPTS).contains(&attempts) {
            return Err(ConfigError::invalid(
                "fetch.retry.max_attempts",
                format!("must be between 1 and {MAX_FETCH_ATTEMPTS}, got {attempts}"),
            ));
        }
        if !(0.0..=1.0).contains(&self.fetch.retry.jitter) {
            return Err(ConfigError::invalid("fetch.retry.jitter", "must be within 0..=1"));
        }
        if self.fetch.user_agent.trim().is_empty() {
            return Err(ConfigError::invalid("fetch.user_agent", "cannot be empty"));
        }
        if self.max_workers == 0 {
            return Err(ConfigError::invalid("max_workers", "must be at least 1"));
        }
        if self.normalization_workers == 0 {
            return Err(ConfigError::invalid("normalization_workers", "must be at least 1"));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::invalid("channel_capacity", "must be at least 1"));
        }
        if self.stage_retry.max_attempts == 0 {
            return Err(ConfigError::invalid("stage_retry.max_attempts", "must be at least 1"));
        }
        validate_rate("default_rate", &self.default_rate)?;

        for (name, site) in &self.sites {
            if Url::parse(&site.base_url).is_err() {
                return Err(ConfigError::invalid(
                    format!("sites.{name}.base_url"),
                    format!("not an absolute url: {:?}", site.base_url),
                ));
            }
            if let Some(template) = &site.page_url_template {
                if !template.contains("{page}") {
                    return Err(ConfigError::invalid(
                        format!("sites.{name}.page_url_template"),
                        "missing {page} placeholder",
                    ));
                }
            }
            if site.max_pages == 0 {
                return Err(ConfigError::invalid(
                    format!("sites.{name}.max_pages"),
                    "must be at least 1",
                ));
            }
            if let Some(rate) = &site.rate {
                validate_rate(&format!("sites.{name}.rate"), rate)?;
            }
        }
        Ok(())
    }
}

fn validate_rate(field: &str, rate: &RatePolicy) -> Result<(), ConfigError> {
    if rate.max_concurrency == 0 {
        return Err(ConfigError::invalid(
            format!("{field}.max_concurrency"),
            "must be at least 1",
        ));
    }
    if !(1..=MAX_REQUESTS_PER_INTERVAL).contains(&rate.requests_per_interval) {
        return Err(ConfigError::invalid(
            format!("{field}.requests_per_interval"),
            format!("must be between 1 and {MAX_REQUESTS_PER_INTERVAL}"),
        ));
    }
    if rate.interval.is_zero() {
        return Err(ConfigError::invalid(format!("{field}.interval"), "must be positive"));
    }
    Ok(())
}

/// Serializes a `Duration` as whole milliseconds.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
