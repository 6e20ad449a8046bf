use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use pipeline_logging::{pipeline_debug, pipeline_warn};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, RETRY_AFTER, USER_AGENT};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::millis;
use crate::rate_limit::RateLimiter;
use crate::{AttemptOutcome, FailureKind, FetchError, FetchMetadata, FetchOutput};

/// Exponential backoff with jitter for transient failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub base_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
    /// Upper bound on a server's `Retry-After`.
    #[serde(with = "millis")]
    pub max_retry_after: Duration,
    /// Fraction of the delay added at random, `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_retry_after: Duration::from_secs(60),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, never shorter than `retry_after`
    /// once that is capped at `max_retry_after`.
    pub fn delay_after(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);
        let jitter = backoff.mul_f64(self.jitter.clamp(0.0, 1.0) * fastrand::f64());
        let delay = backoff + jitter;
        match retry_after.map(|floor| floor.min(self.max_retry_after)) {
            Some(floor) if floor > delay => floor,
            _ => delay,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    pub redirect_limit: usize,
    pub max_bytes: u64,
    pub allowed_content_types: Vec<String>,
    pub user_agent: String,
    pub retry: RetryPolicy,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            redirect_limit: 5,
            max_bytes: 5 * 1024 * 1024,
            allowed_content_types: vec![
                "text/html".to_string(),
                "application/xhtml+xml".to_string(),
                "application/json".to_string(),
            ],
            user_agent: "job-harvester/0.1".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, site: &str) -> Result<FetchOutput, FetchError>;
}

/// HTTP fetcher pacing every attempt through the shared [`RateLimiter`].
#[derive(Clone)]
pub struct ReqwestFetcher {
    settings: FetchSettings,
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    site_headers: HashMap<String, HeaderMap>,
    cancel: CancellationToken,
}

impl ReqwestFetcher {
    pub fn new(settings: FetchSettings, limiter: Arc<RateLimiter>) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        let agent = HeaderValue::from_str(&settings.user_agent)
            .map_err(|err| {
                FetchError::new(FailureKind::InvalidHeader, format!("user agent: {err}"))
            })?;
        headers.insert(USER_AGENT, agent);

        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .redirect(reqwest::redirect::Policy::limited(settings.redirect_limit))
            .default_headers(headers)
            .build()
            .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))?;

        Ok(Self {
            settings,
            client,
            limiter,
            site_headers: HashMap::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Once `cancel` fires, retry waits end early and no further attempt starts.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Extra headers (credentials, cookies, referers) sent only to `site`.
    pub fn with_site_headers(
        mut self,
        site: impl Into<String>,
        headers: &BTreeMap<String, String>,
    ) -> Result<Self, FetchError> {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| header_error(name, err))?;
            let value = HeaderValue::from_str(value)
                .map_err(|err| header_error(name, err))?;
            map.insert(header_name, value);
        }
        self.site_headers.insert(site.into(), map);
        Ok(self)
    }

    fn is_content_type_allowed(&self, content_type: &str) -> bool {
        let ct = content_type.split(';').next().unwrap_or(content_type).trim();
        self.settings
            .allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ct))
    }

    async fn attempt(&self, url: &reqwest::Url, site: &str, attempt: u32) -> AttemptOutcome {
        let started = Instant::now();
        let mut request = self.client.get(url.clone());
        if let Some(headers) = self.site_headers.get(site) {
            request = request.headers(headers.clone());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => return AttemptOutcome::from_error(map_reqwest_error(err), None),
        };

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            return AttemptOutcome::from_error(
                FetchError::new(FailureKind::HttpStatus(status.as_u16()), status.to_string()),
                retry_after,
            );
        }

        if let Some(content_len) = response.content_length() {
            if content_len > self.settings.max_bytes {
                return AttemptOutcome::Permanent(FetchError::new(
                    FailureKind::TooLarge {
                        max_bytes: self.settings.max_bytes,
                        actual: Some(content_len),
                    },
                    "response too large",
                ));
            }
        }

        let final_url = response.url().to_string();
        let headers = response.headers().clone();
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        if let Some(ct) = content_type.as_deref() {
            if !self.is_content_type_allowed(ct) {
                return AttemptOutcome::Permanent(FetchError::new(
                    FailureKind::UnsupportedContentType {
                        content_type: ct.to_string(),
                    },
                    "unsupported content type",
                ));
            }
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => return AttemptOutcome::from_error(map_reqwest_error(err), None),
            };
            let next_len = bytes.len() as u64 + chunk.len() as u64;
            if next_len > self.settings.max_bytes {
                return AttemptOutcome::Permanent(FetchError::new(
                    FailureKind::TooLarge {
                        max_bytes: self.settings.max_bytes,
                        actual: Some(next_len),
                    },
                    "response too large",
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        let metadata = FetchMetadata {
            original_url: url.to_string(),
            final_url,
            status: status.as_u16(),
            headers,
            content_type,
            elapsed: started.elapsed(),
            attempts: attempt,
            byte_len: bytes.len() as u64,
        };
        AttemptOutcome::Success(FetchOutput { bytes, metadata })
    }
}

#[async_trait::async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, site: &str) -> Result<FetchOutput, FetchError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;

        let mut attempt = 1;
        loop {
            if attempt > 1 && self.cancel.is_cancelled() {
                return Err(FetchError::new(FailureKind::Cancelled, "fetch cancelled")
                    .after_attempts(attempt - 1));
            }
            let outcome = {
                let _permit = self.limiter.acquire(site).await;
                self.attempt(&parsed, site, attempt).await
            };

            match outcome {
                AttemptOutcome::Success(output) => {
                    pipeline_debug!(
                        "fetched site={} url={} status={} bytes={} attempts={} elapsed={:?}",
                        site,
                        url,
                        output.metadata.status,
                        output.metadata.byte_len,
                        attempt,
                        output.metadata.elapsed
                    );
                    return Ok(output);
                }
                AttemptOutcome::Permanent(error) => return Err(error.after_attempts(attempt)),
                AttemptOutcome::Transient { error, retry_after } => {
                    if attempt >= self.settings.retry.max_attempts {
                        return Err(error.after_attempts(attempt));
                    }
                    let delay = self.settings.retry.delay_after(attempt, retry_after);
                    pipeline_warn!(
                        "transient failure site={} url={} attempt={}: {}; retrying in {:?}",
                        site,
                        url,
                        attempt,
                        error.kind,
                        delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => {
                            pipeline_debug!("retry wait cancelled site={} url={}", site, url);
                            return Err(FetchError::new(FailureKind::Cancelled, error.to_string())
                                .after_attempts(attempt));
                        }
                    }
                    attempt += 1;
                }
            }
        }
    }
}

fn header_error(name: &str, err: impl std::fmt::Display) -> FetchError {
    FetchError::new(FailureKind::InvalidHeader, format!("{name}: {err}"))
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_redirect() {
        return FetchError::new(FailureKind::RedirectLimitExceeded, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}
