//! Per-site request gates.
//!
//! Every site gets its own gate: a semaphore bounding in-flight requests and a
//! GCRA pacer spacing request starts. Gates never share state, so a throttled
//! site cannot stall another one.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU32;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota};
use pipeline_logging::{pipeline_debug, pipeline_trace};
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatePolicy {
    pub max_concurrency: usize,
    pub requests_per_interval: u32,
    #[serde(with = "crate::config::millis")]
    pub interval: Duration,
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            requests_per_interval: 5,
            interval: Duration::from_secs(1),
        }
    }
}

impl RatePolicy {
    pub fn new(max_concurrency: usize, requests_per_interval: u32, interval: Duration) -> Self {
        Self {
            max_concurrency,
            requests_per_interval,
            interval,
        }
    }

    /// Quota spreading `requests_per_interval` evenly, with that many as burst.
    fn quota(&self) -> Quota {
        let requests = NonZeroU32::new(self.requests_per_interval).unwrap_or(NonZeroU32::MIN);
        let period = (self.interval / requests.get()).max(Duration::from_nanos(1));
        Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(requests))
            .allow_burst(requests)
    }
}

struct SiteGate {
    capacity: usize,
    slots: Arc<Semaphore>,
    pacer: DefaultDirectRateLimiter,
}

impl SiteGate {
    fn new(policy: &RatePolicy) -> Self {
        let capacity = policy.max_concurrency.max(1);
        Self {
            capacity,
            slots: Arc::new(Semaphore::new(capacity)),
            pacer: governor::RateLimiter::direct(policy.quota()),
        }
    }
}

/// Right to issue one request. The concurrency slot is released on drop.
#[derive(Debug)]
pub struct RatePermit {
    site: String,
    _slot: Option<OwnedSemaphorePermit>,
}

impl RatePermit {
    pub fn site(&self) -> &str {
        &self.site
    }
}

impl Drop for RatePermit {
    fn drop(&mut self) {
        pipeline_trace!("released permit for site={}", self.site);
    }
}

pub struct RateLimiter {
    default_policy: RatePolicy,
    configured: HashMap<String, Arc<SiteGate>>,
    fallback: RwLock<HashMap<String, Arc<SiteGate>>>,
}

impl RateLimiter {
    pub fn new(default_policy: RatePolicy, per_site: BTreeMap<String, RatePolicy>) -> Self {
        let configured = per_site
            .iter()
            .map(|(site, policy)| (site.clone(), Arc::new(SiteGate::new(policy))))
            .collect();
        Self {
            default_policy,
            configured,
            fallback: RwLock::new(HashMap::new()),
        }
    }

    /// Waits for a concurrency slot, then for the pacer, for `site`.
    pub async fn acquire(&self, site: &str) -> RatePermit {
        let gate = self.gate(site);
        // The semaphore is never closed, so a failed acquire only loses the slot bound.
        let slot = gate.slots.clone().acquire_owned().await.ok();
        gate.pacer.until_ready().await;
        pipeline_trace!("acquired permit for site={}", site);
        RatePermit {
            site: site.to_string(),
            _slot: slot,
        }
    }

    /// Number of requests currently holding a slot for `site`.
    pub fn in_flight(&self, site: &str) -> usize {
        let gate = self.gate(site);
        gate.capacity.saturating_sub(gate.slots.available_permits())
    }

    fn gate(&self, site: &str) -> Arc<SiteGate> {
        if let Some(gate) = self.configured.get(site) {
            return gate.clone();
        }
        if let Ok(map) = self.fallback.read() {
            if let Some(gate) = map.get(site) {
                return gate.clone();
            }
        }
        let mut map = match self.fallback.write() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(site.to_string())
            .or_insert_with(|| {
                pipeline_debug!("no rate policy for site={}, using default", site);
                Arc::new(SiteGate::new(&self.default_policy))
            })
            .clone()
    }
}
