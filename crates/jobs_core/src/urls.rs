use serde::{Deserialize, Serialize};
use url::Url;

const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "ref", "source", "trk", "mc_cid", "mc_eid"];

/// Rules deciding when two source URLs point at the same listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UrlPolicy {
    pub strip_fragment: bool,
    pub strip_query: bool,
    /// Drops `utm_*` and common click-tracking parameters.
    pub strip_tracking_params: bool,
    pub strip_trailing_slash: bool,
    pub strip_www: bool,
    /// Treats `http` and `https` as the same listing.
    pub ignore_scheme: bool,
}

impl Default for UrlPolicy {
    fn default() -> Self {
        Self {
            strip_fragment: true,
            strip_query: false,
            strip_tracking_params: true,
            strip_trailing_slash: true,
            strip_www: true,
            ignore_scheme: true,
        }
    }
}

/// Canonical form of a listing URL under `policy`.
///
/// Unparseable input falls back to its trimmed, lower-cased text so the result
/// is still deterministic.
pub fn normalize_url(raw: &str, policy: &UrlPolicy) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_lowercase();
    };

    if policy.strip_fragment {
        url.set_fragment(None);
    }

    if policy.strip_query {
        url.set_query(None);
    } else if policy.strip_tracking_params && url.query().is_some() {
        let mut kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !is_tracking_param(key))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        kept.sort();
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }
    }

    let host = url
        .host_str()
        .map(|h| {
            if policy.strip_www {
                h.strip_prefix("www.").unwrap_or(h).to_string()
            } else {
                h.to_string()
            }
        })
        .unwrap_or_default();

    let mut path = url.path().to_string();
    if policy.strip_trailing_slash {
        while path.len() > 1 && path.ends_with('/') {
            path.pop();
        }
        if path == "/" {
            path.clear();
        }
    }

    let scheme = if policy.ignore_scheme {
        String::new()
    } else {
        format!("{}://", url.scheme())
    };
    let port = url.port().map(|p| format!(":{p}")).unwrap_or_default();
    let query = url.query().map(|q| format!("?{q}")).unwrap_or_default();
    let fragment = url.fragment().map(|f| format!("#{f}")).unwrap_or_default();

    format!("{scheme}{host}{port}{path}{query}{fragment}")
}

fn is_tracking_param(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    lower.starts_with("utm_") || TRACKING_PARAMS.contains(&lower.as_str())
}
