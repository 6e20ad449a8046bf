use jobs_core::RawRecord;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{page_urls, ListingError, ListingPage, PageParseError, ParsedListing, SiteScraper};
use crate::config::{ConfigError, SiteConfig};

/// CSS selectors describing one job board's listing markup.
///
/// Field selectors are evaluated relative to each `item`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorRules {
    /// When set, a page without this element is a page-level parse error.
    pub container: Option<String>,
    pub item: String,
    pub title: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub salary: Option<String>,
    pub description: Option<String>,
    pub tags: Option<String>,
    /// Element whose `href` is the listing's detail URL.
    pub link: Option<String>,
    /// Present on the last results page.
    pub end_marker: Option<String>,
}

impl Default for SelectorRules {
    fn default() -> Self {
        Self {
            container: None,
            item: ".job".to_string(),
            title: ".title".to_string(),
            company: Some(".company".to_string()),
            location: Some(".location".to_string()),
            salary: Some(".salary".to_string()),
            description: Some(".description".to_string()),
            tags: Some(".tags".to_string()),
            link: Some("a[href]".to_string()),
            end_marker: None,
        }
    }
}

#[derive(Debug)]
struct CompiledRules {
    container: Option<(String, Selector)>,
    item: Selector,
    title: Selector,
    company: Option<Selector>,
    location: Option<Selector>,
    salary: Option<Selector>,
    description: Option<Selector>,
    tags: Option<Selector>,
    link: Option<Selector>,
    end_marker: Option<Selector>,
}

/// Scraper driven entirely by [`SelectorRules`]; the default for configured sites.
#[derive(Debug)]
pub struct SelectorScraper {
    site: String,
    rules: CompiledRules,
}

impl SelectorScraper {
    pub fn new(site: &str, rules: &SelectorRules) -> Result<Self, ConfigError> {
        let compile = |selector: &str| {
            Selector::parse(selector).map_err(|err| ConfigError::Selector {
                site: site.to_string(),
                selector: selector.to_string(),
                message: err.to_string(),
            })
        };
        let optional = |selector: &Option<String>| selector.as_deref().map(|raw| compile(raw)).transpose();

        let container = match rules.container.as_deref() {
            Some(raw) => Some((raw.to_string(), compile(raw)?)),
            None => None,
        };
        Ok(Self {
            site: site.to_string(),
            rules: CompiledRules {
                container,
                item: compile(&rules.item)?,
                title: compile(&rules.title)?,
                company: optional(&rules.company)?,
                location: optional(&rules.location)?,
                salary: optional(&rules.salary)?,
                description: optional(&rules.description)?,
                tags: optional(&rules.tags)?,
                link: optional(&rules.link)?,
                end_marker: optional(&rules.end_marker)?,
            },
        })
    }

    fn parse_item(&self, item: ElementRef<'_>, page: &ListingPage<'_>, base: Option<&Url>) -> Result<RawRecord, String> {
        let rules = &self.rules;
        let title = first_text(item, &rules.title).ok_or_else(|| "listing has no title".to_string())?;

        let source_url = rules
            .link
            .as_ref()
            .and_then(|sel| item.select(sel).next())
            .and_then(|link| link.value().attr("href"))
            .and_then(|href| resolve_url(href, base))
            .map(String::from)
            .unwrap_or_else(|| page.url.to_string());

        let mut record = RawRecord::new(page.site, source_url, page.fetched_at).with_title(title);
        record.fields.company = rules.company.as_ref().and_then(|sel| first_text(item, sel));
        record.fields.location = rules.location.as_ref().and_then(|sel| first_text(item, sel));
        record.fields.salary = rules.salary.as_ref().and_then(|sel| first_text(item, sel));
        // Markup is kept; normalization strips it.
        record.fields.description = rules
            .description
            .as_ref()
            .and_then(|sel| item.select(sel).next())
            .map(|node| node.inner_html())
            .filter(|html| !html.trim().is_empty());
        record.fields.tags = rules.tags.as_ref().and_then(|sel| joined_text(item, sel));
        Ok(record)
    }
}

impl SiteScraper for SelectorScraper {
    fn list_pages(&self, site: &SiteConfig) -> Box<dyn Iterator<Item = String> + Send> {
        page_urls(site)
    }

    fn parse_listing(&self, page: &ListingPage<'_>) -> Result<ParsedListing, PageParseError> {
        let document = Html::parse_document(page.body);
        let base = Url::parse(page.url).ok();

        let scope = match &self.rules.container {
            Some((raw, selector)) => document.select(selector).next().ok_or_else(|| {
                PageParseError::MissingContainer {
                    selector: raw.clone(),
                }
            })?,
            None => document.root_element(),
        };

        let mut parsed = ParsedListing {
            exhausted: self
                .rules
                .end_marker
                .as_ref()
                .is_some_and(|sel| document.select(sel).next().is_some()),
            ..ParsedListing::default()
        };

        for (position, item) in scope.select(&self.rules.item).enumerate() {
            match self.parse_item(item, page, base.as_ref()) {
                Ok(record) => parsed.records.push(record),
                Err(reason) => parsed.listing_errors.push(ListingError { position, reason }),
            }
        }
        pipeline_logging::pipeline_trace!(
            "site={} page={} parsed {} listing(s), {} rejected",
            self.site,
            page.page_number,
            parsed.records.len(),
            parsed.listing_errors.len()
        );
        Ok(parsed)
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ").trim().to_string()
}

fn first_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope
        .select(selector)
        .next()
        .map(element_text)
        .filter(|text| !text.is_empty())
}

/// All matches joined with `", "`, for tag chips rendered as separate elements.
fn joined_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    let parts: Vec<String> = scope
        .select(selector)
        .map(element_text)
        .filter(|text| !text.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join(", "))
}

fn resolve_url(reference: &str, base: Option<&Url>) -> Option<Url> {
    let trimmed = reference.trim();
    let lower = trimmed.to_ascii_lowercase();
    if trimmed.is_empty() || lower.starts_with('#') || lower.starts_with("javascript:") {
        return None;
    }
    match Url::parse(trimmed) {
        Ok(url) => Some(url),
        Err(_) => base.and_then(|base| base.join(trimmed).ok()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_selector_is_a_config_error() {
        let rules = SelectorRules {
            item: "div[".into(),
            ..SelectorRules::default()
        };
        let err = SelectorScraper::new("board", &rules).unwrap_err();
        assert!(matches!(err, ConfigError::Selector { site, .. } if site == "board"));
    }

    #[test]
    fn relative_links_resolve_against_page() {
        let base = Url::parse("https://jobs.example.com/list?page=2").unwrap();
        assert_eq!(
            resolve_url("/job/42", Some(&base)).unwrap().as_str(),
            "https://jobs.example.com/job/42"
        );
        assert!(resolve_url("#apply", Some(&base)).is_none());
        assert!(resolve_url("javascript:void(0)", Some(&base)).is_none());
    }
}
