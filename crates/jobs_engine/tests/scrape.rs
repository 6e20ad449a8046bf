use chrono::{TimeZone, Utc};
use jobs_engine::{ListingPage, PageParseError, SelectorRules, SelectorScraper, SiteScraper};
use pretty_assertions::assert_eq;

const PAGE: &str = r#"
<html><body>
  <ul id="results">
    <li class="job">
      <a href="/jobs/101">
        <h2 class="title">Senior Rust Engineer</h2>
      </a>
      <span class="company">Acme</span>
      <span class="location">Cairo, Egypt</span>
      <span class="salary">8,000 - 12,000 EGP/month</span>
      <div class="description"><p>Build <b>fast</b> services.</p></div>
      <span class="tags">Rust</span><span class="tags">Tokio</span>
    </li>
    <li class="job">
      <span class="company">No Title Inc</span>
    </li>
    <li class="job">
      <h2 class="title">مطور بايثون</h2>
      <span class="company">شركة</span>
    </li>
  </ul>
</body></html>
"#;

fn page<'a>(url: &'a str, body: &'a str) -> ListingPage<'a> {
    ListingPage {
        site: "board",
        url,
        body,
        page_number: 1,
        fetched_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
    }
}

fn rules() -> SelectorRules {
    SelectorRules {
        container: Some("#results".into()),
        end_marker: Some(".no-more".into()),
        ..SelectorRules::default()
    }
}

#[test]
fn listings_become_raw_records_and_bad_ones_are_reported() {
    let scraper = SelectorScraper::new("board", &rules()).unwrap();
    let parsed = scraper
        .parse_listing(&page("https://jobs.example.com/list?page=1", PAGE))
        .expect("page parses");

    assert_eq!(parsed.records.len(), 2);
    assert_eq!(parsed.listing_errors.len(), 1);
    assert_eq!(parsed.listing_errors[0].position, 1);
    assert!(!parsed.exhausted);

    let first = &parsed.records[0];
    assert_eq!(first.site, "board");
    assert_eq!(first.source_url, "https://jobs.example.com/jobs/101");
    assert_eq!(first.fields.title.as_deref(), Some("Senior Rust Engineer"));
    assert_eq!(first.fields.company.as_deref(), Some("Acme"));
    assert_eq!(first.fields.location.as_deref(), Some("Cairo, Egypt"));
    assert_eq!(first.fields.salary.as_deref(), Some("8,000 - 12,000 EGP/month"));
    assert_eq!(first.fields.tags.as_deref(), Some("Rust, Tokio"));
    assert!(first
        .fields
        .description
        .as_deref()
        .is_some_and(|d| d.contains("<b>fast</b>")));

    // Without a link the page URL stands in.
    let second = &parsed.records[1];
    assert_eq!(second.source_url, "https://jobs.example.com/list?page=1");
    assert_eq!(second.fields.title.as_deref(), Some("مطور بايثون"));
    assert_eq!(second.fields.salary, None);
}

#[test]
fn missing_container_fails_the_page() {
    let scraper = SelectorScraper::new("board", &rules()).unwrap();
    let err = scraper
        .parse_listing(&page("https://jobs.example.com/", "<html><body><p>maintenance</p></body></html>"))
        .unwrap_err();
    assert_eq!(
        err,
        PageParseError::MissingContainer {
            selector: "#results".into()
        }
    );
}

#[test]
fn end_marker_flags_last_page() {
    let scraper = SelectorScraper::new("board", &rules()).unwrap();
    let body = r#"<div id="results"><div class="job"><span class="title">Dev</span></div></div>
        <p class="no-more">That's all</p>"#;
    let parsed = scraper
        .parse_listing(&page("https://jobs.example.com/list?page=9", body))
        .unwrap();
    assert!(parsed.exhausted);
    assert_eq!(parsed.records.len(), 1);
}

#[test]
fn empty_results_parse_to_nothing() {
    let scraper = SelectorScraper::new("board", &rules()).unwrap();
    let parsed = scraper
        .parse_listing(&page("https://jobs.example.com/list?page=4", r#"<div id="results"></div>"#))
        .unwrap();
    assert!(parsed.records.is_empty());
    assert!(parsed.listing_errors.is_empty());
}
