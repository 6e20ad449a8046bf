use chrono::{TimeZone, Utc};
use jobs_core::{EmploymentType, RawRecord, SalaryInfo, SalaryPeriod, Seniority};
use jobs_engine::{
    Correction, DedupPolicy, Fingerprinter, NormalizationPipeline, NormalizationRules,
    ValidationError,
};
use pretty_assertions::assert_eq;

fn pipeline() -> NormalizationPipeline {
    NormalizationPipeline::new(
        &NormalizationRules::default(),
        Fingerprinter::new(&DedupPolicy::default()),
    )
    .expect("default rules compile")
}

fn raw(title: &str) -> RawRecord {
    RawRecord::new(
        "board",
        "https://jobs.example.com/jobs/1",
        Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
    )
    .with_title(title)
    .with_company("Acme")
}

#[test]
fn messy_english_listing_is_canonicalized() {
    let record = raw("  SENIOR  Python Developer ")
        .with_salary("8,000–12,000 EGP/month")
        .with_location("Cairo, Egypt");

    let done = pipeline().normalize(&record).expect("valid record");
    let canonical = done.record;

    assert_eq!(canonical.title, "SENIOR Python Developer");
    assert_eq!(canonical.seniority, Seniority::Senior);
    assert!(canonical.tags.contains("python"));
    assert_eq!(
        canonical.salary,
        Some(SalaryInfo {
            min: Some(8000.0),
            max: Some(12000.0),
            currency: Some("EGP".into()),
            period: Some(SalaryPeriod::Monthly),
        })
    );
    assert_eq!(canonical.location_text(), "Cairo, Egypt");
    assert!(done.corrections.is_empty());
    assert_eq!(canonical.fingerprint.len(), 32);
}

#[test]
fn inverted_salary_bounds_are_swapped_and_reported() {
    let record = raw("Backend Engineer").with_salary("15000 - 9000 USD per year");

    let done = pipeline().normalize(&record).unwrap();
    let salary = done.record.salary.expect("salary parsed");

    assert_eq!(salary.min, Some(9000.0));
    assert_eq!(salary.max, Some(15000.0));
    assert_eq!(salary.period, Some(SalaryPeriod::Yearly));
    assert_eq!(
        done.corrections,
        vec![Correction::SalaryBoundsSwapped {
            min: 15000.0,
            max: 9000.0
        }]
    );
}

#[test]
fn arabic_listing_is_reconciled() {
    let record = RawRecord::new(
        "arabic-board",
        "https://jobs.example.com/ar/7",
        Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
    )
    .with_title("مطور بايثون أول")
    .with_company("شركة\u{0640} النيل")
    .with_location("القاهرة، مصر")
    .with_salary("١٠٬٠٠٠ - ١٥٬٠٠٠ جنيه شهريا")
    .with_description("<p>خبرة في Python و Django</p><p>دوام كامل</p>");

    let canonical = pipeline().normalize(&record).unwrap().record;

    assert_eq!(canonical.company, "شركة النيل");
    assert_eq!(canonical.seniority, Seniority::Senior);
    assert_eq!(canonical.employment_type, Some(EmploymentType::FullTime));
    assert_eq!(
        canonical.tags.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["django", "python"]
    );
    let location = canonical.location.expect("location parsed");
    assert_eq!(location.city.as_deref(), Some("القاهرة"));
    assert_eq!(location.country.as_deref(), Some("مصر"));
    assert_eq!(
        canonical.salary,
        Some(SalaryInfo {
            min: Some(10000.0),
            max: Some(15000.0),
            currency: Some("EGP".into()),
            period: Some(SalaryPeriod::Monthly),
        })
    );
    assert!(!canonical.description.contains('<'));
}

#[test]
fn normalizing_a_canonical_record_again_changes_nothing() {
    let pipeline = pipeline();
    let first = pipeline
        .normalize(
            &raw("<b>Lead</b> Data Engineer &amp; Analyst")
                .with_location("Riyadh | Saudi Arabia")
                .with_salary("$5k - 7k monthly")
                .with_tags("SQL; Power BI")
                .with_description("<ul><li>Full-time</li><li>Tableau &amp; SQL</li></ul>"),
        )
        .unwrap()
        .record;

    let mut again = RawRecord::new(first.site.clone(), first.source_url.clone(), first.first_seen)
        .with_title(first.title.clone())
        .with_company(first.company.clone())
        .with_location(first.location_text())
        .with_description(first.description.clone())
        .with_tags(first.tags.iter().cloned().collect::<Vec<_>>().join(", "));
    if let Some(salary) = &first.salary {
        again = again.with_salary(salary.to_string());
    }
    let second = pipeline.normalize(&again).unwrap().record;

    assert_eq!(second, first);
}

#[test]
fn records_missing_required_fields_are_rejected() {
    let pipeline = pipeline();

    let no_company = RawRecord::new("board", "https://jobs.example.com/9", Utc::now())
        .with_title("QA Engineer");
    assert_eq!(
        pipeline.normalize(&no_company).unwrap_err(),
        ValidationError {
            site: "board".into(),
            source_url: "https://jobs.example.com/9".into(),
            field: "company",
        }
    );

    let blank_title = raw("<span>   </span>");
    assert_eq!(pipeline.normalize(&blank_title).unwrap_err().field, "title");
}

#[test]
fn unreadable_salary_text_yields_empty_salary() {
    let done = pipeline()
        .normalize(&raw("Support Agent").with_salary("Competitive"))
        .unwrap();
    assert_eq!(done.record.salary, Some(SalaryInfo::default()));
}
