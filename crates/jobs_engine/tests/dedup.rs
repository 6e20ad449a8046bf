use chrono::{DateTime, TimeZone, Utc};
use jobs_core::{CanonicalRecord, FingerprintIndex, RawRecord};
use jobs_engine::{
    DedupDecision, DedupPolicy, Deduplicator, Fingerprinter, NormalizationPipeline,
    NormalizationRules,
};
use pretty_assertions::assert_eq;

fn at(day: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + day * 86_400, 0).unwrap()
}

fn canonical(policy: &DedupPolicy, site: &str, url: &str, title: &str, seen: DateTime<Utc>) -> CanonicalRecord {
    let pipeline =
        NormalizationPipeline::new(&NormalizationRules::default(), Fingerprinter::new(policy))
            .unwrap();
    let raw = RawRecord::new(site, url, seen)
        .with_title(title)
        .with_company("Acme Corp")
        .with_location("Cairo, Egypt");
    pipeline.normalize(&raw).unwrap().record
}

#[test]
fn fingerprint_ignores_case_and_spacing() {
    let fingerprinter = Fingerprinter::new(&DedupPolicy::default());
    let a = fingerprinter.fingerprint("Rust  Engineer", "ACME", "Cairo, Egypt", "https://a.example/1");
    let b = fingerprinter.fingerprint(" rust engineer ", "acme", "cairo,  egypt", "https://a.example/1");
    let c = fingerprinter.fingerprint("Rust Engineer", "Acme", "Giza, Egypt", "https://a.example/1");
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn url_participates_only_when_configured() {
    let with_url = Fingerprinter::new(&DedupPolicy {
        include_url_in_fingerprint: true,
        ..DedupPolicy::default()
    });
    let without_url = Fingerprinter::new(&DedupPolicy::default());

    let fp = |f: &Fingerprinter, url: &str| f.fingerprint("Dev", "Acme", "Cairo", url);
    assert_ne!(fp(&with_url, "https://a.example/1"), fp(&with_url, "https://b.example/2"));
    // Tracking parameters are normalized away before hashing.
    assert_eq!(
        fp(&with_url, "https://a.example/1"),
        fp(&with_url, "https://a.example/1?utm_source=feed")
    );
    assert_eq!(fp(&without_url, "https://a.example/1"), fp(&without_url, "https://b.example/2"));
}

#[test]
fn same_listing_from_two_sites_is_kept_once() {
    let policy = DedupPolicy::default();
    let mut first = canonical(&policy, "alpha", "https://alpha.example/jobs/1", "Backend Developer", at(0));
    let mut second = canonical(&policy, "beta", "https://beta.example/p/77", "Backend  developer", at(0));
    assert_eq!(first.fingerprint, second.fingerprint);

    let mut index = FingerprintIndex::new();
    let mut dedup = Deduplicator::new(&mut index, policy, "run-1");
    assert_eq!(dedup.offer(&mut first), DedupDecision::Admitted);
    assert_eq!(dedup.offer(&mut second), DedupDecision::DuplicateInRun);

    let admitted = dedup.into_admitted();
    assert_eq!(admitted.len(), 1);
    assert_eq!(index.len(), 1);
}

#[test]
fn first_sighting_keeps_its_own_first_seen() {
    let policy = DedupPolicy::default();
    let mut record = canonical(&policy, "alpha", "https://alpha.example/jobs/4", "SRE", at(2));
    let mut index = FingerprintIndex::new();
    let decision = Deduplicator::new(&mut index, policy, "run-1").offer(&mut record);
    assert_eq!(decision, DedupDecision::Admitted);
    assert_eq!(record.first_seen, at(2));
}

#[test]
fn listing_from_an_earlier_run_is_dropped() {
    let policy = DedupPolicy::default();
    let mut record = canonical(&policy, "alpha", "https://alpha.example/jobs/1", "QA Engineer", at(0));
    let mut index = FingerprintIndex::new();

    Deduplicator::new(&mut index, policy.clone(), "run-1").offer(&mut record);
    let mut later = canonical(&policy, "alpha", "https://alpha.example/jobs/1", "QA Engineer", at(3));
    let decision = Deduplicator::new(&mut index, policy, "run-2").offer(&mut later);

    assert_eq!(
        decision,
        DedupDecision::DuplicateAcrossRuns {
            first_run: "run-1".into()
        }
    );
    assert_eq!(index.get(&record.fingerprint).unwrap().run_id, "run-1");
}

#[test]
fn relisted_override_keeps_new_url_and_original_first_seen() {
    let policy = DedupPolicy {
        relisted_override: true,
        ..DedupPolicy::default()
    };
    let mut original = canonical(&policy, "alpha", "https://alpha.example/jobs/1", "Data Analyst", at(0));
    let mut index = FingerprintIndex::new();
    Deduplicator::new(&mut index, policy.clone(), "run-1").offer(&mut original);

    let mut relisted = canonical(&policy, "alpha", "https://alpha.example/jobs/9", "Data Analyst", at(5));
    let mut dedup = Deduplicator::new(&mut index, policy.clone(), "run-2");
    let decision = dedup.offer(&mut relisted);
    assert_eq!(
        decision,
        DedupDecision::Relisted {
            previous_url: "alpha.example/jobs/1".into()
        }
    );
    assert!(decision.is_kept());
    // The emitted record agrees with the index about when the listing first appeared.
    assert_eq!(relisted.first_seen, at(0));
    assert_eq!(relisted.source_url, "https://alpha.example/jobs/9");
    let admitted = dedup.into_admitted();
    assert_eq!(admitted[0].first_seen, at(0));

    let entry = index.get(&original.fingerprint).unwrap();
    assert_eq!(entry.run_id, "run-2");
    // Index URLs are stored normalized.
    assert_eq!(entry.source_url, "alpha.example/jobs/9");
    assert_eq!(entry.first_seen, at(0));

    // Same URL again in a third run is still a duplicate.
    let mut again = canonical(&policy, "alpha", "https://alpha.example/jobs/9", "Data Analyst", at(9));
    assert!(!Deduplicator::new(&mut index, policy, "run-3")
        .offer(&mut again)
        .is_kept());
    assert_eq!(again.first_seen, at(9));
}
