use chrono::{TimeZone, Utc};
use jobs_core::{
    normalize_url, AdmittedFingerprint, FingerprintIndex, RunRecord, UrlPolicy,
};

#[test]
fn default_policy_ignores_cosmetic_url_differences() {
    let policy = UrlPolicy::default();
    let a = normalize_url("https://www.Jobs.example.com/job/42/?utm_source=x#apply", &policy);
    let b = normalize_url("http://jobs.example.com/job/42", &policy);
    assert_eq!(a, b);
    assert_eq!(a, "jobs.example.com/job/42");
}

#[test]
fn meaningful_query_parameters_are_kept_in_stable_order() {
    let policy = UrlPolicy::default();
    let a = normalize_url("https://jobs.example.com/view?id=7&lang=en&gclid=abc", &policy);
    let b = normalize_url("https://jobs.example.com/view?lang=en&id=7", &policy);
    assert_eq!(a, b);
    assert!(a.contains("id=7"));
}

#[test]
fn strict_policy_distinguishes_scheme_and_query() {
    let policy = UrlPolicy {
        ignore_scheme: false,
        strip_tracking_params: false,
        ..UrlPolicy::default()
    };
    assert_ne!(
        normalize_url("https://a.example.com/x", &policy),
        normalize_url("http://a.example.com/x", &policy)
    );
    assert_ne!(
        normalize_url("https://a.example.com/x?utm_source=1", &policy),
        normalize_url("https://a.example.com/x", &policy)
    );
}

#[test]
fn unparseable_urls_fall_back_to_trimmed_lowercase() {
    let policy = UrlPolicy::default();
    assert_eq!(normalize_url("  /Jobs/42 ", &policy), "/jobs/42");
}

#[test]
fn index_rebuild_replays_history_with_later_runs_winning() {
    let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let t1 = Utc.timestamp_opt(1_700_086_400, 0).unwrap();

    let mut first = RunRecord::new("run-a", t0);
    first.admit(AdmittedFingerprint {
        fingerprint: "fp-1".into(),
        source_url: "a.example.com/1".into(),
        first_seen: t0,
    });
    first.admit(AdmittedFingerprint {
        fingerprint: "fp-2".into(),
        source_url: "a.example.com/2".into(),
        first_seen: t0,
    });

    let mut second = RunRecord::new("run-b", t1);
    second.admit(AdmittedFingerprint {
        fingerprint: "fp-1".into(),
        source_url: "b.example.com/1".into(),
        first_seen: t1,
    });

    let index = FingerprintIndex::rebuild([&first, &second]);
    assert_eq!(index.len(), 2);
    let relisted = index.get("fp-1").unwrap();
    assert_eq!(relisted.run_id, "run-b");
    assert_eq!(relisted.source_url, "b.example.com/1");
    assert_eq!(index.get("fp-2").unwrap().run_id, "run-a");
}
