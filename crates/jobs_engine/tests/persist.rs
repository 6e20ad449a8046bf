use std::fs;

use chrono::{TimeZone, Utc};
use jobs_core::{AdmittedFingerprint, FingerprintIndex, IndexEntry, RunRecord, RunState};
use jobs_engine::{
    ensure_dir, read_jsonl, write_jsonl, AtomicFileWriter, DataLayout, IndexError, IndexStore,
    RunHistory,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn finished_run(id: &str, fingerprints: &[&str]) -> RunRecord {
    let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let mut run = RunRecord::new(id, at);
    for state in [
        RunState::Extracting,
        RunState::Normalizing,
        RunState::Deduping,
        RunState::LoadingHandoff,
        RunState::Completed,
    ] {
        run.transition(state, at).unwrap();
    }
    for fp in fingerprints {
        run.admit(AdmittedFingerprint {
            fingerprint: fp.to_string(),
            source_url: format!("jobs.example.com/{fp}"),
            first_seen: at,
        });
    }
    run
}

#[test]
fn creates_missing_directory() {
    let temp = TempDir::new().unwrap();
    let new_dir = temp.path().join("state");
    assert!(!new_dir.exists());
    ensure_dir(&new_dir).unwrap();
    assert!(new_dir.is_dir());
}

#[test]
fn atomic_write_replaces_existing_file() {
    let temp = TempDir::new().unwrap();
    let writer = AtomicFileWriter::new(temp.path().to_path_buf());

    let first = writer.write("jobs.jsonl", "hello").unwrap();
    assert_eq!(first.file_name().unwrap(), "jobs.jsonl");
    assert_eq!(fs::read_to_string(&first).unwrap(), "hello");

    let second = writer.write("jobs.jsonl", "world").unwrap();
    assert_eq!(first, second);
    assert_eq!(fs::read_to_string(&second).unwrap(), "world");
}

#[test]
fn no_partial_file_when_target_dir_is_a_file() {
    let temp = TempDir::new().unwrap();
    let file_path = temp.path().join("not_a_dir");
    fs::write(&file_path, "x").unwrap();

    let writer = AtomicFileWriter::new(file_path.clone());
    assert!(writer.write("jobs.jsonl", "data").is_err());
    assert!(!file_path.with_file_name("jobs.jsonl").exists());
}

#[test]
fn jsonl_reports_the_bad_line() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("staging").join("raw.jsonl");
    write_jsonl(&path, &[1u32, 2, 3]).unwrap();
    assert_eq!(read_jsonl::<u32>(&path).unwrap(), vec![1, 2, 3]);

    fs::write(&path, "1\n\n{oops}\n").unwrap();
    let err = read_jsonl::<u32>(&path).unwrap_err().to_string();
    assert!(err.contains(":3:"), "unexpected error: {err}");
}

#[test]
fn run_history_appends_and_returns_latest() {
    let temp = TempDir::new().unwrap();
    let layout = DataLayout::new(temp.path());
    let history = RunHistory::new(layout.run_history());

    assert!(history.load_all().unwrap().is_empty());
    history.append(&finished_run("run-1", &["aa"])).unwrap();
    history.append(&finished_run("run-2", &["bb"])).unwrap();

    let runs = history.load_all().unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[1].state(), RunState::Completed);
    assert_eq!(history.latest().unwrap().unwrap().run_id, "run-2");
}

#[test]
fn missing_index_is_rebuilt_from_history() {
    let temp = TempDir::new().unwrap();
    let store = IndexStore::new(DataLayout::new(temp.path()).fingerprint_index());
    let history = vec![finished_run("run-1", &["aa", "bb"]), finished_run("run-2", &["bb"])];

    let index = store.load(&history).unwrap();
    assert_eq!(index.len(), 2);
    assert_eq!(index.get("aa").unwrap().run_id, "run-1");
    assert_eq!(index.get("bb").unwrap().run_id, "run-2");
}

#[test]
fn index_survives_persist_and_load() {
    let temp = TempDir::new().unwrap();
    let store = IndexStore::new(temp.path().join("state").join("fingerprints.json"));
    let mut index = FingerprintIndex::new();
    index.upsert(
        "cafe".into(),
        IndexEntry {
            run_id: "run-7".into(),
            first_seen: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            source_url: "jobs.example.com/cafe".into(),
        },
    );

    store.persist(&index).unwrap();
    assert_eq!(store.load(&[]).unwrap(), index);
}

#[test]
fn corrupt_index_is_an_error_not_a_reset() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("fingerprints.json");
    fs::write(&path, "{ not json").unwrap();

    let err = IndexStore::new(&path).load(&[finished_run("run-1", &["aa"])]).unwrap_err();
    assert!(matches!(err, IndexError::Corrupt { .. }));
    assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
}
