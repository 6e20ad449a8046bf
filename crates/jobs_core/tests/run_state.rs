use std::sync::Once;

use chrono::{TimeZone, Utc};
use jobs_core::{ErrorKind, RunRecord, RunState, TransitionError};
use pretty_assertions::assert_eq;

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(pipeline_logging::initialize_for_tests);
}

fn at(secs: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

#[test]
fn happy_path_walks_every_stage_in_order() {
    init_logging();
    let mut run = RunRecord::new("run-1", at(0));
    assert_eq!(run.state(), RunState::Pending);

    for (i, state) in [
        RunState::Extracting,
        RunState::Normalizing,
        RunState::Deduping,
        RunState::LoadingHandoff,
        RunState::Completed,
    ]
    .into_iter()
    .enumerate()
    {
        run.transition(state, at(i as i64 + 1)).unwrap();
    }

    let states: Vec<_> = run.transitions.iter().map(|t| t.state).collect();
    assert_eq!(
        states,
        vec![
            RunState::Pending,
            RunState::Extracting,
            RunState::Normalizing,
            RunState::Deduping,
            RunState::LoadingHandoff,
            RunState::Completed,
        ]
    );
    assert_eq!(run.finished_at, Some(at(5)));
}

#[test]
fn skipping_a_stage_is_rejected() {
    let mut run = RunRecord::new("run-2", at(0));
    run.transition(RunState::Extracting, at(1)).unwrap();
    let err = run.transition(RunState::Deduping, at(2)).unwrap_err();
    assert_eq!(
        err,
        TransitionError {
            from: RunState::Extracting,
            to: RunState::Deduping
        }
    );
    assert_eq!(run.state(), RunState::Extracting);
}

#[test]
fn failure_is_reachable_from_any_open_stage_but_not_after_completion() {
    let mut run = RunRecord::new("run-3", at(0));
    run.transition(RunState::Extracting, at(1)).unwrap();
    run.fail("index unreadable", at(2)).unwrap();
    assert_eq!(run.state(), RunState::Failed);
    assert_eq!(run.errors_of(ErrorKind::Orchestration).count(), 1);
    assert!(run.fail("again", at(3)).is_err());

    let mut done = RunRecord::new("run-4", at(0));
    for state in [
        RunState::Extracting,
        RunState::Normalizing,
        RunState::Deduping,
        RunState::LoadingHandoff,
        RunState::Completed,
    ] {
        done.transition(state, at(1)).unwrap();
    }
    assert!(done.transition(RunState::Failed, at(2)).is_err());
}

#[test]
fn site_errors_count_as_failures_and_totals_sum_sites() {
    let mut run = RunRecord::new("run-5", at(0));
    run.transition(RunState::Extracting, at(1)).unwrap();
    run.site_mut("alpha").fetched = 3;
    run.site_mut("alpha").extracted = 20;
    run.site_mut("beta").extracted = 5;
    run.record_error(Some("beta"), ErrorKind::PermanentFetch, "404 on page 2", at(2));
    run.record_error(None, ErrorKind::Load, "sink offline", at(3));

    assert_eq!(run.site("beta").failed, 1);
    assert_eq!(run.site("alpha").failed, 0);
    let totals = run.totals();
    assert_eq!(totals.extracted, 25);
    assert_eq!(totals.fetched, 3);
    assert_eq!(totals.failed, 1);
    assert_eq!(run.errors.len(), 2);
    assert_eq!(run.errors[0].stage, RunState::Extracting);
}

#[test]
fn transition_snapshots_totals_at_that_moment() {
    let mut run = RunRecord::new("run-6", at(0));
    run.transition(RunState::Extracting, at(1)).unwrap();
    run.site_mut("alpha").extracted = 4;
    run.transition(RunState::Normalizing, at(2)).unwrap();
    run.site_mut("alpha").extracted = 9;

    assert_eq!(run.transitions[2].totals.extracted, 4);
}

#[test]
fn run_record_survives_json_round_trip() {
    let mut run = RunRecord::new("run-7", at(0));
    run.transition(RunState::Extracting, at(1)).unwrap();
    run.site_mut("alpha").kept = 2;
    let text = serde_json::to_string(&run).unwrap();
    assert!(text.contains("\"EXTRACTING\""));
    let back: RunRecord = serde_json::from_str(&text).unwrap();
    assert_eq!(back, run);
}

#[test]
fn late_errors_keep_the_stage_that_produced_them() {
    init_logging();
    let mut run = RunRecord::new("run-3", at(0));
    run.transition(RunState::Extracting, at(1)).unwrap();
    run.transition(RunState::Normalizing, at(2)).unwrap();

    run.record_stage_error(RunState::Extracting, Some("board"), ErrorKind::Parse, "page 3", at(3));
    run.record_error(Some("board"), ErrorKind::Validation, "no title", at(4));

    let stages: Vec<RunState> = run.errors.iter().map(|e| e.stage).collect();
    assert_eq!(stages, vec![RunState::Extracting, RunState::Normalizing]);
    assert_eq!(run.site("board").failed, 2);
}
