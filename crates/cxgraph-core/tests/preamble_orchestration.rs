//! Preamble coordination and parse task tests.
//!
//! Drives the `Indexer` with a `ScriptedFrontend` to check:
//! - One preamble build per option set, however many tasks race for it
//! - A shared outcome when that build fails
//! - The WithPreamble -> WithoutPreamble fallback
//! - Preambles staying out of the way when disabled or for other languages
//! - Files modified while being parsed
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package cxgraph-core --test preamble_orchestration
//! ```

mod common;

use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use common::{defining, Fixture};
use cxgraph_core::{
    ArenaUnit, Attempt, CursorKind, FailureMode, FileOutcome, FrontendError, IndexError,
    PreambleConfig, PreambleCoordinator, PreambleError, ScriptedFrontend, SourceJob,
    SourceLanguage,
};
use pretty_assertions::assert_eq;

// ============================================================================
// Test Helpers
// ============================================================================

/// Write `count` C++ files that all include `common.h` and register a unit
/// for each of them.
fn cxx_sources(fixture: &Fixture, count: usize) -> (ScriptedFrontend, Vec<SourceJob>) {
    fixture.write("common.h", "#pragma once\nint shared();\n");
    fixture.write("detail.h", "int detail();\n");
    let mut frontend = ScriptedFrontend::new();
    let mut jobs = Vec::new();
    for i in 0..count {
        let name = format!("src{}.cpp", i);
        let file = fixture.write(&name, "#include \"common.h\"\n");
        let mut unit = ArenaUnit::new(&file);
        let root = unit.root_id();
        unit.add_inclusion(fixture.path("common.h"), 1);
        unit.add_inclusion(fixture.path("detail.h"), 2);
        unit.push(
            root,
            defining(CursorKind::FunctionDecl, &format!("f{}", i), fixture.at(&name, 3, 6)),
        );
        frontend = frontend.with_unit(unit);
        jobs.push(fixture.job(&name));
    }
    (frontend, jobs)
}

fn attempt_of(outcome: Option<&FileOutcome>) -> Option<Attempt> {
    match outcome {
        Some(FileOutcome::Indexed(report)) => Some(report.attempt),
        _ => None,
    }
}

// ============================================================================
// Single build
// ============================================================================

#[test]
fn test_concurrent_tasks_build_one_preamble() {
    let fixture = Fixture::new();
    let (frontend, jobs) = cxx_sources(&fixture, 12);
    let frontend = frontend.with_preamble_delay(Duration::from_millis(50));
    let indexer = fixture.indexer(frontend, fixture.preamble(SourceLanguage::Cxx, 1));

    let summary = indexer.index_files(&jobs);
    assert_eq!(summary.indexed(), 12);
    assert_eq!(indexer.frontend().preamble_builds(), 1);

    let entries = indexer.preambles().entries();
    assert_eq!(entries.len(), 1);
    let built = entries[0].built_path().map(Path::to_path_buf);
    assert_eq!(built.as_deref(), Some(entries[0].path()));

    let inputs = indexer.frontend().preamble_inputs();
    let inputs = &inputs[0];
    assert_eq!(inputs.direct, vec![fixture.path("common.h")]);
    assert!(inputs.all.contains(&fixture.path("detail.h")));

    // The next pass parses with the artifact.
    let again = indexer.reindex_files(&jobs);
    for job in &jobs {
        assert_eq!(
            attempt_of(again.outcome(&job.file)),
            Some(Attempt::WithPreamble)
        );
    }
    assert_eq!(indexer.frontend().preamble_builds(), 1);
}

#[test]
fn test_coordinator_hands_out_one_entry_per_option_set() {
    let fixture = Fixture::new();
    let coordinator = Arc::new(PreambleCoordinator::new(
        fixture.preamble(SourceLanguage::Cxx, 1),
    ));
    let options = vec!["-x".to_string(), "c++".to_string()];

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            let options = options.clone();
            thread::spawn(move || coordinator.get(&options).unwrap())
        })
        .collect();
    let entries: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for entry in &entries {
        assert!(Arc::ptr_eq(entry, &entries[0]));
    }

    let other = coordinator
        .get(&["-x".to_string(), "c++".to_string(), "-DX".to_string()])
        .unwrap();
    assert!(!Arc::ptr_eq(&other, &entries[0]));
    assert_ne!(other.path(), entries[0].path());
    assert_eq!(coordinator.entries().len(), 2);
}

#[test]
fn test_racing_builders_share_one_outcome() {
    let fixture = Fixture::new();
    let coordinator = Arc::new(PreambleCoordinator::new(
        fixture.preamble(SourceLanguage::Cxx, 1),
    ));
    let entry = coordinator.get(&["-x".to_string(), "c++".to_string()]).unwrap();
    entry.add(vec![fixture.path("common.h")], vec![fixture.path("common.h")]);

    let builds = Arc::new(AtomicUsize::new(0));
    let outcomes: Vec<Result<_, PreambleError>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let entry = Arc::clone(&entry);
                let builds = Arc::clone(&builds);
                scope.spawn(move || {
                    entry
                        .ensure_built(|_, _, output| {
                            builds.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(20));
                            Err(FrontendError::preamble(output, "no compiler"))
                        })
                        .clone()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(builds.load(Ordering::SeqCst), 1);
    for outcome in &outcomes {
        assert_eq!(outcome, &outcomes[0]);
    }
    assert!(matches!(outcomes[0], Err(PreambleError::BuildFailed { .. })));
    assert!(!entry.is_collecting());
    assert!(entry.built_path().is_none());
}

#[test]
fn test_failed_build_falls_back_for_every_task() {
    let fixture = Fixture::new();
    let (frontend, jobs) = cxx_sources(&fixture, 6);
    // A regular file where the artifact directory should be.
    fixture.write("blocked", "");
    let mut preamble = fixture.preamble(SourceLanguage::Cxx, 1);
    preamble.directory = fixture.path("blocked").join("pch");
    let indexer = fixture.indexer(frontend, preamble);

    let summary = indexer.index_files(&jobs);
    assert_eq!(summary.indexed(), 6);
    assert_eq!(indexer.frontend().preamble_builds(), 1);

    let entries = indexer.preambles().entries();
    assert!(matches!(entries[0].outcome(), Some(Err(PreambleError::BuildFailed { .. }))));

    let again = indexer.reindex_files(&jobs);
    assert_eq!(again.indexed(), 6);
    assert!(indexer.frontend().calls().iter().all(|call| !call.used_preamble()));
}

// ============================================================================
// Attempts
// ============================================================================

#[test]
fn test_preamble_parse_failure_falls_back() {
    let fixture = Fixture::new();
    let (frontend, jobs) = cxx_sources(&fixture, 2);
    let flaky = jobs[1].file.clone();
    let frontend = frontend.with_failure(&flaky, FailureMode::WithPreamble);
    let indexer = fixture.indexer(frontend, fixture.preamble(SourceLanguage::Cxx, 1));

    // The first pass builds the artifact.
    indexer.index_files(&jobs[..1]);
    assert!(indexer.preambles().entries()[0].built_path().is_some());

    let outcome = indexer.index_file(&jobs[1]);
    let FileOutcome::Indexed(report) = outcome else {
        panic!("fallback did not index: {:?}", outcome);
    };
    assert_eq!(report.attempt, Attempt::WithoutPreamble);
    assert_eq!(report.nodes_added, 1);

    let calls: Vec<bool> = indexer
        .frontend()
        .calls()
        .into_iter()
        .filter(|call| call.file == flaky)
        .map(|call| call.used_preamble())
        .collect();
    assert_eq!(calls, vec![true, false]);
}

#[test]
fn test_both_attempts_failing_is_parse_failure() {
    let fixture = Fixture::new();
    let (frontend, jobs) = cxx_sources(&fixture, 2);
    let broken = jobs[1].file.clone();
    let frontend = frontend.with_failure(&broken, FailureMode::Always);
    let indexer = fixture.indexer(frontend, fixture.preamble(SourceLanguage::Cxx, 1));
    indexer.index_files(&jobs[..1]);

    match indexer.index_file(&jobs[1]) {
        FileOutcome::Failed(IndexError::ParseFailure { file, command_line }) => {
            assert_eq!(file, broken);
            assert!(command_line.starts_with("clang++ -x c++"));
            assert!(!command_line.contains("-include-pch"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    let attempts = indexer
        .frontend()
        .calls()
        .iter()
        .filter(|call| call.file == broken)
        .count();
    assert_eq!(attempts, 2);
}

#[test]
fn test_disabled_preambles_are_never_built_or_used() {
    let fixture = Fixture::new();
    let (frontend, jobs) = cxx_sources(&fixture, 4);
    let indexer = fixture.indexer(frontend, PreambleConfig::disabled());

    indexer.index_files(&jobs);
    indexer.reindex_files(&jobs);

    assert_eq!(indexer.frontend().preamble_builds(), 0);
    assert!(indexer.preambles().entries().is_empty());
    assert!(indexer.frontend().calls().iter().all(|call| !call.used_preamble()));
}

#[test]
fn test_other_language_skips_preambles() {
    let fixture = Fixture::new();
    let file = fixture.write("plain.c", "int main(void) { return 0; }\n");
    let mut unit = ArenaUnit::new(&file);
    let root = unit.root_id();
    unit.add_inclusion(fixture.path("common.h"), 1);
    unit.push(root, defining(CursorKind::FunctionDecl, "main", fixture.at("plain.c", 1, 5)));

    let indexer = fixture.indexer(
        ScriptedFrontend::new().with_unit(unit),
        fixture.preamble(SourceLanguage::Cxx, 1),
    );
    indexer.index_file(&fixture.job("plain.c"));
    indexer.reindex_files(&[fixture.job("plain.c")]);

    assert!(indexer.preambles().entries().is_empty());
    assert_eq!(indexer.frontend().preamble_builds(), 0);
}

#[test]
fn test_build_preambles_flushes_pending_entries() {
    let fixture = Fixture::new();
    let (frontend, jobs) = cxx_sources(&fixture, 2);
    let indexer = fixture.indexer(frontend, fixture.preamble(SourceLanguage::Cxx, 10));

    indexer.index_files(&jobs);
    assert_eq!(indexer.frontend().preamble_builds(), 0);

    let built = indexer.build_preambles();
    assert_eq!(built.len(), 1);
    assert!(built[0].1.is_ok());
    assert_eq!(indexer.frontend().preamble_builds(), 1);
    assert!(indexer.build_preambles().is_empty());
}

// ============================================================================
// Races
// ============================================================================

#[test]
fn test_file_changed_during_parse_is_transient() {
    let fixture = Fixture::new();
    let file = fixture.write("moving.c", "int x;\n");
    let mut unit = ArenaUnit::new(&file);
    let root = unit.root_id();
    unit.push(root, defining(CursorKind::VarDecl, "x", fixture.at("moving.c", 1, 5)));

    let frontend = ScriptedFrontend::new()
        .with_unit(unit)
        .with_parse_hook(|path: &Path, _: &[String]| {
            if let Ok(handle) = File::options().write(true).open(path) {
                let _ = handle.set_modified(SystemTime::now() + Duration::from_secs(3600));
            }
        });
    let indexer = fixture.indexer(frontend, PreambleConfig::disabled());

    let outcome = indexer.index_file(&fixture.job("moving.c"));
    match &outcome {
        FileOutcome::Failed(error @ IndexError::ChangedDuringIndex(path)) => {
            assert!(error.is_transient());
            assert_eq!(path, &file);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(indexer.frontend().parse_count(), 1);
    assert_eq!(indexer.graph().read().node_count(), 1);
    assert!(indexer.dependencies(&file).is_empty());
}
