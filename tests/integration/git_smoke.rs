//! Smoke tests against a real `git` binary and throwaway repositories.
//!
//! Skipped (each test returns early) when `git` is not on `PATH`.

use std::path::Path;
use std::process::Command;

use repocolumn::ingest::{
    GitReader, InMemoryDedupStore, IngestConfig, IngestionCoordinator, ObjectSource as _,
    RunOutcome,
};

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args([
            "-c",
            "user.email=ingest@localhost",
            "-c",
            "user.name=ingest",
        ])
        .args(args)
        .status()
        .unwrap();
    assert!(status.success(), "git {args:?} failed");
}

fn commit_file(dir: &Path, name: &str, contents: &str, message: &str) {
    std::fs::write(dir.join(name), contents).unwrap();
    git(dir, &["add", name]);
    git(dir, &["commit", "-m", message]);
}

fn config() -> IngestConfig {
    IngestConfig {
        concurrency: 2,
        ..IngestConfig::default()
    }
}

#[test]
fn empty_repository_is_a_clean_no_op() {
    if !git_available() {
        return;
    }
    let repo = tempfile::tempdir().unwrap();
    git(repo.path(), &["init", "--quiet"]);

    let reader = GitReader::new(repo.path());
    assert_eq!(reader.history_sequence().unwrap(), 0);
    assert_eq!(reader.changed_object_ids(0).unwrap().count(), 0);

    let store = InMemoryDedupStore::new();
    let out = tempfile::tempdir().unwrap();
    let coordinator = IngestionCoordinator::new(&reader, &store, out.path(), config());
    assert!(matches!(coordinator.run().unwrap(), RunOutcome::NoChange));

    // The first commit makes the next run a real ingestion.
    commit_file(repo.path(), "a.txt", "alpha\n", "first");
    assert!(matches!(
        coordinator.run().unwrap(),
        RunOutcome::Completed(_)
    ));
}

#[test]
fn reader_reports_history_and_ids() {
    if !git_available() {
        return;
    }
    let repo = tempfile::tempdir().unwrap();
    git(repo.path(), &["init", "--quiet"]);
    commit_file(repo.path(), "a.txt", "alpha\n", "first");
    commit_file(repo.path(), "b.txt", "beta\n", "second");

    let reader = GitReader::new(repo.path());
    assert_eq!(reader.history_sequence().unwrap(), 2);

    let head = reader.head_object_id().unwrap();
    assert_eq!(head.to_hex().len(), usize::from(head.len()) * 2);

    // Two commits, their trees, and two blobs are all reachable.
    let ids: Vec<_> = reader
        .changed_object_ids(0)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert!(ids.len() >= 6, "too few ids: {}", ids.len());
    assert!(ids.contains(&head));

    // Nothing new relative to the current sequence.
    assert_eq!(reader.changed_object_ids(2).unwrap().count(), 0);
}

#[test]
fn full_run_then_no_op_then_incremental() {
    if !git_available() {
        return;
    }
    let repo = tempfile::tempdir().unwrap();
    git(repo.path(), &["init", "--quiet"]);
    commit_file(repo.path(), "a.txt", "alpha\n", "first");
    commit_file(repo.path(), "b.txt", "beta\n", "second");

    let reader = GitReader::new(repo.path());
    let store = InMemoryDedupStore::new();
    let out = tempfile::tempdir().unwrap();
    let coordinator = IngestionCoordinator::new(&reader, &store, out.path(), config());

    let report = match coordinator.run().unwrap() {
        RunOutcome::Completed(report) => report,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(report.checkpoint.history_sequence, 2);
    assert!(report.stats.objects_written >= 6);
    assert!(!report.partitions.is_empty());

    assert!(matches!(coordinator.run().unwrap(), RunOutcome::NoChange));

    // New history arrives; only the delta is extracted.
    commit_file(repo.path(), "c.txt", "gamma\n", "third");
    let report = match coordinator.run().unwrap() {
        RunOutcome::Completed(report) => report,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(report.checkpoint.history_sequence, 3);
    assert_eq!(report.checkpoint.partition_sequence, 1);
    assert!(report.stats.objects_written >= 3);
    assert_eq!(
        report.checkpoint.head_object_id,
        reader.head_object_id().unwrap()
    );
}
