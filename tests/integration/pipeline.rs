//! End-to-end pipeline properties: the worked example, idempotence, and
//! resumability after an abort between sealing and checkpointing.

use std::sync::Mutex;

use repocolumn::ingest::{
    run_extraction, Checkpoint, ColumnarLimits, ColumnarWriter, ExtractorConfig, InMemoryDedupStore,
    IngestConfig, IngestMode, IngestionCoordinator, ObjectDedupStore as _, ObjectKind,
    ObjectSource as _, OidBytes, RunOutcome,
};
use uuid::Uuid;

use self::fixtures::*;

mod fixtures {
    use repocolumn::ingest::{InMemoryObjectSource, ObjectKind, OidBytes, RepositoryObject};

    pub fn obj(id_byte: u8, kind: ObjectKind, payload: &[u8]) -> RepositoryObject {
        RepositoryObject {
            id: OidBytes::sha1([id_byte; 20]),
            kind,
            bytes: payload.to_vec(),
        }
    }

    /// Nine new objects past sequence 5: three commits, two trees, four
    /// blobs, with the tip at `new_head`.
    pub fn nine_object_delta(source: &InMemoryObjectSource, new_head: OidBytes) {
        source.push_history(
            8,
            new_head,
            vec![
                obj(0x10, ObjectKind::Commit, b"commit a"),
                obj(0x11, ObjectKind::Commit, b"commit b"),
                obj(0x12, ObjectKind::Commit, b"commit c"),
                obj(0x20, ObjectKind::Tree, b"tree a"),
                obj(0x21, ObjectKind::Tree, b"tree b"),
                obj(0x30, ObjectKind::Blob, b"blob a"),
                obj(0x31, ObjectKind::Blob, b"blob b"),
                obj(0x32, ObjectKind::Blob, b"blob c"),
                obj(0x33, ObjectKind::Blob, b"blob d"),
            ],
        );
    }

    pub fn new_ids() -> Vec<OidBytes> {
        [0x10, 0x11, 0x12, 0x20, 0x21, 0x30, 0x31, 0x32, 0x33]
            .iter()
            .map(|&b| OidBytes::sha1([b; 20]))
            .collect()
    }
}

fn seeded_store() -> InMemoryDedupStore {
    let store = InMemoryDedupStore::new();
    store
        .put_checkpoint(&Checkpoint {
            history_sequence: 5,
            head_object_id: OidBytes::sha1([0xc1; 20]),
            partition_sequence: 3,
            transaction_id: Uuid::new_v4(),
            timestamp_ms: 1,
        })
        .unwrap();
    store
}

fn config() -> IngestConfig {
    IngestConfig {
        concurrency: 4,
        ..IngestConfig::default()
    }
}

#[test]
fn worked_example_five_to_eight() {
    let source = repocolumn::ingest::InMemoryObjectSource::new();
    source.push_history(5, OidBytes::sha1([0xc1; 20]), Vec::new());
    let new_head = OidBytes::sha1([0xc8; 20]);
    nine_object_delta(&source, new_head);

    let store = seeded_store();
    let dir = tempfile::tempdir().unwrap();
    let coordinator = IngestionCoordinator::new(&source, &store, dir.path(), config());

    let report = match coordinator.run().unwrap() {
        RunOutcome::Completed(report) => report,
        other => panic!("unexpected outcome: {other:?}"),
    };

    // Nine rows across three per-kind batches.
    assert_eq!(report.stats.objects_written, 9);
    assert_eq!(report.partitions.len(), 3);
    let rows_by_kind = |kind: ObjectKind| {
        report
            .partitions
            .iter()
            .filter(|p| p.kind == kind)
            .map(|p| u64::from(p.rows))
            .sum::<u64>()
    };
    assert_eq!(rows_by_kind(ObjectKind::Commit), 3);
    assert_eq!(rows_by_kind(ObjectKind::Tree), 2);
    assert_eq!(rows_by_kind(ObjectKind::Blob), 4);

    // The checkpoint advanced to the observed sequence and tip, with the
    // partition sequence incremented.
    assert_eq!(report.checkpoint.history_sequence, 8);
    assert_eq!(report.checkpoint.head_object_id, new_head);
    assert_eq!(report.checkpoint.partition_sequence, 4);

    // Every new id is marked seen.
    for id in new_ids() {
        assert!(store.has_seen(&id).unwrap(), "unseen: {id}");
    }
}

#[test]
fn second_run_with_no_history_change_is_a_no_op() {
    let source = repocolumn::ingest::InMemoryObjectSource::new();
    nine_object_delta(&source, OidBytes::sha1([0xc8; 20]));
    let store = InMemoryDedupStore::new();
    let dir = tempfile::tempdir().unwrap();
    let coordinator = IngestionCoordinator::new(&source, &store, dir.path(), config());

    assert!(matches!(
        coordinator.run().unwrap(),
        RunOutcome::Completed(_)
    ));
    let first_checkpoint = store.get_checkpoint().unwrap().unwrap();

    assert!(matches!(coordinator.run().unwrap(), RunOutcome::NoChange));
    // Same transaction id: the no-op run wrote nothing.
    assert_eq!(store.get_checkpoint().unwrap().unwrap(), first_checkpoint);
}

#[test]
fn abort_between_sealing_and_checkpointing_resumes_correctly() {
    let source = repocolumn::ingest::InMemoryObjectSource::new();
    source.push_history(5, OidBytes::sha1([0xc1; 20]), Vec::new());
    nine_object_delta(&source, OidBytes::sha1([0xc8; 20]));
    let store = seeded_store();
    let dir = tempfile::tempdir().unwrap();

    // First attempt: extract and seal, then "crash" before checkpointing.
    {
        let writer = Mutex::new(ColumnarWriter::new(dir.path(), 4, ColumnarLimits::DEFAULT));
        let ids = source.changed_object_ids(5).unwrap();
        let stats = run_extraction(
            &source,
            &store,
            &writer,
            ids,
            &ExtractorConfig {
                concurrency: 4,
                mode: IngestMode::Full,
            },
        )
        .unwrap();
        assert_eq!(stats.objects_written, 9);
        writer.into_inner().unwrap().flush_all().unwrap();
        // No put_checkpoint: the stored checkpoint still says sequence 5.
    }
    assert_eq!(
        store.get_checkpoint().unwrap().map(|cp| cp.history_sequence),
        Some(5)
    );

    // Re-run: the same ids are re-discovered, found seen, skipped, and the
    // checkpoint still advances.
    let coordinator = IngestionCoordinator::new(&source, &store, dir.path(), config());
    let report = match coordinator.run().unwrap() {
        RunOutcome::Completed(report) => report,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(report.stats.objects_written, 0);
    assert_eq!(report.stats.seen_skipped, 9);
    assert_eq!(report.checkpoint.history_sequence, 8);
    assert_eq!(report.checkpoint.partition_sequence, 4);
}
