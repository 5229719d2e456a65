//! Concurrent extraction against the single-writer sealing path: no row is
//! lost or duplicated, byte accounting is exact, and only fully valid
//! partition files are ever visible under their final names.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use repocolumn::ingest::{
    read_partition_file, run_extraction, ColumnarLimits, ColumnarWriter, ExtractorConfig,
    InMemoryDedupStore, InMemoryObjectSource, IngestMode, ObjectKind, ObjectSource as _, OidBytes,
    RepositoryObject,
};
use repocolumn::ingest::partition::TEMP_PREFIX;

fn wide_id(i: u16) -> OidBytes {
    let mut bytes = [0u8; 20];
    bytes[0] = (i >> 8) as u8;
    bytes[1] = (i & 0xff) as u8;
    OidBytes::sha1(bytes)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                collect_files(&path, out);
            } else {
                out.push(path);
            }
        }
    }
}

#[test]
fn concurrent_extraction_preserves_every_object_exactly_once() {
    let source = InMemoryObjectSource::new();
    let mut expected = BTreeMap::new();
    let mut objects = Vec::new();
    for i in 0..200u16 {
        let kind = match i % 3 {
            0 => ObjectKind::Commit,
            1 => ObjectKind::Tree,
            _ => ObjectKind::Blob,
        };
        let payload = vec![(i & 0xff) as u8; (i as usize % 13) * 17 + 1];
        expected.insert(wide_id(i), payload.clone());
        objects.push(RepositoryObject {
            id: wide_id(i),
            kind,
            bytes: payload,
        });
    }
    let expected_bytes: u64 = expected.values().map(|p| p.len() as u64).sum();
    source.push_history(1, OidBytes::sha1([0xc1; 20]), objects);
    let store = InMemoryDedupStore::new();
    let dir = tempfile::tempdir().unwrap();

    // A small threshold forces several seals per kind while workers race.
    let writer = Mutex::new(ColumnarWriter::new(
        dir.path(),
        0,
        ColumnarLimits {
            batch_threshold_bytes: 2048,
        },
    ));
    let ids = source.changed_object_ids(0).unwrap();
    let stats = run_extraction(
        &source,
        &store,
        &writer,
        ids,
        &ExtractorConfig {
            concurrency: 8,
            mode: IngestMode::Full,
        },
    )
    .unwrap();
    let mut writer = writer.into_inner().unwrap();
    writer.flush_all().unwrap();
    let sealed = writer.into_sealed();

    assert_eq!(stats.objects_written, 200);
    assert_eq!(stats.bytes_written, expected_bytes);
    assert_eq!(stats.failed, 0);

    // Sealed metadata agrees with the counters.
    let sealed_rows: u64 = sealed.iter().map(|p| u64::from(p.rows)).sum();
    let sealed_bytes: u64 = sealed.iter().map(|p| p.payload_bytes).sum();
    assert_eq!(sealed_rows, 200);
    assert_eq!(sealed_bytes, expected_bytes);

    // Reading every file back recovers each object exactly once, with its
    // payload intact and its id inside the file's declared range.
    let mut recovered = BTreeMap::new();
    for partition in &sealed {
        let (kind, rows) = read_partition_file(&partition.path).unwrap();
        assert_eq!(kind, partition.kind);
        assert_eq!(rows.len() as u32, partition.rows);
        for row in rows {
            assert!(row.id >= partition.min_id && row.id <= partition.max_id);
            let previous = recovered.insert(row.id, row.bytes);
            assert!(previous.is_none(), "duplicated row: {}", row.id);
        }
    }
    assert_eq!(recovered, expected);
}

#[test]
fn only_valid_partitions_are_visible_and_orphans_are_swept() {
    let dir = tempfile::tempdir().unwrap();

    // Debris from a simulated crash: a staged file that never got renamed.
    let shard = dir.path().join("blob/part_hash=00");
    fs::create_dir_all(&shard).unwrap();
    let orphan = shard.join(format!("{TEMP_PREFIX}batch_sn=0__0000000-00000ff.colb"));
    fs::write(&orphan, b"truncated mid-write").unwrap();
    // The staging file is not a readable partition.
    assert!(read_partition_file(&orphan).is_err());

    let source = InMemoryObjectSource::new();
    let objects = (0..32u16)
        .map(|i| RepositoryObject {
            id: wide_id(i),
            kind: ObjectKind::Blob,
            bytes: vec![0xee; 64],
        })
        .collect();
    source.push_history(1, OidBytes::sha1([0xc1; 20]), objects);
    let store = InMemoryDedupStore::new();

    let writer = Mutex::new(ColumnarWriter::new(dir.path(), 1, ColumnarLimits::DEFAULT));
    let ids = source.changed_object_ids(0).unwrap();
    run_extraction(
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
    let mut writer = writer.into_inner().unwrap();
    writer.flush_all().unwrap();

    assert!(!orphan.exists(), "orphaned temp file survived the sweep");

    // Every remaining file is a complete, decodable partition.
    let mut files = Vec::new();
    collect_files(dir.path(), &mut files);
    assert!(!files.is_empty());
    for file in files {
        let name = file.file_name().unwrap().to_string_lossy();
        assert!(!name.starts_with(TEMP_PREFIX), "staging file visible: {name}");
        read_partition_file(&file).unwrap();
    }
}
