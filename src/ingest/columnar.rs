//! Columnar partition writer.
//!
//! Accumulates extracted rows per object kind and seals them into immutable
//! partition files. One writer exists per run and is only ever driven from
//! inside the extractor's critical section, so it needs no internal
//! locking.
//!
//! # Sealing contract
//! A batch is sealed by writing a dot-prefixed temp file in its final
//! directory, flushing the file to durable storage, renaming it to its
//! final name, and flushing the directory metadata. A crash before the
//! rename leaves only an orphaned temp file (swept on the next run); a
//! completed rename always yields a fully valid, readable file. Sealed
//! batches are never appended to again.

use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::errors::WriteError;
use super::object::{ObjectKind, RepositoryObject};
use super::object_id::OidBytes;
use super::partition::{
    encode_header, encode_row, partition_rel_path, SealedPartition, TEMP_PREFIX,
};

/// Size limits for the columnar writer.
#[derive(Clone, Copy, Debug)]
pub struct ColumnarLimits {
    /// Encoded bytes after which a kind's open batch is sealed.
    pub batch_threshold_bytes: u64,
}

impl ColumnarLimits {
    /// Default threshold, sized so partition files stay comfortably
    /// mmap-able while avoiding a flood of tiny files.
    pub const DEFAULT: Self = Self {
        batch_threshold_bytes: 8 * 1024 * 1024,
    };

    /// Validates that limits are internally consistent.
    ///
    /// # Panics
    ///
    /// Panics if the threshold is zero (indicates a configuration bug).
    #[track_caller]
    pub const fn validate(&self) {
        assert!(self.batch_threshold_bytes > 0, "batch threshold must be > 0");
    }
}

impl Default for ColumnarLimits {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// One kind's in-memory accumulating batch.
struct OpenBatch {
    /// Encoded rows, appended in arrival order.
    rows: Vec<u8>,
    count: u32,
    payload_bytes: u64,
    min_id: OidBytes,
    max_id: OidBytes,
}

impl OpenBatch {
    fn new() -> Self {
        Self {
            rows: Vec::new(),
            count: 0,
            payload_bytes: 0,
            min_id: OidBytes::default(),
            max_id: OidBytes::default(),
        }
    }
}

/// Per-run partition writer.
pub struct ColumnarWriter {
    root: PathBuf,
    partition_sequence: u64,
    limits: ColumnarLimits,
    batches: [Option<OpenBatch>; 4],
    /// Kind directories already swept for orphaned temp files this run.
    swept: [bool; 4],
    sealed: Vec<SealedPartition>,
}

impl ColumnarWriter {
    /// Creates a writer rooted at `root` for one run.
    ///
    /// `partition_sequence` must strictly increase across runs against the
    /// same root; the coordinator derives it from the checkpoint.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, partition_sequence: u64, limits: ColumnarLimits) -> Self {
        limits.validate();
        Self {
            root: root.into(),
            partition_sequence,
            limits,
            batches: [None, None, None, None],
            swept: [false; 4],
            sealed: Vec::new(),
        }
    }

    /// Partition sequence this writer stamps into file names.
    #[must_use]
    pub const fn partition_sequence(&self) -> u64 {
        self.partition_sequence
    }

    /// Partitions sealed so far this run.
    #[must_use]
    pub fn sealed_partitions(&self) -> &[SealedPartition] {
        &self.sealed
    }

    /// Routes one row into the open batch for its kind, sealing the batch
    /// when it crosses the size threshold.
    ///
    /// # Errors
    /// [`WriteError`] on row encoding or seal I/O failure; fatal for the
    /// run. Previously sealed partitions are unaffected.
    pub fn append(&mut self, object: &RepositoryObject) -> Result<(), WriteError> {
        let batch = self.batches[object.kind.index()].get_or_insert_with(OpenBatch::new);
        if batch.count == 0 {
            batch.min_id = object.id;
            batch.max_id = object.id;
        } else {
            if object.id < batch.min_id {
                batch.min_id = object.id;
            }
            if object.id > batch.max_id {
                batch.max_id = object.id;
            }
        }
        encode_row(&mut batch.rows, object)?;
        batch.count += 1;
        batch.payload_bytes += object.size();

        if batch.rows.len() as u64 > self.limits.batch_threshold_bytes {
            self.seal_kind(object.kind)?;
        }
        Ok(())
    }

    /// Seals every still-open batch, including partial ones.
    ///
    /// Called once at the end of a run, before the checkpoint is computed.
    pub fn flush_all(&mut self) -> Result<(), WriteError> {
        for kind in ObjectKind::ALL {
            if self.batches[kind.index()].is_some() {
                self.seal_kind(kind)?;
            }
        }
        Ok(())
    }

    /// Consumes the writer, returning sealed-partition metadata.
    #[must_use]
    pub fn into_sealed(self) -> Vec<SealedPartition> {
        self.sealed
    }

    /// Seals the open batch for `kind`. Empty batches are never sealed.
    fn seal_kind(&mut self, kind: ObjectKind) -> Result<(), WriteError> {
        let Some(batch) = self.batches[kind.index()].take() else {
            return Ok(());
        };
        if batch.count == 0 {
            return Ok(());
        }

        let rel = partition_rel_path(kind, self.partition_sequence, &batch.min_id, &batch.max_id);
        let final_path = self.root.join(&rel);
        // Sealed files are immutable; a name collision means a duplicate
        // append slipped past dedup and must surface, not overwrite.
        if final_path.exists() {
            return Err(WriteError::PartitionExists { path: final_path });
        }
        let dir = final_path
            .parent()
            .expect("partition path always has a parent");
        fs::create_dir_all(dir)?;

        if !self.swept[kind.index()] {
            self.swept[kind.index()] = true;
            sweep_orphan_temps(&self.root.join(kind.as_str()));
        }

        let file_name = final_path
            .file_name()
            .expect("partition path always has a file name")
            .to_string_lossy()
            .into_owned();
        let temp_path = dir.join(format!("{TEMP_PREFIX}{file_name}"));

        // Stage, flush, rename, flush the directory. Order matters: the
        // rename must only ever expose a fully durable file.
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(&encode_header(kind, batch.count))?;
        file.write_all(&batch.rows)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, &final_path)?;
        sync_dir(dir)?;

        debug!(
            kind = %kind,
            rows = batch.count,
            bytes = batch.rows.len(),
            path = %final_path.display(),
            "sealed partition"
        );
        self.sealed.push(SealedPartition {
            kind,
            sequence: self.partition_sequence,
            min_id: batch.min_id,
            max_id: batch.max_id,
            rows: batch.count,
            payload_bytes: batch.payload_bytes,
            path: final_path,
        });
        Ok(())
    }
}

/// Flushes directory metadata so a completed rename survives power loss.
fn sync_dir(dir: &Path) -> Result<(), WriteError> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

/// Removes temp files orphaned by a crashed predecessor under a kind
/// directory. Best-effort: sweep failures are ignored, orphans are inert.
fn sweep_orphan_temps(kind_dir: &Path) {
    let Ok(shards) = fs::read_dir(kind_dir) else {
        return;
    };
    for shard in shards.flatten() {
        let Ok(entries) = fs::read_dir(shard.path()) else {
            continue;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(TEMP_PREFIX) {
                debug!(path = %entry.path().display(), "sweeping orphaned temp file");
                let _ = fs::remove_file(entry.path());
            }
        }
    }
}
