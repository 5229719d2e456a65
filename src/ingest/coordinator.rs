//! End-to-end ingestion run orchestration.
//!
//! One coordinator invocation executes one pass of the state machine:
//!
//! ```text
//! Idle -> Locking -> Diffing -> Extracting -> Sealing -> Checkpointing -> Idle
//! ```
//!
//! Any state may fail; Unlocking is a guaranteed cleanup step on every exit
//! path (the lock guard releases on drop, and the success path releases
//! explicitly to surface errors). Two outcomes are not faults:
//! - a held lock ([`RunOutcome::LockBusy`]) is expected under concurrent
//!   schedulers and aborts the run cleanly;
//! - an unchanged history sequence ([`RunOutcome::NoChange`]) short-circuits
//!   before any object work, which is the idempotence guarantee for no-op
//!   runs.
//!
//! The checkpoint is written strictly last. A crash anywhere earlier is
//! "no progress" from the checkpoint's point of view, while per-object seen
//! markers already written make re-extraction of those ids a no-op on the
//! next run.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::checkpoint::Checkpoint;
use super::columnar::{ColumnarLimits, ColumnarWriter};
use super::dedup::ObjectDedupStore;
use super::errors::{IngestError, LockError};
use super::extractor::{run_extraction, ExtractStats, ExtractorConfig};
use super::object::IngestMode;
use super::partition::SealedPartition;
use super::repo_lock::{LockRetry, RepoLock};
use super::source::ObjectSource;

/// Lock file name under the output root.
const LOCK_FILE_NAME: &str = "ingest.lock";

/// States of one ingestion run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    /// Not started.
    Idle,
    /// Acquiring the cross-process lock.
    Locking,
    /// Comparing the stored checkpoint against current history.
    Diffing,
    /// Draining new ids through the worker pool.
    Extracting,
    /// Sealing all open batches.
    Sealing,
    /// Persisting the new checkpoint.
    Checkpointing,
    /// Releasing the lock.
    Unlocking,
    /// Terminal failure state.
    Failed,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Locking => "locking",
            Self::Diffing => "diffing",
            Self::Extracting => "extracting",
            Self::Sealing => "sealing",
            Self::Checkpointing => "checkpointing",
            Self::Unlocking => "unlocking",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Configuration for one coordinator.
#[derive(Clone, Copy, Debug)]
pub struct IngestConfig {
    /// Kind-persistence policy.
    pub mode: IngestMode,
    /// Extraction worker count.
    pub concurrency: usize,
    /// Columnar batch limits.
    pub limits: ColumnarLimits,
    /// Lock acquisition retry policy.
    pub lock_retry: LockRetry,
}

impl IngestConfig {
    /// Validates nested limits.
    ///
    /// # Panics
    ///
    /// Panics if any nested limit is invalid (indicates a configuration
    /// bug).
    #[track_caller]
    pub const fn validate(&self) {
        assert!(self.concurrency > 0, "must run at least 1 worker");
        self.limits.validate();
        self.lock_retry.validate();
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            mode: IngestMode::Full,
            concurrency: super::extractor::default_concurrency(),
            limits: ColumnarLimits::DEFAULT,
            lock_retry: LockRetry::DEFAULT,
        }
    }
}

/// Result of a completed (non-short-circuited) run.
#[derive(Clone, Debug)]
pub struct RunReport {
    /// Extraction counters summed across workers.
    pub stats: ExtractStats,
    /// Partitions sealed by this run.
    pub partitions: Vec<SealedPartition>,
    /// Checkpoint persisted at the end of this run.
    pub checkpoint: Checkpoint,
}

/// Outcome of one coordinator invocation.
#[derive(Clone, Debug)]
pub enum RunOutcome {
    /// New history was ingested and a checkpoint written.
    Completed(RunReport),
    /// History sequence unchanged; nothing to do.
    NoChange,
    /// Another live process holds the lock; retry later.
    LockBusy,
}

/// Orchestrates one end-to-end ingestion pass.
///
/// The coordinator owns the shared handles for the run (the dedup store
/// connection, the output root) and passes them into the extractor workers
/// explicitly; nothing is reached through ambient global state.
pub struct IngestionCoordinator<'a> {
    source: &'a dyn ObjectSource,
    store: &'a dyn ObjectDedupStore,
    output_root: PathBuf,
    config: IngestConfig,
}

impl<'a> IngestionCoordinator<'a> {
    /// Creates a coordinator writing partitions (and the lock file) under
    /// `output_root`.
    #[must_use]
    pub fn new(
        source: &'a dyn ObjectSource,
        store: &'a dyn ObjectDedupStore,
        output_root: impl Into<PathBuf>,
        config: IngestConfig,
    ) -> Self {
        config.validate();
        Self {
            source,
            store,
            output_root: output_root.into(),
            config,
        }
    }

    /// Path of the lock file guarding this output root.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.output_root.join(LOCK_FILE_NAME)
    }

    /// Executes one pass of the state machine.
    ///
    /// # Errors
    /// Run-level failures ([`IngestError`]). The lock is released and the
    /// stored checkpoint left untouched on every failure, so the next run
    /// resumes from the same point. A held lock is not an error.
    pub fn run(&self) -> Result<RunOutcome, IngestError> {
        debug!(state = %RunState::Locking, "entering");
        std::fs::create_dir_all(&self.output_root).map_err(LockError::Io)?;
        let mut lock = match RepoLock::acquire(self.lock_path(), self.config.lock_retry) {
            Ok(lock) => lock,
            Err(LockError::Held { owner_pid }) => {
                info!(owner_pid, "lock busy; skipping run");
                return Ok(RunOutcome::LockBusy);
            }
            Err(err) => return Err(IngestError::Lock(err)),
        };

        // Unlocking runs on every path from here: the guard's drop releases,
        // and the success path releases explicitly below.
        let outcome = self.run_locked();
        debug!(state = %RunState::Unlocking, "entering");
        let release_result = lock.release();
        match outcome {
            Ok(outcome) => {
                release_result?;
                Ok(outcome)
            }
            Err(err) => {
                debug!(state = %RunState::Failed, "run failed");
                Err(err)
            }
        }
    }

    /// Diffing through Checkpointing, with the lock held.
    fn run_locked(&self) -> Result<RunOutcome, IngestError> {
        debug!(state = %RunState::Diffing, "entering");
        let stored = self.store.get_checkpoint()?;
        // Sequence and head are captured once, up front: commits arriving
        // mid-run are left for the next invocation, keeping the checkpoint
        // internally consistent.
        let current_sequence = self.source.history_sequence()?;
        if stored.is_none() && current_sequence == 0 {
            // An empty repository has no head to record and nothing to
            // extract; leave it for a run after history exists.
            info!("no history yet; no-op run");
            return Ok(RunOutcome::NoChange);
        }
        if let Some(checkpoint) = stored {
            if current_sequence == checkpoint.history_sequence {
                info!(sequence = current_sequence, "history unchanged; no-op run");
                return Ok(RunOutcome::NoChange);
            }
            if current_sequence < checkpoint.history_sequence {
                // History rewound below the checkpoint. Advancing would
                // violate sequence monotonicity, so treat it as no new
                // history.
                warn!(
                    sequence = current_sequence,
                    checkpoint = checkpoint.history_sequence,
                    "history sequence below checkpoint; no-op run"
                );
                return Ok(RunOutcome::NoChange);
            }
        }
        let head = self.source.head_object_id()?;
        let since_sequence = stored.map_or(0, |cp| cp.history_sequence);
        let partition_sequence = stored.map_or(0, |cp| cp.partition_sequence + 1);

        debug!(state = %RunState::Extracting, since_sequence, "entering");
        let writer = Mutex::new(ColumnarWriter::new(
            &self.output_root,
            partition_sequence,
            self.config.limits,
        ));
        let ids = self.source.changed_object_ids(since_sequence)?;
        let extractor_config = ExtractorConfig {
            concurrency: self.config.concurrency,
            mode: self.config.mode,
        };
        let stats = run_extraction(self.source, self.store, &writer, ids, &extractor_config)?;

        debug!(state = %RunState::Sealing, "entering");
        let mut writer = writer.into_inner().expect("columnar writer poisoned");
        writer.flush_all()?;
        let partitions = writer.into_sealed();

        debug!(state = %RunState::Checkpointing, "entering");
        let checkpoint = Checkpoint {
            history_sequence: current_sequence,
            head_object_id: head,
            partition_sequence,
            transaction_id: Uuid::new_v4(),
            timestamp_ms: unix_now_ms(),
        };
        self.store.put_checkpoint(&checkpoint)?;

        info!(
            sequence = current_sequence,
            objects = stats.objects_written,
            bytes = stats.bytes_written,
            partitions = partitions.len(),
            "run complete"
        );
        Ok(RunOutcome::Completed(RunReport {
            stats,
            partitions,
            checkpoint,
        }))
    }
}

fn unix_now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}
