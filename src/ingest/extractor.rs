//! Bounded-concurrency object extraction.
//!
//! Workers are symmetric and pull-based: a feeder thread drains the lazy id
//! stream into a bounded channel (implicit backpressure against the
//! reader), and `concurrency` workers pull from the shared receiver. Each
//! worker owns a private batch channel, so a slow fetch round trip blocks
//! only that worker, while the append itself is serialized through one
//! shared critical section.
//!
//! # Failure semantics
//! - Per-object failures (missing object, dedup read error) are logged,
//!   counted, and skipped. The id stays unmarked, so the next run retries
//!   it naturally.
//! - Fetch transport errors, framing corruption, append failures, and
//!   seen-marker write failures are fatal: a shared poison flag stops the
//!   feeder and the other workers promptly, and the first fatal error is
//!   returned. A dead fetch channel fails every id routed to its worker,
//!   so treating it per-object would quietly discard a slice of the run.
//!
//! The seen check is repeated and `mark_seen` runs inside the same critical
//! section as the append: two workers racing on a duplicated id cannot both
//! append, and the seen set can never lag a sealed row, preserving the
//! superset invariant even when a run aborts mid-extraction.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use super::columnar::ColumnarWriter;
use super::dedup::{ObjectDedupStore, SeenMeta};
use super::errors::IngestError;
use super::object::IngestMode;
use super::object_id::OidBytes;
use super::source::{ObjectIdStream, ObjectSource};

/// Extraction worker-pool configuration.
#[derive(Clone, Copy, Debug)]
pub struct ExtractorConfig {
    /// Worker count. Defaults to available parallelism.
    pub concurrency: usize,
    /// Kind-persistence policy.
    pub mode: IngestMode,
}

impl ExtractorConfig {
    /// Validates that the pool has at least one worker.
    ///
    /// # Panics
    ///
    /// Panics if `concurrency` is zero (indicates a configuration bug).
    #[track_caller]
    pub const fn validate(&self) {
        assert!(self.concurrency > 0, "must run at least 1 worker");
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            mode: IngestMode::Full,
        }
    }
}

/// Available parallelism, falling back to 4 when the platform cannot say.
#[must_use]
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(4)
}

/// Counters accumulated across all workers in one extraction pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExtractStats {
    /// Rows appended to the columnar writer.
    pub objects_written: u64,
    /// Payload bytes appended.
    pub bytes_written: u64,
    /// Ids skipped because the dedup store had already seen them.
    pub seen_skipped: u64,
    /// Objects fetched but dropped by the ingest mode.
    pub mode_filtered: u64,
    /// Per-object failures logged and skipped.
    pub failed: u64,
}

impl ExtractStats {
    fn merge(&mut self, other: &Self) {
        self.objects_written += other.objects_written;
        self.bytes_written += other.bytes_written;
        self.seen_skipped += other.seen_skipped;
        self.mode_filtered += other.mode_filtered;
        self.failed += other.failed;
    }
}

/// Drains `ids` through the worker pool into `writer`.
///
/// Returns the summed per-worker counters. The id stream's own errors
/// (truncated traversal, tool failure) are run-fatal.
pub fn run_extraction(
    source: &dyn ObjectSource,
    store: &dyn ObjectDedupStore,
    writer: &Mutex<ColumnarWriter>,
    ids: ObjectIdStream,
    config: &ExtractorConfig,
) -> Result<ExtractStats, IngestError> {
    config.validate();

    let fatal = AtomicBool::new(false);
    // Bounded queue: the feeder stalls when workers fall behind, and the
    // reader's own I/O provides the upstream flow control.
    let (tx, rx) = sync_channel::<OidBytes>(config.concurrency * 32);
    let rx = Arc::new(Mutex::new(rx));

    std::thread::scope(|scope| {
        let fatal = &fatal;
        let feeder = scope.spawn(move || feed_ids(ids, tx, fatal));

        let mut workers = Vec::with_capacity(config.concurrency);
        for _ in 0..config.concurrency {
            let rx = Arc::clone(&rx);
            workers.push(
                scope.spawn(move || worker_loop(source, store, writer, rx, config, fatal)),
            );
        }
        drop(rx);

        let mut stats = ExtractStats::default();
        let mut first_error = None;
        for worker in workers {
            match worker.join().expect("extraction worker panicked") {
                Ok(worker_stats) => stats.merge(&worker_stats),
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        // All receivers are gone by now, so the feeder cannot be blocked on
        // send; join it and prefer worker errors over feed errors.
        let feed_result = feeder.join().expect("id feeder panicked");
        if let Some(err) = first_error {
            return Err(err);
        }
        feed_result?;
        Ok(stats)
    })
}

/// Drains the id stream into the channel until exhaustion, a stream error,
/// or poisoning.
fn feed_ids(
    ids: ObjectIdStream,
    tx: std::sync::mpsc::SyncSender<OidBytes>,
    fatal: &AtomicBool,
) -> Result<(), IngestError> {
    for id in ids {
        if fatal.load(Ordering::Acquire) {
            return Ok(());
        }
        let id = id.map_err(IngestError::Read)?;
        if tx.send(id).is_err() {
            // Every worker exited; nothing left to feed.
            return Ok(());
        }
    }
    Ok(())
}

fn worker_loop(
    source: &dyn ObjectSource,
    store: &dyn ObjectDedupStore,
    writer: &Mutex<ColumnarWriter>,
    rx: Arc<Mutex<Receiver<OidBytes>>>,
    config: &ExtractorConfig,
    fatal: &AtomicBool,
) -> Result<ExtractStats, IngestError> {
    let mut channel = match source.open_batch_channel() {
        Ok(channel) => channel,
        Err(err) => {
            fatal.store(true, Ordering::Release);
            return Err(IngestError::Read(err));
        }
    };

    let mut stats = ExtractStats::default();
    loop {
        if fatal.load(Ordering::Acquire) {
            return Ok(stats);
        }
        let id = {
            let rx = rx.lock().expect("id queue poisoned");
            rx.recv()
        };
        let Ok(id) = id else {
            // Feeder finished and the queue drained.
            return Ok(stats);
        };

        match store.has_seen(&id) {
            Ok(true) => {
                stats.seen_skipped += 1;
                continue;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(%id, %err, "dedup lookup failed; object skipped");
                stats.failed += 1;
                continue;
            }
        }

        let object = match channel.fetch(&id) {
            Ok(object) => object,
            Err(err) if err.is_per_object() => {
                warn!(%id, %err, "extraction failed; object skipped");
                stats.failed += 1;
                continue;
            }
            Err(err) => {
                fatal.store(true, Ordering::Release);
                return Err(IngestError::Read(err));
            }
        };

        if !config.mode.keeps(object.kind) {
            debug!(%id, kind = %object.kind, "dropped by ingest mode");
            stats.mode_filtered += 1;
            continue;
        }

        let meta = SeenMeta {
            kind: object.kind,
            size: object.size(),
        };
        // Critical section: the append and the seen marker commit together
        // from the perspective of other workers.
        {
            let mut writer = writer.lock().expect("columnar writer poisoned");
            // Recheck under the lock: a duplicated id may have been marked
            // by another worker after the unlocked check above.
            match store.has_seen(&id) {
                Ok(true) => {
                    stats.seen_skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(%id, %err, "dedup recheck failed; object skipped");
                    stats.failed += 1;
                    continue;
                }
            }
            if let Err(err) = writer.append(&object) {
                fatal.store(true, Ordering::Release);
                return Err(IngestError::Write(err));
            }
            if let Err(err) = store.mark_seen(&id, &meta) {
                fatal.store(true, Ordering::Release);
                return Err(IngestError::Persist(err));
            }
        }

        stats.objects_written += 1;
        stats.bytes_written += object.size();
    }
}
