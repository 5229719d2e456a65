//! Incremental Git object-history ingestion into a partitioned columnar store.
//!
//! ## Scope
//! This crate mirrors a Git repository's object history into immutable,
//! per-kind partition files, with crash-safe checkpointing that makes
//! repeated runs resumable and idempotent. Objects already recorded in the
//! dedup store are never re-extracted; partitions are sealed atomically via
//! temp-file-then-rename; a run's checkpoint is written only after every
//! partition has been sealed.
//!
//! ## Key invariants
//! - At most one coordinator runs against a repository target at a time,
//!   enforced by a cross-process lock file with stale-owner reclaim.
//! - `history_sequence` is non-decreasing across successive checkpoints.
//! - A sealed partition file is never reopened or rewritten.
//! - The dedup store's seen set is always a superset of the ids present in
//!   sealed partitions; extra ids from aborted runs are harmless.
//!
//! ## Pipeline flow (one run)
//! `Locking -> Diffing -> Extracting -> Sealing -> Checkpointing`, with
//! unlocking guaranteed on every exit path. Extraction fans out over a
//! bounded worker pool; each worker owns a private object-fetch channel and
//! appends rows under a single shared critical section.
//!
//! ## Notable entry points
//! - [`ingest::IngestionCoordinator`]: end-to-end run orchestration.
//! - [`ingest::ObjectSource`] / [`ingest::GitReader`]: the version-control
//!   seam and its `git`-binary implementation.
//! - [`ingest::ObjectDedupStore`]: seen-marker and checkpoint storage.
//! - [`ingest::ColumnarWriter`]: partition accumulation and atomic sealing.

pub mod ingest;
