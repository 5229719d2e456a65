//! Dedup/checkpoint store interface.
//!
//! The store answers "has this object id been ingested before" and holds the
//! single checkpoint record. Implementations must tolerate concurrent
//! `has_seen` reads from many extractor workers; all writes are externally
//! serialized by the extractor's critical section, so they never race each
//! other.
//!
//! # Contract
//! - The seen set only grows; `mark_seen` is idempotent.
//! - `put_checkpoint` atomically overwrites the single checkpoint key.
//! - The seen set may contain ids not present in sealed partitions (runs
//!   aborted between extraction and sealing); that is harmless because
//!   re-extraction of a seen id is skipped and sealing still happens before
//!   any new checkpoint.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use super::checkpoint::Checkpoint;
use super::errors::PersistError;
use super::object::ObjectKind;
use super::object_id::OidBytes;

/// Metadata recorded alongside a seen marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeenMeta {
    /// Kind the object was classified as when ingested.
    pub kind: ObjectKind,
    /// Payload size in bytes at ingestion time.
    pub size: u64,
}

impl SeenMeta {
    /// Encoded marker value: kind byte plus big-endian size.
    #[must_use]
    pub fn encode(&self) -> [u8; 9] {
        let mut out = [0u8; 9];
        out[0] = self.kind.as_u8();
        out[1..].copy_from_slice(&self.size.to_be_bytes());
        out
    }

    /// Decodes a stored marker value.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 9 {
            return None;
        }
        Some(Self {
            kind: ObjectKind::from_u8(bytes[0])?,
            size: u64::from_be_bytes(bytes[1..].try_into().ok()?),
        })
    }
}

/// Seen-marker and checkpoint storage for one repository target.
///
/// Whether the store runs in-process, in a subprocess, or behind IPC is an
/// implementation detail; this trait is the whole contract.
pub trait ObjectDedupStore: Send + Sync {
    /// Whether `id` has already been ingested.
    fn has_seen(&self, id: &OidBytes) -> Result<bool, PersistError>;

    /// Records `id` as ingested. Idempotent.
    ///
    /// Callers serialize all `mark_seen` calls (the extractor folds them
    /// into its append critical section).
    fn mark_seen(&self, id: &OidBytes, meta: &SeenMeta) -> Result<(), PersistError>;

    /// Loads the stored checkpoint, if any.
    fn get_checkpoint(&self) -> Result<Option<Checkpoint>, PersistError>;

    /// Atomically overwrites the checkpoint record.
    fn put_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), PersistError>;
}

/// In-memory dedup store for tests and small runs.
///
/// Grows with every marked id and is not persisted across processes.
#[derive(Debug, Default)]
pub struct InMemoryDedupStore {
    seen: RwLock<HashMap<OidBytes, SeenMeta>>,
    checkpoint: Mutex<Option<Checkpoint>>,
}

impl InMemoryDedupStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of seen markers (test observability).
    #[must_use]
    pub fn seen_len(&self) -> usize {
        self.seen.read().expect("seen set poisoned").len()
    }

    /// Looks up the recorded metadata for an id (test observability).
    #[must_use]
    pub fn seen_meta(&self, id: &OidBytes) -> Option<SeenMeta> {
        self.seen.read().expect("seen set poisoned").get(id).copied()
    }
}

impl ObjectDedupStore for InMemoryDedupStore {
    fn has_seen(&self, id: &OidBytes) -> Result<bool, PersistError> {
        Ok(self.seen.read().expect("seen set poisoned").contains_key(id))
    }

    fn mark_seen(&self, id: &OidBytes, meta: &SeenMeta) -> Result<(), PersistError> {
        self.seen
            .write()
            .expect("seen set poisoned")
            .insert(*id, *meta);
        Ok(())
    }

    fn get_checkpoint(&self) -> Result<Option<Checkpoint>, PersistError> {
        Ok(*self.checkpoint.lock().expect("checkpoint poisoned"))
    }

    fn put_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), PersistError> {
        *self.checkpoint.lock().expect("checkpoint poisoned") = Some(*checkpoint);
        Ok(())
    }
}
