//! Version-control source interface.
//!
//! The pipeline needs four things from the version-control tool: a cheap
//! "how much history exists" counter, the current tip id, the stream of
//! object ids that became reachable since a given counter value, and a
//! bulk-fetch channel for raw object bytes. This trait is that seam;
//! [`GitReader`](super::git_reader::GitReader) implements it over the `git`
//! binary, and [`InMemoryObjectSource`] backs tests.
//!
//! # Contract
//! - `history_sequence` is monotonically non-decreasing between calls; it is
//!   a change detector, not a content log.
//! - `changed_object_ids` yields a finite stream in traversal order and may
//!   contain duplicates; the dedup store absorbs them.
//! - `open_batch_channel` returns an independent channel per call; each
//!   extractor worker owns one, so a slow fetch blocks only its worker.

use std::sync::Mutex;

use super::errors::ReadError;
use super::object::{ObjectKind, RepositoryObject};
use super::object_id::OidBytes;

/// Fallible stream of candidate object ids.
pub type ObjectIdStream = Box<dyn Iterator<Item = Result<OidBytes, ReadError>> + Send>;

/// One object-fetch channel.
///
/// Implementations resolve a content-hash id to the object's kind and raw
/// bytes. Missing ids surface as [`ReadError::MissingObject`].
pub trait BatchFetch {
    /// Fetches one object by id.
    fn fetch(&mut self, id: &OidBytes) -> Result<RepositoryObject, ReadError>;
}

/// Minimal history/content operations needed from the version-control tool.
pub trait ObjectSource: Send + Sync {
    /// Monotone non-decreasing count of history entries.
    fn history_sequence(&self) -> Result<u64, ReadError>;

    /// Id of the current history tip.
    fn head_object_id(&self) -> Result<OidBytes, ReadError>;

    /// Ids that became reachable after `since_sequence`, in traversal order.
    ///
    /// Duplicates are possible and tolerated downstream.
    fn changed_object_ids(&self, since_sequence: u64) -> Result<ObjectIdStream, ReadError>;

    /// Opens an independent bulk-fetch channel.
    fn open_batch_channel(&self) -> Result<Box<dyn BatchFetch + Send>, ReadError>;
}

/// In-memory source for tests and simulations.
///
/// Holds a fixed object table and a scripted history; `push_history`
/// advances the sequence and changes the answer to `changed_object_ids`,
/// letting tests model successive runs against a moving repository.
#[derive(Debug, Default)]
pub struct InMemoryObjectSource {
    inner: Mutex<InMemoryState>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    sequence: u64,
    head: OidBytes,
    /// `(introduced_at_sequence, id)` pairs in traversal order.
    history: Vec<(u64, OidBytes)>,
    objects: Vec<RepositoryObject>,
}

impl InMemoryObjectSource {
    /// Creates an empty source at sequence 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends history: advances the sequence to `sequence`, sets the tip to
    /// `head`, and registers `objects` as introduced at that sequence.
    ///
    /// # Panics
    ///
    /// Panics if `sequence` would move the counter backwards (test misuse).
    pub fn push_history(&self, sequence: u64, head: OidBytes, objects: Vec<RepositoryObject>) {
        let mut inner = self.inner.lock().expect("source state poisoned");
        assert!(
            sequence >= inner.sequence,
            "history sequence must not decrease"
        );
        inner.sequence = sequence;
        inner.head = head;
        for object in objects {
            inner.history.push((sequence, object.id));
            inner.objects.push(object);
        }
    }

    /// Registers an id in history without a fetchable object, so fetches of
    /// it report the object as missing.
    pub fn push_unfetchable(&self, sequence: u64, id: OidBytes) {
        let mut inner = self.inner.lock().expect("source state poisoned");
        assert!(
            sequence >= inner.sequence,
            "history sequence must not decrease"
        );
        inner.sequence = sequence;
        inner.history.push((sequence, id));
    }
}

impl ObjectSource for InMemoryObjectSource {
    fn history_sequence(&self) -> Result<u64, ReadError> {
        Ok(self.inner.lock().expect("source state poisoned").sequence)
    }

    fn head_object_id(&self) -> Result<OidBytes, ReadError> {
        Ok(self.inner.lock().expect("source state poisoned").head)
    }

    fn changed_object_ids(&self, since_sequence: u64) -> Result<ObjectIdStream, ReadError> {
        let inner = self.inner.lock().expect("source state poisoned");
        let ids: Vec<_> = inner
            .history
            .iter()
            .filter(|(seq, _)| *seq > since_sequence)
            .map(|(_, id)| Ok(*id))
            .collect();
        Ok(Box::new(ids.into_iter()))
    }

    fn open_batch_channel(&self) -> Result<Box<dyn BatchFetch + Send>, ReadError> {
        let inner = self.inner.lock().expect("source state poisoned");
        Ok(Box::new(InMemoryFetch {
            objects: inner.objects.clone(),
        }))
    }
}

struct InMemoryFetch {
    objects: Vec<RepositoryObject>,
}

impl BatchFetch for InMemoryFetch {
    fn fetch(&mut self, id: &OidBytes) -> Result<RepositoryObject, ReadError> {
        self.objects
            .iter()
            .find(|obj| obj.id == *id)
            .cloned()
            .ok_or(ReadError::MissingObject { id: *id })
    }
}

/// Builds a test object with a patterned SHA-1 id.
#[must_use]
pub fn test_object(id_byte: u8, kind: ObjectKind, bytes: &[u8]) -> RepositoryObject {
    RepositoryObject {
        id: OidBytes::sha1([id_byte; 20]),
        kind,
        bytes: bytes.to_vec(),
    }
}
