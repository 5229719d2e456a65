//! Error types for the ingestion stages.
//!
//! Errors are stage-specific rather than one monolithic enum: lock handling,
//! reading, partition writing, and store persistence fail in different ways
//! and are handled at different layers. All enums are `#[non_exhaustive]` so
//! variants can be added without breaking callers.
//!
//! Two variants carry load-bearing semantics for the run loop:
//! - [`LockError::Held`] is expected under concurrent scheduling and maps to
//!   a clean no-op outcome, not a fault.
//! - [`ReadError::CorruptFrame`] means the batch channel desynchronized and
//!   must abort the run; guessing past it could misattribute object bytes.

use std::fmt;
use std::io;

use super::object_id::OidBytes;

/// Errors from lock-file acquisition and release.
#[derive(Debug)]
#[non_exhaustive]
pub enum LockError {
    /// Another live process holds the lock. Retryable after backoff.
    Held {
        /// Pid recorded in the existing lock token.
        owner_pid: u32,
    },
    /// Filesystem error while creating, reading, or removing the lock file.
    Io(io::Error),
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Held { owner_pid } => {
                write!(f, "lock held by live process {owner_pid}")
            }
            Self::Io(err) => write!(f, "lock file I/O error: {err}"),
        }
    }
}

impl std::error::Error for LockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for LockError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Errors from the version-control reader and the batch channel.
#[derive(Debug)]
#[non_exhaustive]
pub enum ReadError {
    /// Failed to spawn or talk to the external version-control binary.
    Io(io::Error),
    /// The external binary exited with a failure status.
    ToolFailed {
        /// Exit code, or `None` when killed by a signal.
        status: Option<i32>,
        /// The subcommand that failed.
        detail: &'static str,
    },
    /// Reader output outside the batch channel was not parseable.
    MalformedOutput {
        /// Human-readable context; not stable for machine parsing.
        detail: &'static str,
    },
    /// Batch channel framing violation. Fatal for the run: it indicates
    /// request/response desynchronization.
    CorruptFrame {
        /// Human-readable context; not stable for machine parsing.
        detail: &'static str,
    },
    /// The batch channel reported the object as missing. Per-object and
    /// transient: the id stays unmarked and is retried on a later run.
    MissingObject {
        /// Id the channel could not serve.
        id: OidBytes,
    },
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "reader I/O error: {err}"),
            Self::ToolFailed { status, detail } => match status {
                Some(code) => write!(f, "{detail} exited with status {code}"),
                None => write!(f, "{detail} terminated by signal"),
            },
            Self::MalformedOutput { detail } => write!(f, "malformed reader output: {detail}"),
            Self::CorruptFrame { detail } => write!(f, "corrupt batch frame: {detail}"),
            Self::MissingObject { id } => write!(f, "object missing from repository: {id}"),
        }
    }
}

impl std::error::Error for ReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ReadError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl ReadError {
    /// Whether this failure is isolated to a single object.
    ///
    /// Only a missing object qualifies: it is counted and skipped by the
    /// extractor, and the id stays unmarked so a later run retries it.
    /// Transport I/O, framing corruption, and tool failures abort the run:
    /// a dead fetch channel would otherwise fail every remaining id one
    /// warn at a time while the run still advanced the checkpoint.
    #[must_use]
    pub const fn is_per_object(&self) -> bool {
        matches!(self, Self::MissingObject { .. })
    }
}

/// Errors from staging or sealing partition files.
///
/// Fatal for the current run. Previously sealed partitions are immutable
/// and remain valid.
#[derive(Debug)]
#[non_exhaustive]
pub enum WriteError {
    /// I/O error while writing, syncing, or renaming a partition file.
    Io(io::Error),
    /// A single row exceeded the encodable payload size.
    RowTooLarge {
        /// Offending payload length.
        len: usize,
        /// Maximum encodable length.
        max: usize,
    },
    /// A sealed partition already exists at the target path. Sealed files
    /// are immutable; renaming over one is never allowed.
    PartitionExists {
        /// Path that would have been overwritten.
        path: std::path::PathBuf,
    },
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "partition write failed: {err}"),
            Self::RowTooLarge { len, max } => {
                write!(f, "row too large: {len} bytes (max: {max})")
            }
            Self::PartitionExists { path } => {
                write!(f, "partition already sealed at {}", path.display())
            }
        }
    }
}

impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for WriteError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Errors from the dedup/checkpoint store.
#[derive(Debug)]
#[non_exhaustive]
pub enum PersistError {
    /// Backend-reported failure.
    Backend {
        /// Backend error text; not stable for machine parsing.
        detail: String,
    },
    /// A stored value failed to decode.
    Corrupt {
        /// Human-readable context; not stable for machine parsing.
        detail: &'static str,
    },
}

impl PersistError {
    /// Creates a backend error from any displayable failure.
    pub fn backend(detail: impl Into<String>) -> Self {
        Self::Backend {
            detail: detail.into(),
        }
    }
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend { detail } => write!(f, "store backend error: {detail}"),
            Self::Corrupt { detail } => write!(f, "corrupt stored value: {detail}"),
        }
    }
}

impl std::error::Error for PersistError {}

/// Run-level error: any stage failure that unwinds to the coordinator.
///
/// The coordinator still releases the lock and leaves the stored checkpoint
/// untouched, so the next run resumes from the same point.
#[derive(Debug)]
#[non_exhaustive]
pub enum IngestError {
    /// Lock acquisition or release failed (other than a held lock).
    Lock(LockError),
    /// Reader or batch channel failed at run level.
    Read(ReadError),
    /// Partition staging or sealing failed.
    Write(WriteError),
    /// Dedup or checkpoint store failed.
    Persist(PersistError),
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lock(err) => write!(f, "locking: {err}"),
            Self::Read(err) => write!(f, "reading: {err}"),
            Self::Write(err) => write!(f, "writing: {err}"),
            Self::Persist(err) => write!(f, "persisting: {err}"),
        }
    }
}

impl std::error::Error for IngestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Lock(err) => Some(err),
            Self::Read(err) => Some(err),
            Self::Write(err) => Some(err),
            Self::Persist(err) => Some(err),
        }
    }
}

impl From<LockError> for IngestError {
    fn from(err: LockError) -> Self {
        Self::Lock(err)
    }
}

impl From<ReadError> for IngestError {
    fn from(err: ReadError) -> Self {
        Self::Read(err)
    }
}

impl From<WriteError> for IngestError {
    fn from(err: WriteError) -> Self {
        Self::Write(err)
    }
}

impl From<PersistError> for IngestError {
    fn from(err: PersistError) -> Self {
        Self::Persist(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_stage_prefixed() {
        let err = IngestError::from(LockError::Held { owner_pid: 42 });
        assert_eq!(format!("{err}"), "locking: lock held by live process 42");

        let err = IngestError::from(ReadError::CorruptFrame {
            detail: "short header",
        });
        assert_eq!(format!("{err}"), "reading: corrupt batch frame: short header");
    }

    #[test]
    fn io_sources_are_preserved() {
        use std::error::Error as _;
        let err = WriteError::from(io::Error::other("disk gone"));
        assert!(err.source().is_some());
    }

    #[test]
    fn per_object_classification() {
        assert!(ReadError::MissingObject {
            id: OidBytes::default()
        }
        .is_per_object());
        // A broken transport fails every later fetch on that channel, so it
        // must abort the run rather than be skipped per id.
        assert!(!ReadError::Io(io::Error::other("pipe")).is_per_object());
        assert!(!ReadError::CorruptFrame { detail: "x" }.is_per_object());
        assert!(!ReadError::ToolFailed {
            status: Some(1),
            detail: "rev-list"
        }
        .is_per_object());
    }
}
