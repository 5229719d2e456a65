//! Incremental ingestion pipeline modules.
//!
//! One run mirrors the repository's new history into immutable partition
//! files: the coordinator acquires the cross-process lock, diffs the stored
//! checkpoint against the reader's history sequence, fans new object ids
//! out over the extraction pool, seals every open batch, and persists a new
//! checkpoint as the final step.
//!
//! # Invariants
//! - Sealed partition files are immutable and never reopened.
//! - The dedup store's seen set is a superset of ids in sealed partitions.
//! - A checkpoint is written only at the end of a fully successful run.
//! - Per-object failures never escalate past the extractor; run-level
//!   failures unwind to the coordinator, which always unlocks.

pub mod batch_channel;
pub mod checkpoint;
pub mod columnar;
pub mod coordinator;
pub mod dedup;
pub mod dedup_rocksdb;
pub mod errors;
pub mod extractor;
pub mod git_reader;
pub mod object;
pub mod object_id;
pub mod partition;
pub mod repo_lock;
pub mod source;

pub use batch_channel::{BatchChannel, FrameOutcome, FrameParser};
pub use checkpoint::Checkpoint;
pub use columnar::{ColumnarLimits, ColumnarWriter};
pub use coordinator::{IngestConfig, IngestionCoordinator, RunOutcome, RunReport, RunState};
pub use dedup::{InMemoryDedupStore, ObjectDedupStore, SeenMeta};
pub use dedup_rocksdb::RocksDbDedupStore;
pub use errors::{IngestError, LockError, PersistError, ReadError, WriteError};
pub use extractor::{run_extraction, ExtractStats, ExtractorConfig};
pub use git_reader::GitReader;
pub use object::{IngestMode, ObjectKind, RepositoryObject};
pub use object_id::{ObjectFormat, OidBytes};
pub use partition::{read_partition_file, SealedPartition};
pub use repo_lock::{LockRetry, LockToken, RepoLock};
pub use source::{BatchFetch, InMemoryObjectSource, ObjectIdStream, ObjectSource};
