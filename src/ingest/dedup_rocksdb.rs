//! RocksDB-backed dedup/checkpoint store.
//!
//! Feature-gated: enable with `--features rocksdb-store`. When the feature
//! is disabled, the constructor and all methods return explicit backend
//! errors instead of silently degrading.
//!
//! Key layout (single instance, plain key/value pairs):
//! - seen markers: `b"seen/" + oid bytes`, value = [`SeenMeta`] encoding;
//! - checkpoint: the single well-known key `b"checkpoint"`, value =
//!   [`Checkpoint`] encoding.
//!
//! Content-hash keys give uniform prefixes, so marker keys spread evenly
//! across the keyspace; callers that batch lookups should still sort ids
//! for locality.

use std::path::Path;

use super::checkpoint::Checkpoint;
use super::dedup::{ObjectDedupStore, SeenMeta};
use super::errors::PersistError;
use super::object_id::OidBytes;

#[cfg(feature = "rocksdb-store")]
use rocksdb::{Options, WriteBatch, DB};

/// Namespace prefix for seen-marker keys.
const SEEN_PREFIX: &[u8] = b"seen/";
/// The single checkpoint key.
#[cfg(feature = "rocksdb-store")]
const CHECKPOINT_KEY: &[u8] = b"checkpoint";

/// Builds the marker key for an object id.
#[must_use]
pub fn build_seen_key(id: &OidBytes) -> Vec<u8> {
    let mut key = Vec::with_capacity(SEEN_PREFIX.len() + id.len() as usize);
    key.extend_from_slice(SEEN_PREFIX);
    key.extend_from_slice(id.as_slice());
    key
}

/// RocksDB-backed [`ObjectDedupStore`].
///
/// One instance per repository target. The handle is opened by the
/// coordinator at run start and shared by reference with all extractor
/// workers; RocksDB reads are safe from multiple threads.
#[derive(Debug)]
pub struct RocksDbDedupStore {
    #[cfg(feature = "rocksdb-store")]
    db: DB,
}

impl RocksDbDedupStore {
    /// Opens or creates the database at `path`.
    ///
    /// When the `rocksdb-store` feature is disabled, this returns an
    /// explicit backend error.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        #[cfg(feature = "rocksdb-store")]
        {
            let mut opts = Options::default();
            opts.create_if_missing(true);
            let db = DB::open(&opts, path).map_err(|err| PersistError::backend(err.to_string()))?;
            Ok(Self { db })
        }

        #[cfg(not(feature = "rocksdb-store"))]
        {
            let _ = path;
            Err(PersistError::backend("rocksdb support not enabled"))
        }
    }
}

impl ObjectDedupStore for RocksDbDedupStore {
    fn has_seen(&self, id: &OidBytes) -> Result<bool, PersistError> {
        #[cfg(feature = "rocksdb-store")]
        {
            self.db
                .get_pinned(build_seen_key(id))
                .map(|val| val.is_some())
                .map_err(|err| PersistError::backend(err.to_string()))
        }

        #[cfg(not(feature = "rocksdb-store"))]
        {
            let _ = id;
            Err(PersistError::backend("rocksdb support not enabled"))
        }
    }

    fn mark_seen(&self, id: &OidBytes, meta: &SeenMeta) -> Result<(), PersistError> {
        #[cfg(feature = "rocksdb-store")]
        {
            self.db
                .put(build_seen_key(id), meta.encode())
                .map_err(|err| PersistError::backend(err.to_string()))
        }

        #[cfg(not(feature = "rocksdb-store"))]
        {
            let _ = (id, meta);
            Err(PersistError::backend("rocksdb support not enabled"))
        }
    }

    fn get_checkpoint(&self) -> Result<Option<Checkpoint>, PersistError> {
        #[cfg(feature = "rocksdb-store")]
        {
            let value = self
                .db
                .get_pinned(CHECKPOINT_KEY)
                .map_err(|err| PersistError::backend(err.to_string()))?;
            match value {
                Some(bytes) => Checkpoint::decode(bytes.as_ref())
                    .map(Some)
                    .ok_or(PersistError::Corrupt {
                        detail: "invalid checkpoint encoding",
                    }),
                None => Ok(None),
            }
        }

        #[cfg(not(feature = "rocksdb-store"))]
        {
            Err(PersistError::backend("rocksdb support not enabled"))
        }
    }

    fn put_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), PersistError> {
        #[cfg(feature = "rocksdb-store")]
        {
            // One-key batch keeps the overwrite a single atomic write.
            let mut batch = WriteBatch::default();
            batch.put(CHECKPOINT_KEY, checkpoint.encode());
            self.db
                .write(batch)
                .map_err(|err| PersistError::backend(err.to_string()))
        }

        #[cfg(not(feature = "rocksdb-store"))]
        {
            let _ = checkpoint;
            Err(PersistError::backend("rocksdb support not enabled"))
        }
    }
}
