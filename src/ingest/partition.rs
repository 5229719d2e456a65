//! Partition naming and the row-container codec.
//!
//! A partition is an immutable file of rows of one object kind, produced by
//! sealing an in-memory batch. Names are deterministic and collision-free
//! across runs:
//!
//! ```text
//! <kind>/part_hash=<first-2-hex-of-minId>/
//!     batch_sn=<partition-sequence>__<minId[0:7]>-<maxId[0:7]>.colb
//! ```
//!
//! `part_hash` shards directories by the leading id byte; `batch_sn`
//! strictly increases per run, so two runs can never name the same file.
//!
//! # Container format
//! The concrete columnar schema is an external collaborator; partitions use
//! a private stable container:
//!
//! ```text
//! header: "RCP1" | kind u8 | record count u32 be
//! row:    oid_len u8 | oid bytes | payload_len u32 be | payload
//! ```
//!
//! [`read_partition_file`] decodes a sealed file and validates the header
//! and every row length, which is how tests assert that a completed rename
//! always yields a fully readable file.

use std::fs;
use std::path::{Path, PathBuf};

use super::errors::WriteError;
use super::object::{ObjectKind, RepositoryObject};
use super::object_id::OidBytes;

/// Partition file extension.
pub const PARTITION_EXT: &str = "colb";
/// Container magic, including the format version.
pub const PARTITION_MAGIC: &[u8; 4] = b"RCP1";
/// Header length: magic, kind byte, record count.
pub const PARTITION_HEADER_LEN: usize = 4 + 1 + 4;
/// Prefix marking not-yet-renamed staging files.
pub const TEMP_PREFIX: &str = ".tmp-";

/// Metadata for one sealed partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedPartition {
    /// Object kind held by the file.
    pub kind: ObjectKind,
    /// Partition sequence of the producing run.
    pub sequence: u64,
    /// Smallest id in the file.
    pub min_id: OidBytes,
    /// Largest id in the file.
    pub max_id: OidBytes,
    /// Row count.
    pub rows: u32,
    /// Total payload bytes across rows (excluding container overhead).
    pub payload_bytes: u64,
    /// Final file path.
    pub path: PathBuf,
}

/// Relative path for a partition file.
#[must_use]
pub fn partition_rel_path(
    kind: ObjectKind,
    sequence: u64,
    min_id: &OidBytes,
    max_id: &OidBytes,
) -> PathBuf {
    PathBuf::from(format!(
        "{kind}/part_hash={}/batch_sn={sequence}__{}-{}.{PARTITION_EXT}",
        min_id.hex_prefix(2),
        min_id.hex_prefix(7),
        max_id.hex_prefix(7),
    ))
}

/// Encodes the container header.
#[must_use]
pub fn encode_header(kind: ObjectKind, rows: u32) -> [u8; PARTITION_HEADER_LEN] {
    let mut out = [0u8; PARTITION_HEADER_LEN];
    out[..4].copy_from_slice(PARTITION_MAGIC);
    out[4] = kind.as_u8();
    out[5..].copy_from_slice(&rows.to_be_bytes());
    out
}

/// Appends one encoded row to `out`.
///
/// # Errors
/// [`WriteError::RowTooLarge`] when the payload exceeds the u32 length
/// field.
pub fn encode_row(out: &mut Vec<u8>, object: &RepositoryObject) -> Result<(), WriteError> {
    let len = object.bytes.len();
    if len > u32::MAX as usize {
        return Err(WriteError::RowTooLarge {
            len,
            max: u32::MAX as usize,
        });
    }
    out.push(object.id.len());
    out.extend_from_slice(object.id.as_slice());
    out.extend_from_slice(&(len as u32).to_be_bytes());
    out.extend_from_slice(&object.bytes);
    Ok(())
}

/// Reads and fully validates a sealed partition file.
///
/// # Errors
/// [`WriteError::Io`] for I/O failures or any container violation
/// (bad magic, bad kind, truncated rows, trailing bytes).
pub fn read_partition_file(path: &Path) -> Result<(ObjectKind, Vec<RepositoryObject>), WriteError> {
    let bytes = fs::read(path)?;
    decode_partition(&bytes).ok_or_else(|| {
        WriteError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid partition container: {}", path.display()),
        ))
    })
}

fn decode_partition(bytes: &[u8]) -> Option<(ObjectKind, Vec<RepositoryObject>)> {
    if bytes.len() < PARTITION_HEADER_LEN || &bytes[..4] != PARTITION_MAGIC {
        return None;
    }
    let kind = ObjectKind::from_u8(bytes[4])?;
    let rows = u32::from_be_bytes(bytes[5..PARTITION_HEADER_LEN].try_into().ok()?);

    let mut out = Vec::with_capacity(rows as usize);
    let mut rest = &bytes[PARTITION_HEADER_LEN..];
    for _ in 0..rows {
        let (&oid_len, tail) = rest.split_first()?;
        if tail.len() < oid_len as usize + 4 {
            return None;
        }
        let (oid, tail) = tail.split_at(oid_len as usize);
        let id = OidBytes::try_from_slice(oid)?;
        let (len_bytes, tail) = tail.split_at(4);
        let payload_len = u32::from_be_bytes(len_bytes.try_into().ok()?) as usize;
        if tail.len() < payload_len {
            return None;
        }
        let (payload, tail) = tail.split_at(payload_len);
        out.push(RepositoryObject {
            id,
            kind,
            bytes: payload.to_vec(),
        });
        rest = tail;
    }
    if !rest.is_empty() {
        return None;
    }
    Some((kind, out))
}
