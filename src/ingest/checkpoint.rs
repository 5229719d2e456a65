//! Ingestion checkpoint record and its stable binary codec.
//!
//! Exactly one authoritative checkpoint exists per repository target, stored
//! under a single well-known key in the dedup store and overwritten
//! last-write-wins at the very end of a successful run. A crash at any
//! earlier point leaves the previous checkpoint in place, which is what
//! makes re-runs resume from the same spot.
//!
//! The value encoding is versioned; decode rejects truncated payloads and
//! unknown versions rather than guessing.

use uuid::Uuid;

use super::object_id::OidBytes;

/// Current encoding version.
const CHECKPOINT_VERSION: u8 = 1;

/// Durable record of ingestion progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    /// History counter observed at the start of the run that wrote this
    /// record. Non-decreasing across successive checkpoints.
    pub history_sequence: u64,
    /// History tip id observed alongside `history_sequence`.
    pub head_object_id: OidBytes,
    /// Partition sequence used by that run. Strictly increases per run, so
    /// partition file names never collide across runs.
    pub partition_sequence: u64,
    /// Fresh id minted per successful run.
    pub transaction_id: Uuid,
    /// Wall-clock milliseconds since the Unix epoch at checkpoint write.
    pub timestamp_ms: i64,
}

impl Checkpoint {
    /// Maximum encoded size: version, three u64/i64 fields, uuid, oid
    /// length byte plus up to 32 id bytes.
    pub const MAX_ENCODED_LEN: usize = 1 + 8 + 8 + 8 + 16 + 1 + 32;

    /// Encodes the checkpoint as its stored value.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::MAX_ENCODED_LEN);
        out.push(CHECKPOINT_VERSION);
        out.extend_from_slice(&self.history_sequence.to_be_bytes());
        out.extend_from_slice(&self.partition_sequence.to_be_bytes());
        out.extend_from_slice(&self.timestamp_ms.to_be_bytes());
        out.extend_from_slice(self.transaction_id.as_bytes());
        out.push(self.head_object_id.len());
        out.extend_from_slice(self.head_object_id.as_slice());
        out
    }

    /// Decodes a stored checkpoint value.
    ///
    /// The input must be exactly one encoded value (point-lookup semantics:
    /// the store hands back complete standalone buffers). Returns `None` for
    /// truncation, trailing bytes, unknown versions, or invalid id lengths.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let (&version, rest) = bytes.split_first()?;
        if version != CHECKPOINT_VERSION {
            return None;
        }
        if rest.len() < 8 + 8 + 8 + 16 + 1 {
            return None;
        }
        let (seq, rest) = rest.split_at(8);
        let (part, rest) = rest.split_at(8);
        let (ts, rest) = rest.split_at(8);
        let (txid, rest) = rest.split_at(16);
        let (&oid_len, oid) = rest.split_first()?;
        if oid.len() != oid_len as usize {
            return None;
        }

        Some(Self {
            history_sequence: u64::from_be_bytes(seq.try_into().ok()?),
            partition_sequence: u64::from_be_bytes(part.try_into().ok()?),
            timestamp_ms: i64::from_be_bytes(ts.try_into().ok()?),
            transaction_id: Uuid::from_slice(txid).ok()?,
            head_object_id: OidBytes::try_from_slice(oid)?,
        })
    }
}
