//! Object id types for the ingestion pipeline.
//!
//! Repository object ids are content hashes (SHA-1 or SHA-256) and serve as
//! the natural dedup key. `OidBytes` stores either width inline with no heap
//! allocation and compares lexicographically on the valid prefix, so sorted
//! id batches map directly onto ordered key/value backends.
//!
//! Hex parsing accepts only full-width lowercase/uppercase hex (40 or 64
//! digits); everything the reader hands us is untrusted subprocess output,
//! so parsing never panics.

use std::fmt;
use std::hash::{Hash, Hasher};

/// Hash format of an object id.
///
/// Discriminants are stable and used in compact on-disk encodings.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ObjectFormat {
    /// SHA-1, 20-byte ids.
    #[default]
    Sha1 = 1,
    /// SHA-256, 32-byte ids.
    Sha256 = 2,
}

impl ObjectFormat {
    /// Byte length of ids in this format.
    #[inline]
    #[must_use]
    pub const fn oid_len(self) -> u8 {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }
}

/// Fixed-size inline storage for a SHA-1 or SHA-256 object id.
///
/// # Invariants
/// - `len` is always 20 or 32.
/// - `bytes[len..]` is zero-padded so equality on the struct would match
///   equality on the slice; comparisons still go through `as_slice` to keep
///   the contract explicit.
#[derive(Clone, Copy)]
pub struct OidBytes {
    len: u8,
    bytes: [u8; 32],
}

impl OidBytes {
    /// Builds a SHA-1 id.
    #[inline]
    #[must_use]
    pub fn sha1(bytes: [u8; 20]) -> Self {
        let mut storage = [0u8; 32];
        storage[..20].copy_from_slice(&bytes);
        Self {
            len: 20,
            bytes: storage,
        }
    }

    /// Builds a SHA-256 id.
    #[inline]
    #[must_use]
    pub fn sha256(bytes: [u8; 32]) -> Self {
        Self { len: 32, bytes }
    }

    /// Builds an id from raw bytes, returning `None` unless the length is
    /// exactly 20 or 32.
    #[must_use]
    pub fn try_from_slice(bytes: &[u8]) -> Option<Self> {
        let len = match bytes.len() {
            20 => 20u8,
            32 => 32u8,
            _ => return None,
        };
        let mut storage = [0u8; 32];
        storage[..bytes.len()].copy_from_slice(bytes);
        Some(Self {
            len,
            bytes: storage,
        })
    }

    /// Parses a full-width hex id (40 or 64 digits).
    ///
    /// Returns `None` for wrong lengths or non-hex bytes. Intended for
    /// untrusted reader output, so it never panics.
    #[must_use]
    pub fn parse_hex(hex: &[u8]) -> Option<Self> {
        let oid_len = match hex.len() {
            40 => 20usize,
            64 => 32usize,
            _ => return None,
        };
        let mut storage = [0u8; 32];
        for i in 0..oid_len {
            let hi = hex_digit(hex[i * 2])?;
            let lo = hex_digit(hex[i * 2 + 1])?;
            storage[i] = (hi << 4) | lo;
        }
        Some(Self {
            len: oid_len as u8,
            bytes: storage,
        })
    }

    /// Returns the valid id bytes (always 20 or 32 bytes).
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        debug_assert!(self.len == 20 || self.len == 32, "bad oid len {}", self.len);
        &self.bytes[..self.len as usize]
    }

    /// Length of the id in bytes (20 or 32).
    #[inline]
    #[must_use]
    pub const fn len(&self) -> u8 {
        self.len
    }

    /// Always `false` for valid ids; provided for slice-API symmetry.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Hash format of this id, derived from its length.
    #[inline]
    #[must_use]
    pub const fn format(&self) -> ObjectFormat {
        if self.len == 20 {
            ObjectFormat::Sha1
        } else {
            ObjectFormat::Sha256
        }
    }

    /// Full lowercase hex rendering.
    #[must_use]
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(self.len as usize * 2);
        for byte in self.as_slice() {
            out.push(HEX[(byte >> 4) as usize] as char);
            out.push(HEX[(byte & 0x0f) as usize] as char);
        }
        out
    }

    /// Lowercase hex prefix of `digits` hex characters.
    ///
    /// Used in partition file names, which embed short min/max ids. `digits`
    /// must not exceed the full hex width.
    #[must_use]
    pub fn hex_prefix(&self, digits: usize) -> String {
        debug_assert!(digits <= self.len as usize * 2);
        let mut out = self.to_hex();
        out.truncate(digits);
        out
    }
}

const HEX: &[u8; 16] = b"0123456789abcdef";

/// Converts one ASCII hex byte to its value.
#[inline]
fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

impl Default for OidBytes {
    fn default() -> Self {
        // The SHA-1 null id keeps a deterministic zero value without heap
        // allocation.
        Self {
            len: 20,
            bytes: [0u8; 32],
        }
    }
}

impl fmt::Debug for OidBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OidBytes({})", self.to_hex())
    }
}

impl fmt::Display for OidBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.as_slice() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl PartialEq for OidBytes {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for OidBytes {}

impl Hash for OidBytes {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_slice().hash(state);
    }
}

impl PartialOrd for OidBytes {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OidBytes {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_slice().cmp(other.as_slice())
    }
}
