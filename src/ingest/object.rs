//! Repository object model and ingest-mode policy.
//!
//! A [`RepositoryObject`] is transient: produced by the reader, appended
//! once by the columnar writer, then dropped. [`IngestMode`] is the
//! caller-supplied policy deciding which object kinds are persisted at all;
//! filtering happens before the writer's critical section so dropped kinds
//! cost only the fetch.

use super::object_id::OidBytes;

/// Kind of a repository object.
///
/// Discriminants are stable and used in seen-marker values and partition
/// headers.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Commit object.
    Commit = 1,
    /// Tree object.
    Tree = 2,
    /// Blob object.
    Blob = 3,
    /// Annotated tag object.
    Tag = 4,
}

impl ObjectKind {
    /// All kinds, in discriminant order.
    pub const ALL: [Self; 4] = [Self::Commit, Self::Tree, Self::Blob, Self::Tag];

    /// Parses the wire token used by the batch protocol header.
    #[must_use]
    pub fn parse_token(token: &[u8]) -> Option<Self> {
        match token {
            b"commit" => Some(Self::Commit),
            b"tree" => Some(Self::Tree),
            b"blob" => Some(Self::Blob),
            b"tag" => Some(Self::Tag),
            _ => None,
        }
    }

    /// Wire token and partition directory name for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Tree => "tree",
            Self::Blob => "blob",
            Self::Tag => "tag",
        }
    }

    /// Stable discriminant for compact encodings.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Inverse of [`as_u8`](Self::as_u8).
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Commit),
            2 => Some(Self::Tree),
            3 => Some(Self::Blob),
            4 => Some(Self::Tag),
            _ => None,
        }
    }

    /// Index into per-kind tables (`0..4`).
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize - 1
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy selecting which object kinds are persisted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IngestMode {
    /// Persist every kind.
    #[default]
    Full,
    /// Drop blobs; keep commits, trees, and tags.
    MetadataOnly,
    /// Keep only commits and tags.
    CommitsOnly,
}

impl IngestMode {
    /// Whether objects of `kind` are persisted under this mode.
    #[must_use]
    pub const fn keeps(self, kind: ObjectKind) -> bool {
        match self {
            Self::Full => true,
            Self::MetadataOnly => !matches!(kind, ObjectKind::Blob),
            Self::CommitsOnly => matches!(kind, ObjectKind::Commit | ObjectKind::Tag),
        }
    }
}

/// One extracted repository object.
///
/// Transient: lives from the batch-channel fetch until the columnar append.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepositoryObject {
    /// Content-hash id.
    pub id: OidBytes,
    /// Object kind as reported by the batch channel header.
    pub kind: ObjectKind,
    /// Raw object payload.
    pub bytes: Vec<u8>,
}

impl RepositoryObject {
    /// Payload size in bytes.
    #[inline]
    #[must_use]
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}
