//! Line-framed batch protocol for bulk object fetches.
//!
//! The wire format (one round trip, pipelining permitted, responses in
//! request order):
//!
//! ```text
//! request:  <hex-id> LF
//! response: <hex-id> SP <kind> SP <byte-len> LF <byte-len raw bytes> LF
//! missing:  <hex-id> SP "missing" LF
//! ```
//!
//! [`FrameParser`] is a pure incremental push parser: callers feed raw
//! chunks as they arrive and pull complete frames out. It buffers across
//! arbitrary chunk boundaries, scans for newlines with `memchr`, and
//! compacts its buffer only once consumed bytes pile up, so steady-state
//! parsing does not copy per feed. Separating the parser from I/O keeps the
//! framing rules testable without a subprocess.
//!
//! Any violation of the framing rules is [`ReadError::CorruptFrame`]:
//! request/response desynchronization must abort the run rather than be
//! guessed past. A `missing` header is not a framing violation; it is a
//! per-object fetch failure.

use std::io::{Read, Write};

use memchr::memchr;

use super::errors::ReadError;
use super::object::{ObjectKind, RepositoryObject};
use super::object_id::OidBytes;

/// Longest acceptable header line, bounding buffer growth on garbage input.
///
/// A real header is at most 64 hex digits, a kind token, and a length, well
/// under this cap.
const MAX_HEADER_LEN: usize = 256;

/// Buffer compaction threshold: consumed prefix bytes are dropped once they
/// exceed this.
const COMPACT_THRESHOLD: usize = 64 * 1024;

/// One parsed response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A complete object frame.
    Object(RepositoryObject),
    /// The channel reported the id as absent from the repository.
    Missing(OidBytes),
}

enum ParseState {
    /// Waiting for a complete header line.
    Header,
    /// Header consumed; waiting for `len` body bytes plus the trailer LF.
    Body {
        id: OidBytes,
        kind: ObjectKind,
        len: usize,
    },
}

/// Incremental parser for batch-channel responses.
pub struct FrameParser {
    buf: Vec<u8>,
    /// Consumed prefix; bytes before this offset are dead.
    start: usize,
    state: ParseState,
}

impl FrameParser {
    /// Creates an empty parser.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            start: 0,
            state: ParseState::Header,
        }
    }

    /// Appends a raw chunk received from the channel.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.compact();
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered, not-yet-consumed bytes.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len() - self.start
    }

    /// Pulls the next complete frame, if the buffer holds one.
    ///
    /// Returns `Ok(None)` when more input is needed.
    ///
    /// # Errors
    /// [`ReadError::CorruptFrame`] on any framing violation. The parser is
    /// not usable after an error; the run must abort.
    pub fn next_frame(&mut self) -> Result<Option<FrameOutcome>, ReadError> {
        loop {
            match self.state {
                ParseState::Header => {
                    let avail = &self.buf[self.start..];
                    let Some(eol) = memchr(b'\n', avail) else {
                        if avail.len() > MAX_HEADER_LEN {
                            return Err(ReadError::CorruptFrame {
                                detail: "header line too long",
                            });
                        }
                        return Ok(None);
                    };
                    let header = &avail[..eol];
                    let parsed = parse_header(header)?;
                    self.start += eol + 1;
                    match parsed {
                        Header::Missing(id) => return Ok(Some(FrameOutcome::Missing(id))),
                        Header::Object { id, kind, len } => {
                            self.state = ParseState::Body { id, kind, len };
                        }
                    }
                }
                ParseState::Body { id, kind, len } => {
                    // Body plus the trailing LF must be fully buffered.
                    if self.pending() < len + 1 {
                        return Ok(None);
                    }
                    let body_end = self.start + len;
                    if self.buf[body_end] != b'\n' {
                        return Err(ReadError::CorruptFrame {
                            detail: "missing frame trailer",
                        });
                    }
                    let bytes = self.buf[self.start..body_end].to_vec();
                    self.start = body_end + 1;
                    self.state = ParseState::Header;
                    return Ok(Some(FrameOutcome::Object(RepositoryObject {
                        id,
                        kind,
                        bytes,
                    })));
                }
            }
        }
    }

    /// Drops the consumed prefix once it outgrows the threshold.
    fn compact(&mut self) {
        if self.start >= COMPACT_THRESHOLD && self.start * 2 >= self.buf.len() {
            self.buf.drain(..self.start);
            self.start = 0;
        }
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

enum Header {
    Object {
        id: OidBytes,
        kind: ObjectKind,
        len: usize,
    },
    Missing(OidBytes),
}

/// Parses one header line (without the LF).
fn parse_header(line: &[u8]) -> Result<Header, ReadError> {
    let mut fields = line.split(|&b| b == b' ');
    let id = fields
        .next()
        .and_then(OidBytes::parse_hex)
        .ok_or(ReadError::CorruptFrame {
            detail: "bad object id in header",
        })?;
    let second = fields.next().ok_or(ReadError::CorruptFrame {
        detail: "truncated header",
    })?;

    if second == b"missing" {
        if fields.next().is_some() {
            return Err(ReadError::CorruptFrame {
                detail: "trailing fields after missing",
            });
        }
        return Ok(Header::Missing(id));
    }

    let kind = ObjectKind::parse_token(second).ok_or(ReadError::CorruptFrame {
        detail: "unknown object kind",
    })?;
    let len_field = fields.next().ok_or(ReadError::CorruptFrame {
        detail: "header missing byte length",
    })?;
    if fields.next().is_some() {
        return Err(ReadError::CorruptFrame {
            detail: "trailing fields in header",
        });
    }
    let len = parse_decimal(len_field).ok_or(ReadError::CorruptFrame {
        detail: "bad byte length in header",
    })?;
    Ok(Header::Object { id, kind, len })
}

/// Parses a non-empty ASCII decimal field, rejecting overflow.
fn parse_decimal(field: &[u8]) -> Option<usize> {
    if field.is_empty() {
        return None;
    }
    let mut value: usize = 0;
    for &b in field {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value
            .checked_mul(10)?
            .checked_add(usize::from(b - b'0'))?;
    }
    Some(value)
}

/// Bidirectional batch channel over a pair of byte streams.
///
/// Requests may be pipelined: issue several [`request`](Self::request)
/// calls, then read responses in the same order. [`fetch`](Self::fetch) is
/// the one-at-a-time convenience used by extractor workers, which verifies
/// the echoed id against the request.
pub struct BatchChannel<R: Read, W: Write> {
    reader: R,
    writer: W,
    parser: FrameParser,
    chunk: Box<[u8; 8192]>,
}

impl<R: Read, W: Write> BatchChannel<R, W> {
    /// Wraps a response reader and request writer.
    #[must_use]
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            parser: FrameParser::new(),
            chunk: Box::new([0u8; 8192]),
        }
    }

    /// Writes one id request line and flushes it.
    pub fn request(&mut self, id: &OidBytes) -> Result<(), ReadError> {
        self.writer.write_all(id.to_hex().as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Reads the next response frame, blocking for more input as needed.
    ///
    /// # Errors
    /// - [`ReadError::CorruptFrame`] on framing violations, including the
    ///   channel closing mid-response.
    /// - [`ReadError::Io`] on transport errors.
    pub fn read_frame(&mut self) -> Result<FrameOutcome, ReadError> {
        loop {
            if let Some(outcome) = self.parser.next_frame()? {
                return Ok(outcome);
            }
            let n = self.reader.read(&mut self.chunk[..])?;
            if n == 0 {
                return Err(ReadError::CorruptFrame {
                    detail: "channel closed mid-response",
                });
            }
            self.parser.feed(&self.chunk[..n]);
        }
    }

    /// One request/response round trip for `id`.
    ///
    /// # Errors
    /// - [`ReadError::MissingObject`] when the repository lacks the id
    ///   (per-object, transient).
    /// - [`ReadError::CorruptFrame`] when the echoed id does not match the
    ///   request (desynchronization) or on any framing violation.
    pub fn fetch(&mut self, id: &OidBytes) -> Result<RepositoryObject, ReadError> {
        self.request(id)?;
        match self.read_frame()? {
            FrameOutcome::Object(object) => {
                if object.id != *id {
                    return Err(ReadError::CorruptFrame {
                        detail: "response id does not match request",
                    });
                }
                Ok(object)
            }
            FrameOutcome::Missing(echoed) => {
                if echoed != *id {
                    return Err(ReadError::CorruptFrame {
                        detail: "response id does not match request",
                    });
                }
                Err(ReadError::MissingObject { id: *id })
            }
        }
    }
}
