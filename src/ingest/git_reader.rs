//! Git adapter for [`ObjectSource`], built on the `git` binary.
//!
//! The adapter hides all subprocess plumbing:
//! - `history_sequence` shells out to `rev-list --count HEAD`;
//! - `head_object_id` to `rev-parse HEAD`;
//! - `changed_object_ids` streams `rev-list --objects -n <delta> HEAD`
//!   line-by-line from the child's stdout, so huge deltas never
//!   materialize in memory;
//! - `open_batch_channel` spawns `cat-file --batch`, whose wire format is
//!   exactly the batch protocol (header line, raw bytes, trailing LF).
//!
//! The commit count is a change detector, not a content log: it is
//! non-decreasing on an append-only branch, and equality with the stored
//! checkpoint short-circuits a run before any object work. A repository
//! awaiting its first commit (unborn `HEAD`) counts as sequence 0.
//!
//! Children are reaped on drop. A drained id stream checks the child's exit
//! status and surfaces nonzero exits, so a truncated traversal cannot
//! silently pass for a complete one.

use std::io::BufRead as _;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};

use super::batch_channel::BatchChannel;
use super::errors::ReadError;
use super::object_id::OidBytes;
use super::source::{BatchFetch, ObjectIdStream, ObjectSource};

/// [`ObjectSource`] over a local Git repository and the `git` binary.
#[derive(Clone, Debug)]
pub struct GitReader {
    repo_dir: PathBuf,
    git_binary: PathBuf,
}

impl GitReader {
    /// Creates a reader for the repository at `repo_dir`, using `git` from
    /// `PATH`.
    #[must_use]
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            git_binary: PathBuf::from("git"),
        }
    }

    /// Overrides the `git` binary path.
    #[must_use]
    pub fn with_git_binary(mut self, git_binary: impl Into<PathBuf>) -> Self {
        self.git_binary = git_binary.into();
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.git_binary);
        cmd.arg("-C").arg(&self.repo_dir);
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Runs a short subcommand to completion and returns trimmed stdout.
    fn run_capture(&self, args: &[&str], detail: &'static str) -> Result<String, ReadError> {
        let output = self.command().args(args).output()?;
        if !output.status.success() {
            return Err(ReadError::ToolFailed {
                status: output.status.code(),
                detail,
            });
        }
        let stdout = String::from_utf8(output.stdout)
            .map_err(|_| ReadError::MalformedOutput { detail })?;
        Ok(stdout.trim_end().to_string())
    }

    /// Whether the repository resolves but `HEAD` points at no commit yet.
    ///
    /// A freshly initialized repository has a valid git dir and an
    /// unresolvable `HEAD` until its first commit lands.
    fn head_is_unborn(&self) -> Result<bool, ReadError> {
        let repo = self.command().args(["rev-parse", "--git-dir"]).output()?;
        if !repo.status.success() {
            return Ok(false);
        }
        let head = self
            .command()
            .args(["rev-parse", "--verify", "--quiet", "HEAD"])
            .output()?;
        Ok(!head.status.success())
    }
}

impl ObjectSource for GitReader {
    fn history_sequence(&self) -> Result<u64, ReadError> {
        let count = match self.run_capture(&["rev-list", "--count", "HEAD"], "rev-list --count") {
            Ok(count) => count,
            Err(err @ ReadError::ToolFailed { .. }) => {
                // A repository awaiting its first commit has no countable
                // history; report zero so the run is a clean no-op.
                if self.head_is_unborn()? {
                    return Ok(0);
                }
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        count.parse().map_err(|_| ReadError::MalformedOutput {
            detail: "rev-list --count",
        })
    }

    fn head_object_id(&self) -> Result<OidBytes, ReadError> {
        let head = self.run_capture(&["rev-parse", "HEAD"], "rev-parse HEAD")?;
        OidBytes::parse_hex(head.as_bytes()).ok_or(ReadError::MalformedOutput {
            detail: "rev-parse HEAD",
        })
    }

    fn changed_object_ids(&self, since_sequence: u64) -> Result<ObjectIdStream, ReadError> {
        let current = self.history_sequence()?;
        let delta = current.saturating_sub(since_sequence);
        if delta == 0 {
            return Ok(Box::new(std::iter::empty()));
        }

        // The newest `delta` commits plus every tree and blob they reach.
        // Already-ingested ids reappearing here is fine; the dedup store
        // absorbs them.
        let mut child = self
            .command()
            .args(["rev-list", "--objects", "-n"])
            .arg(delta.to_string())
            .arg("HEAD")
            .stdout(Stdio::piped())
            .spawn()?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ReadError::Io(std::io::Error::other("rev-list stdout not captured"))
        })?;

        Ok(Box::new(RevListStream {
            lines: BufReader::new(stdout),
            child: Some(child),
            line: String::new(),
        }))
    }

    fn open_batch_channel(&self) -> Result<Box<dyn BatchFetch + Send>, ReadError> {
        let mut child = self
            .command()
            .args(["cat-file", "--batch"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ReadError::Io(std::io::Error::other("cat-file stdin not captured")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ReadError::Io(std::io::Error::other("cat-file stdout not captured")))?;

        Ok(Box::new(GitBatchChannel {
            channel: BatchChannel::new(stdout, stdin),
            child,
        }))
    }
}

/// Lazy id stream over a `rev-list --objects` child.
///
/// Each output line is `<hex-id>` optionally followed by a space and a path;
/// only the id token is parsed. When the stream drains, the child's exit
/// status is checked so truncation surfaces as an error.
struct RevListStream {
    lines: BufReader<ChildStdout>,
    child: Option<Child>,
    line: String,
}

impl RevListStream {
    fn finish(&mut self) -> Option<ReadError> {
        let mut child = self.child.take()?;
        match child.wait() {
            Ok(status) if status.success() => None,
            Ok(status) => Some(ReadError::ToolFailed {
                status: status.code(),
                detail: "rev-list --objects",
            }),
            Err(err) => Some(ReadError::Io(err)),
        }
    }
}

impl Iterator for RevListStream {
    type Item = Result<OidBytes, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.child.as_ref()?;
        loop {
            self.line.clear();
            match self.lines.read_line(&mut self.line) {
                Ok(0) => return self.finish().map(Err),
                Ok(_) => {
                    let token = self
                        .line
                        .trim_end_matches('\n')
                        .split(' ')
                        .next()
                        .unwrap_or("");
                    if token.is_empty() {
                        continue;
                    }
                    let Some(id) = OidBytes::parse_hex(token.as_bytes()) else {
                        // Poison the stream: reap the child and stop.
                        let _ = self.child.take().map(|mut c| {
                            let _ = c.kill();
                            let _ = c.wait();
                        });
                        return Some(Err(ReadError::MalformedOutput {
                            detail: "rev-list --objects",
                        }));
                    };
                    return Some(Ok(id));
                }
                Err(err) => {
                    let _ = self.child.take().map(|mut c| {
                        let _ = c.kill();
                        let _ = c.wait();
                    });
                    return Some(Err(ReadError::Io(err)));
                }
            }
        }
    }
}

impl Drop for RevListStream {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// One `cat-file --batch` child wrapped as a fetch channel.
struct GitBatchChannel {
    channel: BatchChannel<ChildStdout, std::process::ChildStdin>,
    child: Child,
}

impl BatchFetch for GitBatchChannel {
    fn fetch(&mut self, id: &OidBytes) -> Result<super::object::RepositoryObject, ReadError> {
        self.channel.fetch(id)
    }
}

impl Drop for GitBatchChannel {
    fn drop(&mut self) {
        // Closing stdin would end the child on its own; kill keeps teardown
        // prompt even if the child is mid-write.
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
