//! Cross-process repository lock.
//!
//! One lock file guards one repository target: only the process that created
//! the file may run the pipeline. The token written into the file records
//! the owner's pid (plus its acquisition time for diagnostics), and a token
//! whose owner no longer exists is stale and reclaimable without manual
//! intervention.
//!
//! # Contract
//! - `acquire` either returns a held lock, fails with [`LockError::Held`]
//!   when a live owner exists, or surfaces a filesystem error.
//! - The token write is flushed to durable storage before `acquire` returns.
//! - `release` is idempotent; dropping a held lock releases it best-effort,
//!   so unlock runs on every exit path.
//!
//! Staleness uses a pid existence probe (`kill(pid, 0)`), not a real signal.
//! `EPERM` counts as alive: the pid exists but belongs to another user.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::warn;

use super::errors::LockError;

/// Parsed contents of a lock file.
///
/// Encoded as a single line: `"<pid> <start-unix-secs>\n"`. The start time
/// is provenance for diagnostics; staleness is decided by the pid probe
/// alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockToken {
    /// Pid of the owning process.
    pub owner_pid: u32,
    /// Unix seconds when the owner acquired the lock.
    pub start_time: u64,
}

impl LockToken {
    /// Encodes the token as its on-disk line.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{} {}\n", self.owner_pid, self.start_time)
    }

    /// Parses an on-disk token line.
    ///
    /// Returns `None` for anything that is not `"<pid> <secs>"`; callers
    /// treat unparseable files as stale debris (a crash between file
    /// creation and token write leaves an empty file).
    #[must_use]
    pub fn parse(contents: &str) -> Option<Self> {
        let mut fields = contents.trim_end().split(' ');
        let owner_pid = fields.next()?.parse().ok()?;
        let start_time = fields.next()?.parse().ok()?;
        if fields.next().is_some() {
            return None;
        }
        Some(Self {
            owner_pid,
            start_time,
        })
    }
}

/// Retry policy for lock acquisition.
///
/// Acquisition retries only after reclaiming a stale file; a live owner
/// fails immediately with [`LockError::Held`]. The bounded loop keeps
/// failure accounting explicit.
#[derive(Clone, Copy, Debug)]
pub struct LockRetry {
    /// Maximum acquisition attempts.
    pub attempts: u32,
    /// Sleep between attempts.
    pub backoff: Duration,
}

impl LockRetry {
    /// Defaults: a few quick attempts, enough to win the re-acquire race
    /// after removing a stale file.
    pub const DEFAULT: Self = Self {
        attempts: 4,
        backoff: Duration::from_millis(50),
    };

    /// Validates that the policy allows at least one attempt.
    ///
    /// # Panics
    ///
    /// Panics if `attempts` is zero (indicates a configuration bug).
    #[track_caller]
    pub const fn validate(&self) {
        assert!(self.attempts > 0, "must allow at least 1 lock attempt");
    }
}

impl Default for LockRetry {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Held cross-process lock over a repository target.
#[derive(Debug)]
pub struct RepoLock {
    path: PathBuf,
    held: bool,
}

impl RepoLock {
    /// Acquires the lock at `path`.
    ///
    /// On conflict, reads the existing token and probes the owner: a dead
    /// owner's file is removed and acquisition retried (bounded by
    /// `retry.attempts`); a live owner yields [`LockError::Held`].
    ///
    /// # Errors
    /// - [`LockError::Held`] when a live process owns the lock.
    /// - [`LockError::Io`] for filesystem failures.
    pub fn acquire(path: impl Into<PathBuf>, retry: LockRetry) -> Result<Self, LockError> {
        retry.validate();
        let path = path.into();

        let mut attempt = 0;
        loop {
            match Self::try_create(&path) {
                Ok(lock) => return Ok(lock),
                Err(LockError::Held { owner_pid }) => {
                    if process_exists(owner_pid) {
                        return Err(LockError::Held { owner_pid });
                    }
                    warn!(owner_pid, path = %path.display(), "reclaiming stale lock");
                    remove_ignoring_missing(&path)?;
                }
                Err(err) => return Err(err),
            }

            attempt += 1;
            if attempt >= retry.attempts {
                // The create slot keeps getting taken from under us; report
                // the last observed owner as a held lock.
                let owner_pid = Self::read_token(&path)?.map_or(0, |t| t.owner_pid);
                return Err(LockError::Held { owner_pid });
            }
            std::thread::sleep(retry.backoff);
        }
    }

    /// One exclusive-create attempt.
    ///
    /// A conflicting file is reported as `Held` with whatever owner pid its
    /// token declares; unparseable tokens map to pid 0, which never probes
    /// as alive, so debris from a crash mid-write is reclaimed.
    fn try_create(path: &Path) -> Result<Self, LockError> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                let token = LockToken {
                    owner_pid: std::process::id(),
                    start_time: unix_now_secs(),
                };
                file.write_all(token.encode().as_bytes())?;
                file.sync_all()?;
                Ok(Self {
                    path: path.to_path_buf(),
                    held: true,
                })
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                let owner_pid = Self::read_token(path)?.map_or(0, |t| t.owner_pid);
                Err(LockError::Held { owner_pid })
            }
            Err(err) => Err(LockError::Io(err)),
        }
    }

    /// Reads and parses the current lock token, if the file exists.
    fn read_token(path: &Path) -> Result<Option<LockToken>, LockError> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(LockToken::parse(&contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(LockError::Io(err)),
        }
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the lock by deleting the lock file.
    ///
    /// Idempotent: releasing an already-released lock (or a missing file)
    /// succeeds.
    pub fn release(&mut self) -> Result<(), LockError> {
        if !self.held {
            return Ok(());
        }
        self.held = false;
        remove_ignoring_missing(&self.path)
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        if self.held {
            if let Err(err) = self.release() {
                warn!(path = %self.path.display(), %err, "lock release failed on drop");
            }
        }
    }
}

fn remove_ignoring_missing(path: &Path) -> Result<(), LockError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(LockError::Io(err)),
    }
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// Probes whether a process with `pid` exists.
///
/// Signal 0 performs permission and existence checks without delivering
/// anything. `EPERM` means the pid exists under another user, so it counts
/// as alive. Pid 0 would address our own process group; it is never a valid
/// owner and always reads as dead.
fn process_exists(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    // SAFETY: kill with signal 0 only performs validity checks.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}
