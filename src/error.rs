//! Error taxonomy for the virtual file descriptor layer.
//!
//! This mirrors the kinds described for the layer's failure modes rather
//! than wrapping a single opaque I/O error: callers need to distinguish
//! "the OS fd budget is exhausted" from "the remote endpoint drifted out
//! from under us" in order to decide whether a retry makes sense.

use std::fmt;
use std::io;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure modes of the virtual file descriptor layer.
#[derive(Debug)]
pub enum Error {
    /// No OS file descriptor could be acquired even after evicting every
    /// eligible LRU entry and accounting for allocated descs.
    BudgetExhausted,
    /// A path could not be classified or its remote URI is malformed.
    InvalidPath(String),
    /// A `File` handle is out of range or refers to a free slot.
    ///
    /// This is a programmer error: callers must not retain a `File` past
    /// a `close`/`unlink` of that handle.
    InvalidHandle,
    /// Propagated from the back-end (`ENOSPC`, `EIO`, network errors...).
    BackendIo(io::Error),
    /// A virtually-open slot could not be physically re-opened after
    /// eviction.
    ReopenFailed(io::Error),
    /// After a truncate-and-reopen, or a re-open of a write-append remote
    /// file, `tell` did not match the expected position.
    PositionMismatch { expected: i64, actual: i64 },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BudgetExhausted => {
                write!(f, "no file descriptors available within max_safe_fds")
            }
            Error::InvalidPath(path) => write!(f, "invalid path: {path}"),
            Error::InvalidHandle => write!(f, "file handle is invalid or stale"),
            Error::BackendIo(err) => write!(f, "back-end I/O error: {err}"),
            Error::ReopenFailed(err) => write!(f, "failed to re-open evicted slot: {err}"),
            Error::PositionMismatch { expected, actual } => write!(
                f,
                "position mismatch after reopen: expected {expected}, observed {actual}"
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::BackendIo(err) | Error::ReopenFailed(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::BackendIo(err)
    }
}

impl Error {
    /// `true` if the underlying OS error is `EINTR`.
    pub(crate) fn is_eintr(err: &io::Error) -> bool {
        err.kind() == io::ErrorKind::Interrupted
    }

    /// `true` if the underlying OS error indicates descriptor exhaustion
    /// (`EMFILE`/`ENFILE`).
    pub(crate) fn is_fd_exhaustion(err: &io::Error) -> bool {
        matches!(err.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE))
    }
}
