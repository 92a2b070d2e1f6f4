use std::path::PathBuf;
use thiserror::Error;

/// Error kinds surfaced by the table engine coordinator.
///
/// Filesystem and pool-contention errors are surfaced, never retried
/// at this layer — callers decide what to do with them.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// A pool operation could not proceed because the named entry is
    /// busy or administratively locked.
    #[error("entry unavailable for table '{0}'")]
    EntryUnavailable(String),

    /// A `get` found the entry administratively locked.
    #[error("entry locked for table '{0}'")]
    EntryLocked(String),

    /// A versioned reader request found a different metadata version.
    #[error("reader out of date for table '{0}': requested version {requested}, found {found}")]
    ReaderOutOfDate {
        table: String,
        requested: u32,
        found: u32,
    },

    /// A filesystem or persistent-state error, with OS errno and the
    /// path it happened on attached.
    #[error("cairo error on '{path}': {message} (errno {errno})")]
    CairoError {
        errno: i32,
        message: String,
        path: PathBuf,
    },

    /// Write permission denied by the security context.
    #[error("security violation: {0}")]
    SecurityViolation(String),

    /// Ambient I/O error conversion for calls through the vfs trait.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for small internal invariant failures that don't
    /// merit a dedicated variant.
    #[error("internal error: {0}")]
    Other(String),
}

impl CoordinatorError {
    pub fn cairo(errno: i32, message: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        CoordinatorError::CairoError {
            errno,
            message: message.into(),
            path: path.into(),
        }
    }

    /// Build a `CairoError` from the current `errno` (`*__error()` on
    /// unix), attaching the path the syscall failed on.
    pub fn from_errno(message: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let errno = std::io::Error::last_os_error()
            .raw_os_error()
            .unwrap_or(-1);
        Self::cairo(errno, message, path)
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
