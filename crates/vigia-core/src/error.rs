//! Error types for vigia-core.
//!
//! Every public operation returns [`Result`]; nothing panics and nothing
//! aborts the host process.

use std::io;
use std::path::PathBuf;

use crate::types::ResultCode;

/// Result type alias for diagnostics operations.
pub type Result<T> = std::result::Result<T, DiagError>;

/// Error type for diagnostics operations.
///
/// One variant per result-code class; see [`DiagError::code`].
#[derive(Debug, thiserror::Error)]
pub enum DiagError {
    /// Duplicate or concurrent init/teardown, or the context is not active.
    #[error("diagnostics context is busy or already in the requested state")]
    AlreadyActive,

    /// Invalid enum value, directory or configuration.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The log or dump file could not be created.
    #[error("file error on {}: {source}", path.display())]
    File {
        /// Path that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Locking, queue or signal failure.
    #[error("synchronization error: {0}")]
    Sync(String),

    /// The dump worker thread could not be started.
    #[error("failed to start dump worker: {0}")]
    WorkerStart(#[source] io::Error),

    /// Formatting or write failure.
    #[error("{0}")]
    Other(String),
}

impl DiagError {
    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Creates a synchronization error.
    #[must_use]
    pub fn sync(msg: impl Into<String>) -> Self {
        Self::Sync(msg.into())
    }

    /// Creates a file error.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::File {
            path: path.into(),
            source,
        }
    }

    /// Creates an uncategorized error.
    #[must_use]
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Numeric result code for this error.
    #[must_use]
    pub const fn code(&self) -> ResultCode {
        match self {
            Self::AlreadyActive => ResultCode::AlreadyActive,
            Self::InvalidArgument(_) => ResultCode::InvalidArgument,
            Self::File { .. } => ResultCode::FileError,
            Self::Sync(_) => ResultCode::SyncError,
            Self::WorkerStart(_) => ResultCode::WorkerStartError,
            Self::Other(_) => ResultCode::Other,
        }
    }

    /// Returns true for duplicate init/teardown.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::AlreadyActive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DiagError::invalid_argument("no such directory: /nope");
        assert_eq!(err.to_string(), "invalid argument: no such directory: /nope");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(DiagError::AlreadyActive.code(), ResultCode::AlreadyActive);
        assert_eq!(DiagError::sync("x").code(), ResultCode::SyncError);
        assert_eq!(DiagError::other("x").code(), ResultCode::Other);
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(DiagError::file("/tmp/x", io_err).code(), ResultCode::FileError);
        let io_err = io::Error::new(io::ErrorKind::WouldBlock, "no threads");
        assert_eq!(DiagError::WorkerStart(io_err).code(), ResultCode::WorkerStartError);
    }

    #[test]
    fn test_error_classification() {
        assert!(DiagError::AlreadyActive.is_duplicate());
        assert!(!DiagError::sync("lock").is_duplicate());
    }

    #[test]
    fn test_file_error_mentions_path() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "gone");
        let err = DiagError::file("/var/log/pid1_x.LOG", io_err);
        assert!(err.to_string().contains("/var/log/pid1_x.LOG"));
        assert!(err.to_string().contains("gone"));
    }
}
