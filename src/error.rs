/*!
 * Error types for orbit-vfs
 */

use std::io;
use thiserror::Error;

use crate::vfs::File;

/// Result type alias for all VFS operations
pub type VfsResult<T> = std::result::Result<T, VfsError>;

/// Unified error type for VFS operations
///
/// Backend-specific failures are translated into this taxonomy at the
/// File/Location boundary. `NotFound` is kept distinct so callers can build
/// create-if-absent logic on top of it.
#[derive(Error, Debug)]
pub enum VfsError {
    /// Object does not exist in the container
    #[error("Object not found: {container}/{key}")]
    NotFound { container: String, key: String },

    /// Container (bucket, volume) does not exist
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    /// Malformed path argument, detected before any remote call
    #[error("Invalid path {path:?}: {reason}")]
    Validation { path: String, reason: String },

    /// Operation refused because local state does not allow it
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// Any other backend failure (network, permission, quota)
    #[error("Remote error on {backend}: {message}")]
    Remote {
        backend: String,
        message: String,
        retryable: bool,
    },

    /// Spill file and remote stream accepted different byte counts
    #[error("Write paths diverged: local spill accepted {local} bytes, remote stream accepted {remote}")]
    InternalInconsistency { local: usize, remote: usize },

    /// Seek would move the cursor before the start of the file
    #[error("Invalid seek to negative position {0}")]
    InvalidSeek(i128),

    /// An in-flight upload was abandoned before completion
    #[error("Upload cancelled")]
    Cancelled,

    /// Local I/O error (spill file, local disk backend)
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// No file system registered for a URI scheme
    #[error("No file system registered for scheme '{0}'")]
    UnknownScheme(String),

    /// Backend does not implement the operation
    #[error("Operation '{operation}' not supported by backend {backend}")]
    Unsupported { backend: String, operation: String },

    /// Copy succeeded but the source could not be removed afterwards
    ///
    /// `file` is the destination when the move created it (move to a
    /// location); see [`VfsError::into_moved_file`].
    #[error("Moved to {destination} but failed to remove source: {source}")]
    MovePartial {
        destination: String,
        #[source]
        source: Box<VfsError>,
        file: Option<Box<dyn File>>,
    },

    /// Both the commit and the spill-file cleanup failed during close
    #[error("Close failed: {commit} (cleanup also failed: {cleanup})")]
    CloseFailed {
        commit: Box<VfsError>,
        cleanup: Box<VfsError>,
    },

    /// Object still not observable after a bounded existence poll
    #[error("{uri} not visible after {attempts} attempts")]
    NotVisible { uri: String, attempts: u32 },
}

impl VfsError {
    /// Build a not-found error for an object
    pub fn not_found(container: impl Into<String>, key: impl Into<String>) -> Self {
        VfsError::NotFound {
            container: container.into(),
            key: key.into(),
        }
    }

    /// Build a validation error for a path argument
    pub fn validation(path: impl Into<String>, reason: impl Into<String>) -> Self {
        VfsError::Validation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Build a remote error, classifying retryability from the message
    pub fn remote(backend: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let retryable = is_transient_message(&message);
        VfsError::Remote {
            backend: backend.into(),
            message,
            retryable,
        }
    }

    /// Check if this error indicates the object or container was not found
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            VfsError::NotFound { .. } | VfsError::ContainerNotFound(_)
        )
    }

    /// Check if this error is transient and worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            VfsError::Remote { retryable, .. } => *retryable,
            VfsError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }

    /// Destination file of a partially completed move, if the move made one
    pub fn into_moved_file(self) -> Option<Box<dyn File>> {
        match self {
            VfsError::MovePartial { file, .. } => file,
            _ => None,
        }
    }

    /// Check if this error is fatal (must never be retried)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VfsError::Validation { .. }
                | VfsError::PreconditionFailed(_)
                | VfsError::InternalInconsistency { .. }
                | VfsError::InvalidSeek(_)
                | VfsError::Config(_)
        )
    }
}

fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("connection reset")
        || lower.contains("timed out")
        || lower.contains("broken pipe")
        || lower.contains("connection refused")
        || lower.contains("temporarily unavailable")
        || lower.contains("slowdown")
        || lower.contains("503")
}

impl From<io::Error> for VfsError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => VfsError::NotFound {
                container: String::new(),
                key: err.to_string(),
            },
            _ => VfsError::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_not_retryable() {
        let err = VfsError::not_found("bucket", "some/key.txt");
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Object not found: bucket/some/key.txt");
    }

    #[test]
    fn test_remote_classification() {
        assert!(VfsError::remote("s3", "connection reset by peer").is_retryable());
        assert!(VfsError::remote("gcs", "Operation timed out").is_retryable());
        assert!(!VfsError::remote("s3", "AccessDenied").is_retryable());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(VfsError::validation("a/", "trailing slash").is_fatal());
        assert!(VfsError::PreconditionFailed("cursor".into()).is_fatal());
        assert!(VfsError::InternalInconsistency { local: 4, remote: 2 }.is_fatal());
        assert!(!VfsError::remote("s3", "boom").is_fatal());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: VfsError = io_err.into();
        assert!(err.is_not_found());

        let io_err = io::Error::new(io::ErrorKind::TimedOut, "slow disk");
        let err: VfsError = io_err.into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_move_partial_display() {
        let err = VfsError::MovePartial {
            destination: "mem://b/dst.txt".to_string(),
            source: Box::new(VfsError::remote("mem", "denied")),
            file: None,
        };
        assert!(err.to_string().starts_with("Moved to mem://b/dst.txt"));
        assert!(err.into_moved_file().is_none());
    }
}
