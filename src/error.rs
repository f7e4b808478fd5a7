//! Error types.
//!
//! [`FsError`] covers lookups in the archive filesystem view and is
//! recoverable per request. [`ServeError`] is the fatal taxonomy of a
//! serve run: every variant ends the run with a nonzero exit.

use std::net::SocketAddr;

use thiserror::Error;

use crate::zip::CompressionMethod;

/// Errors raised by the archive filesystem view.
#[derive(Debug, Error)]
pub enum FsError {
    /// No entry exists at the path.
    #[error("{0}: no such file or directory")]
    NotFound(String),

    /// The path names a file where a directory is required.
    #[error("{0}: not a directory")]
    NotDirectory(String),

    /// The path names a directory where a file is required.
    #[error("{0}: is a directory")]
    IsDirectory(String),

    /// The archive handle backing the view has been released.
    #[error("archive is closed")]
    Closed,

    /// The entry uses a feature this reader does not implement.
    #[error("{path}: unsupported entry ({reason})")]
    Unsupported { path: String, reason: String },

    /// Reading the entry's bytes from the archive source failed.
    #[error("{path}: read failed: {reason:#}")]
    Read { path: String, reason: anyhow::Error },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_))
    }

    pub(crate) fn unsupported_method(path: &str, method: CompressionMethod) -> Self {
        FsError::Unsupported {
            path: path.to_string(),
            reason: format!("compression method {}", method.as_u16()),
        }
    }
}

/// Fatal errors of a serve run.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The archive is missing, unreadable or not a ZIP file.
    #[error("failed to open archive {location}: {reason:#}")]
    ArchiveOpen {
        location: String,
        reason: anyhow::Error,
    },

    /// The directory to serve does not exist or is not a directory.
    #[error("directory {0} not found or is not a directory in archive")]
    RootNotDirectory(String),

    /// Walking the archive tree to find the marker file failed.
    #[error("failed to walk archive: {0}")]
    Traversal(#[source] FsError),

    /// The listener could not be bound.
    #[error("failed to listen on {addr}: {source}")]
    ListenerBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The listener failed after it started serving.
    #[error("server error on {addr}: {source}")]
    Listener {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}
