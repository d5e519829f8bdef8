//! Error types for Tunedeck core operations.
//!
//! Errors are grouped by domain ([`ScanError`], [`RemoteError`],
//! [`DownloadError`], [`StorageError`]) and wrapped by the top-level [`Error`].
//! Callers that only need to decide *how* to react (skip, retry, tell the
//! user, stay silent) use [`Error::kind`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an error, used for propagation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Filesystem access refused.
    PermissionDenied,
    /// A single file could not be read or written.
    Io,
    /// No resolvable audio stream after retries.
    StreamUnavailable,
    /// A network call or transfer failed.
    Network,
    /// The user cancelled the operation.
    Cancelled,
    /// A catalog transaction failed.
    Storage,
    /// Invalid configuration.
    Configuration,
}

/// Errors raised while scanning local directories.
#[derive(Debug, Error)]
pub enum ScanError {
    /// None of the configured roots could be read.
    #[error("No readable library directory among {attempted} configured roots")]
    NoReadableRoots {
        /// Number of roots that were attempted.
        attempted: usize,
    },

    /// The duration of a file could not be determined.
    #[error("Could not probe duration of {path}: {reason}")]
    ProbeFailed {
        /// File that was probed.
        path: PathBuf,
        /// Cause reported by the prober.
        reason: String,
    },

    /// A file could not be read while walking a directory.
    #[error("Unreadable file {path}: {reason}")]
    UnreadableFile {
        /// File that failed.
        path: PathBuf,
        /// Underlying cause.
        reason: String,
    },
}

/// Errors raised while talking to the remote platform.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// A search request failed.
    #[error("Search for '{query}' failed: {reason}")]
    SearchFailed {
        /// The query text.
        query: String,
        /// Underlying cause.
        reason: String,
    },

    /// Looking up metadata for a single item failed.
    #[error("Could not fetch details for {remote_id}: {reason}")]
    DetailsFailed {
        /// The remote identifier.
        remote_id: String,
        /// Underlying cause.
        reason: String,
    },

    /// Fetching the stream manifest failed.
    #[error("Could not fetch stream manifest for {remote_id}: {reason}")]
    ManifestFailed {
        /// The remote identifier.
        remote_id: String,
        /// Underlying cause.
        reason: String,
    },

    /// No usable stream after all attempts.
    #[error("No audio stream available for {remote_id} after {attempts} attempts: {reason}")]
    StreamUnavailable {
        /// The remote identifier.
        remote_id: String,
        /// Number of manifest fetch attempts made.
        attempts: u32,
        /// Cause of the last failure.
        reason: String,
    },
}

/// Errors raised by the download transfer itself.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The server answered with a non-success status.
    #[error("Transfer from {url} failed with HTTP status {status}")]
    HttpStatus {
        /// The stream URL.
        url: String,
        /// The status code received.
        status: u16,
    },

    /// The stream broke off mid-transfer.
    #[error("Transfer of {remote_id} interrupted: {reason}")]
    Interrupted {
        /// The remote identifier.
        remote_id: String,
        /// Underlying cause.
        reason: String,
    },

    /// Writing the temporary file failed.
    #[error("Failed to write {path}: {reason}")]
    WriteFailed {
        /// The file being written.
        path: PathBuf,
        /// Underlying cause.
        reason: String,
    },

    /// Renaming the temporary file into place failed.
    #[error("Failed to commit {from} to {to}: {reason}")]
    CommitFailed {
        /// Temporary file.
        from: PathBuf,
        /// Final destination.
        to: PathBuf,
        /// Underlying cause.
        reason: String,
    },

    /// Another running job is writing to the same final file.
    #[error("Destination {path} is in use by the download of {holder}")]
    DestinationBusy {
        /// Final path without extension.
        path: PathBuf,
        /// Remote identifier holding the destination.
        holder: String,
    },

    /// A title produced an empty file name after sanitizing.
    #[error("Cannot derive a file name for {remote_id}")]
    UnnamedTrack {
        /// The remote identifier.
        remote_id: String,
    },
}

/// Errors raised by the catalog store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A per-track transaction failed and was rolled back.
    #[error("Catalog transaction for '{track}' failed: {source}")]
    Transaction {
        /// Locator or title of the offending track.
        track: String,
        /// Database error.
        #[source]
        source: sqlx::Error,
    },

    /// A read or maintenance query failed.
    #[error("Catalog query '{operation}' failed: {source}")]
    Query {
        /// Name of the operation.
        operation: &'static str,
        /// Database error.
        #[source]
        source: sqlx::Error,
    },

    /// Opening the database or applying the schema failed.
    #[error("Catalog could not be opened: {0}")]
    Open(String),

    /// A track failed validation before any write.
    #[error("Track '{track}' rejected: {reason}")]
    InvalidTrack {
        /// Locator or title of the rejected track.
        track: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A referenced track does not exist.
    #[error("Track {0} not found")]
    TrackNotFound(i64),
}

/// Errors that can occur in Tunedeck core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Filesystem access was refused by the permission collaborator.
    #[error("Permission denied: {scope}")]
    PermissionDenied {
        /// What access was requested.
        scope: String,
    },

    /// The operation was cancelled by the user.
    #[error("Operation cancelled")]
    Cancelled,

    /// Scan error.
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// Remote platform error.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Download transfer error.
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Catalog error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// IO error on a specific path.
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path where the error occurred.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Wrap an IO error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Scan(_) | Self::Io { .. } => ErrorKind::Io,
            Self::Remote(RemoteError::StreamUnavailable { .. }) => ErrorKind::StreamUnavailable,
            Self::Remote(_) => ErrorKind::Network,
            Self::Download(DownloadError::HttpStatus { .. } | DownloadError::Interrupted { .. }) => {
                ErrorKind::Network
            }
            Self::Download(_) => ErrorKind::Io,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Configuration(_) | Self::Serialization(_) => ErrorKind::Configuration,
        }
    }

    /// Whether the caller may reasonably offer a "retry" action.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Network | ErrorKind::StreamUnavailable | ErrorKind::Storage
        )
    }

    /// Whether this is a user-requested cancellation rather than a failure.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Human readable cause suitable for showing to the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::PermissionDenied => {
                "Storage access was denied. Grant access to your music folders and try again."
                    .to_string()
            }
            ErrorKind::StreamUnavailable => {
                "No playable audio stream was found for this item.".to_string()
            }
            ErrorKind::Network => format!("Network problem: {self}. Check your connection and retry."),
            ErrorKind::Cancelled => "Cancelled.".to_string(),
            ErrorKind::Io | ErrorKind::Storage | ErrorKind::Configuration => self.to_string(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::new(),
            source,
        }
    }
}
