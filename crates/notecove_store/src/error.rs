//! Error taxonomy for the storage core.
//!
//! Every component funnels its failures through [`StoreError`].
//! Parsers in [`crate::codec`] are the one exception: they embed errors as
//! values in their output rather than returning `Result`, per their
//! contract (see §4.2 / §7 of the design).

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Kind of filesystem failure, attached to [`StoreError::Io`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IoErrorKind {
    /// The path did not exist.
    NotFound,
    /// The operation was denied by filesystem permissions.
    Permission,
    /// The target of a create-only operation already existed.
    Exists,
    /// Any other I/O failure.
    Io,
}

impl IoErrorKind {
    /// Classify a [`std::io::Error`] into one of our coarse kinds.
    pub fn from_io(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => IoErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => IoErrorKind::Permission,
            std::io::ErrorKind::AlreadyExists => IoErrorKind::Exists,
            _ => IoErrorKind::Io,
        }
    }
}

/// Unified error type for storage-core operations.
///
/// Many variants carry a `path` or entity identifier because the
/// [`crate::fs::FileSystem`] abstraction means a bare `std::io::Error`
/// would otherwise lose which path was involved.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A filesystem operation failed.
    #[error("IO error on '{path}': {kind:?}")]
    Io {
        /// Path the operation was performed against.
        path: PathBuf,
        /// Coarse classification of the failure.
        kind: IoErrorKind,
        /// Underlying error, kept for display/logging.
        #[source]
        source: std::io::Error,
    },

    /// Binary log or snapshot framing was invalid.
    ///
    /// Only returned by callers that need a hard failure (e.g. the codec's
    /// plain, non-offset-tracking decoders). The offset-tracking parsers
    /// embed this information in their field list instead of returning it.
    #[error("format error at offset {offset}: {reason}")]
    Format {
        /// Byte offset where the problem was detected.
        offset: usize,
        /// Human-readable description.
        reason: String,
    },

    /// A move record's state was asked to transition somewhere the state
    /// machine graph does not allow.
    #[error("move {move_id} cannot transition from {from} to {to}")]
    InvalidTransition {
        /// The move record's id.
        move_id: uuid::Uuid,
        /// Current state name.
        from: String,
        /// Attempted target state name.
        to: String,
    },

    /// A referenced entity does not exist in the catalog.
    #[error("{entity} '{id}' not found")]
    NotFound {
        /// Kind of entity (e.g. "note", "move", "storage_dir").
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// A condition was violated that should be impossible under correct
    /// operation; the in-flight operation is aborted rather than papered
    /// over.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// The catalog's underlying SQLite database reported an error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// TOML deserialization of a config file failed.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// TOML serialization of a config file failed.
    #[error("config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

/// Result type alias for storage-core operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Wrap a [`std::io::Error`] encountered while operating on `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let kind = IoErrorKind::from_io(&source);
        StoreError::Io {
            path: path.into(),
            kind,
            source,
        }
    }
}

/// A serializable representation of [`StoreError`] for host applications
/// that need to cross an IPC boundary (not used internally).
#[derive(Debug, Clone, Serialize)]
pub struct SerializableError {
    /// Error kind/variant name.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Associated path, if applicable.
    pub path: Option<PathBuf>,
}

impl From<&StoreError> for SerializableError {
    fn from(err: &StoreError) -> Self {
        let kind = match err {
            StoreError::Io { .. } => "Io",
            StoreError::Format { .. } => "Format",
            StoreError::InvalidTransition { .. } => "InvalidTransition",
            StoreError::NotFound { .. } => "NotFound",
            StoreError::InvariantViolation(_) => "InvariantViolation",
            StoreError::Database(_) => "Database",
            StoreError::ConfigParse(_) => "ConfigParse",
            StoreError::ConfigSerialize(_) => "ConfigSerialize",
        }
        .to_string();

        let path = match err {
            StoreError::Io { path, .. } => Some(path.clone()),
            _ => None,
        };

        Self {
            kind,
            message: err.to_string(),
            path,
        }
    }
}

impl From<StoreError> for SerializableError {
    fn from(err: StoreError) -> Self {
        SerializableError::from(&err)
    }
}
