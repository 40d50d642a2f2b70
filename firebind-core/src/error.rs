//! Error types for live documents and collections

use thiserror::Error;

/// Errors reported by a [`Backend`](crate::backend::Backend) implementation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The addressed document does not exist
    #[error("Document not found: {0}")]
    NotFound(String),

    /// The caller is not allowed to read or write the target
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The datastore could not be reached
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The request was malformed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Top-level error for document, collection and aggregate operations
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A mode string other than `off`, `on` or `auto`
    #[error("Invalid mode `{0}`, expected one of off, on, auto")]
    InvalidMode(String),

    /// Source mutation on a document owned by a collection
    #[error("Cannot change the source of document `{path}` while it is owned by a collection")]
    Ownership {
        /// Path of the owned document
        path: String,
    },

    /// Fetch or write without a resolvable reference or query
    #[error("No reference or query to operate on")]
    NoReference,

    /// Fetch while a realtime listener is open
    #[error("Cannot fetch while a realtime listener is active")]
    AlreadyActive,

    /// Fetch while another fetch or listen is in flight
    #[error("A fetch is already in progress")]
    FetchInProgress,

    /// Data rejected by the configured schema
    #[error("Invalid value at `{field}` in {type_name} ({id}): {message}")]
    SchemaValidation {
        /// Dotted path of the offending field
        field: String,
        /// Debug name of the document type
        type_name: String,
        /// Id of the document, or `<new>` when it has none yet
        id: String,
        /// Validator message
        message: String,
    },

    /// A path that does not name a collection or document
    #[error("Invalid path `{path}`: {reason}")]
    InvalidPath {
        /// The rejected path
        path: String,
        /// Why it was rejected
        reason: String,
    },

    /// No context passed and no default context registered
    #[error("No default context registered, call Context::install first")]
    NoContext,

    /// Failure reported by the backend
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Result type using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Result type using [`BackendError`]
pub type BackendResult<T> = std::result::Result<T, BackendError>;
