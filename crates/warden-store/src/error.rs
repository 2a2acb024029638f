//! Error types for the warden-store crate.
//!
//! All storage operations return [`StoreError`] via [`StoreResult`].
//! A missing document is not an error (loads return `Option`), and neither
//! is a write conflict (stores return [`crate::WriteOutcome`]).

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A schema migration failed.
    #[error("migration v{version} failed: {message}")]
    Migration { version: u32, message: String },

    /// A document id references a collection that is not registered.
    #[error("unknown collection: {collection}")]
    UnknownCollection { collection: String },

    /// A collection was registered twice.
    #[error("collection registered twice: {collection}")]
    DuplicateCollection { collection: String },

    /// A document id could not be decoded.
    #[error("malformed document id `{id}`: {reason}")]
    MalformedId { id: String, reason: &'static str },

    /// A key part is empty or contains the id separator.
    #[error("invalid key part {name}={value:?}")]
    InvalidKeyPart { name: String, value: String },

    /// A model did not carry one of its collection's id fields.
    #[error("{collection} document is missing key part `{name}`")]
    MissingKeyPart {
        collection: &'static str,
        name: &'static str,
    },

    /// A document was decoded into a model of another collection.
    #[error("expected a {expected} document, found {found}")]
    CollectionMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// A query pattern failed to compile.
    #[error("invalid query pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// An invalid argument was provided to a store operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A backend call failed (timeout, dropped connection, bad response).
    #[error("{operation} failed for {target}: {message}")]
    Backend {
        operation: &'static str,
        target: String,
        message: String,
    },

    /// A record could not be converted to or from a backend's wire format.
    #[error("{backend} encoding failed: {message}")]
    Encoding {
        backend: &'static str,
        message: String,
    },

    /// A session was requested before the adapter was started.
    #[error("{backend} adapter has not been started")]
    NotStarted { backend: &'static str },

    /// Configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}

impl StoreError {
    /// Build a [`StoreError::Backend`] and log it with its context.
    pub(crate) fn backend(
        operation: &'static str,
        target: impl Into<String>,
        err: impl std::fmt::Display,
    ) -> Self {
        let target = target.into();
        let message = err.to_string();
        tracing::warn!(operation, target = %target, error = %message, "backend call failed");
        Self::Backend {
            operation,
            target,
            message,
        }
    }
}
