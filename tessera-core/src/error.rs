//! Error types for tessera operations

use crate::identity::Operation;
use thiserror::Error;

/// Errors reported by a backing document store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Document not found: {path}")]
    NotFound { path: String },

    #[error("Permission denied on {path}")]
    PermissionDenied { path: String },

    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Invalid query: {reason}")]
    InvalidQuery { reason: String },

    #[error("Internal store error: {reason}")]
    Internal { reason: String },
}

/// Errors raised by data operations (write, delete, build...).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OperationError {
    #[error("{operation} rejected: data is not tracked by the cache")]
    OutOfScope { operation: Operation },

    #[error("Target is not bound to a live entry")]
    UnknownTarget,

    #[error("Sub-collection {sub} is not configured for this document")]
    UnknownSubCollection { sub: String },

    #[error("Entry is not bound to a collection")]
    NotACollection,

    #[error("Entry was closed before the operation settled")]
    Closed,
}

/// Pagination and streaming window errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("No next page available")]
    NoNextPage,

    #[error("No previous page available")]
    NoPreviousPage,

    #[error("Stream has no more results")]
    NoMoreResults,
}

/// Programmer errors detected while binding or configuring an entry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SetupError {
    #[error("Document entries cannot be paginated")]
    NotPaginated,

    #[error("Entry is not a stream")]
    NotStreaming,

    #[error("Streaming requires a query source")]
    StreamRequiresQuery,

    #[error("Streaming requires a positive initial window")]
    StreamRequiresInitial,

    #[error("Streaming requires a positive page size")]
    StreamRequiresMore,

    #[error("Unknown options definition: {name}")]
    UnknownDefinition { name: String },

    #[error("Instance is not registered with this engine")]
    UnknownInstance,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all tessera errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TesseraError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Operation error: {0}")]
    Operation(#[from] OperationError),

    #[error("Window error: {0}")]
    Window(#[from] WindowError),

    #[error("Setup error: {0}")]
    Setup(#[from] SetupError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for tessera operations.
pub type TesseraResult<T> = Result<T, TesseraError>;

/// Result type alias for store calls.
pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_not_found() {
        let err = StoreError::NotFound {
            path: "posts/1".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("not found"));
        assert!(msg.contains("posts/1"));
    }

    #[test]
    fn test_out_of_scope_names_operation() {
        let err = OperationError::OutOfScope {
            operation: Operation::Write,
        };
        assert!(err.to_string().starts_with("write rejected"));
    }

    #[test]
    fn test_master_error_from_variants() {
        let err: TesseraError = WindowError::NoMoreResults.into();
        assert!(matches!(err, TesseraError::Window(WindowError::NoMoreResults)));

        let err: TesseraError = SetupError::UnknownDefinition {
            name: "post".to_string(),
        }
        .into();
        assert!(err.to_string().contains("post"));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidValue {
            field: "stream_initial".to_string(),
            value: "0".to_string(),
            reason: "must be greater than 0".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("stream_initial"));
        assert!(msg.contains("must be greater than 0"));
    }
}
