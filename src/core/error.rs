//! Gateway Error Module
//!
//! Error types shared by the gateway, pooled sessions, configuration loading
//! and the CLI. Connection failures, statement failures and caller mistakes
//! (wrong parameter counts) are kept apart so callers can match on them
//! instead of guessing from an empty result.

use std::time::Duration;
use thiserror::Error;

/// Error type for every fallible operation in portal-db.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Establishing the connection failed; carries the driver message
    #[error("Database connection error: {0}")]
    Connection(String),

    /// An operation was attempted on a gateway whose connection never opened
    #[error("Database connection is not available")]
    NotConnected,

    /// The driver rejected or failed a statement (syntax, constraints, I/O)
    #[error("Query error: {0}")]
    Query(String),

    /// The number of supplied parameters does not match the placeholders
    #[error("Query error: statement expects {expected} parameter(s), {supplied} supplied")]
    ParameterCount { expected: usize, supplied: usize },

    /// A named parameter has no matching placeholder in the statement
    #[error("Query error: unknown parameter name '{0}'")]
    UnknownParameter(String),

    /// Two named parameters resolve to the same placeholder
    #[error("Query error: parameter '{0}' is bound more than once")]
    DuplicateParameter(String),

    /// The statement deadline elapsed and the statement was interrupted
    #[error("Query error: statement exceeded its deadline of {0:?}")]
    TimedOut(Duration),

    /// The statement was cancelled through a `QueryCanceller`
    #[error("Query error: statement was interrupted")]
    Interrupted,

    /// Building the pool or checking out a connection failed
    #[error("Pool error: {0}")]
    Pool(String),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for GatewayError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref failure, _)
                if failure.code == rusqlite::ErrorCode::OperationInterrupted =>
            {
                GatewayError::Interrupted
            }
            other => GatewayError::Query(other.to_string()),
        }
    }
}

impl From<r2d2::Error> for GatewayError {
    fn from(err: r2d2::Error) -> Self {
        GatewayError::Pool(err.to_string())
    }
}

/// Type alias for Result to use GatewayError as the error type.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let conn_err = GatewayError::Connection("unable to open database file".to_string());
        assert!(conn_err.to_string().contains("Database connection error"));

        let count_err = GatewayError::ParameterCount { expected: 2, supplied: 1 };
        assert_eq!(
            count_err.to_string(),
            "Query error: statement expects 2 parameter(s), 1 supplied"
        );

        let config_err = GatewayError::Config("missing [database] table".to_string());
        assert!(config_err.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_driver_error_conversion() {
        let err: GatewayError = rusqlite::Error::QueryReturnedNoRows.into();
        match err {
            GatewayError::Query(msg) => assert!(msg.contains("no rows")),
            other => panic!("Expected Query error, got {other:?}"),
        }

        let interrupted = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_INTERRUPT),
            None,
        );
        assert!(matches!(GatewayError::from(interrupted), GatewayError::Interrupted));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: GatewayError = io_err.into();
        match err {
            GatewayError::Io(_) => {}
            _ => panic!("Expected IO error"),
        }
    }
}
