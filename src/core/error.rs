/// Error Module
///
/// This module defines the error types shared by the pool, the unit-of-work
/// executor and the drivers behind them.
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Error type for every pool and unit-of-work operation.
///
/// The variants fall into four groups:
/// - Startup failures (`Initialization`, `Config`)
/// - Acquisition failures (`PoolExhausted`, `NotInitialized`, `PoolClosed`)
/// - Statement failures (`Query`), always raised after a rollback
/// - Release-path failures (`Release`), logged and never allowed to replace
///   a primary error
#[derive(Error, Debug)]
pub enum PoolError {
    /// The pool could not open its minimum connections or the config is unusable
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// No connection became available before the acquire deadline
    #[error("Pool exhausted: no connection available after {0:?}")]
    PoolExhausted(Duration),

    /// `acquire` was called before `initialize`
    #[error("Pool has not been initialized")]
    NotInitialized,

    /// `acquire` was called after `close_all`
    #[error("Pool is closed")]
    PoolClosed,

    /// A statement failed inside the driver
    #[error("Query error: {0}")]
    Query(String),

    /// Closing a cursor, rolling back or closing a connection failed
    #[error("Release error: {0}")]
    Release(String),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors coming straight from SQLite
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The pool bookkeeping lock was poisoned by a panicking thread
    #[error("Pool state lock poisoned")]
    Poisoned,
}

impl PoolError {
    /// Returns true for errors a caller may reasonably retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, PoolError::PoolExhausted(_))
    }
}

/// Type alias for Result to use PoolError as the error type.
pub type Result<T> = std::result::Result<T, PoolError>;

/// Failure of a unit of work.
///
/// `error` is the failure that aborted the unit of work and is what callers
/// should act on. `release_error` holds a failure hit while unwinding
/// (closing the cursor or rolling back), if any.
#[derive(Debug)]
pub struct TransactionError {
    pub error: PoolError,
    pub release_error: Option<PoolError>,
}

impl TransactionError {
    pub fn new(error: PoolError) -> Self {
        TransactionError {
            error,
            release_error: None,
        }
    }

    pub fn with_release_error(error: PoolError, release_error: Option<PoolError>) -> Self {
        TransactionError {
            error,
            release_error,
        }
    }

    /// Discards the release-path context and returns the primary error.
    pub fn into_inner(self) -> PoolError {
        self.error
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if let Some(release) = &self.release_error {
            write!(f, " (while unwinding: {})", release)?;
        }
        Ok(())
    }
}

impl std::error::Error for TransactionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<PoolError> for TransactionError {
    fn from(error: PoolError) -> Self {
        TransactionError::new(error)
    }
}

impl From<TransactionError> for PoolError {
    fn from(err: TransactionError) -> Self {
        err.error
    }
}
