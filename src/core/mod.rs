/// Core Module
///
/// The connection pool, the unit-of-work executor and the error types they
/// share.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{PoolError, Result, TransactionError};
