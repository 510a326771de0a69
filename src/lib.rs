// Core infrastructure modules
pub mod config;
pub mod core;

// Consumers of the public pool API
pub mod diagnostics;

pub use crate::config::PoolConfig;
pub use crate::core::db::{
    ConnectTarget, ConnectionFactory, Cursor, DbConnection, Executor, Pool, PoolStatus,
    PooledConnection, QueryOutcome, Row, SqliteFactory, Value,
};
pub use crate::core::{PoolError, Result, TransactionError};

#[cfg(test)]
pub(crate) mod test_utils;
