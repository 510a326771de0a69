/// SQLite Driver Module
///
/// `ConnectionFactory` implementation backed by rusqlite. SQLite has no
/// network endpoint, so `ConnectTarget::database` is treated as the database
/// file path and host, port and credentials are not used.
use crate::core::db::connection::{ConnectTarget, ConnectionFactory, DbConnection};
use crate::core::db::row::{Row, Value};
use crate::core::{PoolError, Result};
use rusqlite::{params_from_iter, Connection, OpenFlags};
use std::time::Duration;
use tracing::debug;

/// How a SQLite transaction takes its locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BeginMode {
    /// Locks are taken lazily on first read/write
    Deferred,
    /// The write lock is taken at `BEGIN`, so concurrent writers queue on the
    /// busy timeout instead of deadlocking on lock upgrade
    #[default]
    Immediate,
}

impl BeginMode {
    fn sql(self) -> &'static str {
        match self {
            BeginMode::Deferred => "BEGIN DEFERRED",
            BeginMode::Immediate => "BEGIN IMMEDIATE",
        }
    }
}

/// Opens SQLite connections.
#[derive(Debug, Clone)]
pub struct SqliteFactory {
    busy_timeout: Duration,
    begin_mode: BeginMode,
    wal: bool,
}

impl Default for SqliteFactory {
    fn default() -> Self {
        SqliteFactory {
            busy_timeout: Duration::from_secs(5),
            begin_mode: BeginMode::default(),
            wal: true,
        }
    }
}

impl SqliteFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn with_begin_mode(mut self, mode: BeginMode) -> Self {
        self.begin_mode = mode;
        self
    }

    /// Turns write-ahead logging on or off for file databases.
    pub fn with_wal(mut self, wal: bool) -> Self {
        self.wal = wal;
        self
    }
}

impl ConnectionFactory for SqliteFactory {
    type Connection = SqliteConnection;

    fn connect(&self, target: &ConnectTarget) -> Result<SqliteConnection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI;
        let conn = Connection::open_with_flags(&target.database, flags)?;

        conn.busy_timeout(self.busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        if self.wal && target.database != ":memory:" {
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            debug!(database = %target.database, journal_mode = %mode, "opened sqlite connection");
        }

        Ok(SqliteConnection {
            conn,
            begin_mode: self.begin_mode,
        })
    }
}

/// A single SQLite session.
#[derive(Debug)]
pub struct SqliteConnection {
    conn: Connection,
    begin_mode: BeginMode,
}

impl SqliteConnection {
    /// Direct access to the underlying rusqlite connection.
    pub fn raw(&self) -> &Connection {
        &self.conn
    }
}

impl DbConnection for SqliteConnection {
    fn begin(&mut self) -> Result<()> {
        self.conn
            .execute_batch(self.begin_mode.sql())
            .map_err(|e| PoolError::Query(format!("Failed to begin transaction: {}", e)))
    }

    fn commit(&mut self) -> Result<()> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| PoolError::Query(format!("Failed to commit transaction: {}", e)))
    }

    fn rollback(&mut self) -> Result<()> {
        // Some statement errors make SQLite roll back on its own.
        if self.conn.is_autocommit() {
            return Ok(());
        }
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|e| PoolError::Release(format!("Failed to roll back transaction: {}", e)))
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize> {
        let mut stmt = self
            .conn
            .prepare_cached(sql)
            .map_err(|e| PoolError::Query(format!("Failed to prepare statement: {}", e)))?;

        // Statements that return rows (SELECT, RETURNING, some PRAGMAs) are
        // stepped to completion; the count is whatever SQLite reports.
        if stmt.column_count() > 0 {
            let mut rows = stmt
                .query(params_from_iter(params.iter()))
                .map_err(|e| PoolError::Query(format!("Statement execution failed: {}", e)))?;
            let mut returned = 0;
            while rows
                .next()
                .map_err(|e| PoolError::Query(format!("Statement execution failed: {}", e)))?
                .is_some()
            {
                returned += 1;
            }
            return Ok(returned);
        }

        stmt.execute(params_from_iter(params.iter()))
            .map_err(|e| PoolError::Query(format!("Statement execution failed: {}", e)))
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut stmt = self
            .conn
            .prepare_cached(sql)
            .map_err(|e| PoolError::Query(format!("Failed to prepare statement: {}", e)))?;

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let column_count = columns.len();
        if column_count == 0 {
            return Err(PoolError::Query(
                "no results to fetch: statement does not return rows".to_string(),
            ));
        }

        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                let mut values = Vec::with_capacity(column_count);
                for i in 0..column_count {
                    values.push(Value::from(row.get_ref(i)?));
                }
                Ok(values)
            })
            .map_err(|e| PoolError::Query(format!("Query execution failed: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| PoolError::Query(format!("Result processing failed: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|values| Row::new(columns.clone(), values))
            .collect())
    }

    fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| PoolError::Release(format!("Failed to close connection: {}", e)))
    }
}
