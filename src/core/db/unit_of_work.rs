/// Unit-of-Work Module
///
/// Runs caller code against a pooled connection. `with_connection` only
/// scopes the checkout; `with_transaction` additionally wraps the work in a
/// transaction that is committed when the closure succeeds and rolled back
/// when it fails or panics. In every case the connection goes back to the
/// pool before control returns to the caller.
use crate::core::db::connection::{ConnectionFactory, DbConnection};
use crate::core::db::pool::{Pool, PooledConnection};
use crate::core::db::row::{QueryOutcome, Row, Value};
use crate::core::{PoolError, Result, TransactionError};
use tracing::{debug, debug_span, error, warn};
use uuid::Uuid;

/// States a unit of work moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Idle,
    Acquired,
    Executing,
    Committed,
    Failed,
    RolledBack,
    Released,
}

fn transition(state: &mut UnitState, next: UnitState) {
    let from = *state;
    debug!(from = ?from, to = ?next, "unit of work transition");
    *state = next;
}

/// Statement context handed to transactional closures.
///
/// Tracks the affected-row count of the last statement, like a DB-API
/// cursor. Once closed, every operation fails.
pub struct Cursor<'c, C: DbConnection> {
    conn: &'c mut C,
    rowcount: i64,
    closed: bool,
}

impl<'c, C: DbConnection> Cursor<'c, C> {
    pub fn new(conn: &'c mut C) -> Self {
        Cursor {
            conn,
            rowcount: -1,
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(PoolError::Query("cursor is closed".to_string()));
        }
        Ok(())
    }

    /// Runs a statement and returns the number of affected rows.
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize> {
        self.ensure_open()?;
        let affected = self.conn.execute(sql, params).map_err(as_query_error)?;
        self.rowcount = affected as i64;
        Ok(affected)
    }

    /// Runs a statement and fetches every row.
    pub fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.ensure_open()?;
        let rows = self.conn.query(sql, params).map_err(as_query_error)?;
        self.rowcount = rows.len() as i64;
        Ok(rows)
    }

    /// Runs the same statement once per parameter set. Returns the total
    /// number of affected rows. Stops at the first failure.
    pub fn execute_many<P>(&mut self, sql: &str, param_sets: &[P]) -> Result<usize>
    where
        P: AsRef<[Value]>,
    {
        self.ensure_open()?;
        let mut total = 0;
        for (index, params) in param_sets.iter().enumerate() {
            total += self.conn.execute(sql, params.as_ref()).map_err(|e| match e {
                PoolError::Query(msg) => {
                    PoolError::Query(format!("parameter set {}: {}", index, msg))
                }
                other => as_query_error(other),
            })?;
        }
        self.rowcount = total as i64;
        Ok(total)
    }

    /// Affected-row count of the last statement, `-1` before the first one.
    pub fn rowcount(&self) -> i64 {
        self.rowcount
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

fn as_query_error(err: PoolError) -> PoolError {
    match err {
        PoolError::Query(_) => err,
        other => PoolError::Query(other.to_string()),
    }
}

/// Holds the connection while a transaction is open. If dropped before the
/// transaction was finished (a panic in caller code), it rolls back; a
/// connection that cannot be rolled back is not reused.
struct TransactionScope<F: ConnectionFactory> {
    conn: PooledConnection<F>,
    finished: bool,
}

impl<F: ConnectionFactory> TransactionScope<F> {
    fn rollback(&mut self) -> Option<PoolError> {
        self.finished = true;
        match self.conn.rollback() {
            Ok(()) => None,
            Err(e) => {
                self.conn.mark_broken();
                error!(error = %e, "rollback failed, discarding connection");
                Some(match e {
                    PoolError::Release(_) => e,
                    other => PoolError::Release(other.to_string()),
                })
            }
        }
    }
}

impl<F: ConnectionFactory> Drop for TransactionScope<F> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("unit of work aborted, rolling back");
            let _ = self.rollback();
        }
    }
}

/// Runs units of work against a pool.
pub struct Executor<F: ConnectionFactory> {
    pool: Pool<F>,
}

impl<F: ConnectionFactory> Clone for Executor<F> {
    fn clone(&self) -> Self {
        Executor {
            pool: self.pool.clone(),
        }
    }
}

impl<F: ConnectionFactory> Executor<F> {
    pub fn new(pool: Pool<F>) -> Self {
        Executor { pool }
    }

    pub fn pool(&self) -> &Pool<F> {
        &self.pool
    }

    /// Checks out a connection for the duration of `f`. No transaction is
    /// opened; the connection is returned however `f` exits.
    pub fn with_connection<T, Func>(&self, f: Func) -> Result<T>
    where
        Func: FnOnce(&mut F::Connection) -> Result<T>,
    {
        let mut conn = self.pool.acquire()?;
        f(&mut *conn)
    }

    /// Runs `f` inside a transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back when it returns `Err` or
    /// panics. The error in `TransactionError::error` is always the one that
    /// aborted the unit of work; a rollback failure is attached as
    /// `release_error` instead of replacing it.
    pub fn with_transaction<T, Func>(&self, f: Func) -> std::result::Result<T, TransactionError>
    where
        Func: FnOnce(&mut Cursor<'_, F::Connection>) -> Result<T>,
    {
        let span = debug_span!("unit_of_work", id = %Uuid::new_v4());
        let _entered = span.enter();

        let mut state = UnitState::Idle;
        let mut conn = self.pool.acquire()?;
        transition(&mut state, UnitState::Acquired);

        if let Err(e) = conn.begin() {
            // A session that cannot start a transaction is not reused.
            conn.mark_broken();
            error!(error = %e, "failed to begin transaction, discarding connection");
            return Err(e.into());
        }
        let mut scope = TransactionScope {
            conn,
            finished: false,
        };
        transition(&mut state, UnitState::Executing);

        let result = {
            let mut cursor = Cursor::new(&mut *scope.conn);
            let result = f(&mut cursor);
            cursor.close();
            result
        };

        let outcome = match result {
            Ok(value) => match scope.conn.commit() {
                Ok(()) => {
                    scope.finished = true;
                    transition(&mut state, UnitState::Committed);
                    Ok(value)
                }
                Err(e) => {
                    transition(&mut state, UnitState::Failed);
                    let release_error = scope.rollback();
                    if release_error.is_none() {
                        transition(&mut state, UnitState::RolledBack);
                    }
                    Err(TransactionError::with_release_error(e, release_error))
                }
            },
            Err(e) => {
                transition(&mut state, UnitState::Failed);
                error!(error = %e, "database error, rolling back");
                let release_error = scope.rollback();
                if release_error.is_none() {
                    transition(&mut state, UnitState::RolledBack);
                }
                Err(TransactionError::with_release_error(e, release_error))
            }
        };

        drop(scope);
        transition(&mut state, UnitState::Released);
        outcome
    }

    /// Runs one statement in its own transaction. With `fetch` the rows are
    /// returned, otherwise the affected-row count.
    pub fn execute_query(&self, sql: &str, params: &[Value], fetch: bool) -> Result<QueryOutcome> {
        self.with_transaction(|cursor| {
            if fetch {
                cursor.query(sql, params).map(QueryOutcome::Rows)
            } else {
                cursor.execute(sql, params).map(QueryOutcome::RowCount)
            }
        })
        .map_err(PoolError::from)
    }

    /// `execute_query` with `fetch = true`.
    pub fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.with_transaction(|cursor| cursor.query(sql, params))
            .map_err(PoolError::from)
    }

    /// `execute_query` with `fetch = false`.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        self.with_transaction(|cursor| cursor.execute(sql, params))
            .map_err(PoolError::from)
    }

    /// Runs `sql` once per parameter set in a single transaction: either
    /// every set takes effect or none does.
    pub fn execute_batch<P>(&self, sql: &str, param_sets: &[P]) -> Result<usize>
    where
        P: AsRef<[Value]>,
    {
        self.with_transaction(|cursor| cursor.execute_many(sql, param_sets))
            .map_err(PoolError::from)
    }

    /// Checks a connection out and pings it.
    pub fn ping(&self) -> Result<()> {
        self.with_connection(|conn| conn.ping())
    }

    pub fn close_all(&self) {
        self.pool.close_all();
    }
}
