/// # Test Utilities Module
///
/// Shared fixtures for the unit tests:
/// - `SqliteFixture`: a pool over a throwaway SQLite file, optionally with
///   the standard football schema
/// - `MockFactory`: a scripted driver that counts connects, closes, commits
///   and rollbacks, and can be told to fail any of them
/// - error assertion helpers
use crate::config::PoolConfig;
use crate::core::db::connection::{ConnectTarget, ConnectionFactory, DbConnection};
use crate::core::db::pool::Pool;
use crate::core::db::row::{Row, Value};
use crate::core::db::sqlite::SqliteFactory;
use crate::core::db::unit_of_work::Executor;
use crate::core::{PoolError, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Standard test schema: the tables and view a football statistics database
/// is expected to have.
pub const FOOTBALL_SCHEMA: &str = "
    CREATE TABLE competitions (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    );

    CREATE TABLE seasons (
        id INTEGER PRIMARY KEY,
        competition_id INTEGER NOT NULL REFERENCES competitions (id),
        label TEXT NOT NULL
    );

    CREATE TABLE teams (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        country TEXT
    );

    CREATE TABLE venues (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL
    );

    CREATE TABLE matches (
        id INTEGER PRIMARY KEY,
        season_id INTEGER REFERENCES seasons (id),
        venue_id INTEGER REFERENCES venues (id),
        home_team_id INTEGER NOT NULL REFERENCES teams (id),
        away_team_id INTEGER NOT NULL REFERENCES teams (id),
        home_goals INTEGER,
        away_goals INTEGER
    );

    CREATE TABLE fixtures (
        id INTEGER PRIMARY KEY,
        match_id INTEGER REFERENCES matches (id),
        kickoff TEXT
    );

    CREATE VIEW team_match_stats AS
        SELECT t.id AS team_id, t.name AS team_name, COUNT(m.id) AS played
        FROM teams t
        LEFT JOIN matches m ON m.home_team_id = t.id OR m.away_team_id = t.id
        GROUP BY t.id, t.name;
";

/// Pool config with credentials filled in and a short acquire timeout.
pub fn mock_config(min: usize, max: usize) -> PoolConfig {
    let target = ConnectTarget::new("localhost", "mock").with_credentials("tester", "secret");
    PoolConfig::new(target)
        .with_min_connections(min)
        .with_max_connections(max)
        .with_acquire_timeout(Some(Duration::from_secs(2)))
}

/// A pool over a SQLite file in a temporary directory. The directory, and
/// with it the database, is removed when the fixture drops.
pub struct SqliteFixture {
    // Field order matters: the pool must close before the directory goes.
    executor: Executor<SqliteFactory>,
    dir: TempDir,
}

impl SqliteFixture {
    /// Creates an empty database with a ready pool.
    pub fn new(min: usize, max: usize) -> Result<Self> {
        let dir = TempDir::new()?;
        let path = dir.path().join("fixture.db");
        let mut config = mock_config(min, max);
        config.target.database = path.to_string_lossy().into_owned();

        let pool = Pool::connect(config, SqliteFactory::new())?;
        Ok(SqliteFixture {
            executor: Executor::new(pool),
            dir,
        })
    }

    /// Creates a database with `FOOTBALL_SCHEMA` applied.
    pub fn with_schema(min: usize, max: usize) -> Result<Self> {
        let fixture = Self::new(min, max)?;
        fixture.executor.with_connection(|conn| {
            conn.raw()
                .execute_batch(FOOTBALL_SCHEMA)
                .map_err(PoolError::Database)
        })?;
        Ok(fixture)
    }

    pub fn executor(&self) -> Executor<SqliteFactory> {
        self.executor.clone()
    }

    pub fn pool(&self) -> &Pool<SqliteFactory> {
        self.executor.pool()
    }

    pub fn path(&self) -> std::path::PathBuf {
        self.dir.path().join("fixture.db")
    }
}

impl Drop for SqliteFixture {
    fn drop(&mut self) {
        self.executor.close_all();
    }
}

#[derive(Default)]
struct MockShared {
    next_id: AtomicU64,
    connects: AtomicUsize,
    closes: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    /// Remaining successful connects; `None` means unlimited
    connect_budget: Mutex<Option<usize>>,
    fail_begin: AtomicBool,
    fail_rollback: AtomicBool,
    fail_commit: AtomicBool,
}

/// Scripted driver for exercising pool and executor failure paths.
///
/// Statements containing `FAIL` return a query error; every other statement
/// reports one affected row, and every query returns a single `test = 1` row.
#[derive(Clone, Default)]
pub struct MockFactory {
    shared: Arc<MockShared>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets `n` more connects succeed, then fails every following one.
    pub fn fail_connect_after(self, n: usize) -> Self {
        *self.shared.connect_budget.lock().unwrap() = Some(n);
        self
    }

    pub fn fail_connects(&self) {
        *self.shared.connect_budget.lock().unwrap() = Some(0);
    }

    pub fn allow_connects(&self) {
        *self.shared.connect_budget.lock().unwrap() = None;
    }

    pub fn fail_begins(&self) {
        self.shared.fail_begin.store(true, Ordering::SeqCst);
    }

    pub fn fail_rollbacks(&self) {
        self.shared.fail_rollback.store(true, Ordering::SeqCst);
    }

    pub fn fail_commits(&self) {
        self.shared.fail_commit.store(true, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.shared.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.shared.rollbacks.load(Ordering::SeqCst)
    }
}

impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;

    fn connect(&self, _target: &ConnectTarget) -> Result<MockConnection> {
        {
            let mut budget = self.shared.connect_budget.lock().unwrap();
            match budget.as_mut() {
                Some(n) if *n == 0 => {
                    return Err(PoolError::Io(std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "connection refused",
                    )))
                }
                Some(n) => *n -= 1,
                None => {}
            }
        }
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection {
            id: self.shared.next_id.fetch_add(1, Ordering::SeqCst),
            in_transaction: false,
            shared: Arc::clone(&self.shared),
        })
    }
}

pub struct MockConnection {
    id: u64,
    in_transaction: bool,
    shared: Arc<MockShared>,
}

impl MockConnection {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl DbConnection for MockConnection {
    fn begin(&mut self) -> Result<()> {
        if self.shared.fail_begin.load(Ordering::SeqCst) {
            return Err(PoolError::Query("begin failed: server closed the connection".to_string()));
        }
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.shared.fail_commit.load(Ordering::SeqCst) {
            return Err(PoolError::Query("commit failed: database is locked".to_string()));
        }
        self.in_transaction = false;
        self.shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if self.shared.fail_rollback.load(Ordering::SeqCst) {
            return Err(PoolError::Release("rollback failed: connection lost".to_string()));
        }
        self.in_transaction = false;
        self.shared.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn execute(&mut self, sql: &str, _params: &[Value]) -> Result<usize> {
        if sql.contains("FAIL") {
            return Err(PoolError::Query(format!("forced failure: {}", sql)));
        }
        Ok(1)
    }

    fn query(&mut self, sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
        if sql.contains("FAIL") {
            return Err(PoolError::Query(format!("forced failure: {}", sql)));
        }
        Ok(vec![Row::new(vec!["test".to_string()], vec![Value::Integer(1)])])
    }

    fn close(self) -> Result<()> {
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Runs `f` with a debug-level subscriber on the current thread and returns
/// its result along with everything that was logged.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let value = tracing::subscriber::with_default(subscriber, f);
    let output = String::from_utf8_lossy(&logs.0.lock().unwrap()).into_owned();
    (value, output)
}

/// Error testing utilities specific to PoolError patterns
pub mod error_testing {
    /// Verify error message quality (contains helpful information)
    pub fn verify_error_message_quality<T, E>(result: &std::result::Result<T, E>, context: &str)
    where
        T: std::fmt::Debug,
        E: std::fmt::Display,
    {
        if let Err(ref error) = result {
            let error_str = error.to_string();

            assert!(!error_str.is_empty(), "Error message should not be empty in {}", context);
            assert!(error_str.len() > 10, "Error message should be descriptive in {}", context);

            let lower = error_str.to_lowercase();
            let has_operation_context = lower.contains("failed")
                || lower.contains("error")
                || lower.contains("could not")
                || lower.contains("closed");

            assert!(
                has_operation_context,
                "Error should indicate what operation failed: '{}' in {}",
                error_str,
                context
            );
        } else {
            panic!("Expected an error in {}", context);
        }
    }
}

/// Matches a `PoolError` variant or panics with context.
#[macro_export]
macro_rules! assert_pool_error {
    ($result:expr, $pattern:pat, $context:expr) => {
        match $result {
            Err($pattern) => {}
            Ok(_) => panic!("Expected {} but got Ok in {}", stringify!($pattern), $context),
            Err(other) => panic!(
                "Expected {} but got {:?} in {}",
                stringify!($pattern),
                other,
                $context
            ),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_creates_schema() {
        let fixture = SqliteFixture::with_schema(1, 1).unwrap();
        assert!(fixture.path().exists());

        let rows = fixture
            .executor()
            .fetch_all("SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table'", &[])
            .unwrap();
        assert_eq!(rows[0].get("n"), Some(&Value::Integer(6)));
    }

    #[test]
    fn test_mock_connect_budget() {
        let factory = MockFactory::new().fail_connect_after(1);
        let target = mock_config(1, 1).target;
        assert!(factory.connect(&target).is_ok());
        assert!(factory.connect(&target).is_err());
        factory.allow_connects();
        assert!(factory.connect(&target).is_ok());
        assert_eq!(factory.connects(), 2);
    }

    #[test]
    fn test_error_assertion_macro() {
        let result: Result<()> = Err(PoolError::PoolClosed);
        assert_pool_error!(result, PoolError::PoolClosed, "macro test");
    }
}
