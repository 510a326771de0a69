/// Connection Module
///
/// This module defines the boundary between the pool and the database
/// driver. The pool only ever sees a `ConnectionFactory` that opens
/// connections and the `DbConnection` operations it needs to run a unit of
/// work. Everything protocol-specific lives behind these traits.
use crate::core::db::row::{Row, Value};
use crate::core::Result;
use std::fmt;

/// Default PostgreSQL-style port used when none is configured.
pub const DEFAULT_PORT: u16 = 5432;

/// Where and as whom to connect.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl ConnectTarget {
    pub fn new(host: impl Into<String>, database: impl Into<String>) -> Self {
        ConnectTarget {
            host: host.into(),
            port: DEFAULT_PORT,
            database: database.into(),
            user: None,
            password: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// `host:port/database`, used in log lines.
    pub fn address(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

// Hand-written so the password never ends up in logs.
impl fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// A live database session.
///
/// Implementations are used by exactly one unit of work at a time, so every
/// operation takes `&mut self`.
pub trait DbConnection: Send + 'static {
    /// Starts a transaction.
    fn begin(&mut self) -> Result<()>;

    /// Commits the open transaction.
    fn commit(&mut self) -> Result<()>;

    /// Rolls back the open transaction.
    fn rollback(&mut self) -> Result<()>;

    /// True while a transaction is open on this session.
    fn in_transaction(&self) -> bool;

    /// Runs a statement and returns the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize>;

    /// Runs a statement and returns every result row.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Cheap liveness probe.
    fn ping(&mut self) -> Result<()> {
        self.query("SELECT 1", &[]).map(|_| ())
    }

    /// Terminates the session.
    fn close(self) -> Result<()>
    where
        Self: Sized;
}

/// Opens new connections for the pool.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: DbConnection;

    fn connect(&self, target: &ConnectTarget) -> Result<Self::Connection>;
}
