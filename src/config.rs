use crate::core::db::connection::{ConnectTarget, DEFAULT_PORT};
use crate::core::{PoolError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const ENV_HOST: &str = "DB_HOST";
pub const ENV_PORT: &str = "DB_PORT";
pub const ENV_NAME: &str = "DB_NAME";
pub const ENV_USER: &str = "DB_USER";
pub const ENV_PASSWORD: &str = "DB_PASSWORD";
pub const ENV_POOL_MIN: &str = "DB_POOL_MIN";
pub const ENV_POOL_MAX: &str = "DB_POOL_MAX";
pub const ENV_ACQUIRE_TIMEOUT_MS: &str = "DB_ACQUIRE_TIMEOUT_MS";
pub const ENV_LAZY_REINIT: &str = "DB_LAZY_REINIT";

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_DATABASE: &str = "sqlpool";
const DEFAULT_MIN_CONNECTIONS: usize = 1;
const DEFAULT_MAX_CONNECTIONS: usize = 10;
const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 30_000;

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    pub database: Option<DatabaseConfig>,
    pub pool: Option<PoolSection>,
}

/// Connection target settings.
#[derive(Debug, Default, Deserialize)]
pub struct DatabaseConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub name: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Pool sizing and behaviour settings.
#[derive(Debug, Default, Deserialize)]
pub struct PoolSection {
    pub min_connections: Option<usize>,
    pub max_connections: Option<usize>,
    /// `0` waits indefinitely
    pub acquire_timeout_ms: Option<u64>,
    pub lazy_reinit: Option<bool>,
}

/// Loads configuration from a TOML file at the given path.
///
/// # Example
///
/// ```no_run
/// let config = sqlpool::config::load_config("config.toml").expect("Failed to load config");
/// println!("{:?}", config);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| PoolError::Config(e.to_string()))
}

/// `<config dir>/sqlpool/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sqlpool").join("config.toml"))
}

/// Everything a `Pool` needs to know.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub target: ConnectTarget,
    pub min_connections: usize,
    pub max_connections: usize,
    /// How long `acquire` waits for a free connection; `None` waits forever
    pub acquire_timeout: Option<Duration>,
    /// Re-initialize transparently when acquiring from an uninitialized or
    /// closed pool instead of failing
    pub lazy_reinit: bool,
}

impl PoolConfig {
    pub fn new(target: ConnectTarget) -> Self {
        PoolConfig {
            target,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Some(Duration::from_millis(DEFAULT_ACQUIRE_TIMEOUT_MS)),
            lazy_reinit: false,
        }
    }

    pub fn with_min_connections(mut self, min: usize) -> Self {
        self.min_connections = min;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_lazy_reinit(mut self, lazy: bool) -> Self {
        self.lazy_reinit = lazy;
        self
    }

    /// Reads the process environment (after loading `.env`, if present).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_sources(None, |key| std::env::var(key).ok())
    }

    /// Reads an optional TOML file and then the environment. Environment
    /// values win. Without an explicit path, the default config path is used
    /// if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();
        let file = match path {
            Some(path) => Some(load_config(path)?),
            None => match default_config_path() {
                Some(path) if path.exists() => {
                    debug!(path = %path.display(), "loading config file");
                    Some(load_config(path)?)
                }
                _ => None,
            },
        };
        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    /// Builds a config from an optional parsed file and a key lookup.
    pub fn from_sources<L>(file: Option<Config>, lookup: L) -> Result<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let file = file.unwrap_or_default();
        let db = file.database.unwrap_or_default();
        let pool = file.pool.unwrap_or_default();

        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = lookup(ENV_HOST)
            .or(db.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = match lookup(ENV_PORT) {
            Some(v) => parse_value(ENV_PORT, &v)?,
            None => db.port.unwrap_or(DEFAULT_PORT),
        };
        let database = lookup(ENV_NAME)
            .or(db.name)
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string());

        let mut target = ConnectTarget::new(host, database).with_port(port);
        target.user = lookup(ENV_USER).or(db.user);
        target.password = lookup(ENV_PASSWORD).or(db.password);

        let min_connections = match lookup(ENV_POOL_MIN) {
            Some(v) => parse_value(ENV_POOL_MIN, &v)?,
            None => pool.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS),
        };
        let max_connections = match lookup(ENV_POOL_MAX) {
            Some(v) => parse_value(ENV_POOL_MAX, &v)?,
            None => pool.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS),
        };
        let timeout_ms: u64 = match lookup(ENV_ACQUIRE_TIMEOUT_MS) {
            Some(v) => parse_value(ENV_ACQUIRE_TIMEOUT_MS, &v)?,
            None => pool.acquire_timeout_ms.unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_MS),
        };
        let lazy_reinit = match lookup(ENV_LAZY_REINIT) {
            Some(v) => parse_bool(ENV_LAZY_REINIT, &v)?,
            None => pool.lazy_reinit.unwrap_or(false),
        };

        Ok(PoolConfig {
            target,
            min_connections,
            max_connections,
            acquire_timeout: (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)),
            lazy_reinit,
        })
    }

    /// Checks that the pool can be started with this config.
    ///
    /// Missing credentials are rejected here rather than defaulted.
    pub fn validate(&self) -> Result<()> {
        if self.target.user.as_deref().map_or(true, str::is_empty) {
            return Err(PoolError::Initialization(format!(
                "missing database user ({})",
                ENV_USER
            )));
        }
        if self.target.password.is_none() {
            return Err(PoolError::Initialization(format!(
                "missing database password ({})",
                ENV_PASSWORD
            )));
        }
        if self.max_connections == 0 {
            return Err(PoolError::Initialization(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(PoolError::Initialization(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        Ok(())
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| PoolError::Config(format!("invalid {} '{}': {}", key, raw, e)))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(PoolError::Config(format!("invalid {} '{}': expected a boolean", key, raw))),
    }
}
