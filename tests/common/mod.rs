//! Shared helpers for the integration test binaries.
#![allow(dead_code)]

use sqlpool::{ConnectTarget, ConnectionFactory, DbConnection, PoolConfig, PoolError, Result, Row, Value};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counts live connections so tests can check the pool never exceeds its cap.
#[derive(Clone, Default)]
pub struct CountingFactory {
    pub live: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
    pub opened: Arc<AtomicUsize>,
    next_id: Arc<AtomicU64>,
}

impl CountingFactory {
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl ConnectionFactory for CountingFactory {
    type Connection = CountingConnection;

    fn connect(&self, _target: &ConnectTarget) -> Result<CountingConnection> {
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(live, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(CountingConnection {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            in_transaction: false,
            live: Arc::clone(&self.live),
        })
    }
}

pub struct CountingConnection {
    pub id: u64,
    in_transaction: bool,
    live: Arc<AtomicUsize>,
}

impl DbConnection for CountingConnection {
    fn begin(&mut self) -> Result<()> {
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.in_transaction = false;
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

    fn query(&mut self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
        Ok(vec![Row::new(vec!["test".to_string()], vec![Value::Integer(1)])])
    }

    fn close(self) -> Result<()> {
        self.live.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn test_config(min: usize, max: usize) -> PoolConfig {
    PoolConfig::new(ConnectTarget::new("localhost", "test").with_credentials("tester", "secret"))
        .with_min_connections(min)
        .with_max_connections(max)
        .with_acquire_timeout(Some(Duration::from_secs(10)))
}
