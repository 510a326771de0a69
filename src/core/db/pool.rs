/// Connection Pool Module
///
/// A bounded pool of reusable connections. All bookkeeping (idle set,
/// checked-out count, lifecycle) sits behind a single mutex; connections are
/// opened and closed outside of it. Checked-out connections are owned by a
/// `PooledConnection` guard and go back to the pool when the guard drops.
use crate::config::PoolConfig;
use crate::core::db::connection::{ConnectionFactory, DbConnection};
use crate::core::{PoolError, Result};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Lifecycle of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Lifecycle {
    /// Constructed but `initialize` has not succeeded yet
    Uninitialized,
    /// Serving connections
    Ready,
    /// `close_all` was called; terminal unless re-initialized
    Closed,
}

/// Point-in-time view of the pool counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub state: Lifecycle,
    pub generation: u64,
    pub idle: usize,
    pub checked_out: usize,
    pub min_connections: usize,
    pub max_connections: usize,
}

struct IdleConnection<C> {
    conn: C,
    generation: u64,
}

struct PoolState<C> {
    lifecycle: Lifecycle,
    generation: u64,
    idle: VecDeque<IdleConnection<C>>,
    checked_out: usize,
    /// Slots reserved for connections that are being opened right now
    pending: usize,
    initializing: bool,
    /// Number of `close_all` calls, lets an in-flight initialize notice a close
    closes: u64,
}

impl<C> PoolState<C> {
    fn live(&self) -> usize {
        self.idle.len() + self.checked_out + self.pending
    }
}

struct Shared<F: ConnectionFactory> {
    factory: F,
    config: PoolConfig,
    state: Mutex<PoolState<F::Connection>>,
    available: Condvar,
}

/// Handle to a connection pool.
///
/// Cloning is cheap and every clone refers to the same pool. Build one at
/// startup and hand clones to whoever needs database access.
pub struct Pool<F: ConnectionFactory> {
    shared: Arc<Shared<F>>,
}

impl<F: ConnectionFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Pool {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: ConnectionFactory> fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("target", &self.shared.config.target)
            .field("status", &self.status())
            .finish()
    }
}

#[derive(Clone, Copy)]
enum Wait {
    No,
    Until(Option<Instant>),
}

impl<F: ConnectionFactory> Pool<F> {
    /// Creates an uninitialized pool. No connection is opened until
    /// `initialize` is called.
    pub fn new(config: PoolConfig, factory: F) -> Self {
        Pool {
            shared: Arc::new(Shared {
                factory,
                config,
                state: Mutex::new(PoolState {
                    lifecycle: Lifecycle::Uninitialized,
                    generation: 0,
                    idle: VecDeque::new(),
                    checked_out: 0,
                    pending: 0,
                    initializing: false,
                    closes: 0,
                }),
                available: Condvar::new(),
            }),
        }
    }

    /// Creates a pool and opens its minimum connections.
    pub fn connect(config: PoolConfig, factory: F) -> Result<Self> {
        let pool = Pool::new(config, factory);
        pool.initialize()?;
        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn factory(&self) -> &F {
        &self.shared.factory
    }

    fn lock(&self) -> Result<MutexGuard<'_, PoolState<F::Connection>>> {
        self.shared.state.lock().map_err(|_| PoolError::Poisoned)
    }

    // Release paths must never fail, so they take the state even if poisoned.
    fn lock_recover(&self) -> MutexGuard<'_, PoolState<F::Connection>> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn wake_all(&self) {
        self.shared.available.notify_all();
    }

    /// Opens the minimum number of connections and marks the pool ready.
    ///
    /// No-op on a ready pool. On a closed pool this starts a new generation.
    /// If any connection cannot be opened, the ones opened so far are closed,
    /// the pool keeps its previous state and `PoolError::Initialization` is
    /// returned.
    pub fn initialize(&self) -> Result<()> {
        let config = &self.shared.config;
        config.validate()?;

        let (warm, closes) = {
            let mut state = self.lock()?;
            while state.initializing {
                state = self
                    .shared
                    .available
                    .wait(state)
                    .map_err(|_| PoolError::Poisoned)?;
            }
            if state.lifecycle == Lifecycle::Ready {
                return Ok(());
            }
            state.initializing = true;
            // Stragglers from a closed generation still count against the cap.
            let warm = config
                .min_connections
                .min(config.max_connections.saturating_sub(state.live()));
            state.pending += warm;
            (warm, state.closes)
        };

        let mut opened = Vec::with_capacity(warm);
        let mut failure = None;
        for _ in 0..warm {
            match self.shared.factory.connect(&config.target) {
                Ok(conn) => opened.push(conn),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let mut state = self.lock_recover();
        state.pending -= warm;
        state.initializing = false;

        let abort = match failure {
            Some(e) => Some(PoolError::Initialization(format!(
                "opened {} of {} minimum connections to {}: {}",
                opened.len(),
                warm,
                config.target.address(),
                e
            ))),
            None if state.closes != closes => Some(PoolError::PoolClosed),
            None => None,
        };

        if let Some(err) = abort {
            drop(state);
            self.wake_all();
            close_connections(opened);
            error!(address = %config.target.address(), error = %err, "failed to initialize connection pool");
            return Err(err);
        }

        state.generation += 1;
        let generation = state.generation;
        state
            .idle
            .extend(opened.into_iter().map(|conn| IdleConnection { conn, generation }));
        state.lifecycle = Lifecycle::Ready;
        let idle = state.idle.len();
        drop(state);
        self.wake_all();

        info!(
            address = %config.target.address(),
            generation,
            idle,
            max = config.max_connections,
            "connection pool initialized"
        );
        Ok(())
    }

    /// Checks out a connection, waiting up to the configured acquire timeout.
    pub fn acquire(&self) -> Result<PooledConnection<F>> {
        self.acquire_timeout(self.shared.config.acquire_timeout)
    }

    /// Checks out a connection, waiting up to `timeout` (`None` waits
    /// indefinitely).
    pub fn acquire_timeout(&self, timeout: Option<Duration>) -> Result<PooledConnection<F>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        match self.checkout(Wait::Until(deadline))? {
            Some(conn) => Ok(conn),
            None => Err(PoolError::PoolExhausted(timeout.unwrap_or_default())),
        }
    }

    /// Checks out a connection without waiting. Returns `None` if the pool is
    /// not ready, is at capacity, or a new connection could not be opened.
    pub fn try_acquire(&self) -> Option<PooledConnection<F>> {
        match self.checkout(Wait::No) {
            Ok(conn) => conn,
            Err(e) => {
                debug!(error = %e, "try_acquire found no connection");
                None
            }
        }
    }

    fn checkout(&self, wait: Wait) -> Result<Option<PooledConnection<F>>> {
        let config = &self.shared.config;

        'outer: loop {
            let mut state = self.lock()?;

            match state.lifecycle {
                Lifecycle::Ready => {}
                _ if config.lazy_reinit && matches!(wait, Wait::Until(_)) => {
                    drop(state);
                    info!("re-initializing connection pool on acquire");
                    self.initialize()?;
                    continue 'outer;
                }
                Lifecycle::Uninitialized => return Err(PoolError::NotInitialized),
                Lifecycle::Closed => return Err(PoolError::PoolClosed),
            }

            loop {
                if state.lifecycle != Lifecycle::Ready {
                    continue 'outer;
                }

                if let Some(idle) = state.idle.pop_front() {
                    state.checked_out += 1;
                    return Ok(Some(PooledConnection::new(idle.conn, idle.generation, self.clone())));
                }

                if state.live() < config.max_connections {
                    state.pending += 1;
                    let generation = state.generation;
                    drop(state);

                    let opened = self.shared.factory.connect(&config.target);

                    let mut state = self.lock_recover();
                    state.pending -= 1;
                    let conn = match opened {
                        Ok(conn) => conn,
                        Err(e) => {
                            drop(state);
                            self.wake_all();
                            warn!(error = %e, "failed to open pooled connection");
                            return Err(e);
                        }
                    };
                    if state.lifecycle != Lifecycle::Ready || state.generation != generation {
                        // Pool was closed while we were connecting.
                        drop(state);
                        self.wake_all();
                        close_connections(vec![conn]);
                        continue 'outer;
                    }
                    state.checked_out += 1;
                    debug!(generation, live = state.live(), "opened new pooled connection");
                    return Ok(Some(PooledConnection::new(conn, generation, self.clone())));
                }

                state = match wait {
                    Wait::No => return Ok(None),
                    Wait::Until(None) => self
                        .shared
                        .available
                        .wait(state)
                        .map_err(|_| PoolError::Poisoned)?,
                    Wait::Until(Some(deadline)) => {
                        let now = Instant::now();
                        if now >= deadline {
                            warn!(
                                checked_out = state.checked_out,
                                max = config.max_connections,
                                "connection pool exhausted"
                            );
                            return Ok(None);
                        }
                        self.shared
                            .available
                            .wait_timeout(state, deadline - now)
                            .map_err(|_| PoolError::Poisoned)?
                            .0
                    }
                };
            }
        }
    }

    /// Returns a connection to the pool. Equivalent to dropping the guard.
    pub fn release(&self, conn: PooledConnection<F>) {
        drop(conn);
    }

    fn return_connection(&self, conn: F::Connection, generation: u64, broken: bool) {
        let mut state = self.lock_recover();
        debug_assert!(state.checked_out > 0);
        state.checked_out = state.checked_out.saturating_sub(1);

        let reusable =
            !broken && state.lifecycle == Lifecycle::Ready && state.generation == generation;
        if reusable {
            state.idle.push_back(IdleConnection { conn, generation });
            drop(state);
            self.wake_all();
            return;
        }

        drop(state);
        self.wake_all();
        debug!(generation, broken, "discarding returned connection");
        close_connections(vec![conn]);
    }

    /// Closes every idle connection and marks the pool closed. Connections
    /// still checked out are closed as they come back. Calling it again is a
    /// no-op.
    pub fn close_all(&self) {
        let mut state = self.lock_recover();
        state.closes += 1;
        if state.lifecycle == Lifecycle::Closed {
            debug!("connection pool already closed");
            return;
        }
        state.lifecycle = Lifecycle::Closed;
        let drained: Vec<F::Connection> = state.idle.drain(..).map(|idle| idle.conn).collect();
        let in_flight = state.checked_out;
        drop(state);
        self.wake_all();

        let closed = drained.len();
        close_connections(drained);
        info!(closed, in_flight, "connection pool closed");
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.lock_recover();
        PoolStatus {
            state: state.lifecycle,
            generation: state.generation,
            idle: state.idle.len(),
            checked_out: state.checked_out,
            min_connections: self.shared.config.min_connections,
            max_connections: self.shared.config.max_connections,
        }
    }
}

fn close_connections<C: DbConnection>(conns: Vec<C>) {
    for conn in conns {
        if let Err(e) = conn.close() {
            warn!(error = %e, "failed to close connection");
        }
    }
}

/// A connection checked out of a `Pool`.
///
/// Dereferences to the driver connection. Dropping the guard returns the
/// connection to its pool.
pub struct PooledConnection<F: ConnectionFactory> {
    conn: Option<F::Connection>,
    generation: u64,
    broken: bool,
    pool: Pool<F>,
}

impl<F: ConnectionFactory> PooledConnection<F> {
    fn new(conn: F::Connection, generation: u64, pool: Pool<F>) -> Self {
        PooledConnection {
            conn: Some(conn),
            generation,
            broken: false,
            pool,
        }
    }

    /// Pool generation this connection was opened in.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Marks the connection unusable; it is closed instead of re-queued.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }
}

impl<F: ConnectionFactory> Deref for PooledConnection<F> {
    type Target = F::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("pooled connection used after release")
    }
}

impl<F: ConnectionFactory> DerefMut for PooledConnection<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("pooled connection used after release")
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            // Idle connections never carry an open transaction.
            if !self.broken && conn.in_transaction() {
                warn!(generation = self.generation, "connection returned mid-transaction, rolling back");
                if let Err(e) = conn.rollback() {
                    error!(error = %e, "rollback on return failed, discarding connection");
                    self.broken = true;
                }
            }
            self.pool.return_connection(conn, self.generation, self.broken);
        }
    }
}

impl<F: ConnectionFactory> fmt::Debug for PooledConnection<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("generation", &self.generation)
            .field("broken", &self.broken)
            .finish()
    }
}
