//! Connection pool.
//!
//! The pool caps the number of live connections (idle ones included), keeps
//! released connections around for `idle_ttl`, and queues callers in FIFO
//! order when the cap is reached. A released connection goes straight to the
//! longest-waiting caller before it is ever considered idle.
//!
//! All pool state sits behind one mutex; nothing awaits while holding it
//! except the lock itself.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::Settings;
use crate::connection::{Connection, ConnectionOptions};
use crate::error::{Error, Result};
use crate::protocol::{Params, ResultSet};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    pub max_connections: usize,
    pub idle_ttl: Duration,
    /// How long [`Pool::end`] waits for checked-out connections.
    pub shutdown_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections: 16,
            idle_ttl: Duration::from_millis(15_000),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Established or establishing connections.
    pub live: usize,
    /// Connections still waiting for their handshake.
    pub establishing: usize,
    pub idle: usize,
    pub checked_out: usize,
    pub waiting: usize,
}

struct IdleEntry {
    connection: Connection,
    eviction: JoinHandle<()>,
}

type Waiter = oneshot::Sender<Result<Connection>>;

#[derive(Default)]
struct PoolState {
    /// Keyed by insertion order, so the oldest idle connection is reused first.
    idle: BTreeMap<u64, IdleEntry>,
    waiters: VecDeque<Waiter>,
    checked_out: HashMap<Uuid, Connection>,
    /// Counted in `live` but not yet handed to anyone.
    establishing: HashMap<Uuid, Connection>,
    live: usize,
    next_entry: u64,
    ending: bool,
}

struct Shared {
    options: PoolOptions,
    connection: ConnectionOptions,
    state: Mutex<PoolState>,
}

#[derive(Clone)]
pub struct Pool {
    shared: Arc<Shared>,
}

impl Pool {
    pub fn new(connection: ConnectionOptions, mut options: PoolOptions) -> Self {
        if options.max_connections == 0 {
            tracing::warn!("max_connections is 0, using 1");
            options.max_connections = 1;
        }
        Self {
            shared: Arc::new(Shared {
                options,
                connection,
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    pub fn from_settings(settings: &Settings, connection_string: impl Into<String>) -> Result<Self> {
        let connection = ConnectionOptions::from_settings(settings, connection_string)?;
        Ok(Self::new(connection, settings.pool.to_pool_options()))
    }

    pub fn options(&self) -> &PoolOptions {
        &self.shared.options
    }

    /// Check out a connection, waiting if the pool is at capacity.
    pub async fn acquire(&self) -> Result<Connection> {
        let rx = {
            let mut state = self.shared.state.lock().await;
            if state.ending {
                return Err(Error::PoolClosed);
            }

            while let Some((_, entry)) = state.idle.pop_first() {
                entry.eviction.abort();
                let connection = entry.connection;
                if connection.is_destroyed() {
                    state.live = state.live.saturating_sub(1);
                    tracing::debug!(connection = %connection.id(), "dropping dead idle connection");
                    continue;
                }
                tracing::trace!(connection = %connection.id(), "reusing idle connection");
                state.checked_out.insert(connection.id(), connection.clone());
                return Ok(connection);
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            if state.live < self.shared.options.max_connections {
                state.live += 1;
                self.shared.spawn_creation(&mut state);
            } else {
                tracing::debug!(
                    live = state.live,
                    waiting = state.waiters.len(),
                    "pool at capacity, waiting for a release"
                );
            }
            rx
        };

        rx.await.unwrap_or(Err(Error::PoolClosed))
    }

    /// Return a checked-out connection.
    pub async fn release(&self, connection: Connection) {
        self.shared.release(connection).await;
    }

    /// Run one query on a pooled connection.
    ///
    /// The connection goes back to the pool whether the query succeeds or
    /// fails; a connection the failure destroyed is dropped from the count.
    pub async fn query(&self, sql: &str, params: &Params) -> Result<ResultSet> {
        let connection = self.acquire().await?;
        let guard = Checkout {
            shared: Arc::clone(&self.shared),
            connection: Some(connection.clone()),
        };
        let result = connection.query(sql, params).await;
        guard.release().await;
        result
    }

    /// Stop handing out connections, end idle ones, and wait up to
    /// `shutdown_timeout` for checked-out and establishing ones before
    /// destroying them.
    pub async fn end(&self) {
        let (idle, waiters) = {
            let mut state = self.shared.state.lock().await;
            if state.ending {
                tracing::debug!("pool already ending");
            }
            state.ending = true;
            let idle = std::mem::take(&mut state.idle);
            state.live = state.live.saturating_sub(idle.len());
            (idle, std::mem::take(&mut state.waiters))
        };

        tracing::info!(idle = idle.len(), "connection pool ending");
        for (_, entry) in idle {
            entry.eviction.abort();
            entry.connection.end();
        }
        for waiter in waiters {
            let _ = waiter.send(Err(Error::PoolClosed));
        }

        let deadline = Instant::now() + self.shared.options.shutdown_timeout;
        loop {
            let active = {
                let state = self.shared.state.lock().await;
                state.checked_out.len() + state.establishing.len()
            };
            if active == 0 {
                tracing::info!("all checked-out connections released");
                return;
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    remaining = active,
                    "shutdown timeout expired, destroying checked-out connections"
                );
                break;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        let stragglers: Vec<Connection> = {
            let mut state = self.shared.state.lock().await;
            let mut stragglers: Vec<Connection> = state.checked_out.drain().map(|(_, c)| c).collect();
            stragglers.extend(state.establishing.drain().map(|(_, c)| c));
            state.live = state.live.saturating_sub(stragglers.len());
            stragglers
        };
        for connection in stragglers {
            tracing::debug!(connection = %connection.id(), "destroying connection after shutdown timeout");
            connection.destroy();
        }
    }

    /// Destroy every idle, checked-out and establishing connection and close
    /// the pool.
    pub async fn destroy(&self) {
        let (idle, checked_out, waiters) = {
            let mut state = self.shared.state.lock().await;
            state.ending = true;
            let idle = std::mem::take(&mut state.idle);
            let mut checked_out = std::mem::take(&mut state.checked_out);
            checked_out.extend(state.establishing.drain());
            state.live = state
                .live
                .saturating_sub(idle.len() + checked_out.len());
            (idle, checked_out, std::mem::take(&mut state.waiters))
        };

        tracing::info!(
            idle = idle.len(),
            checked_out = checked_out.len(),
            "destroying connection pool"
        );
        for (_, entry) in idle {
            entry.eviction.abort();
            entry.connection.destroy();
        }
        for connection in checked_out.into_values() {
            connection.destroy();
        }
        for waiter in waiters {
            let _ = waiter.send(Err(Error::PoolClosed));
        }
    }

    pub async fn status(&self) -> PoolStatus {
        let state = self.shared.state.lock().await;
        PoolStatus {
            live: state.live,
            establishing: state.establishing.len(),
            idle: state.idle.len(),
            checked_out: state.checked_out.len(),
            waiting: state.waiters.iter().filter(|w| !w.is_closed()).count(),
        }
    }

    /// True when no connection is checked out and nobody is waiting.
    pub async fn is_idle(&self) -> bool {
        let status = self.status().await;
        status.checked_out == 0 && status.waiting == 0
    }
}

impl Shared {
    /// Establish one connection for the waiters. The slot is already
    /// counted in `live`.
    fn spawn_creation(self: &Arc<Self>, state: &mut PoolState) {
        let connection = match Connection::new(self.connection.clone()) {
            Ok(connection) => connection,
            Err(e) => {
                self.creation_failed(state, e);
                return;
            }
        };
        state.establishing.insert(connection.id(), connection.clone());

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let result = connection.connect().await;
            let mut state = shared.state.lock().await;
            if state.establishing.remove(&connection.id()).is_none() {
                // Shutdown destroyed it and gave back its slot.
                return;
            }
            match result {
                Ok(()) => {
                    tracing::debug!(connection = %connection.id(), "pool connection established");
                    state.checked_out.insert(connection.id(), connection.clone());
                    shared.put_back(&mut state, connection);
                }
                Err(e) => {
                    connection.destroy();
                    shared.creation_failed(&mut state, e);
                }
            }
        });
    }

    fn creation_failed(self: &Arc<Self>, state: &mut PoolState, err: Error) {
        tracing::warn!(error = %err, "failed to establish pool connection");
        state.live = state.live.saturating_sub(1);

        let mut err = Some(err);
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.is_closed() {
                continue;
            }
            if let Some(err) = err.take() {
                let _ = waiter.send(Err(err));
            }
            break;
        }
        self.replenish(state);
    }

    async fn release(self: &Arc<Self>, connection: Connection) {
        let mut state = self.state.lock().await;
        if state.checked_out.remove(&connection.id()).is_none() {
            tracing::debug!(connection = %connection.id(), "released connection is not checked out");
            return;
        }
        state.checked_out.insert(connection.id(), connection.clone());
        self.put_back(&mut state, connection);
    }

    /// Route a checked-out connection to a waiter, the idle set, or shutdown.
    fn put_back(self: &Arc<Self>, state: &mut PoolState, connection: Connection) {
        state.checked_out.remove(&connection.id());

        if connection.is_destroyed() {
            state.live = state.live.saturating_sub(1);
            tracing::debug!(connection = %connection.id(), live = state.live, "dropping destroyed connection");
            self.replenish(state);
            return;
        }

        let Some(connection) = hand_off(state, connection) else {
            return;
        };

        if state.ending {
            state.live = state.live.saturating_sub(1);
            connection.end();
            return;
        }

        let key = state.next_entry;
        state.next_entry += 1;
        let eviction = tokio::spawn(evict_after(
            Arc::downgrade(self),
            key,
            self.options.idle_ttl,
        ));
        tracing::trace!(connection = %connection.id(), idle = state.idle.len() + 1, "connection idle");
        state.idle.insert(key, IdleEntry { connection, eviction });
    }

    /// Start another connection if callers are waiting and there is room.
    fn replenish(self: &Arc<Self>, state: &mut PoolState) {
        state.waiters.retain(|w| !w.is_closed());
        if !state.ending
            && !state.waiters.is_empty()
            && state.live < self.options.max_connections
        {
            state.live += 1;
            self.spawn_creation(state);
        }
    }
}

/// Give `connection` to the longest-waiting caller still listening.
///
/// Returns it back if nobody took it.
fn hand_off(state: &mut PoolState, mut connection: Connection) -> Option<Connection> {
    while let Some(waiter) = state.waiters.pop_front() {
        state.checked_out.insert(connection.id(), connection.clone());
        match waiter.send(Ok(connection)) {
            Ok(()) => return None,
            // The caller stopped waiting.
            Err(returned) => {
                let Ok(back) = returned else {
                    return None;
                };
                state.checked_out.remove(&back.id());
                connection = back;
            }
        }
    }
    Some(connection)
}

async fn evict_after(shared: Weak<Shared>, key: u64, ttl: Duration) {
    tokio::time::sleep(ttl).await;
    let Some(shared) = shared.upgrade() else {
        return;
    };

    let mut state = shared.state.lock().await;
    let Some(entry) = state.idle.remove(&key) else {
        return;
    };
    state.live = state.live.saturating_sub(1);
    tracing::debug!(
        connection = %entry.connection.id(),
        live = state.live,
        "idle connection expired"
    );
    entry.connection.end();
}

/// Releases its connection on drop, so a cancelled query does not leak it.
struct Checkout {
    shared: Arc<Shared>,
    connection: Option<Connection>,
}

impl Checkout {
    async fn release(mut self) {
        if let Some(connection) = self.connection.take() {
            self.shared.release(connection).await;
        }
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move { shared.release(connection).await });
        }
    }
}
