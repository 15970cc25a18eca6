//! A single worker connection.
//!
//! [`Connection`] is a cheap, cloneable handle. Each connection runs one
//! driver task that owns the transport, the protocol machine and the query
//! queue; handles talk to it over a channel. Queries are sent one at a time
//! and complete in submission order.
//!
//! # Example
//!
//! ```ignore
//! use adodb::{Connection, ConnectionOptions, Params};
//!
//! let conn = Connection::new(ConnectionOptions::new(
//!     "Provider=Microsoft.Jet.OLEDB.4.0;Data Source=northwind.mdb",
//! ))?;
//! let result = conn.query("SELECT 4 AS n", &Params::new()).await?;
//! conn.end();
//! ```

mod driver;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use self::driver::{Command, Driver, Link};
use crate::config::{Endpoint, Settings};
use crate::error::{DestroyPhase, Error, Result};
use crate::protocol::{LineEnding, Markers, Params, ResultSet};
use crate::sql;
use crate::transport::{Codepages, Transport, TransportError, TransportOptions, DEFAULT_INBOUND_CAPACITY};
use crate::worker::{Launcher, WorkerCommand};

/// How long a worker gets to exit after the shutdown terminator.
const DEFAULT_END_GRACE: Duration = Duration::from_secs(5);

/// Everything needed to open a connection.
///
/// Clone one value per connection so they share the same [`Launcher`].
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub connection_string: String,
    pub markers: Markers,
    pub line_ending: LineEnding,
    /// Assumed until the worker reports its locale.
    pub codepages: Codepages,
    pub worker: WorkerCommand,
    pub launcher: Arc<Launcher>,
    pub inbound_capacity: usize,
    pub end_grace: Duration,
}

impl ConnectionOptions {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            markers: Markers::default(),
            line_ending: LineEnding::default(),
            codepages: Codepages::default(),
            worker: WorkerCommand::default(),
            launcher: Launcher::global(),
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            end_grace: DEFAULT_END_GRACE,
        }
    }

    /// Build options from settings. Creates a launcher with the configured
    /// interval.
    pub fn from_settings(settings: &Settings, connection_string: impl Into<String>) -> Result<Self> {
        Ok(Self {
            connection_string: connection_string.into(),
            markers: settings.protocol.markers(),
            line_ending: settings.protocol.line_ending,
            codepages: settings.codepages,
            worker: settings.worker.worker_command()?,
            launcher: Launcher::shared(settings.worker.min_creation_interval()),
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            end_grace: DEFAULT_END_GRACE,
        })
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            markers: self.markers.clone(),
            codepages: self.codepages,
            inbound_capacity: self.inbound_capacity,
        }
    }
}

/// Flags mirrored from the driver for synchronous inspection.
#[derive(Debug, Default)]
struct Status {
    established: AtomicBool,
    busy: AtomicBool,
    ending: AtomicBool,
    destroyed: AtomicBool,
}

struct Inner {
    id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    status: Arc<Status>,
    closed: watch::Receiver<bool>,
}

#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("idle", &self.is_idle())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl Connection {
    /// Create a connection. Nothing is started until the first query or
    /// [`connect`](Self::connect).
    ///
    /// Must be called within a tokio runtime.
    pub fn new(options: ConnectionOptions) -> Result<Self> {
        let endpoint = Endpoint::parse(&options.connection_string)?;
        Ok(Self::spawn(options, Link::Pending(endpoint)))
    }

    /// Run the protocol over an already open transport.
    pub fn from_transport(transport: Box<dyn Transport>, options: ConnectionOptions) -> Self {
        Self::spawn(options, Link::Open(transport))
    }

    fn spawn(options: ConnectionOptions, link: Link) -> Self {
        let id = Uuid::new_v4();
        let status = Arc::new(Status::default());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);

        let driver = Driver::new(id, options, Arc::clone(&status), commands_rx, closed_tx, link);
        tokio::spawn(driver.run());

        Self {
            inner: Arc::new(Inner {
                id,
                commands: commands_tx,
                status,
                closed: closed_rx,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Open the transport and wait for the `LOCALS` handshake.
    pub async fn connect(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        if self.inner.commands.send(Command::Connect { reply }).is_err() {
            return Err(TransportError::Closed.into());
        }
        rx.await.unwrap_or_else(|_| Err(TransportError::Closed.into()))
    }

    /// Run one statement and wait for its result.
    ///
    /// `sql` may name a `.sql` file. Comments are stripped and `:name`
    /// parameters bound before the statement is queued.
    pub async fn query(&self, sql: &str, params: &Params) -> Result<ResultSet> {
        if self.is_ending() {
            return Err(Error::ConnectionEnding);
        }
        let sql = sql::prepare(sql, params).await?;

        let (reply, rx) = oneshot::channel();
        let command = Command::Query {
            sql: sql.clone(),
            reply,
        };
        if self.inner.commands.send(command).is_err() {
            return Err(Error::destroyed(sql, DestroyPhase::Queued));
        }
        rx.await
            .unwrap_or_else(|_| Err(Error::destroyed(sql, DestroyPhase::Queued)))
    }

    /// Finish queued work, then ask the worker to exit.
    ///
    /// Queries submitted afterwards fail with [`Error::ConnectionEnding`].
    pub fn end(&self) {
        self.inner.status.ending.store(true, Ordering::Release);
        let _ = self.inner.commands.send(Command::End);
    }

    /// Kill the worker and fail every in-flight and queued query. Idempotent.
    pub fn destroy(&self) {
        if self.inner.status.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.inner.commands.send(Command::Destroy);
    }

    /// Wait until the driver has shut down.
    pub async fn closed(&self) {
        let mut closed = self.inner.closed.clone();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Established, with nothing in flight or queued.
    pub fn is_idle(&self) -> bool {
        let status = &self.inner.status;
        status.established.load(Ordering::Acquire)
            && !status.busy.load(Ordering::Acquire)
            && !status.ending.load(Ordering::Acquire)
            && !status.destroyed.load(Ordering::Acquire)
    }

    pub fn is_established(&self) -> bool {
        self.inner.status.established.load(Ordering::Acquire)
    }

    /// Destroyed, or its worker is gone.
    pub fn is_destroyed(&self) -> bool {
        self.inner.status.destroyed.load(Ordering::Acquire)
    }

    pub fn is_ending(&self) -> bool {
        self.inner.status.ending.load(Ordering::Acquire)
    }
}
