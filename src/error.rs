//! Crate-wide error type.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::SettingsError;
use crate::transport::TransportError;

/// Result type for connection, pool and query operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Where a query was when its connection was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyPhase {
    /// The query had been written to the worker and was awaiting its result.
    InFlight,
    /// The query was still waiting in the connection's queue.
    Queued,
}

impl fmt::Display for DestroyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestroyPhase::InFlight => f.write_str("while executing"),
            DestroyPhase::Queued => f.write_str("before execution of"),
        }
    }
}

/// Errors surfaced to callers of [`Connection`](crate::Connection) and [`Pool`](crate::Pool).
#[derive(Error, Debug)]
pub enum Error {
    /// The worker reported a query error; the message is its diagnostic text verbatim.
    #[error("{0}")]
    Protocol(String),

    /// The connection was destroyed while the query was in flight or queued.
    #[error("connection was destroyed {phase} sql: {sql}")]
    ConnectionDestroyed {
        /// SQL text of the failed query.
        sql: String,
        /// Whether the query had been dispatched.
        phase: DestroyPhase,
    },

    /// The query was submitted after `end()` was requested.
    #[error("connection is ending and cannot accept queries")]
    ConnectionEnding,

    /// I/O failure on the underlying channel.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The worker's response broke a framing invariant.
    #[error("malformed response from worker: {0}")]
    MalformedResponse(String),

    /// A `.sql` file reference could not be read.
    #[error("failed to read sql file {}: {source}", .path.display())]
    SqlFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error(transparent)]
    Config(#[from] SettingsError),

    /// The pool is shutting down and no longer hands out connections.
    #[error("connection pool is closed")]
    PoolClosed,
}

impl Error {
    pub(crate) fn destroyed(sql: impl Into<String>, phase: DestroyPhase) -> Self {
        Self::ConnectionDestroyed {
            sql: sql.into(),
            phase,
        }
    }

    /// Check if this error leaves the connection unusable.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_)
                | Self::ConnectionDestroyed { .. }
                | Self::Transport(_)
                | Self::MalformedResponse(_)
        )
    }

    /// Check if retrying on a fresh connection might succeed.
    ///
    /// Nothing is retried automatically; this only informs callers.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::ConnectionDestroyed { .. } | Self::Transport(_))
    }
}
