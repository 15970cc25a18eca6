//! # adodb
//!
//! Async client for ADODB worker processes.
//!
//! ## Architecture
//!
//! Queries are executed by worker processes that speak a line-oriented text
//! protocol over their standard streams. A worker runs on this machine or
//! behind a relay server reached over TCP.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                        Pool                              │
//! │  (max connections, idle TTL, FIFO wait queue)            │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                     Connection                           │
//! │  (query queue, protocol machine, end / destroy)          │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [transport]
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │  LocalTransport          │   │  RemoteTransport          │
//! │  (child via Launcher)    │   │  (TCP to relay server)    │
//! └──────────────────────────┘   └──────────────────────────┘
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod server;
pub mod sql;
pub mod transport;
pub mod worker;

pub use config::{Endpoint, Settings, SettingsError};
pub use connection::{Connection, ConnectionOptions};
pub use error::{DestroyPhase, Error, Result};
pub use pool::{Pool, PoolOptions, PoolStatus};
pub use protocol::{Field, FieldKind, Params, Record, ResultSet, Value};
pub use transport::{Transport, TransportError};
pub use worker::{Launcher, WorkerCommand};
