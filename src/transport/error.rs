use std::io;

use thiserror::Error;

use crate::worker::WorkerError;

/// I/O failures on the channel to a worker.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error(transparent)]
    Launch(#[from] WorkerError),

    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to write to worker: {0}")]
    WriteFailed(#[source] io::Error),

    #[error("failed to read from worker: {0}")]
    ReadFailed(#[source] io::Error),

    /// Write attempted after `kill()` or after the worker went away.
    #[error("transport is closed")]
    Closed,
}

impl TransportError {
    /// Check if the worker is known to be gone.
    pub fn is_closed(&self) -> bool {
        match self {
            Self::Closed => true,
            Self::WriteFailed(e) | Self::ReadFailed(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
