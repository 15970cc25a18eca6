//! Worker-specific error types.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors that can occur while launching a worker.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Failed to spawn the worker process.
    #[error("failed to spawn worker process {}: {source}", .program.display())]
    SpawnFailed {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The process started without one of its standard streams.
    #[error("worker {0} was not captured")]
    PipeMissing(&'static str),
}

impl WorkerError {
    /// Check if the worker executable could not be found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SpawnFailed { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }

    /// Check if this error is retriable.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::SpawnFailed { source, .. } => !matches!(
                source.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ),
            Self::PipeMissing(_) => false,
        }
    }
}
