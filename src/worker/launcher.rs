//! Rate-limited worker creation.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, LazyLock, PoisonError};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::error::{WorkerError, WorkerResult};
use super::WorkerCommand;

/// Default spacing between two worker launches.
pub const DEFAULT_MIN_CREATION_INTERVAL: Duration = Duration::from_millis(1000);

static SHARED: LazyLock<std::sync::Mutex<HashMap<Duration, Arc<Launcher>>>> =
    LazyLock::new(Default::default);

/// Serializes worker creation and spaces launches at least
/// `min_interval` apart.
///
/// The scripting host the worker runs under fails when several instances
/// start in quick succession, so every local connection goes through one
/// launcher. Requests are admitted in arrival order: the tokio mutex is fair.
#[derive(Debug)]
pub struct Launcher {
    min_interval: Duration,
    last_grant: Mutex<Option<Instant>>,
}

impl Launcher {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_grant: Mutex::new(None),
        }
    }

    /// Process-wide launcher with the default interval.
    pub fn global() -> Arc<Launcher> {
        Self::shared(DEFAULT_MIN_CREATION_INTERVAL)
    }

    /// Process-wide launcher for `min_interval`.
    ///
    /// Every caller configured with the same interval gets the same
    /// admission queue.
    pub fn shared(min_interval: Duration) -> Arc<Launcher> {
        let mut launchers = SHARED.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            launchers
                .entry(min_interval)
                .or_insert_with(|| Arc::new(Launcher::new(min_interval))),
        )
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Start a worker for `connection_string` once admission allows.
    ///
    /// The worker receives the connection string and end marker as its last
    /// two arguments and has all three standard streams piped.
    pub async fn obtain_worker(
        &self,
        command: &WorkerCommand,
        connection_string: &str,
        end_marker: &str,
    ) -> WorkerResult<Child> {
        let mut last_grant = self.last_grant.lock().await;

        if let Some(last) = *last_grant {
            let ready_at = last + self.min_interval;
            if ready_at > Instant::now() {
                tracing::debug!(
                    wait_ms = (ready_at - Instant::now()).as_millis() as u64,
                    "worker creation throttled"
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }

        let child = Command::new(&command.program)
            .args(&command.args)
            .arg(connection_string)
            .arg(end_marker)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| WorkerError::SpawnFailed {
                program: command.program.clone(),
                source,
            })?;

        *last_grant = Some(Instant::now());
        tracing::debug!(
            program = %command.program.display(),
            pid = child.id(),
            "worker started"
        );
        Ok(child)
    }
}
