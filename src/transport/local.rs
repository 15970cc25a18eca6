use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::codec::{self, Codepages};
use super::error::TransportError;
use super::{diagnostic_block, pump_decoded, Transport, TransportOptions};
use crate::protocol::Markers;
use crate::worker::WorkerError;

/// Transport over a local worker's standard streams.
///
/// Stdout carries the protocol. Whatever the worker writes to stderr is
/// decoded with the OEM codepage and, once stderr closes, injected into the
/// stream as an error block. The stream ends only after both have closed.
pub struct LocalTransport {
    child: Child,
    stdin: Option<ChildStdin>,
    rx: mpsc::Receiver<String>,
    codepages: Codepages,
    codepages_tx: watch::Sender<Codepages>,
    readers: [JoinHandle<()>; 2],
    killed: bool,
}

impl LocalTransport {
    /// Wrap a worker started by the launcher.
    pub fn new(mut child: Child, options: &TransportOptions) -> Result<Self, TransportError> {
        let stdin = child.stdin.take().ok_or(WorkerError::PipeMissing("stdin"))?;
        let stdout = child.stdout.take().ok_or(WorkerError::PipeMissing("stdout"))?;
        let stderr = child.stderr.take().ok_or(WorkerError::PipeMissing("stderr"))?;

        let (tx, rx) = mpsc::channel(options.inbound_capacity.max(1));
        let (codepages_tx, codepages_rx) = watch::channel(options.codepages);

        let stdout_task = tokio::spawn(pump_decoded(
            stdout,
            tx.clone(),
            codepages_rx.clone(),
            options.markers.clone(),
        ));
        let stderr_task = tokio::spawn(collect_diagnostics(
            stderr,
            tx,
            codepages_rx,
            options.markers.clone(),
        ));

        Ok(Self {
            child,
            stdin: Some(stdin),
            rx,
            codepages: options.codepages,
            codepages_tx,
            readers: [stdout_task, stderr_task],
            killed: false,
        })
    }

    /// Process id, while the worker is running.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

/// Buffer stderr until it closes, then emit it as one error block.
async fn collect_diagnostics(
    mut stderr: ChildStderr,
    tx: mpsc::Sender<String>,
    codepages: watch::Receiver<Codepages>,
    markers: Markers,
) {
    let mut bytes = Vec::new();
    if let Err(e) = stderr.read_to_end(&mut bytes).await {
        tracing::debug!(error = %e, "worker stderr read failed");
    }

    let oem = codepages.borrow().oem;
    let text = codec::decode(&bytes, oem);
    let text = text.trim();
    if !text.is_empty() {
        tracing::debug!(diagnostic = text, "worker wrote to stderr");
        let _ = tx.send(diagnostic_block(&markers, text)).await;
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn write(&mut self, text: &str) -> Result<(), TransportError> {
        let stdin = self.stdin.as_mut().ok_or(TransportError::Closed)?;
        let bytes = codec::encode(text, self.codepages.ansi);
        stdin
            .write_all(&bytes)
            .await
            .map_err(TransportError::WriteFailed)?;
        stdin.flush().await.map_err(TransportError::WriteFailed)
    }

    async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    fn set_codepages(&mut self, codepages: Codepages) {
        self.codepages = codepages;
        self.codepages_tx.send_replace(codepages);
    }

    fn codepages(&self) -> Codepages {
        self.codepages
    }

    fn kill(&mut self) {
        if self.killed {
            return;
        }
        self.killed = true;
        self.stdin = None;
        if let Err(e) = self.child.start_kill() {
            // Already exited.
            tracing::trace!(error = %e, "worker kill");
        }
        for reader in &self.readers {
            reader.abort();
        }
        self.rx.close();
    }

    fn killed(&self) -> bool {
        self.killed
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}
