//! Duplex text channels to a worker.
//!
//! A [`Transport`] carries the line protocol to one worker, either a local
//! child process ([`LocalTransport`]) or a relay server over TCP
//! ([`RemoteTransport`]). Both transcode between UTF-8 and the worker's ANSI
//! codepage and both surface failures as an error block in the decoded
//! stream, so the protocol machine sees the same thing regardless of where
//! the worker runs.
//!
//! Flow control: inbound chunks go through a bounded channel, so a slow
//! consumer stops the reader task, which stops reading the pipe or socket.
//! `write` completes once the bytes have been flushed to the OS.

mod codec;
mod error;
mod local;
mod remote;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, watch};

pub use codec::{decode, encode, encoding_for, Codepages, TextDecoder};
pub use error::TransportError;
pub use local::LocalTransport;
pub use remote::RemoteTransport;

use crate::config::Endpoint;
use crate::protocol::Markers;
use crate::worker::{Launcher, WorkerCommand};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Decoded chunks buffered between a reader task and the consumer.
pub const DEFAULT_INBOUND_CAPACITY: usize = 32;

#[async_trait]
pub trait Transport: Send {
    /// Encode `text` with the ANSI codepage and write it.
    ///
    /// Completes when the bytes have been accepted by the channel.
    async fn write(&mut self, text: &str) -> Result<(), TransportError>;

    /// Next decoded chunk, or `None` once every underlying stream has ended.
    ///
    /// Cancel safe.
    async fn recv(&mut self) -> Option<String>;

    /// Switch codepages, typically after the worker reported its locale.
    fn set_codepages(&mut self, codepages: Codepages);

    fn codepages(&self) -> Codepages;

    /// Forcibly terminate the worker or drop the socket. Idempotent.
    fn kill(&mut self);

    fn killed(&self) -> bool;
}

/// Settings shared by both transports.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub markers: Markers,
    pub codepages: Codepages,
    pub inbound_capacity: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            markers: Markers::default(),
            codepages: Codepages::default(),
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
        }
    }
}

/// Open the transport selected by `endpoint`.
///
/// Local workers are started through `launcher`, which may delay the call.
pub async fn open(
    endpoint: &Endpoint,
    options: &TransportOptions,
    launcher: &Launcher,
    worker: &WorkerCommand,
) -> Result<Box<dyn Transport>, TransportError> {
    match endpoint {
        Endpoint::Local { connection_string } => {
            let child = launcher
                .obtain_worker(worker, connection_string, &options.markers.end)
                .await?;
            Ok(Box::new(LocalTransport::new(child, options)?))
        }
        Endpoint::Remote { host, port } => {
            Ok(Box::new(RemoteTransport::connect(host, *port, options).await?))
        }
    }
}

/// Error block carrying out-of-band diagnostics.
///
/// Starts with a newline so a pending partial line cannot swallow the marker.
pub fn diagnostic_block(markers: &Markers, text: &str) -> String {
    format!("\n{}\n{}\n{}\n", markers.error, text.trim(), markers.end)
}

/// Read `reader` to the end, decoding with the current ANSI codepage and
/// forwarding chunks to `tx`.
///
/// Returns early if the receiving side is gone. Read errors are reported
/// in-band as a diagnostic block.
pub(crate) async fn pump_decoded<R>(
    mut reader: R,
    tx: mpsc::Sender<String>,
    mut codepages: watch::Receiver<Codepages>,
    markers: Markers,
) where
    R: AsyncRead + Unpin,
{
    let mut decoder = TextDecoder::new(codepages.borrow_and_update().ansi);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(error = %e, "worker stream read failed");
                let error = TransportError::ReadFailed(e);
                let _ = tx.send(diagnostic_block(&markers, &error.to_string())).await;
                return;
            }
        };

        if codepages.has_changed().unwrap_or(false) {
            let ansi = codepages.borrow_and_update().ansi;
            if ansi != decoder.codepage() {
                tracing::debug!(codepage = ansi, "switching inbound codepage");
                // Flush anything pending under the old codepage first.
                let tail = decoder.finish();
                if !tail.is_empty() && tx.send(tail).await.is_err() {
                    return;
                }
                decoder.switch(ansi);
            }
        }

        let text = decoder.decode(&buf[..n]);
        if !text.is_empty() && tx.send(text).await.is_err() {
            return;
        }
    }

    let tail = decoder.finish();
    if !tail.is_empty() {
        let _ = tx.send(tail).await;
    }
}
