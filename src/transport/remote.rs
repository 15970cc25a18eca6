use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::codec::{self, Codepages};
use super::error::TransportError;
use super::{pump_decoded, Transport, TransportOptions};

/// Transport over a TCP connection to a relay server.
///
/// The relay speaks the same line protocol as a local worker, so there is no
/// handshake beyond the worker's own `LOCALS` block.
pub struct RemoteTransport {
    addr: String,
    writer: Option<OwnedWriteHalf>,
    rx: mpsc::Receiver<String>,
    codepages: Codepages,
    codepages_tx: watch::Sender<Codepages>,
    reader: JoinHandle<()>,
    killed: bool,
}

impl RemoteTransport {
    pub async fn connect(
        host: &str,
        port: u16,
        options: &TransportOptions,
    ) -> Result<Self, TransportError> {
        let addr = format!("{host}:{port}");
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| TransportError::ConnectFailed {
                addr: addr.clone(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::trace!(error = %e, "set_nodelay");
        }
        tracing::debug!(%addr, "connected to relay");
        Ok(Self::from_stream(stream, addr, options))
    }

    fn from_stream(stream: TcpStream, addr: String, options: &TransportOptions) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::channel(options.inbound_capacity.max(1));
        let (codepages_tx, codepages_rx) = watch::channel(options.codepages);

        let reader = tokio::spawn(pump_decoded(
            read_half,
            tx,
            codepages_rx,
            options.markers.clone(),
        ));

        Self {
            addr,
            writer: Some(write_half),
            rx,
            codepages: options.codepages,
            codepages_tx,
            reader,
            killed: false,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Transport for RemoteTransport {
    async fn write(&mut self, text: &str) -> Result<(), TransportError> {
        let writer = self.writer.as_mut().ok_or(TransportError::Closed)?;
        let bytes = codec::encode(text, self.codepages.ansi);
        writer
            .write_all(&bytes)
            .await
            .map_err(TransportError::WriteFailed)?;
        writer.flush().await.map_err(TransportError::WriteFailed)
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
        // Dropping both halves closes the socket.
        self.writer = None;
        self.reader.abort();
        self.rx.close();
        tracing::debug!(addr = %self.addr, "relay connection closed");
    }

    fn killed(&self) -> bool {
        self.killed
    }
}

impl Drop for RemoteTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
