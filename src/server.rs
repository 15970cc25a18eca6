//! TCP relay server.
//!
//! Exposes local workers to remote clients: every accepted socket gets its
//! own worker from the launcher, and bytes are relayed both ways until
//! either side goes away. Clients reach it with a
//! `provider=adodb-server;host=...;port=...` connection string.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::connection::ConnectionOptions;
use crate::transport::{self, LocalTransport, TextDecoder, Transport, TransportError};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 4023;

/// Accept relay clients on `listener` until the task is dropped.
///
/// `options.connection_string` is what every worker is started with.
pub async fn serve(listener: TcpListener, options: ConnectionOptions) -> std::io::Result<()> {
    let options = Arc::new(options);
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "relay server listening");
    }

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        let options = Arc::clone(&options);
        tokio::spawn(async move {
            tracing::info!(%peer, "relay client connected");
            match relay(socket, peer, &options).await {
                Ok(()) => tracing::info!(%peer, "relay client disconnected"),
                Err(e) => tracing::warn!(%peer, error = %e, "relay ended with an error"),
            }
        });
    }
}

async fn relay(
    socket: TcpStream,
    peer: SocketAddr,
    options: &ConnectionOptions,
) -> Result<(), TransportError> {
    if let Err(e) = socket.set_nodelay(true) {
        tracing::trace!(error = %e, "set_nodelay");
    }
    let (mut reader, mut writer) = socket.into_split();
    let transport_options = options.transport_options();
    let ansi = transport_options.codepages.ansi;
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut early = Vec::new();

    // Watch the socket while waiting for admission; a client that leaves
    // gives up its place in the launcher queue.
    let launch = options.launcher.obtain_worker(
        &options.worker,
        &options.connection_string,
        &options.markers.end,
    );
    tokio::pin!(launch);
    let child = loop {
        tokio::select! {
            child = &mut launch => match child {
                Ok(child) => break child,
                Err(e) => {
                    let block = transport::diagnostic_block(&options.markers, &e.to_string());
                    let _ = writer.write_all(&transport::encode(&block, ansi)).await;
                    let _ = writer.shutdown().await;
                    return Err(e.into());
                }
            },
            read = reader.read(&mut buf) => match read {
                Ok(0) | Err(_) => {
                    tracing::debug!(%peer, "client left before a worker was granted");
                    return Ok(());
                }
                Ok(n) => early.extend_from_slice(&buf[..n]),
            },
        }
    };

    let mut worker = LocalTransport::new(child, &transport_options)?;
    tracing::debug!(%peer, pid = worker.id(), "relaying to worker");

    let mut decoder = TextDecoder::new(ansi);
    if !early.is_empty() {
        let text = decoder.decode(&early);
        worker.write(&text).await?;
    }

    loop {
        tokio::select! {
            chunk = worker.recv() => match chunk {
                Some(text) => {
                    if let Err(e) = writer.write_all(&transport::encode(&text, ansi)).await {
                        worker.kill();
                        return Err(TransportError::WriteFailed(e));
                    }
                }
                None => {
                    tracing::debug!(%peer, "worker finished");
                    let _ = writer.shutdown().await;
                    return Ok(());
                }
            },
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    worker.kill();
                    return Ok(());
                }
                Ok(n) => {
                    let text = decoder.decode(&buf[..n]);
                    if !text.is_empty() {
                        if let Err(e) = worker.write(&text).await {
                            worker.kill();
                            return Err(e);
                        }
                    }
                }
                Err(e) => {
                    worker.kill();
                    return Err(TransportError::ReadFailed(e));
                }
            },
        }
    }
}
