use std::time::Duration;

use adodb::transport::{encode, Codepages, RemoteTransport, Transport, TransportError, TransportOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn pair() -> (RemoteTransport, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let options = TransportOptions::default();
    let (transport, accepted) = tokio::join!(
        RemoteTransport::connect("127.0.0.1", port, &options),
        listener.accept()
    );
    (transport.unwrap(), accepted.unwrap().0)
}

async fn recv_exact(transport: &mut RemoteTransport, expected_len: usize) -> String {
    let mut out = String::new();
    while out.len() < expected_len {
        let chunk = tokio::time::timeout(Duration::from_secs(2), transport.recv())
            .await
            .expect("timed out")
            .expect("stream ended");
        out.push_str(&chunk);
    }
    out
}

#[tokio::test]
async fn test_decodes_ansi_codepage() {
    let (mut transport, mut server) = pair().await;
    let text = "RECORDS\r\nПривет\t\r\n";
    server.write_all(&encode(text, 1251)).await.unwrap();

    assert_eq!(recv_exact(&mut transport, text.len()).await, text);
}

#[tokio::test]
async fn test_write_encodes_ansi_codepage() {
    let (mut transport, mut server) = pair().await;
    transport.write("SQL\r\nSELECT 'Жук'\r\n").await.unwrap();

    let expected = encode("SQL\r\nSELECT 'Жук'\r\n", 1251);
    let mut received = vec![0u8; expected.len()];
    server.read_exact(&mut received).await.unwrap();
    assert_eq!(received, expected);
}

#[tokio::test]
async fn test_switches_codepage() {
    let (mut transport, mut server) = pair().await;
    transport.set_codepages(Codepages { ansi: 866, oem: 866 });
    assert_eq!(transport.codepages().ansi, 866);

    let text = "Ёлка\r\n";
    server.write_all(&encode(text, 866)).await.unwrap();
    assert_eq!(recv_exact(&mut transport, text.len()).await, text);
}

#[tokio::test]
async fn test_server_close_ends_stream() {
    let (mut transport, server) = pair().await;
    drop(server);

    let next = tokio::time::timeout(Duration::from_secs(2), transport.recv())
        .await
        .unwrap();
    assert!(next.is_none());
}

#[tokio::test]
async fn test_kill_closes_socket() {
    let (mut transport, mut server) = pair().await;
    transport.kill();
    assert!(transport.killed());

    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(2), server.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);
    assert!(matches!(
        transport.write("SQL\r\n").await,
        Err(TransportError::Closed)
    ));
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = RemoteTransport::connect("127.0.0.1", port, &TransportOptions::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, TransportError::ConnectFailed { .. }));
    assert!(err.to_string().contains(&format!("127.0.0.1:{port}")));
}
