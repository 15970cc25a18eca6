#![cfg(unix)]

#[path = "../support/mod.rs"]
mod support;

use std::sync::Arc;
use std::time::Duration;

use adodb::config::Endpoint;
use adodb::protocol::{LineEnding, Markers};
use adodb::transport::{self, diagnostic_block, Transport, TransportError, TransportOptions};
use adodb::{Connection, ConnectionOptions, Error, Launcher, Params, Value, WorkerCommand};
use support::{sh, SCRIPT_WORKER};

async fn open(script: &str) -> Box<dyn Transport> {
    let launcher = Launcher::new(Duration::ZERO);
    let endpoint = Endpoint::Local {
        connection_string: "Provider=Test;Data Source=test.mdb".to_string(),
    };
    transport::open(&endpoint, &TransportOptions::default(), &launcher, &sh(script))
        .await
        .unwrap()
}

async fn read_all(transport: &mut Box<dyn Transport>) -> String {
    let mut out = String::new();
    let collect = async {
        while let Some(chunk) = transport.recv().await {
            out.push_str(&chunk);
        }
    };
    tokio::time::timeout(Duration::from_secs(5), collect)
        .await
        .expect("worker did not finish");
    out
}

#[tokio::test]
async fn test_reads_stdout_until_exit() {
    let mut transport = open("printf 'LOCALS\\r\\nhello\\r\\n'").await;
    let out = read_all(&mut transport).await;
    assert_eq!(out, "LOCALS\r\nhello\r\n");
}

#[tokio::test]
async fn test_worker_receives_connection_string_and_marker() {
    let mut transport = open("printf '%s\\n%s\\n' \"$1\" \"$2\"").await;
    let out = read_all(&mut transport).await;
    let markers = Markers::default();
    assert_eq!(
        out,
        format!("Provider=Test;Data Source=test.mdb\n{}\n", markers.end)
    );
}

#[tokio::test]
async fn test_stderr_becomes_error_block() {
    let mut transport = open("echo '  Provider cannot be found.  ' >&2; exit 1").await;
    let out = read_all(&mut transport).await;
    assert_eq!(
        out,
        diagnostic_block(&Markers::default(), "Provider cannot be found.")
    );
}

#[tokio::test]
async fn test_stream_ends_after_both_channels_close() {
    // Stderr stays open a little longer than stdout.
    let mut transport = open("printf 'out\\n'; exec 1>&-; sleep 0.2; echo late >&2").await;
    let out = read_all(&mut transport).await;
    assert!(out.starts_with("out\n"), "{out:?}");
    assert!(out.contains("late"), "{out:?}");
}

#[tokio::test]
async fn test_write_round_trips_through_codepage() {
    let mut transport = open("cat").await;
    transport.write("SQL\r\nSELECT 'Привет'\r\n").await.unwrap();

    let mut received = String::new();
    while received.len() < "SQL\r\nSELECT 'Привет'\r\n".len() {
        let chunk = tokio::time::timeout(Duration::from_secs(2), transport.recv())
            .await
            .unwrap()
            .unwrap();
        received.push_str(&chunk);
    }
    assert_eq!(received, "SQL\r\nSELECT 'Привет'\r\n");
    transport.kill();
}

#[tokio::test]
async fn test_kill_is_idempotent() {
    let mut transport = open("sleep 5").await;
    assert!(!transport.killed());

    transport.kill();
    transport.kill();
    assert!(transport.killed());

    let next = tokio::time::timeout(Duration::from_secs(1), transport.recv())
        .await
        .unwrap();
    assert!(next.is_none());
    assert!(matches!(
        transport.write("SQL\r\n").await,
        Err(TransportError::Closed)
    ));
}

#[tokio::test]
async fn test_missing_program_fails_to_launch() {
    let launcher = Launcher::new(Duration::ZERO);
    let endpoint = Endpoint::Local {
        connection_string: "Provider=Test".to_string(),
    };
    let result = transport::open(
        &endpoint,
        &TransportOptions::default(),
        &launcher,
        &WorkerCommand::new("/nonexistent/adodb-worker"),
    )
    .await;
    assert!(matches!(result, Err(TransportError::Launch(_))));
}

fn local_options() -> ConnectionOptions {
    let mut options = ConnectionOptions::new("Provider=Test;Data Source=test.mdb");
    options.worker = sh(SCRIPT_WORKER);
    options.launcher = Arc::new(Launcher::new(Duration::ZERO));
    options.line_ending = LineEnding::Lf;
    options
}

#[tokio::test]
async fn test_connection_over_local_worker() {
    let conn = Connection::new(local_options()).unwrap();

    let result = conn.query("SELECT n, r FROM t", &Params::new()).await.unwrap();
    assert_eq!(result.records.len(), 1);
    assert_eq!(result.records[0].get("n"), Some(&Value::Int(42)));
    assert_eq!(result.records[0].get("r"), Some(&Value::Float(3.5)));

    conn.end();
    tokio::time::timeout(Duration::from_secs(2), conn.closed())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_worker_diagnostics_fail_the_query() {
    let conn = Connection::new(local_options()).unwrap();
    conn.connect().await.unwrap();

    let err = conn.query("BROKEN", &Params::new()).await.unwrap_err();
    match err {
        Error::Protocol(message) => assert_eq!(message, "Provider cannot be found."),
        other => panic!("expected protocol error, got {other:?}"),
    }
    assert!(conn.is_destroyed());
}
