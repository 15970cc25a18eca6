#![cfg(unix)]

#[path = "../support/mod.rs"]
mod support;

use std::sync::Arc;
use std::time::Duration;

use adodb::protocol::LineEnding;
use adodb::server;
use adodb::{Connection, ConnectionOptions, Error, Launcher, Params, Value, WorkerCommand};
use support::{sh, SCRIPT_WORKER};
use tokio::net::TcpListener;

async fn start_relay(worker: WorkerCommand) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut options = ConnectionOptions::new("Provider=Test;Data Source=test.mdb");
    options.worker = worker;
    options.launcher = Arc::new(Launcher::new(Duration::ZERO));
    tokio::spawn(server::serve(listener, options));

    format!("provider=adodb-server;host=127.0.0.1;port={port}")
}

fn client(conn_str: String) -> Connection {
    let mut options = ConnectionOptions::new(conn_str);
    options.line_ending = LineEnding::Lf;
    Connection::new(options).unwrap()
}

#[tokio::test]
async fn test_query_through_relay() {
    let conn_str = start_relay(sh(SCRIPT_WORKER)).await;
    let conn = client(conn_str);

    let result = conn.query("SELECT n, r FROM t", &Params::new()).await.unwrap();
    assert_eq!(result.records[0].get("n"), Some(&Value::Int(42)));
    assert_eq!(result.records[0].get("r"), Some(&Value::Float(3.5)));

    conn.end();
    tokio::time::timeout(Duration::from_secs(2), conn.closed())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_each_client_gets_its_own_worker() {
    let conn_str = start_relay(sh(SCRIPT_WORKER)).await;
    let first = client(conn_str.clone());
    let second = client(conn_str);

    let params = Params::new();
    let (a, b) = tokio::join!(
        first.query("SELECT 1", &params),
        second.query("SELECT 2", &params)
    );
    assert!(a.is_ok());
    assert!(b.is_ok());
    first.destroy();
    second.destroy();
}

#[tokio::test]
async fn test_worker_diagnostics_reach_client() {
    let conn_str = start_relay(sh(SCRIPT_WORKER)).await;
    let conn = client(conn_str);

    let err = conn.query("BROKEN", &Params::new()).await.unwrap_err();
    assert!(matches!(err, Error::Protocol(ref m) if m == "Provider cannot be found."));
}

#[tokio::test]
async fn test_launch_failure_is_reported_to_client() {
    let conn_str = start_relay(WorkerCommand::new("/nonexistent/adodb-worker")).await;
    let conn = client(conn_str);

    let err = conn.connect().await.unwrap_err();
    match err {
        Error::Protocol(message) => assert!(message.contains("/nonexistent/adodb-worker"), "{message}"),
        other => panic!("expected protocol error, got {other:?}"),
    }
}
