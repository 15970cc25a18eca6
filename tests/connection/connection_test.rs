#[path = "../support/mod.rs"]
mod support;

use std::time::Duration;

use adodb::{Connection, ConnectionOptions, DestroyPhase, Error, Params, Value};
use support::FakeWorker;

async fn connect(worker: &FakeWorker) -> Connection {
    let conn = Connection::new(ConnectionOptions::new(worker.connection_string())).unwrap();
    conn.connect().await.unwrap();
    conn
}

#[tokio::test]
async fn test_query_round_trip() {
    let worker = FakeWorker::start().await;
    let conn = connect(&worker).await;
    assert!(conn.is_idle());

    let result = conn.query("SELECT 4", &Params::new()).await.unwrap();
    assert_eq!(result.fields.len(), 1);
    assert_eq!(result.fields[0].name, "n");
    assert_eq!(result.records.len(), 1);
    assert_eq!(result.records[0].get("n"), Some(&Value::Int(4)));
    assert!(conn.is_idle());
}

#[tokio::test]
async fn test_query_opens_connection_lazily() {
    let worker = FakeWorker::start().await;
    let conn = Connection::new(ConnectionOptions::new(worker.connection_string())).unwrap();
    assert_eq!(worker.accepted(), 0);

    let result = conn.query("SELECT 9", &Params::new()).await.unwrap();
    assert_eq!(result.records[0].get("n"), Some(&Value::Int(9)));
    assert_eq!(worker.accepted(), 1);
}

#[tokio::test]
async fn test_null_parameter_is_sent_as_literal() {
    let worker = FakeWorker::start().await;
    let conn = connect(&worker).await;

    let mut params = Params::new();
    params.insert("amount".to_string(), Value::Null);
    let result = conn
        .query("ECHO amount = :amount", &params)
        .await
        .unwrap();
    assert_eq!(
        result.records[0].get("text"),
        Some(&Value::Text("amount = NULL".to_string()))
    );
}

#[tokio::test]
async fn test_cyrillic_text_survives_codepage() {
    let worker = FakeWorker::start().await;
    let conn = connect(&worker).await;

    let mut params = Params::new();
    params.insert("name".to_string(), Value::from("Привет"));
    let result = conn.query("ECHO :name", &params).await.unwrap();
    assert_eq!(
        result.records[0].get("text"),
        Some(&Value::Text("'Привет'".to_string()))
    );
}

#[tokio::test]
async fn test_comments_are_stripped_before_sending() {
    let worker = FakeWorker::start().await;
    let conn = connect(&worker).await;

    let result = conn
        .query("/* header */ SELECT 7 -- trailing", &Params::new())
        .await
        .unwrap();
    assert_eq!(result.records[0].get("n"), Some(&Value::Int(7)));
}

#[tokio::test]
async fn test_sql_file_reference() {
    let worker = FakeWorker::start().await;
    let conn = connect(&worker).await;

    let dir = std::env::temp_dir().join(format!("adodb-conn-test-{}", uuid::Uuid::new_v4()));
    tokio::fs::create_dir_all(&dir).await.unwrap();
    let path = dir.join("count.sql");
    tokio::fs::write(&path, "-- count orders\nSELECT 12\n").await.unwrap();

    let result = conn
        .query(path.to_str().unwrap(), &Params::new())
        .await
        .unwrap();
    assert_eq!(result.records[0].get("n"), Some(&Value::Int(12)));

    let missing = conn
        .query(dir.join("missing.sql").to_str().unwrap(), &Params::new())
        .await;
    assert!(matches!(missing, Err(Error::SqlFile { .. })));

    tokio::fs::remove_dir_all(&dir).await.unwrap();
}

#[tokio::test]
async fn test_queries_complete_in_submission_order() {
    let worker = FakeWorker::start().await;
    let conn = connect(&worker).await;
    let params = Params::new();

    let (slow, fast) = tokio::join!(
        conn.query("SLEEP 150", &params),
        conn.query("SELECT 1", &params)
    );
    assert_eq!(slow.unwrap().records[0].get("n"), Some(&Value::Int(150)));
    assert_eq!(fast.unwrap().records[0].get("n"), Some(&Value::Int(1)));
    assert_eq!(worker.queries(), 2);
}

#[tokio::test]
async fn test_worker_error_fails_query_and_destroys_connection() {
    let worker = FakeWorker::start().await;
    let conn = connect(&worker).await;

    let err = conn
        .query("FAIL Syntax error in FROM clause.", &Params::new())
        .await
        .unwrap_err();
    match err {
        Error::Protocol(message) => assert_eq!(message, "Syntax error in FROM clause."),
        other => panic!("expected protocol error, got {other:?}"),
    }

    conn.closed().await;
    assert!(conn.is_destroyed());
    worker.wait_active(0).await;
}

#[tokio::test]
async fn test_destroy_fails_in_flight_and_queued_queries() {
    let worker = FakeWorker::start().await;
    let conn = connect(&worker).await;
    let params = Params::new();

    let in_flight = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.query("SLEEP 1000", &Params::new()).await })
    };
    let queued = {
        let conn = conn.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            conn.query("SELECT 2", &Params::new()).await
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    conn.destroy();
    conn.destroy();

    match in_flight.await.unwrap() {
        Err(Error::ConnectionDestroyed { sql, phase }) => {
            assert_eq!(sql, "SLEEP 1000");
            assert_eq!(phase, DestroyPhase::InFlight);
        }
        other => panic!("expected in-flight destroy, got {other:?}"),
    }
    match queued.await.unwrap() {
        Err(Error::ConnectionDestroyed { sql, phase }) => {
            assert_eq!(sql, "SELECT 2");
            assert_eq!(phase, DestroyPhase::Queued);
        }
        other => panic!("expected queued destroy, got {other:?}"),
    }

    assert!(conn.query("SELECT 3", &params).await.is_err());
    worker.wait_active(0).await;
}

#[tokio::test]
async fn test_worker_crash_destroys_connection() {
    let worker = FakeWorker::start().await;
    let conn = connect(&worker).await;

    let err = conn.query("CRASH", &Params::new()).await.unwrap_err();
    assert!(matches!(
        err,
        Error::ConnectionDestroyed {
            phase: DestroyPhase::InFlight,
            ..
        }
    ));
    assert!(conn.is_destroyed());
}

#[tokio::test]
async fn test_end_sends_terminator_and_rejects_new_queries() {
    let worker = FakeWorker::start().await;
    let conn = connect(&worker).await;

    conn.end();
    assert!(matches!(
        conn.query("SELECT 1", &Params::new()).await,
        Err(Error::ConnectionEnding)
    ));

    tokio::time::timeout(Duration::from_secs(2), conn.closed())
        .await
        .unwrap();
    assert_eq!(worker.graceful_exits(), 1);
    worker.wait_active(0).await;
}

#[tokio::test]
async fn test_end_waits_for_queued_work() {
    let worker = FakeWorker::start().await;
    let conn = connect(&worker).await;

    let pending = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.query("SLEEP 100", &Params::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    conn.end();

    let result = pending.await.unwrap().unwrap();
    assert_eq!(result.records[0].get("n"), Some(&Value::Int(100)));

    tokio::time::timeout(Duration::from_secs(2), conn.closed())
        .await
        .unwrap();
    assert_eq!(worker.graceful_exits(), 1);
}

#[tokio::test]
async fn test_connect_to_closed_port_fails() {
    let worker = FakeWorker::start().await;
    let conn_str = worker.connection_string();
    drop(worker);
    tokio::time::sleep(Duration::from_millis(20)).await;

    let conn = Connection::new(ConnectionOptions::new(conn_str)).unwrap();
    let err = conn.connect().await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
}

#[test]
fn test_invalid_remote_connection_string() {
    let err = Connection::new(ConnectionOptions::new("provider=adodb-server;host=localhost;port=x"))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConnectionString(_)));
}
