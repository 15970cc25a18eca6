//! In-process fake worker speaking the line protocol over TCP.
//!
//! Reached with a `provider=adodb-server` connection string, so tests run
//! the real `RemoteTransport`, connection driver and pool against it.
//!
//! Statements understood (after comment stripping and parameter binding):
//!
//! - `SELECT <n> [AS n]`: one integer column `n`
//! - `SLEEP <ms>`: waits, then answers like `SELECT <ms>`
//! - `ECHO <text>`: one text column `text`
//! - `FAIL <message>`: an error block carrying `message`
//! - `CRASH`: drops the socket without answering
//! - anything else: an empty result

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use adodb::protocol::{LineSplitter, Markers};
use adodb::WorkerCommand;
use adodb::transport::{encode, TextDecoder};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const LOCALS: &str =
    r#"{"sShortDate":"dd.MM.yyyy","sTimeFormat":"H:mm:ss","sDecimal":",","ACP":1251,"OEMCP":866}"#;

const CODEPAGE: u16 = 1251;

#[derive(Debug, Default)]
pub struct Counters {
    pub accepted: AtomicUsize,
    pub active: AtomicUsize,
    pub peak_active: AtomicUsize,
    pub queries: AtomicUsize,
    /// Sessions closed by the client's end marker.
    pub graceful_exits: AtomicUsize,
}

pub struct FakeWorker {
    addr: SocketAddr,
    counters: Arc<Counters>,
    handle: JoinHandle<()>,
}

impl FakeWorker {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let counters = Arc::new(Counters::default());

        let shared = Arc::clone(&counters);
        let handle = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let counters = Arc::clone(&shared);
                tokio::spawn(session(socket, counters));
            }
        });

        Self {
            addr,
            counters,
            handle,
        }
    }

    pub fn connection_string(&self) -> String {
        format!(
            "provider=adodb-server;host={};port={}",
            self.addr.ip(),
            self.addr.port()
        )
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn accepted(&self) -> usize {
        self.counters.accepted.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    pub fn peak_active(&self) -> usize {
        self.counters.peak_active.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> usize {
        self.counters.queries.load(Ordering::SeqCst)
    }

    pub fn graceful_exits(&self) -> usize {
        self.counters.graceful_exits.load(Ordering::SeqCst)
    }

    /// Poll until `active()` equals `expected`, for at most two seconds.
    pub async fn wait_active(&self, expected: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while self.active() != expected {
            if tokio::time::Instant::now() >= deadline {
                panic!("expected {} active sessions, have {}", expected, self.active());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for FakeWorker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct ActiveGuard(Arc<Counters>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn session(mut socket: TcpStream, counters: Arc<Counters>) {
    counters.accepted.fetch_add(1, Ordering::SeqCst);
    let active = counters.active.fetch_add(1, Ordering::SeqCst) + 1;
    counters.peak_active.fetch_max(active, Ordering::SeqCst);
    let _guard = ActiveGuard(Arc::clone(&counters));

    let markers = Markers::default();
    let handshake = block("LOCALS", &[LOCALS], &markers);
    if socket.write_all(&encode(&handshake, CODEPAGE)).await.is_err() {
        return;
    }

    let mut decoder = TextDecoder::new(CODEPAGE);
    let mut splitter = LineSplitter::new();
    let mut in_sql = false;
    let mut statement: Vec<String> = Vec::new();
    let mut buf = vec![0u8; 4096];

    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        let text = decoder.decode(&buf[..n]);
        for line in splitter.push(&text) {
            if !in_sql {
                if line == "SQL" {
                    in_sql = true;
                } else if line == markers.end {
                    counters.graceful_exits.fetch_add(1, Ordering::SeqCst);
                    let _ = socket.shutdown().await;
                    return;
                }
                continue;
            }
            if line != markers.end {
                statement.push(line);
                continue;
            }

            in_sql = false;
            let sql = std::mem::take(&mut statement).join("\n");
            counters.queries.fetch_add(1, Ordering::SeqCst);
            let Some(reply) = respond(sql.trim(), &markers).await else {
                return;
            };
            if socket.write_all(&encode(&reply, CODEPAGE)).await.is_err() {
                return;
            }
        }
    }
}

fn block(header: &str, body: &[&str], markers: &Markers) -> String {
    let mut out = format!("{}\r\n", header);
    for line in body {
        out.push_str(line);
        out.push_str("\r\n");
    }
    out.push_str(&markers.end);
    out.push_str("\r\n");
    out
}

fn int_result(n: &str, markers: &Markers) -> String {
    let mut out = block(
        "FIELDS",
        &[r#"[{"Name":"n","Type":3,"Precision":10,"NumericScale":255}]"#],
        markers,
    );
    out.push_str(&block("RECORDS", &[format!("{}\t", n).as_str()], markers));
    out
}

/// `None` means drop the connection.
async fn respond(statement: &str, markers: &Markers) -> Option<String> {
    let (verb, rest) = statement
        .split_once(char::is_whitespace)
        .unwrap_or((statement, ""));
    let rest = rest.trim();

    let reply = match verb.to_ascii_uppercase().as_str() {
        "SELECT" => int_result(rest.split_whitespace().next().unwrap_or("0"), markers),
        "SLEEP" => {
            let ms: u64 = rest.parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            int_result(rest, markers)
        }
        "ECHO" => {
            let mut out = block(
                "FIELDS",
                &[r#"[{"Name":"text","Type":202,"Precision":255,"NumericScale":255}]"#],
                markers,
            );
            out.push_str(&block("RECORDS", &[format!("{}\t", rest).as_str()], markers));
            out
        }
        "FAIL" => format!("{}\r\n{}\r\n{}\r\n", markers.error, rest, markers.end),
        "CRASH" => return None,
        _ => block("RECORDS", &[], markers),
    };
    Some(reply)
}

/// `sh -c <script>`; the launcher appends the connection string and end
/// marker, which the script sees as `$1` and `$2`.
pub fn sh(script: &str) -> WorkerCommand {
    WorkerCommand::new("/bin/sh")
        .arg("-c")
        .arg(script)
        .arg("adodb-worker")
}

/// Shell worker for LF-framed requests. `BROKEN...` statements make it
/// report on stderr and exit; everything else returns `n=42, r=3,5`.
pub const SCRIPT_WORKER: &str = r#"
end="$2"
printf 'LOCALS\n%s\n%s\n' '{"sShortDate":"dd.MM.yyyy","sTimeFormat":"H:mm:ss","sDecimal":",","ACP":1251,"OEMCP":866}' "$end"
insql=
while IFS= read -r line; do
  if [ "$line" = "$end" ]; then
    if [ -z "$insql" ]; then exit 0; fi
    insql=
    case "$sql" in
      BROKEN*) echo 'Provider cannot be found.' >&2; exit 1 ;;
    esac
    printf 'FIELDS\n%s\n%s\nRECORDS\n42\t3,5\t\n%s\n' '[{"Name":"n","Type":3},{"Name":"r","Type":5}]' "$end" "$end"
  elif [ "$line" = "SQL" ]; then
    insql=1
    sql=
  else
    sql="$line"
  fi
done
"#;
