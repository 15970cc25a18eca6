//! Single-writer task behind a [`Connection`](super::Connection).
//!
//! All protocol state lives here and is only touched from this task, one
//! command or one line at a time.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use uuid::Uuid;

use super::{ConnectionOptions, Status};
use crate::config::Endpoint;
use crate::error::{DestroyPhase, Error, Result};
use crate::protocol::{self, Event, LineSplitter, Machine, ResultSet};
use crate::transport::{self, Codepages, Transport, TransportError};

pub(super) enum Command {
    Connect {
        reply: oneshot::Sender<Result<()>>,
    },
    Query {
        sql: String,
        reply: oneshot::Sender<Result<ResultSet>>,
    },
    End,
    Destroy,
}

struct PendingQuery {
    sql: String,
    reply: oneshot::Sender<Result<ResultSet>>,
}

type OpenFuture = BoxFuture<'static, std::result::Result<Box<dyn Transport>, TransportError>>;

pub(super) enum Link {
    /// Not opened yet; the first query or `connect()` opens it.
    Pending(Endpoint),
    Opening(OpenFuture),
    Open(Box<dyn Transport>),
    Closed,
}

enum LinkEvent {
    Opened(std::result::Result<Box<dyn Transport>, TransportError>),
    Text(String),
    Closed,
}

async fn next_link_event(link: &mut Link) -> LinkEvent {
    match link {
        Link::Opening(open) => LinkEvent::Opened(open.await),
        Link::Open(transport) => transport
            .recv()
            .await
            .map_or(LinkEvent::Closed, LinkEvent::Text),
        Link::Pending(_) | Link::Closed => std::future::pending().await,
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Copy an error for additional `connect()` waiters.
fn replicate(err: &Error) -> Error {
    match err {
        Error::Protocol(message) => Error::Protocol(message.clone()),
        Error::MalformedResponse(message) => Error::MalformedResponse(message.clone()),
        other => Error::Protocol(other.to_string()),
    }
}

pub(super) struct Driver {
    id: Uuid,
    options: ConnectionOptions,
    status: Arc<Status>,
    commands: mpsc::UnboundedReceiver<Command>,
    closed: watch::Sender<bool>,
    link: Link,
    machine: Machine,
    lines: LineSplitter,
    queue: VecDeque<PendingQuery>,
    in_flight: Option<PendingQuery>,
    connect_waiters: Vec<oneshot::Sender<Result<()>>>,
    established: bool,
    ending: bool,
    destroyed: bool,
    /// Set once the shutdown terminator went out; the worker is killed if it
    /// has not closed the stream by then.
    end_deadline: Option<Instant>,
}

impl Driver {
    pub(super) fn new(
        id: Uuid,
        options: ConnectionOptions,
        status: Arc<Status>,
        commands: mpsc::UnboundedReceiver<Command>,
        closed: watch::Sender<bool>,
        link: Link,
    ) -> Self {
        let machine = Machine::new(options.markers.clone());
        Self {
            id,
            options,
            status,
            commands,
            closed,
            link,
            machine,
            lines: LineSplitter::new(),
            queue: VecDeque::new(),
            in_flight: None,
            connect_waiters: Vec::new(),
            established: false,
            ending: false,
            destroyed: false,
            end_deadline: None,
        }
    }

    pub(super) async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => {
                        tracing::debug!(connection = %self.id, "all handles dropped");
                        self.destroy();
                    }
                },
                event = next_link_event(&mut self.link) => self.on_link_event(event).await,
                _ = deadline(self.end_deadline) => {
                    tracing::warn!(connection = %self.id, "worker did not exit after end, killing it");
                    self.close_link();
                }
            }

            self.sync_status();
            if matches!(self.link, Link::Closed) {
                break;
            }
        }

        self.fail_outstanding();
        self.sync_status();
        tracing::debug!(connection = %self.id, "connection closed");
        let _ = self.closed.send(true);
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => {
                if self.destroyed || self.end_deadline.is_some() {
                    let _ = reply.send(Err(TransportError::Closed.into()));
                } else if self.established {
                    let _ = reply.send(Ok(()));
                } else {
                    self.connect_waiters.push(reply);
                    self.start_opening();
                }
            }
            Command::Query { sql, reply } => {
                if self.destroyed {
                    let _ = reply.send(Err(Error::destroyed(sql, DestroyPhase::Queued)));
                } else if self.ending {
                    let _ = reply.send(Err(Error::ConnectionEnding));
                } else {
                    tracing::trace!(connection = %self.id, queued = self.queue.len(), "query submitted");
                    self.queue.push_back(PendingQuery { sql, reply });
                    self.start_opening();
                    self.dispatch_next().await;
                }
            }
            Command::End => self.end().await,
            Command::Destroy => self.destroy(),
        }
    }

    async fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened(Ok(transport)) => {
                tracing::debug!(connection = %self.id, "transport open, waiting for LOCALS");
                self.link = Link::Open(transport);
            }
            LinkEvent::Opened(Err(e)) => {
                tracing::warn!(connection = %self.id, error = %e, "failed to open transport");
                self.fail_connect(e.into());
                self.destroy();
            }
            LinkEvent::Text(text) => {
                for line in self.lines.push(&text) {
                    self.on_line(&line).await;
                    if self.destroyed {
                        break;
                    }
                }
            }
            LinkEvent::Closed => self.on_closed().await,
        }
    }

    async fn on_line(&mut self, line: &str) {
        let Some(event) = self.machine.step(line) else {
            return;
        };

        match event {
            Event::Established(locale) => {
                tracing::debug!(
                    connection = %self.id,
                    short_date = %locale.short_date_format,
                    decimal = %locale.decimal_separator,
                    codepage = locale.ansi_codepage,
                    "connection established"
                );
                if let Link::Open(transport) = &mut self.link {
                    transport.set_codepages(Codepages {
                        ansi: locale.ansi_codepage,
                        oem: locale.oem_codepage,
                    });
                }
                self.established = true;
                self.sync_status();
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
                self.after_query().await;
            }
            Event::ResultSet(result) => {
                let Some(query) = self.in_flight.take() else {
                    tracing::warn!(connection = %self.id, "result set with no query in flight");
                    return;
                };
                tracing::trace!(
                    connection = %self.id,
                    records = result.records.len(),
                    "query completed"
                );
                self.sync_status();
                let _ = query.reply.send(Ok(result));
                self.after_query().await;
            }
            Event::Failed(err) => {
                tracing::warn!(connection = %self.id, error = %err, "worker reported an error");
                // Destroy first so the caller never sees a live connection.
                match self.in_flight.take() {
                    Some(query) => {
                        self.destroy();
                        let _ = query.reply.send(Err(err));
                    }
                    None => {
                        self.fail_connect(err);
                        self.destroy();
                    }
                }
            }
        }
    }

    /// Serve the next queued query, or finish a deferred `end()`.
    async fn after_query(&mut self) {
        if !self.queue.is_empty() {
            self.dispatch_next().await;
        } else if self.ending && self.in_flight.is_none() {
            self.send_terminator().await;
        }
    }

    async fn dispatch_next(&mut self) {
        if self.in_flight.is_some() || !self.established || self.destroyed {
            return;
        }
        let Link::Open(transport) = &mut self.link else {
            return;
        };
        let Some(query) = self.queue.pop_front() else {
            return;
        };

        tracing::debug!(connection = %self.id, sql = %query.sql, "dispatching query");
        let frame = protocol::sql_frame(&query.sql, &self.options.markers, self.options.line_ending);
        let written = transport.write(&frame).await;
        self.in_flight = Some(query);

        if let Err(e) = written {
            tracing::warn!(connection = %self.id, error = %e, "failed to send query");
            let query = self.in_flight.take();
            self.destroy();
            if let Some(query) = query {
                let _ = query.reply.send(Err(e.into()));
            }
        }
    }

    async fn end(&mut self) {
        self.ending = true;
        if matches!(self.link, Link::Pending(_)) {
            // Nothing was ever started.
            self.link = Link::Closed;
        } else if self.established && self.in_flight.is_none() && self.queue.is_empty() {
            self.send_terminator().await;
        }
        // Otherwise deferred until the handshake or the last query completes.
    }

    async fn send_terminator(&mut self) {
        if self.end_deadline.is_some() {
            return;
        }
        self.established = false;
        if !matches!(self.link, Link::Open(_)) {
            self.link = Link::Closed;
            return;
        }
        let Link::Open(transport) = &mut self.link else {
            return;
        };

        tracing::debug!(connection = %self.id, "ending connection");
        let frame = format!(
            "{}{}",
            self.options.markers.end,
            self.options.line_ending.as_str()
        );
        if let Err(e) = transport.write(&frame).await {
            tracing::debug!(connection = %self.id, error = %e, "terminator not delivered");
            self.close_link();
            return;
        }
        self.end_deadline = Some(Instant::now() + self.options.end_grace);
    }

    async fn on_closed(&mut self) {
        if let Some(tail) = self.lines.finish() {
            self.on_line(&tail).await;
        }
        if matches!(self.link, Link::Closed) {
            return;
        }

        if self.end_deadline.is_some() {
            tracing::debug!(connection = %self.id, "worker exited after end");
            self.close_link();
        } else {
            tracing::warn!(
                connection = %self.id,
                in_flight = self.in_flight.is_some(),
                queued = self.queue.len(),
                "worker closed the stream unexpectedly"
            );
            self.destroy();
        }
    }

    /// Kill the transport and fail every pending request. Idempotent.
    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.status.destroyed.store(true, Ordering::Release);
        tracing::debug!(connection = %self.id, "destroying connection");
        self.close_link();
        self.fail_outstanding();
    }

    fn close_link(&mut self) {
        if let Link::Open(transport) = &mut self.link {
            transport.kill();
        }
        self.link = Link::Closed;
        self.established = false;
        self.end_deadline = None;
    }

    fn fail_outstanding(&mut self) {
        if let Some(query) = self.in_flight.take() {
            let _ = query
                .reply
                .send(Err(Error::destroyed(query.sql, DestroyPhase::InFlight)));
        }
        for query in self.queue.drain(..) {
            let _ = query
                .reply
                .send(Err(Error::destroyed(query.sql, DestroyPhase::Queued)));
        }
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(TransportError::Closed.into()));
        }
    }

    fn fail_connect(&mut self, err: Error) {
        let mut waiters = self.connect_waiters.drain(..);
        if let Some(first) = waiters.next() {
            for waiter in waiters {
                let _ = waiter.send(Err(replicate(&err)));
            }
            let _ = first.send(Err(err));
        }
    }

    fn start_opening(&mut self) {
        let Link::Pending(endpoint) = &self.link else {
            return;
        };
        let endpoint = endpoint.clone();
        let options = self.options.transport_options();
        let launcher = Arc::clone(&self.options.launcher);
        let worker = self.options.worker.clone();

        tracing::debug!(connection = %self.id, %endpoint, "opening transport");
        self.link = Link::Opening(
            async move { transport::open(&endpoint, &options, &launcher, &worker).await }.boxed(),
        );
    }

    fn sync_status(&self) {
        let status = &self.status;
        status
            .established
            .store(self.established && !self.destroyed, Ordering::Release);
        status.busy.store(
            self.in_flight.is_some() || !self.queue.is_empty(),
            Ordering::Release,
        );
        // Handles set these eagerly; never clear them from here.
        if self.ending {
            status.ending.store(true, Ordering::Release);
        }
        if self.destroyed || matches!(self.link, Link::Closed) {
            status.destroyed.store(true, Ordering::Release);
        }
    }
}
