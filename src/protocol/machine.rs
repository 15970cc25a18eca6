//! Pure state machine over decoded protocol lines.
//!
//! The machine owns no I/O. The connection driver feeds it one line at a
//! time and acts on the [`Event`]s it returns.

use std::sync::Arc;

use super::decode::{decode_records, ValueCodec};
use super::types::{Field, ResultSet, SessionLocale};
use super::Markers;
use crate::error::Error;

const LOCALS: &str = "LOCALS";
const FIELDS: &str = "FIELDS";
const RECORDS: &str = "RECORDS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Waiting for the `LOCALS` handshake.
    Starting,
    Locals,
    Ready,
    Fields,
    Records,
    /// Collecting an error report. Left only by destroying the connection.
    Error,
}

/// Side effect requested by a transition.
#[derive(Debug)]
pub enum Event {
    /// The handshake finished; queries may be dispatched.
    Established(SessionLocale),
    /// The in-flight query produced a result.
    ResultSet(ResultSet),
    /// The in-flight query failed and the connection must be destroyed.
    Failed(Error),
}

#[derive(Debug)]
pub struct Machine {
    state: State,
    markers: Markers,
    buffer: Vec<String>,
    locale: Option<SessionLocale>,
    codec: Option<ValueCodec>,
    fields: Arc<[Field]>,
    /// Set after FIELDS until the `RECORDS` header or the first data line.
    records_header_pending: bool,
}

impl Machine {
    pub fn new(markers: Markers) -> Self {
        Self {
            state: State::Starting,
            markers,
            buffer: Vec::new(),
            locale: None,
            codec: None,
            fields: Arc::from(Vec::new()),
            records_header_pending: false,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Session locale, once the handshake has completed.
    pub fn locale(&self) -> Option<&SessionLocale> {
        self.locale.as_ref()
    }

    fn enter(&mut self, state: State) {
        self.state = state;
        self.buffer.clear();
        self.records_header_pending = false;
    }

    /// Advance by one line.
    pub fn step(&mut self, line: &str) -> Option<Event> {
        if line == self.markers.error {
            self.enter(State::Error);
            return None;
        }

        let at_end = line == self.markers.end;
        match (self.state, line) {
            (State::Error, _) if at_end => {
                let message = self.buffer.join("\n").trim().to_string();
                self.buffer.clear();
                Some(Event::Failed(Error::Protocol(message)))
            }
            (State::Starting, LOCALS) => {
                self.enter(State::Locals);
                None
            }
            (State::Locals, _) if at_end => Some(self.finish_locals()),
            (State::Ready, FIELDS) => {
                self.enter(State::Fields);
                None
            }
            (State::Ready, RECORDS) => {
                self.enter(State::Records);
                None
            }
            (State::Fields, _) if at_end => self.finish_fields(),
            // Header of the block that follows FIELDS.
            (State::Records, RECORDS) if self.records_header_pending => {
                self.records_header_pending = false;
                None
            }
            (State::Records, _) if at_end => Some(self.finish_records()),
            _ => {
                self.records_header_pending = false;
                self.buffer.push(line.to_string());
                None
            }
        }
    }

    fn finish_locals(&mut self) -> Event {
        let payload = self.buffer.join("\n");
        match serde_json::from_str::<SessionLocale>(&payload) {
            Ok(locale) => {
                self.codec = Some(ValueCodec::new(&locale));
                self.locale = Some(locale.clone());
                self.enter(State::Ready);
                Event::Established(locale)
            }
            Err(e) => {
                self.enter(State::Error);
                Event::Failed(Error::MalformedResponse(format!(
                    "invalid LOCALS payload: {e}"
                )))
            }
        }
    }

    fn finish_fields(&mut self) -> Option<Event> {
        let payload = self.buffer.join("\n");
        match serde_json::from_str::<Vec<Field>>(&payload) {
            Ok(fields) => {
                self.fields = fields.into();
                self.enter(State::Records);
                self.records_header_pending = true;
                None
            }
            Err(e) => {
                self.enter(State::Error);
                Some(Event::Failed(Error::MalformedResponse(format!(
                    "invalid FIELDS payload: {e}"
                ))))
            }
        }
    }

    fn finish_records(&mut self) -> Event {
        let payload = self.buffer.join("\n");
        let fields = std::mem::replace(&mut self.fields, Arc::from(Vec::new()));
        let codec = self
            .codec
            .get_or_insert_with(|| ValueCodec::new(&SessionLocale::default()));

        match decode_records(&payload, &fields, codec) {
            Ok(records) => {
                self.enter(State::Ready);
                Event::ResultSet(ResultSet { fields, records })
            }
            Err(message) => {
                self.enter(State::Error);
                Event::Failed(Error::MalformedResponse(message))
            }
        }
    }
}
