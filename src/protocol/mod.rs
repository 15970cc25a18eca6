//! Worker line protocol.
//!
//! Requests are three lines: `SQL`, the statement, and the end marker.
//! Responses are blocks introduced by `LOCALS`, `FIELDS` or `RECORDS` (or the
//! error marker) and closed by the end marker:
//!
//! ```text
//! LOCALS                 FIELDS                      RECORDS
//! {"sShortDate":...}     [{"Name":"n","Type":3}]     4<TAB>
//! END{...}               END{...}                    END{...}
//! ```
//!
//! [`Machine`] is a pure transition function over these lines; the
//! connection driver owns the I/O around it.

mod decode;
mod lines;
mod machine;
mod types;

use serde::{Deserialize, Serialize};

pub use decode::{decode_records, DateTimeFormat, ValueCodec};
pub use lines::LineSplitter;
pub use machine::{Event, Machine, State};
pub use types::{Field, FieldKind, Params, Record, ResultSet, SessionLocale, Value};

pub const DEFAULT_END_MARKER: &str = "END{ea3afd54-bb63-4d3d-aab3-0e7d4eeb696d}";
pub const DEFAULT_ERROR_MARKER: &str = "ERROR{ea3afd54-bb63-4d3d-aab3-0e7d4eeb696d}";

/// Sentinel lines shared with the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    pub end: String,
    pub error: String,
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            end: DEFAULT_END_MARKER.to_string(),
            error: DEFAULT_ERROR_MARKER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    #[default]
    CrLf,
    Lf,
}

impl LineEnding {
    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::CrLf => "\r\n",
            LineEnding::Lf => "\n",
        }
    }
}

/// Build the request frame for one statement.
pub fn sql_frame(sql: &str, markers: &Markers, line_ending: LineEnding) -> String {
    let le = line_ending.as_str();
    format!("SQL{le}{sql}{le}{end}{le}", end = markers.end)
}
