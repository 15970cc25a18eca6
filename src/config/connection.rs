//! Connection string parsing.
//!
//! A connection string is either an OLE DB string handed verbatim to a local
//! worker, or a pointer at a relay server:
//!
//! ```text
//! Provider=Microsoft.Jet.OLEDB.4.0;Data Source=C:\data\northwind.mdb
//! provider=adodb-server;host=db-gateway;port=4023
//! ```

use std::fmt;

use crate::error::{Error, Result};

/// Provider name that selects the remote transport.
pub const REMOTE_PROVIDER: &str = "adodb-server";

/// Where a connection's worker lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Spawn a local worker with this connection string.
    Local { connection_string: String },
    /// Talk to a relay server over TCP.
    Remote { host: String, port: u16 },
}

impl Endpoint {
    pub fn parse(connection_string: &str) -> Result<Self> {
        let pairs: Vec<(String, &str)> = connection_string
            .split(';')
            .filter_map(|part| part.split_once('='))
            .map(|(key, value)| (key.trim().to_ascii_lowercase(), value.trim()))
            .collect();
        let lookup = |name: &str| {
            pairs
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| *value)
        };

        let remote = lookup("provider").is_some_and(|p| p.eq_ignore_ascii_case(REMOTE_PROVIDER));
        if !remote {
            return Ok(Endpoint::Local {
                connection_string: connection_string.to_string(),
            });
        }

        let host = lookup("host")
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::InvalidConnectionString("missing host".to_string()))?;
        let port = lookup("port")
            .ok_or_else(|| Error::InvalidConnectionString("missing port".to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| Error::InvalidConnectionString(format!("invalid port: {port}")))?;

        Ok(Endpoint::Remote {
            host: host.to_string(),
            port,
        })
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Endpoint::Remote { .. })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Local { .. } => f.write_str("local worker"),
            Endpoint::Remote { host, port } => write!(f, "{host}:{port}"),
        }
    }
}
