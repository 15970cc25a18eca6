//! TOML-based configuration.
//!
//! Supports a config file (adodb.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [connections.northwind]
//! connection_string = "Provider=Microsoft.Jet.OLEDB.4.0;Data Source=${DATA_DIR}\\Northwind.mdb"
//!
//! [connections.gateway]
//! connection_string = "provider=adodb-server;host=db-gateway;port=4023"
//!
//! [worker]
//! program = "cscript.exe"
//! args = ["//E:JScript", "//Nologo", "C:\\adodb\\adodb.js"]
//! min_creation_interval_ms = 1000
//!
//! [pool]
//! max_connections = 16
//! idle_ttl_ms = 15000
//!
//! [codepages]
//! ansi = 1251
//! oem = 866
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pool::PoolOptions;
use crate::protocol::{LineEnding, Markers, DEFAULT_END_MARKER, DEFAULT_ERROR_MARKER};
use crate::transport::Codepages;
use crate::worker::WorkerCommand;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Named connection strings.
    pub connections: HashMap<String, ConnectionSettings>,

    pub protocol: ProtocolSettings,

    /// Local worker launch configuration.
    pub worker: WorkerSettings,

    pub pool: PoolSettings,

    /// Codepages assumed until the worker reports its own.
    pub codepages: Codepages,

    /// Relay server configuration.
    pub server: ServerSettings,
}

/// Connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionSettings {
    /// Connection string (supports ${ENV_VAR} expansion).
    pub connection_string: String,

    #[serde(default)]
    pub description: Option<String>,
}

impl ConnectionSettings {
    /// Get the connection string with environment variables expanded.
    pub fn resolved_connection_string(&self) -> Result<String, SettingsError> {
        expand_env_vars(&self.connection_string)
    }
}

/// Line protocol framing shared with the worker.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProtocolSettings {
    pub end_marker: String,
    pub error_marker: String,
    pub line_ending: LineEnding,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            end_marker: DEFAULT_END_MARKER.to_string(),
            error_marker: DEFAULT_ERROR_MARKER.to_string(),
            line_ending: LineEnding::default(),
        }
    }
}

impl ProtocolSettings {
    pub fn markers(&self) -> Markers {
        Markers {
            end: self.end_marker.clone(),
            error: self.error_marker.clone(),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Worker executable (supports ${ENV_VAR} expansion).
    pub program: Option<String>,

    /// Arguments placed before the connection string and end marker.
    pub args: Option<Vec<String>>,

    /// Minimum spacing between two worker launches.
    pub min_creation_interval_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            program: None,
            args: None,
            min_creation_interval_ms: 1000,
        }
    }
}

impl WorkerSettings {
    /// Resolve the command used to start local workers.
    pub fn worker_command(&self) -> Result<WorkerCommand, SettingsError> {
        let mut command = WorkerCommand::default();
        if let Some(program) = &self.program {
            command.program = PathBuf::from(expand_env_vars(program)?);
            // A custom program does not inherit the default script arguments.
            command.args = Vec::new();
        }
        if let Some(args) = &self.args {
            command.args = args
                .iter()
                .map(|arg| expand_env_vars(arg))
                .collect::<Result<_, _>>()?;
        }
        Ok(command)
    }

    pub fn min_creation_interval(&self) -> Duration {
        Duration::from_millis(self.min_creation_interval_ms)
    }
}

/// Connection pool settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Maximum number of live connections, idle ones included.
    pub max_connections: usize,

    /// How long an idle connection is kept before it is ended.
    pub idle_ttl_ms: u64,

    /// How long `Pool::end` waits for checked-out connections.
    pub shutdown_timeout_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        let options = PoolOptions::default();
        Self {
            max_connections: options.max_connections,
            idle_ttl_ms: options.idle_ttl.as_millis() as u64,
            shutdown_timeout_ms: options.shutdown_timeout.as_millis() as u64,
        }
    }
}

impl PoolSettings {
    pub fn to_pool_options(&self) -> PoolOptions {
        PoolOptions {
            max_connections: self.max_connections,
            idle_ttl: Duration::from_millis(self.idle_ttl_ms),
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
        }
    }
}

/// Relay server settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    pub port: u16,

    /// Connection string handed to each worker the relay starts.
    pub connection_string: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: crate::server::DEFAULT_PORT,
            connection_string: None,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `ADODB_CONFIG`
    /// 2. `./adodb.toml`
    /// 3. `~/.config/adodb/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("ADODB_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("adodb.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("adodb").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.pool.max_connections == 0 {
            return Err(SettingsError::InvalidConfig(
                "pool.max_connections must be at least 1".to_string(),
            ));
        }
        if self.protocol.end_marker.is_empty() || self.protocol.error_marker.is_empty() {
            return Err(SettingsError::InvalidConfig(
                "protocol markers must not be empty".to_string(),
            ));
        }
        if self.protocol.end_marker == self.protocol.error_marker {
            return Err(SettingsError::InvalidConfig(
                "protocol.end_marker and protocol.error_marker must differ".to_string(),
            ));
        }
        Ok(())
    }

    /// Get a connection by name.
    pub fn get_connection(&self, name: &str) -> Result<&ConnectionSettings, SettingsError> {
        self.connections
            .get(name)
            .ok_or_else(|| SettingsError::ConnectionNotFound(name.to_string()))
    }

    /// Get the default connection ("default" if it exists, otherwise the first name in order).
    pub fn default_connection(&self) -> Option<(&str, &ConnectionSettings)> {
        if let Some(conn) = self.connections.get("default") {
            return Some(("default", conn));
        }
        self.connections
            .iter()
            .min_by_key(|(name, _)| name.as_str())
            .map(|(k, v)| (k.as_str(), v))
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        if chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
            let value =
                env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
            result.push_str(&value);
        } else {
            // $VAR ends at the first non-alphanumeric/underscore
            let mut var_name = String::new();
            while let Some(&ch) = chars.peek() {
                if ch.is_alphanumeric() || ch == '_' {
                    var_name.push(ch);
                    chars.next();
                } else {
                    break;
                }
            }
            if var_name.is_empty() {
                result.push('$');
            } else {
                let value = env::var(&var_name)
                    .map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
                result.push_str(&value);
            }
        }
    }

    Ok(result)
}
