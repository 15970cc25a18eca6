//! Configuration module.
//!
//! Handles connection strings, environment variables, and settings.

mod connection;
mod settings;

pub use connection::{Endpoint, REMOTE_PROVIDER};
pub use settings::{
    expand_env_vars, ConnectionSettings, PoolSettings, ProtocolSettings, ServerSettings, Settings,
    SettingsError, WorkerSettings,
};
