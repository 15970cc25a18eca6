//! Local worker processes.
//!
//! A worker is an external process that executes SQL against an OLE DB
//! provider and speaks the line protocol on its standard streams:
//!
//! ```text
//! ┌───────────────────────┐   stdin (ANSI codepage)   ┌──────────────────────┐
//! │  LocalTransport       │ ────────────────────────▶ │  worker              │
//! │  (one per Connection) │ ◀──────────────────────── │  <args> <conn> <end> │
//! └───────────────────────┘   stdout / stderr (OEM)   └──────────────────────┘
//! ```
//!
//! Workers are only ever started through a [`Launcher`], which serializes
//! creation and spaces launches apart.

mod error;
mod launcher;

use std::path::PathBuf;

pub use error::{WorkerError, WorkerResult};
pub use launcher::{Launcher, DEFAULT_MIN_CREATION_INTERVAL};

/// Executable and leading arguments used to start a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl Default for WorkerCommand {
    /// The JScript worker under the 32-bit scripting host, which is where the
    /// Jet and ACE providers are registered.
    #[cfg(windows)]
    fn default() -> Self {
        let root = std::env::var_os("SystemRoot")
            .or_else(|| std::env::var_os("windir"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("C:\\Windows"));
        let wow64 = root.join("SysWOW64");
        let system = if wow64.exists() { wow64 } else { root.join("System32") };

        let script = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("adodb.js")))
            .unwrap_or_else(|| PathBuf::from("adodb.js"));

        Self {
            program: system.join("cscript.exe"),
            args: vec![
                "//E:JScript".to_string(),
                "//Nologo".to_string(),
                script.to_string_lossy().into_owned(),
            ],
        }
    }

    #[cfg(not(windows))]
    fn default() -> Self {
        Self::new("adodb-worker")
    }
}
