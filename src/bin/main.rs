//! adodb CLI - run queries through ADODB workers, or relay workers over TCP
//!
//! Usage:
//!   adodb query [--connection <conn-str> | --name <name>] [--param k=v]... <sql>
//!   adodb serve [--port <port>] [--connection <conn-str>]
//!
//! Examples:
//!   adodb query --name northwind "SELECT * FROM Orders WHERE OrderID = :id" --param id=10248
//!   adodb query --connection "provider=adodb-server;host=gateway;port=4023" reports/daily.sql
//!   adodb serve --port 4023 --connection "Provider=Microsoft.Jet.OLEDB.4.0;Data Source=C:\\db.mdb"

use std::path::PathBuf;
use std::process::ExitCode;

use adodb::server;
use adodb::{Connection, ConnectionOptions, Params, Settings, Value};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "adodb")]
#[command(about = "adodb - query ADODB data sources through worker processes")]
#[command(version)]
struct Cli {
    /// Path to the config file (defaults to ADODB_CONFIG, ./adodb.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one statement and print the result as JSON
    Query {
        /// SQL text, or a path ending in .sql
        sql: String,

        /// Connection string
        #[arg(long, conflicts_with = "name")]
        connection: Option<String>,

        /// Named connection from the config file
        #[arg(short, long)]
        name: Option<String>,

        /// Bind a :name parameter (repeatable)
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,
    },

    /// Expose local workers to remote clients over TCP
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Connection string every worker is started with
        #[arg(long)]
        connection: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let settings = match load_settings(cli.config.as_ref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Query {
            sql,
            connection,
            name,
            params,
        } => cmd_query(&settings, sql, connection, name, params).await,
        Commands::Serve { port, connection } => cmd_serve(&settings, port, connection).await,
    }
}

fn load_settings(path: Option<&PathBuf>) -> Result<Settings, adodb::SettingsError> {
    match path {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    }
}

/// Parse `key=value`; numbers, booleans and `null` are typed, anything else is text.
fn parse_param(s: &str) -> Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    let key = key.trim().trim_start_matches(':');
    if key.is_empty() {
        return Err(format!("missing parameter name in '{}'", s));
    }

    let value = if raw.eq_ignore_ascii_case("null") {
        Value::Null
    } else if let Ok(b) = raw.parse::<bool>() {
        Value::Bool(b)
    } else if let Ok(i) = raw.parse::<i64>() {
        Value::Int(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        Value::Float(f)
    } else {
        Value::Text(raw.to_string())
    };
    Ok((key.to_string(), value))
}

fn resolve_connection_string(
    settings: &Settings,
    connection: Option<String>,
    name: Option<String>,
) -> Result<String, String> {
    if let Some(conn) = connection {
        return adodb::config::expand_env_vars(&conn).map_err(|e| e.to_string());
    }
    let conn = match &name {
        Some(name) => settings.get_connection(name).map_err(|e| e.to_string())?,
        None => match settings.default_connection() {
            Some((_, conn)) => conn,
            None => {
                return Err(
                    "no connection given; pass --connection or --name, or add one to the config"
                        .to_string(),
                )
            }
        },
    };
    conn.resolved_connection_string().map_err(|e| e.to_string())
}

async fn cmd_query(
    settings: &Settings,
    sql: String,
    connection: Option<String>,
    name: Option<String>,
    params: Vec<(String, Value)>,
) -> ExitCode {
    let conn_str = match resolve_connection_string(settings, connection, name) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let conn = match ConnectionOptions::from_settings(settings, conn_str).and_then(Connection::new) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let params: Params = params.into_iter().collect();
    let result = conn.query(&sql, &params).await;
    conn.end();
    conn.closed().await;

    match result {
        Ok(result) => match serde_json::to_string_pretty(&result) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error serializing result: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("Query error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn cmd_serve(settings: &Settings, port: Option<u16>, connection: Option<String>) -> ExitCode {
    let conn_str = match connection.or_else(|| settings.server.connection_string.clone()) {
        Some(c) => c,
        None => {
            eprintln!("Error: no connection string; pass --connection or set server.connection_string");
            return ExitCode::FAILURE;
        }
    };
    let conn_str = match adodb::config::expand_env_vars(&conn_str) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let options = match ConnectionOptions::from_settings(settings, conn_str) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let port = port.unwrap_or(settings.server.port);
    let listener = match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Error binding port {}: {}", port, e);
            return ExitCode::FAILURE;
        }
    };
    eprintln!("adodb relay listening on port {}", port);

    tokio::select! {
        result = server::serve(listener, options) => {
            if let Err(e) = result {
                eprintln!("Server error: {}", e);
                return ExitCode::FAILURE;
            }
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Shutting down");
        }
    }
    ExitCode::SUCCESS
}
