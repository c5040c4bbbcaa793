mod connections;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use pgmeta_catalog::Connector;
use pgmeta_core::{redact_connection_string, Error as EngineError, ObjectType, OnError, QueryRequest, MATCH_ALL};
use pgmeta_export::Engine;

use connections::ConnectionStore;

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Config(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("io error")]
    Io(#[from] std::io::Error),
}

impl CliError {
    fn root_cause_message(&self) -> String {
        match self {
            CliError::Engine(err) => err.root_cause_message(),
            other => {
                let mut current: &dyn std::error::Error = other;
                while let Some(next) = current.source() {
                    current = next;
                }
                current.to_string()
            }
        }
    }

    fn render_chain(&self) -> String {
        match self {
            CliError::Engine(err) => err.render_chain(),
            other => {
                let mut output = other.to_string();
                let mut source = std::error::Error::source(other);
                while let Some(err) = source {
                    output.push_str("\n  caused by: ");
                    output.push_str(&err.to_string());
                    source = err.source();
                }
                output
            }
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "pgmeta", about = "PostgreSQL metadata extraction tool")]
struct Cli {
    /// Enable debug logging and full error chains.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage database connections.
    Connection {
        #[command(subcommand)]
        command: ConnectionCommand,
    },
    /// Export database metadata to a file tree.
    Export(ExportArgs),
    /// Print version information.
    Version,
}

#[derive(Subcommand, Debug)]
enum ConnectionCommand {
    /// Create a new connection.
    Create {
        /// Connection name.
        #[arg(long)]
        name: String,
        /// Database URL.
        #[arg(long)]
        url: String,
        /// Set as default connection.
        #[arg(long)]
        make_default: bool,
    },
    /// List all connections.
    List,
    /// Delete a connection.
    Delete {
        /// Connection name.
        #[arg(long)]
        name: String,
    },
    /// Set a connection as default.
    MakeDefault {
        /// Connection name.
        #[arg(long)]
        name: String,
    },
}

#[derive(Args, Debug)]
struct ExportArgs {
    /// Regex pattern to match object names, or ALL.
    #[arg(long, default_value = "ALL")]
    query: String,

    /// Comma-separated list of object types, or ALL. Valid types: table,
    /// view, function, aggregate, trigger, index, constraint, sequence,
    /// materialized_view, policy, extension, procedure, publication,
    /// subscription, rule.
    #[arg(long, default_value = "ALL")]
    types: String,

    /// Connection name. Defaults to the default connection.
    #[arg(long)]
    connection: Option<String>,

    /// Comma-separated list of schema names, or ALL.
    #[arg(long, default_value = "public")]
    schema: String,

    /// Output directory for generated files.
    #[arg(long, default_value = "./pgmeta-output")]
    output: PathBuf,

    /// Error handling behavior: 'warn' or 'fail'.
    #[arg(long, default_value = "warn")]
    on_error: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.debug);

    let debug = cli.debug;
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if debug {
                eprintln!("Error: {}", err.render_chain());
            } else {
                eprintln!("Error: {}", err.root_cause_message());
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Connection { command } => run_connection(command),
        Command::Export(args) => run_export(args).await,
        Command::Version => {
            println!("pgmeta {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn run_connection(command: ConnectionCommand) -> Result<(), CliError> {
    let mut store = ConnectionStore::load()?;

    match command {
        ConnectionCommand::Create {
            name,
            url,
            make_default,
        } => {
            store.add(&name, &url, make_default)?;
            println!("Added new connection: {name}");
        }
        ConnectionCommand::List => {
            if store.connections.is_empty() {
                println!("No connections configured");
                return Ok(());
            }
            println!("Configured connections:");
            for conn in &store.connections {
                let mark = if conn.is_default { "*" } else { " " };
                println!("{mark} {}: {}", conn.name, redact_connection_string(&conn.url));
            }
        }
        ConnectionCommand::Delete { name } => {
            store.delete(&name)?;
            println!("Deleted connection: {name}");
        }
        ConnectionCommand::MakeDefault { name } => {
            store.set_default(&name)?;
            println!("Set {name} as default connection");
        }
    }
    Ok(())
}

async fn run_export(args: ExportArgs) -> Result<(), CliError> {
    let on_error = OnError::from_str(&args.on_error)?;
    let request = build_request(&args.types, &args.schema, &args.query)?;

    tracing::info!(
        pattern = %args.query,
        types = %args.types,
        schemas = %args.schema,
        on_error = %on_error,
        "exporting database objects"
    );

    std::fs::create_dir_all(&args.output)?;

    let store = ConnectionStore::load()?;
    let connection = match &args.connection {
        Some(name) => store
            .get(name)
            .ok_or_else(|| CliError::Config(format!("connection not found: {name}")))?,
        None => store.default_connection().ok_or_else(|| {
            CliError::Config("no connection specified and no default connection found".to_string())
        })?,
    };
    tracing::debug!(name = %connection.name, "using connection");

    let connector = Connector::connect(&connection.url).await?;
    let engine = Engine::new(connector.clone(), &args.output);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling export");
                cancel.cancel();
            }
        });
    }

    let objects = engine.discover(&request).await?;
    if objects.is_empty() {
        println!("No objects found matching the criteria");
        connector.close().await;
        return Ok(());
    }

    println!("Found objects:");
    for (i, object) in objects.iter().enumerate() {
        println!(
            "{}. [{}] {}",
            i + 1,
            object.object_type,
            object.qualified_name()
        );
    }

    let outcome = engine.export_objects(objects, on_error, &cancel).await;
    connector.close().await;
    outcome?;

    println!("Successfully saved objects to {}", args.output.display());
    Ok(())
}

/// Translate the comma-separated CLI flags into a planner request.
fn build_request(types: &str, schemas: &str, query: &str) -> Result<QueryRequest, CliError> {
    let types = if types == MATCH_ALL {
        Vec::new()
    } else {
        types
            .split(',')
            .map(|t| ObjectType::from_str(t.trim()))
            .collect::<Result<Vec<_>, _>>()?
    };

    let schemas = if schemas == MATCH_ALL {
        vec![MATCH_ALL.to_string()]
    } else {
        schemas
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    };

    Ok(QueryRequest {
        types,
        schemas,
        name_pattern: query.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_export_flags() {
        let cli = Cli::try_parse_from([
            "pgmeta",
            "export",
            "--types",
            "table,index",
            "--schema",
            "public,app",
            "--query",
            "^users",
            "--on-error",
            "fail",
            "--output",
            "/tmp/out",
        ])
        .unwrap();

        match cli.command {
            Command::Export(args) => {
                assert_eq!(args.types, "table,index");
                assert_eq!(args.schema, "public,app");
                assert_eq!(args.query, "^users");
                assert_eq!(args.on_error, "fail");
            }
            other => panic!("expected export, got {other:?}"),
        }
    }

    #[test]
    fn cli_parses_connection_create() {
        let cli = Cli::try_parse_from([
            "pgmeta",
            "connection",
            "create",
            "--name",
            "primary",
            "--url",
            "postgres://u@h/db",
            "--make-default",
        ])
        .unwrap();

        match cli.command {
            Command::Connection {
                command:
                    ConnectionCommand::Create {
                        name,
                        url,
                        make_default,
                    },
            } => {
                assert_eq!(name, "primary");
                assert_eq!(url, "postgres://u@h/db");
                assert!(make_default);
            }
            other => panic!("expected connection create, got {other:?}"),
        }
    }

    #[test]
    fn request_translation_handles_sentinels() {
        let request = build_request("ALL", "ALL", "ALL").unwrap();
        assert!(request.types.is_empty());
        assert_eq!(request.schemas, vec!["ALL".to_string()]);

        let request = build_request("table, view", "public", "^u").unwrap();
        assert_eq!(request.types, vec![ObjectType::Table, ObjectType::View]);
        assert_eq!(request.schemas, vec!["public".to_string()]);
        assert_eq!(request.name_pattern, "^u");
    }

    #[test]
    fn invalid_type_names_are_rejected() {
        let err = build_request("table,bogus", "public", "ALL").unwrap_err();
        assert!(err.to_string().contains("unsupported object type"));
    }

    #[test]
    fn invalid_on_error_is_rejected() {
        let err = OnError::from_str("explode").unwrap_err();
        assert!(err.to_string().contains("invalid on-error option"));
    }
}
