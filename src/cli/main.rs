//! CLI binary entry point for tabular-gateway

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tabular_gateway::cli::commands::InputSource;
use tabular_gateway::cli::commands::ingest::{IngestArgs, handle_ingest};
use tabular_gateway::cli::commands::query::{QueryArgs, handle_query};
use tabular_gateway::cli::commands::schema::{SchemaArgs, handle_schema};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tabular-gateway")]
#[command(about = "Ingest tabular payloads, describe the store and run queries")]
#[command(version)]
struct Cli {
    /// Directory containing .tabular-gateway.toml
    #[arg(short, long, global = true, default_value = ".")]
    workspace_dir: PathBuf,

    /// Pretty-print JSON output
    #[arg(short, long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replace the workspace with the sheets of an upload payload
    Ingest {
        /// Payload file, or '-' for stdin
        #[arg(required_unless_present = "skip")]
        input: Option<String>,
        /// Report an empty result without touching the store
        #[arg(long)]
        skip: bool,
    },
    /// Describe tables with their columns and sampled values
    Schema {
        /// Table to describe (repeatable)
        #[arg(short, long = "table")]
        tables: Vec<String>,
        /// Table list as an ingest result ({"OK": [...]}) or a quoted list
        #[arg(long)]
        table_list: Option<String>,
        /// Describe every table in the workspace
        #[arg(long)]
        all: bool,
        /// Print the built-in catalog
        #[arg(long)]
        builtin: bool,
    },
    /// Execute one SQL statement
    Query {
        /// SQL statement, or '-' for stdin
        sql: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Ingest { input, skip } => handle_ingest(&IngestArgs {
            input: input.as_deref().map(InputSource::parse),
            workspace_dir: cli.workspace_dir,
            skip,
            pretty: cli.pretty,
        }),
        Commands::Schema {
            tables,
            table_list,
            all,
            builtin,
        } => handle_schema(&SchemaArgs {
            tables,
            table_list,
            all,
            builtin,
            workspace_dir: cli.workspace_dir,
            pretty: cli.pretty,
        }),
        Commands::Query { sql } => handle_query(&QueryArgs {
            sql,
            workspace_dir: cli.workspace_dir,
            pretty: cli.pretty,
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_input_is_optional_with_skip() {
        let cli = Cli::try_parse_from(["tabular-gateway", "ingest", "--skip"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Ingest {
                input: None,
                skip: true
            }
        ));

        let cli = Cli::try_parse_from(["tabular-gateway", "ingest", "payload.json"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Ingest { input: Some(ref path), skip: false } if path == "payload.json"
        ));

        assert!(Cli::try_parse_from(["tabular-gateway", "ingest"]).is_err());
    }
}
