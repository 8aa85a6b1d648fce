//! SQL query CLI command
//!
//! Runs one statement against the configured store and prints the shaped
//! result.

use std::path::PathBuf;

use super::{InputSource, load_config, print_json, runtime};
use crate::cli::error::CliError;
use crate::query::execute;

/// Query command arguments
#[derive(Debug, Clone)]
pub struct QueryArgs {
    /// SQL statement, or `-` to read it from stdin
    pub sql: String,
    /// Directory holding the config file
    pub workspace_dir: PathBuf,
    /// Pretty-print output
    pub pretty: bool,
}

/// Execute a SQL statement and print the result
pub fn handle_query(args: &QueryArgs) -> Result<(), CliError> {
    let config = load_config(&args.workspace_dir)?;
    let sql = if args.sql == "-" {
        InputSource::Stdin.read()?
    } else {
        args.sql.clone()
    };

    let rt = runtime()?;
    let response = rt.block_on(execute(&config, &sql))?;

    print_json(&response, args.pretty)?;

    if !response.is_success() {
        return Err(CliError::OperationFailed("Query"));
    }
    Ok(())
}
