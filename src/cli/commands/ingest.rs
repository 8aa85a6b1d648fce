//! Ingest CLI command
//!
//! Replaces the configured workspace with the sheets of an upload payload.

use std::path::PathBuf;

use super::{InputSource, load_config, print_json, runtime};
use crate::cli::error::CliError;
use crate::ingest::ingest_payload;

/// Ingest command arguments
#[derive(Debug, Clone)]
pub struct IngestArgs {
    /// Payload file, or stdin; not needed when skipping
    pub input: Option<InputSource>,
    /// Directory holding the config file
    pub workspace_dir: PathBuf,
    /// Skip ingestion and report an empty result
    pub skip: bool,
    /// Pretty-print output
    pub pretty: bool,
}

/// Ingest a payload and print the result
pub fn handle_ingest(args: &IngestArgs) -> Result<(), CliError> {
    let config = load_config(&args.workspace_dir)?;
    let raw = match (&args.input, args.skip) {
        (_, true) => String::new(),
        (Some(input), false) => input.read()?,
        (None, false) => {
            return Err(CliError::InvalidArgument(
                "an input file or '-' is required unless --skip is given".to_string(),
            ));
        }
    };

    let rt = runtime()?;
    let response = rt.block_on(ingest_payload(&config, &raw, !args.skip))?;

    print_json(&response, args.pretty)?;

    if !response.is_success() {
        return Err(CliError::OperationFailed("Ingestion"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(dir: &TempDir, input: Option<InputSource>, skip: bool) -> IngestArgs {
        IngestArgs {
            input,
            workspace_dir: dir.path().to_path_buf(),
            skip,
            pretty: false,
        }
    }

    #[test]
    fn test_skip_needs_no_input() {
        let dir = TempDir::new().unwrap();
        assert!(handle_ingest(&args(&dir, None, true)).is_ok());
        // Skipping never opens the store
        assert!(!dir.path().join(".tabular-gateway.duckdb").exists());
    }

    #[test]
    fn test_missing_input_without_skip() {
        let dir = TempDir::new().unwrap();
        let err = handle_ingest(&args(&dir, None, false)).unwrap_err();
        assert!(matches!(err, CliError::InvalidArgument(_)));
    }
}
