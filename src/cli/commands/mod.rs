//! CLI command implementations

pub mod ingest;
pub mod query;
pub mod schema;

use std::io::Read;
use std::path::{Path, PathBuf};

use crate::cli::error::CliError;
use crate::database::GatewayConfig;

/// Where command input comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    File(PathBuf),
    Stdin,
}

impl InputSource {
    /// `-` means standard input
    pub fn parse(arg: &str) -> Self {
        if arg == "-" {
            InputSource::Stdin
        } else {
            InputSource::File(PathBuf::from(arg))
        }
    }

    pub fn read(&self) -> Result<String, CliError> {
        match self {
            InputSource::Stdin => {
                let mut content = String::new();
                std::io::stdin()
                    .read_to_string(&mut content)
                    .map_err(|e| CliError::IoError(format!("Failed to read stdin: {}", e)))?;
                Ok(content)
            }
            InputSource::File(path) => {
                if !path.exists() {
                    return Err(CliError::FileNotFound(path.clone()));
                }
                std::fs::read_to_string(path)
                    .map_err(|e| CliError::FileReadError(path.clone(), e.to_string()))
            }
        }
    }
}

/// Load the gateway configuration for a directory
pub fn load_config(dir: &Path) -> Result<GatewayConfig, CliError> {
    GatewayConfig::load(dir).map_err(|e| CliError::IoError(format!("Failed to load config: {}", e)))
}

/// Create the runtime a command's async work runs on
pub fn runtime() -> Result<tokio::runtime::Runtime, CliError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| CliError::IoError(format!("Failed to create runtime: {}", e)))
}

/// Print a wire response as JSON on stdout
pub fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<(), CliError> {
    let output = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| CliError::SerializationError(e.to_string()))?;

    println!("{}", output);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_source_parse() {
        assert_eq!(InputSource::parse("-"), InputSource::Stdin);
        assert_eq!(
            InputSource::parse("data.json"),
            InputSource::File(PathBuf::from("data.json"))
        );
    }

    #[test]
    fn test_missing_file() {
        let source = InputSource::File(PathBuf::from("/nonexistent/payload.json"));
        assert!(matches!(source.read(), Err(CliError::FileNotFound(_))));
    }
}
