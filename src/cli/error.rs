//! CLI-specific error types

use std::path::PathBuf;
use thiserror::Error;

use crate::error::GatewayError;
use crate::payload::PayloadError;

/// CLI-specific error type
#[derive(Error, Debug)]
pub enum CliError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read file {0}: {1}")]
    FileReadError(PathBuf, String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Failed to serialize output: {0}")]
    SerializationError(String),

    /// The operation ran and reported a failure (already printed)
    #[error("{0} failed")]
    OperationFailed(&'static str),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Payload(#[from] PayloadError),
}
