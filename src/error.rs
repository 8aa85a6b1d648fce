//! Backend-agnostic error taxonomy
//!
//! Store failures are normalized into an [`ErrorEnvelope`] whose kind comes
//! from a closed set. Each backend adapter maps its own native codes onto that
//! set through the tables in [`crate::database::codes`].

use serde::{Deserialize, Serialize};

use crate::database::{BackendType, StoreError};
use crate::payload::PayloadError;

/// Closed set of query failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    TableNotFound,
    ColumnNotFound,
    SyntaxError,
    ConnectionError,
    AccessDenied,
    ConnectionLost,
    UnknownError,
}

impl ErrorKind {
    /// Wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TableNotFound => "TABLE_NOT_FOUND",
            ErrorKind::ColumnNotFound => "COLUMN_NOT_FOUND",
            ErrorKind::SyntaxError => "SYNTAX_ERROR",
            ErrorKind::ConnectionError => "CONNECTION_ERROR",
            ErrorKind::AccessDenied => "ACCESS_DENIED",
            ErrorKind::ConnectionLost => "CONNECTION_LOST",
            ErrorKind::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// Human summary shown to the caller
    pub fn describe(&self) -> &'static str {
        match self {
            ErrorKind::TableNotFound => "Table not found",
            ErrorKind::ColumnNotFound => "Column not found",
            ErrorKind::SyntaxError => "SQL syntax error",
            ErrorKind::ConnectionError => "Failed to connect to the database (check host/port)",
            ErrorKind::AccessDenied => "Access to the database was denied",
            ErrorKind::ConnectionLost => "The database connection was lost",
            ErrorKind::UnknownError => "Unknown error",
        }
    }

    /// Whether the human message should carry the backend's own text
    fn includes_detail(&self) -> bool {
        matches!(
            self,
            ErrorKind::TableNotFound | ErrorKind::ColumnNotFound | ErrorKind::SyntaxError
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized failure description returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub message: String,
    pub original_message: String,
    pub code: Option<String>,
}

impl ErrorEnvelope {
    /// Build an envelope from a native code and message
    ///
    /// Unknown codes become [`ErrorKind::UnknownError`]; the code and message
    /// are kept verbatim either way.
    pub fn from_native(backend: BackendType, code: Option<&str>, original_message: &str) -> Self {
        let kind = code
            .and_then(|c| backend.classify(c, original_message))
            .unwrap_or(ErrorKind::UnknownError);

        let message = match kind {
            ErrorKind::UnknownError => original_message.to_string(),
            k if k.includes_detail() => format!("{}: {}", k.describe(), original_message),
            k => k.describe().to_string(),
        };

        Self {
            kind,
            message,
            original_message: original_message.to_string(),
            code: code.map(str::to_string),
        }
    }

    /// Normalize a store failure
    pub fn from_store_error(backend: BackendType, err: &StoreError) -> Self {
        Self::from_native(backend, err.code(), &err.backend_message())
    }

    /// Envelope for a statement rejected before reaching the store
    pub fn rejected(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind,
            message: format!("{}: {}", kind.describe(), message),
            original_message: message,
            code: None,
        }
    }
}

/// Top-level error for gateway entry points
///
/// Only failures that are reported synchronously surface here: malformed
/// configuration, empty statements and payload problems. Store failures during
/// a query are turned into an [`ErrorEnvelope`] instead.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Missing or invalid configuration / input
    #[error("Configuration error: {0}")]
    Config(String),

    /// Payload could not be parsed
    #[error(transparent)]
    Payload(#[from] PayloadError),

    /// Store failure outside of query execution
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConfigError(msg) => GatewayError::Config(msg),
            other => GatewayError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_names() {
        let json = serde_json::to_string(&ErrorKind::TableNotFound).unwrap();
        assert_eq!(json, "\"TABLE_NOT_FOUND\"");
        assert_eq!(ErrorKind::ConnectionLost.as_str(), "CONNECTION_LOST");
        assert_eq!(ErrorKind::UnknownError.to_string(), "UNKNOWN_ERROR");
    }

    #[test]
    fn test_envelope_from_known_code() {
        let env = ErrorEnvelope::from_native(
            BackendType::Postgres,
            Some("42P01"),
            "relation \"missing\" does not exist",
        );
        assert_eq!(env.kind, ErrorKind::TableNotFound);
        assert!(env.message.starts_with("Table not found: "));
        assert_eq!(env.original_message, "relation \"missing\" does not exist");
        assert_eq!(env.code.as_deref(), Some("42P01"));
    }

    #[test]
    fn test_envelope_unknown_code_is_preserved() {
        let env = ErrorEnvelope::from_native(BackendType::Postgres, Some("22012"), "division by zero");
        assert_eq!(env.kind, ErrorKind::UnknownError);
        assert_eq!(env.message, "division by zero");
        assert_eq!(env.code.as_deref(), Some("22012"));
    }

    #[test]
    fn test_envelope_without_code() {
        let env = ErrorEnvelope::from_native(BackendType::DuckDB, None, "boom");
        assert_eq!(env.kind, ErrorKind::UnknownError);
        assert!(env.code.is_none());
    }

    #[test]
    fn test_envelope_serializes_type_field() {
        let env = ErrorEnvelope::from_native(BackendType::DuckDB, Some("PARSER"), "Parser Error: x");
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["type"], "SYNTAX_ERROR");
        assert_eq!(value["code"], "PARSER");
        assert_eq!(value["original_message"], "Parser Error: x");
    }

    #[test]
    fn test_connection_refused_message_has_no_detail() {
        let env = ErrorEnvelope::from_native(
            BackendType::Postgres,
            Some("ECONNREFUSED"),
            "error connecting to server: Connection refused (os error 111)",
        );
        assert_eq!(env.kind, ErrorKind::ConnectionError);
        assert_eq!(env.message, ErrorKind::ConnectionError.describe());
    }

    #[test]
    fn test_config_store_error_becomes_gateway_config() {
        let err: GatewayError = StoreError::ConfigError("missing host".to_string()).into();
        assert!(matches!(err, GatewayError::Config(ref m) if m == "missing host"));
    }
}
