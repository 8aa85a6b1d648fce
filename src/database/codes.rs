//! Backend-native error code tables
//!
//! Each adapter reports failures with its own native code: DuckDB with a
//! symbolic error class taken from the message prefix (`Catalog Error: ...`
//! becomes `CATALOG`), PostgreSQL with a five-character SQLSTATE. The tables
//! below map those codes onto the shared [`ErrorKind`] taxonomy.
//!
//! DuckDB's `CATALOG` and `BINDER` classes cover many unrelated failures
//! (unknown functions, type mismatches), so they only map to a kind when the
//! message says which object is missing.

use once_cell::sync::Lazy;
use regex::Regex;

use super::config::BackendType;
use crate::error::ErrorKind;

/// Code reported when an operation is attempted on a released connection
pub const CONNECTION_CLOSED: &str = "CONNECTION_CLOSED";

/// Code reported when the server actively refused the connection
pub const CONNECTION_REFUSED: &str = "ECONNREFUSED";

static RE_DUCKDB_ERROR_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z][A-Za-z ]*?) Error:").expect("Invalid regex"));

/// DuckDB classes whose kind is decided by the message
static DUCKDB_MESSAGE_RULES: Lazy<Vec<(&'static str, Regex, ErrorKind)>> = Lazy::new(|| {
    let rule = |class, pattern: &str, kind| {
        (class, Regex::new(pattern).expect("Invalid regex"), kind)
    };
    vec![
        rule("CATALOG", r"Table with name .* does not exist", ErrorKind::TableNotFound),
        rule("BINDER", r"Referenced column .* not found", ErrorKind::ColumnNotFound),
        rule("BINDER", r"does not have a column named", ErrorKind::ColumnNotFound),
        rule("BINDER", r"Referenced table .* not found", ErrorKind::TableNotFound),
    ]
});

/// DuckDB error classes
pub const DUCKDB_ERROR_CODES: &[(&str, ErrorKind)] = &[
    ("PARSER", ErrorKind::SyntaxError),
    ("IO", ErrorKind::ConnectionError),
    ("PERMISSION", ErrorKind::AccessDenied),
    ("CONNECTION", ErrorKind::ConnectionLost),
    ("INTERRUPT", ErrorKind::ConnectionLost),
    (CONNECTION_CLOSED, ErrorKind::ConnectionLost),
];

/// PostgreSQL SQLSTATE codes plus transport-level codes
pub const POSTGRES_ERROR_CODES: &[(&str, ErrorKind)] = &[
    ("42P01", ErrorKind::TableNotFound),
    ("42703", ErrorKind::ColumnNotFound),
    ("42601", ErrorKind::SyntaxError),
    ("28P01", ErrorKind::AccessDenied),
    ("28000", ErrorKind::AccessDenied),
    ("42501", ErrorKind::AccessDenied),
    ("08001", ErrorKind::ConnectionError),
    ("08004", ErrorKind::ConnectionError),
    (CONNECTION_REFUSED, ErrorKind::ConnectionError),
    ("08006", ErrorKind::ConnectionLost),
    ("08003", ErrorKind::ConnectionLost),
    ("57P01", ErrorKind::ConnectionLost),
    (CONNECTION_CLOSED, ErrorKind::ConnectionLost),
];

impl BackendType {
    /// The native code table for this backend
    pub fn error_codes(&self) -> &'static [(&'static str, ErrorKind)] {
        match self {
            BackendType::DuckDB => DUCKDB_ERROR_CODES,
            BackendType::Postgres => POSTGRES_ERROR_CODES,
        }
    }

    /// Map a native code and its message onto the shared taxonomy
    ///
    /// Returns `None` for codes the table does not know, and for DuckDB
    /// `CATALOG`/`BINDER` errors about anything but a missing table or column.
    pub fn classify(&self, code: &str, message: &str) -> Option<ErrorKind> {
        if let Some(kind) = self
            .error_codes()
            .iter()
            .find(|(native, _)| *native == code)
            .map(|(_, kind)| *kind)
        {
            return Some(kind);
        }

        match self {
            BackendType::DuckDB => DUCKDB_MESSAGE_RULES
                .iter()
                .find(|(class, pattern, _)| *class == code && pattern.is_match(message))
                .map(|(_, _, kind)| *kind),
            BackendType::Postgres => None,
        }
    }
}

/// Derive DuckDB's symbolic error class from an error message
///
/// `"Catalog Error: Table with name t does not exist!"` yields `CATALOG`,
/// `"Invalid Input Error: ..."` yields `INVALID_INPUT`.
pub fn duckdb_error_class(message: &str) -> Option<String> {
    RE_DUCKDB_ERROR_CLASS
        .captures(message.trim_start())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_uppercase().replace(' ', "_"))
}
