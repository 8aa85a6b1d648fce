//! Guards on caller-declared names and types.
//!
//! Identifiers are always quoted before they reach the store, so any
//! printable text is accepted as a name. Declared types are spliced into DDL
//! verbatim and are therefore restricted to the characters a type spelling
//! needs.

use thiserror::Error;

/// Maximum length for table and column names
pub const MAX_IDENTIFIER_LENGTH: usize = 255;

/// Maximum length for a declared type
pub const MAX_DATA_TYPE_LENGTH: usize = 255;

/// Errors that can occur during input validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Input is empty when a value is required
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    /// Input exceeds maximum allowed length
    #[error("{field} exceeds maximum length (max: {max}, got: {actual})")]
    TooLong {
        field: &'static str,
        max: usize,
        actual: usize,
    },

    /// Input contains invalid characters
    #[error("{field} contains invalid characters: {reason}")]
    InvalidCharacters { field: &'static str, reason: String },
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate a table, column or workspace name.
///
/// # Rules
///
/// - Must not be empty or blank
/// - Must not exceed 255 characters
/// - Must not contain control characters
///
/// # Examples
///
/// ```
/// use tabular_gateway::ingest::validation::validate_identifier;
///
/// assert!(validate_identifier("column name", "고객명").is_ok());
/// assert!(validate_identifier("column name", "unit price ($)").is_ok());
/// assert!(validate_identifier("table name", "").is_err());
/// ```
pub fn validate_identifier(field: &'static str, name: &str) -> ValidationResult<()> {
    if name.trim().is_empty() {
        return Err(ValidationError::Empty(field));
    }

    let length = name.chars().count();
    if length > MAX_IDENTIFIER_LENGTH {
        return Err(ValidationError::TooLong {
            field,
            max: MAX_IDENTIFIER_LENGTH,
            actual: length,
        });
    }

    if let Some(c) = name.chars().find(|c| c.is_control()) {
        return Err(ValidationError::InvalidCharacters {
            field,
            reason: format!("control character {:?}", c),
        });
    }

    Ok(())
}

/// Validate a declared data type string.
///
/// # Rules
///
/// - Must not be empty
/// - Must not contain statement separators or comments
/// - Only letters, digits, spaces, underscores, parentheses, commas and
///   brackets
///
/// # Examples
///
/// ```
/// use tabular_gateway::ingest::validation::validate_data_type;
///
/// assert!(validate_data_type("VARCHAR(255)").is_ok());
/// assert!(validate_data_type("DECIMAL(10, 2)").is_ok());
/// assert!(validate_data_type("INT PRIMARY KEY").is_ok());
/// assert!(validate_data_type("INT); DROP TABLE users;--").is_err());
/// ```
pub fn validate_data_type(data_type: &str) -> ValidationResult<()> {
    if data_type.trim().is_empty() {
        return Err(ValidationError::Empty("data type"));
    }

    if data_type.len() > MAX_DATA_TYPE_LENGTH {
        return Err(ValidationError::TooLong {
            field: "data type",
            max: MAX_DATA_TYPE_LENGTH,
            actual: data_type.len(),
        });
    }

    if data_type.contains(';') || data_type.contains("--") || data_type.contains("/*") {
        return Err(ValidationError::InvalidCharacters {
            field: "data type",
            reason: "contains SQL comment or statement separator".to_string(),
        });
    }

    for c in data_type.chars() {
        if !c.is_ascii_alphanumeric() && !matches!(c, '(' | ')' | ',' | ' ' | '_' | '[' | ']') {
            return Err(ValidationError::InvalidCharacters {
                field: "data type",
                reason: format!("invalid character: '{}'", c),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("table name", "sales_2024").is_ok());
        assert!(validate_identifier("column name", "Order \"Total\"").is_ok());
        assert_eq!(
            validate_identifier("table name", "   "),
            Err(ValidationError::Empty("table name"))
        );
        assert!(matches!(
            validate_identifier("column name", &"x".repeat(256)),
            Err(ValidationError::TooLong { actual: 256, .. })
        ));
        assert!(matches!(
            validate_identifier("column name", "a\0b"),
            Err(ValidationError::InvalidCharacters { .. })
        ));
    }

    #[test]
    fn test_validate_data_type() {
        for ok in ["INT", "VARCHAR(50)", "DOUBLE PRECISION", "INTEGER[]", "DECIMAL(10,2)"] {
            assert!(validate_data_type(ok).is_ok(), "{} should be accepted", ok);
        }

        assert!(validate_data_type("").is_err());
        assert!(validate_data_type("INT; DROP SCHEMA x").is_err());
        assert!(validate_data_type("INT -- comment").is_err());
        assert!(validate_data_type("INT /* c */").is_err());
        assert!(validate_data_type("TEXT DEFAULT 'x'").is_err());
    }
}
