//! Payload sanitizing and extraction
//!
//! Turns raw, loosely formed upload text into a [`TabularDataset`]:
//! wrapper `<doc>` tags are stripped, only the first of several concatenated
//! objects is kept, non-standard quoting is normalized and the `data` field is
//! parsed into sheets.

pub mod scanner;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

static RE_DOC_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</?doc\b[^>]*>").expect("Invalid regex"));

/// Characters shown on each side of a parse position
const CONTEXT_RADIUS: usize = 50;
/// Characters shown when no parse position is known
const CONTEXT_FALLBACK: usize = 300;
/// Characters of the payload echoed back in diagnostics
const HEAD_CHARS: usize = 200;

/// Diagnostic context attached to payload errors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Total payload length in characters
    pub data_length: usize,
    /// Text around the parse position
    pub context: String,
    /// Leading characters of the payload
    pub first_200_chars: String,
}

impl Diagnostics {
    /// Diagnostics for a failure with no parse position
    pub fn for_text(text: &str) -> Self {
        Self::capture(text, text, None)
    }

    /// Capture diagnostics for `text`, windowing `parsed` around `position`
    ///
    /// `parsed` is the text the parser actually saw; `position` is a character
    /// offset into it.
    fn capture(text: &str, parsed: &str, position: Option<usize>) -> Self {
        let context = match position {
            Some(pos) => {
                let start = pos.saturating_sub(CONTEXT_RADIUS);
                parsed
                    .chars()
                    .skip(start)
                    .take(pos + CONTEXT_RADIUS - start)
                    .collect()
            }
            None => char_prefix(parsed, CONTEXT_FALLBACK),
        };

        Self {
            data_length: text.chars().count(),
            context,
            first_200_chars: char_prefix(text, HEAD_CHARS),
        }
    }
}

/// Payload errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum PayloadError {
    /// The text is not JSON even after normalization
    #[error("Failed to parse payload: {message}")]
    Parse {
        message: String,
        diagnostics: Diagnostics,
    },

    /// The JSON does not describe a tabular dataset
    #[error("Invalid payload shape: {message}")]
    Shape {
        message: String,
        diagnostics: Diagnostics,
    },
}

impl PayloadError {
    pub fn diagnostics(&self) -> &Diagnostics {
        match self {
            PayloadError::Parse { diagnostics, .. } | PayloadError::Shape { diagnostics, .. } => {
                diagnostics
            }
        }
    }
}

/// One declared column: name and storage type, taken verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct ColumnSpec {
    pub name: String,
    pub data_type: String,
}

impl From<(String, String)> for ColumnSpec {
    fn from((name, data_type): (String, String)) -> Self {
        Self { name, data_type }
    }
}

impl From<ColumnSpec> for (String, String) {
    fn from(column: ColumnSpec) -> Self {
        (column.name, column.data_type)
    }
}

/// One sheet of uploaded data, destined for one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    /// Destination table name
    pub sheet_name: String,
    /// Rows keyed by column name, in column order
    #[serde(default)]
    pub data_rows: Vec<Map<String, Value>>,
    /// Declared columns, in table order
    pub data_types: Vec<ColumnSpec>,
}

/// Ordered list of sheets extracted from a payload
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TabularDataset {
    pub sheets: Vec<Sheet>,
}

impl TabularDataset {
    /// Sheet names in first-occurrence order, without duplicates
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for sheet in &self.sheets {
            if !names.contains(&sheet.sheet_name) {
                names.push(sheet.sheet_name.clone());
            }
        }
        names
    }
}

/// First `n` characters of `text`
pub fn char_prefix(text: &str, n: usize) -> String {
    text.chars().take(n).collect()
}

/// Strip `<doc>` wrapper tags and keep only the first of concatenated objects
pub fn sanitize(raw: &str) -> String {
    let stripped = RE_DOC_TAG.replace_all(raw, "");
    let text = stripped.trim();

    match scanner::first_object_end(text) {
        Some(end) => {
            tracing::debug!("Kept first of concatenated objects ({} bytes)", end);
            text[..end].to_string()
        }
        None => text.to_string(),
    }
}

/// Parse a raw payload into a [`TabularDataset`]
pub fn extract_dataset(raw: &str) -> Result<TabularDataset, PayloadError> {
    let text = sanitize(raw);
    tracing::debug!("Payload after sanitizing: {}", char_prefix(&text, 100));

    let value = parse_loose(&text)?;

    let sheets = match value {
        Value::Object(mut map) => map.remove("data"),
        _ => None,
    };
    let Some(sheets @ Value::Array(_)) = sheets else {
        return Err(PayloadError::Shape {
            message: "payload has no `data` array".to_string(),
            diagnostics: Diagnostics::capture(&text, &text, None),
        });
    };

    let sheets: Vec<Sheet> =
        serde_json::from_value(sheets).map_err(|e| PayloadError::Shape {
            message: format!("malformed sheet: {}", e),
            diagnostics: Diagnostics::capture(&text, &text, None),
        })?;

    tracing::info!("Parsed payload with {} sheet(s)", sheets.len());

    Ok(TabularDataset { sheets })
}

/// Parse a list of table names
///
/// Accepts an ingestion result (`{"OK": [...]}`), a JSON array, or a loosely
/// quoted list such as `['a', 'b']`.
pub fn parse_table_list(text: &str) -> Result<Vec<String>, PayloadError> {
    let text = text.trim();
    let value = parse_loose(text)?;

    let list = match value {
        Value::Object(mut map) => map.remove("OK"),
        other => Some(other),
    };

    let names = match list {
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect::<Option<Vec<_>>>(),
        _ => None,
    };

    names.ok_or_else(|| PayloadError::Shape {
        message: "expected a list of table names".to_string(),
        diagnostics: Diagnostics::capture(text, text, None),
    })
}

/// Normalize quoting and parse, keeping object key order
fn parse_loose(text: &str) -> Result<Value, PayloadError> {
    let normalized = scanner::normalize_quotes(text);

    serde_json::from_str(&normalized).map_err(|e| {
        let diagnostics = Diagnostics::capture(text, &normalized, error_position(&normalized, &e));
        tracing::warn!(
            "Payload parse failed at line {} column {}: {} (near: {})",
            e.line(),
            e.column(),
            e,
            diagnostics.context
        );
        PayloadError::Parse {
            message: e.to_string(),
            diagnostics,
        }
    })
}

/// Character offset of a parse error, when the parser reported one
fn error_position(text: &str, err: &serde_json::Error) -> Option<usize> {
    if err.line() == 0 {
        return None;
    }

    let line_start: usize = text
        .split_inclusive('\n')
        .take(err.line() - 1)
        .map(str::len)
        .sum();
    let mut byte = (line_start + err.column().saturating_sub(1)).min(text.len());
    while !text.is_char_boundary(byte) {
        byte -= 1;
    }

    Some(text[..byte].chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_doc_tags() {
        let raw = "  <doc id=\"1\" source='upload'>{\"data\":[]}</doc>\n";
        assert_eq!(sanitize(raw), "{\"data\":[]}");
        assert_eq!(sanitize("<doc>{}</doc>"), "{}");
    }

    #[test]
    fn test_sanitize_keeps_first_object() {
        let raw = r#"{"data":[{"sheet_name":"t1","data_rows":[{"a":1}],"data_types":[["a","INT"]]}]}{"garbage":"ignored"}"#;
        let text = sanitize(raw);
        assert!(text.ends_with("]}]}"));
        assert!(!text.contains("garbage"));
    }

    #[test]
    fn test_extract_concatenated_payload() {
        let raw = r#"{"data":[{"sheet_name":"t1","data_rows":[{"a":1}],"data_types":[["a","INT"]]}]}{"garbage":"ignored"}"#;
        let dataset = extract_dataset(raw).unwrap();

        assert_eq!(dataset.sheets.len(), 1);
        let sheet = &dataset.sheets[0];
        assert_eq!(sheet.sheet_name, "t1");
        assert_eq!(
            sheet.data_types,
            vec![ColumnSpec {
                name: "a".to_string(),
                data_type: "INT".to_string()
            }]
        );
        assert_eq!(sheet.data_rows[0]["a"], serde_json::json!(1));
    }

    #[test]
    fn test_extract_loose_quoting() {
        let raw = "<doc>{'data': [{'sheet_name': 'people', \
                   'data_rows': [{'name': \"O'Brien\", 'age': 'null', 'city': 'Seoul'}], \
                   'data_types': [['name', 'VARCHAR(50)'], ['age', 'INT'], ['city', 'TEXT']]}]}</doc>";
        let dataset = extract_dataset(raw).unwrap();
        let row = &dataset.sheets[0].data_rows[0];

        assert_eq!(row["name"], "O`Brien");
        assert!(row["age"].is_null());
        // Key order follows the payload
        let keys: Vec<&String> = row.keys().collect();
        assert_eq!(keys, vec!["name", "age", "city"]);
    }

    #[test]
    fn test_extract_parse_error_diagnostics() {
        let raw = format!("{{\"data\": [{}, oops]}}", "1, ".repeat(40));
        let err = extract_dataset(&raw).unwrap_err();

        assert!(matches!(err, PayloadError::Parse { .. }));
        let diag = err.diagnostics();
        assert_eq!(diag.data_length, raw.chars().count());
        assert!(diag.context.contains("oops"));
        assert!(diag.context.chars().count() <= 2 * CONTEXT_RADIUS);
        assert_eq!(diag.first_200_chars, char_prefix(&raw, 200));
    }

    #[test]
    fn test_extract_missing_data_is_shape_error() {
        let err = extract_dataset(r#"{"rows": []}"#).unwrap_err();
        assert!(matches!(err, PayloadError::Shape { .. }));

        let err = extract_dataset(r#"{"data": {"sheet_name": "x"}}"#).unwrap_err();
        assert!(matches!(err, PayloadError::Shape { .. }));
    }

    #[test]
    fn test_extract_malformed_sheet_is_shape_error() {
        let err =
            extract_dataset(r#"{"data": [{"sheet_name": "t", "data_types": [["a"]]}]}"#).unwrap_err();
        assert!(matches!(err, PayloadError::Shape { ref message, .. } if message.starts_with("malformed sheet")));
    }

    #[test]
    fn test_table_names_deduplicated() {
        let raw = r#"{"data":[
            {"sheet_name":"b","data_rows":[],"data_types":[["x","INT"]]},
            {"sheet_name":"a","data_rows":[],"data_types":[["x","INT"]]},
            {"sheet_name":"b","data_rows":[],"data_types":[["x","INT"]]}
        ]}"#;
        let dataset = extract_dataset(raw).unwrap();
        assert_eq!(dataset.table_names(), vec!["b", "a"]);
    }

    #[test]
    fn test_parse_table_list() {
        assert_eq!(
            parse_table_list(r#"{"OK": ["t1", "t2"]}"#).unwrap(),
            vec!["t1", "t2"]
        );
        assert_eq!(parse_table_list("['a', 'b']").unwrap(), vec!["a", "b"]);
        assert_eq!(parse_table_list(r#"["c"]"#).unwrap(), vec!["c"]);
        assert!(parse_table_list(r#"{"OK": ""}"#).is_err());
        assert!(parse_table_list("not a list").is_err());
    }
}
