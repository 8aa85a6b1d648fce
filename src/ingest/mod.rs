//! Schema-driven ingestion
//!
//! Replaces the configured workspace with the tables described by a
//! [`TabularDataset`]. Column names and types are taken verbatim from each
//! sheet's declaration; nothing is inferred from the data.
//!
//! The reset and every sheet run in one transaction, so a failing sheet
//! leaves the previous workspace in place.

pub mod validation;

use serde::Serialize;
use serde::ser::SerializeMap;
use serde_json::{Map, Value};

use crate::database::{self, GatewayConfig, StoreBackend, StoreError, quote_identifier};
use crate::error::GatewayError;
use crate::payload::{self, ColumnSpec, Diagnostics, PayloadError, Sheet, TabularDataset};
use validation::{ValidationError, validate_data_type, validate_identifier};

/// Rows written per batch of insert statements
pub const INSERT_CHUNK_ROWS: usize = 500;

/// Ingestion errors
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The payload could not be turned into a dataset
    #[error(transparent)]
    Payload(#[from] PayloadError),

    /// A declared name or type was rejected
    #[error("Sheet '{sheet}': {source}")]
    Invalid {
        sheet: String,
        #[source]
        source: ValidationError,
    },

    /// A sheet declared no columns
    #[error("Sheet '{sheet}' declares no columns")]
    NoColumns { sheet: String },

    /// The workspace could not be dropped and recreated
    #[error("Failed to reset workspace '{workspace}': {source}")]
    Reset {
        workspace: String,
        #[source]
        source: StoreError,
    },

    /// Creating or filling a sheet's table failed
    #[error("Sheet '{sheet}': {source}")]
    Sheet {
        sheet: String,
        #[source]
        source: StoreError,
    },

    /// Connection or transaction failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Summary of a completed ingestion
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct IngestReport {
    /// Created tables, deduplicated, in first-occurrence order
    pub tables: Vec<String>,
    /// Total rows written across all sheets
    pub rows_inserted: usize,
}

/// Wire response of the upload entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestResponse {
    /// Upload flag was off; the store was not touched
    Skipped,
    /// Tables created
    Created(Vec<String>),
    /// Parse, validation or store failure
    Failed {
        error: String,
        diagnostics: Diagnostics,
    },
}

impl IngestResponse {
    fn failed(error: &IngestError, text: &str) -> Self {
        let diagnostics = match error {
            IngestError::Payload(e) => e.diagnostics().clone(),
            _ => Diagnostics::for_text(text),
        };
        IngestResponse::Failed {
            error: error.to_string(),
            diagnostics,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, IngestResponse::Failed { .. })
    }
}

impl Serialize for IngestResponse {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            IngestResponse::Skipped => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("OK", "")?;
                map.end()
            }
            IngestResponse::Created(tables) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("OK", tables)?;
                map.end()
            }
            IngestResponse::Failed { error, diagnostics } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("error", error)?;
                map.serialize_entry("data_length", &diagnostics.data_length)?;
                map.serialize_entry("first_200_chars", &diagnostics.first_200_chars)?;
                map.end()
            }
        }
    }
}

/// Upload entry point: parse a raw payload and replace the workspace with it
///
/// When `file_check` is false nothing is parsed and the store is not
/// contacted. Configuration problems are returned as errors; every other
/// failure is reported in the response.
pub async fn ingest_payload(
    config: &GatewayConfig,
    raw: &str,
    file_check: bool,
) -> Result<IngestResponse, GatewayError> {
    if !file_check {
        tracing::info!("Upload flag is off, skipping ingestion");
        return Ok(IngestResponse::Skipped);
    }

    config.validate()?;

    let dataset = match payload::extract_dataset(raw) {
        Ok(dataset) => dataset,
        Err(e) => {
            let text = payload::sanitize(raw);
            return Ok(IngestResponse::failed(&IngestError::Payload(e), &text));
        }
    };

    match ingest(config, &dataset).await {
        Ok(report) => Ok(IngestResponse::Created(report.tables)),
        Err(IngestError::Store(StoreError::ConfigError(msg))) => Err(GatewayError::Config(msg)),
        Err(e) => {
            tracing::warn!("Ingestion failed: {}", e);
            Ok(IngestResponse::failed(&e, &payload::sanitize(raw)))
        }
    }
}

/// Replace the configured workspace with `dataset`
///
/// Opens one connection, ingests, and releases the connection on every path.
pub async fn ingest(
    config: &GatewayConfig,
    dataset: &TabularDataset,
) -> Result<IngestReport, IngestError> {
    check_dataset(dataset)?;

    let store = database::connect(config).await?;
    let result = ingest_into(&*store, &config.store.workspace, dataset).await;
    database::release(&*store).await;

    result
}

/// Replace `workspace` with `dataset` on an open connection
pub async fn ingest_into(
    store: &dyn StoreBackend,
    workspace: &str,
    dataset: &TabularDataset,
) -> Result<IngestReport, IngestError> {
    validate_identifier("workspace name", workspace)
        .map_err(|e| StoreError::ConfigError(e.to_string()))?;
    check_dataset(dataset)?;

    tracing::info!(
        "Ingesting {} sheet(s) into workspace '{}'",
        dataset.sheets.len(),
        workspace
    );

    store.begin().await?;

    match load(store, workspace, dataset).await {
        Ok(report) => {
            store.commit().await?;
            tracing::info!("Ingestion complete: {:?}", report.tables);
            Ok(report)
        }
        Err(e) => {
            if let Err(rollback_err) = store.rollback().await {
                tracing::warn!("Rollback after failed ingestion failed: {}", rollback_err);
            }
            Err(e)
        }
    }
}

async fn load(
    store: &dyn StoreBackend,
    workspace: &str,
    dataset: &TabularDataset,
) -> Result<IngestReport, IngestError> {
    store
        .reset_workspace(workspace)
        .await
        .map_err(|source| IngestError::Reset {
            workspace: workspace.to_string(),
            source,
        })?;

    let mut rows_inserted = 0;
    for sheet in &dataset.sheets {
        rows_inserted += load_sheet(store, workspace, sheet)
            .await
            .map_err(|source| IngestError::Sheet {
                sheet: sheet.sheet_name.clone(),
                source,
            })?;
    }

    Ok(IngestReport {
        tables: dataset.table_names(),
        rows_inserted,
    })
}

async fn load_sheet(
    store: &dyn StoreBackend,
    workspace: &str,
    sheet: &Sheet,
) -> Result<usize, StoreError> {
    let table = store.qualified_name(workspace, &sheet.sheet_name);

    tracing::info!("Creating table: {}", sheet.sheet_name);
    store
        .execute_batch(&create_table_sql(&table, &sheet.data_types))
        .await?;

    tracing::info!(
        "Inserting data: {} ({} rows)",
        sheet.sheet_name,
        sheet.data_rows.len()
    );
    let column_list = sheet
        .data_types
        .iter()
        .map(|c| quote_identifier(&c.name))
        .collect::<Vec<_>>()
        .join(", ");

    for chunk in sheet.data_rows.chunks(INSERT_CHUNK_ROWS) {
        let batch: String = chunk
            .iter()
            .map(|row| {
                format!(
                    "INSERT INTO {} ({}) VALUES ({});\n",
                    table,
                    column_list,
                    render_row(row, &sheet.data_types)
                )
            })
            .collect();
        store.execute_batch(&batch).await?;
    }

    Ok(sheet.data_rows.len())
}

/// Reject sheets the store could not be given safely
fn check_dataset(dataset: &TabularDataset) -> Result<(), IngestError> {
    for sheet in &dataset.sheets {
        let invalid = |source| IngestError::Invalid {
            sheet: sheet.sheet_name.clone(),
            source,
        };

        validate_identifier("table name", &sheet.sheet_name).map_err(invalid)?;

        if sheet.data_types.is_empty() {
            return Err(IngestError::NoColumns {
                sheet: sheet.sheet_name.clone(),
            });
        }

        for column in &sheet.data_types {
            validate_identifier("column name", &column.name).map_err(invalid)?;
            validate_data_type(&column.data_type).map_err(invalid)?;
        }
    }

    Ok(())
}

fn create_table_sql(table: &str, columns: &[ColumnSpec]) -> String {
    let definitions = columns
        .iter()
        .map(|c| format!("{} {}", quote_identifier(&c.name), c.data_type.trim()))
        .collect::<Vec<_>>()
        .join(", ");

    format!("CREATE TABLE IF NOT EXISTS {} ({})", table, definitions)
}

/// Render one row's values in declared column order
///
/// Each value is looked up by column name, falling back to the value at the
/// same position; missing values become NULL.
fn render_row(row: &Map<String, Value>, columns: &[ColumnSpec]) -> String {
    columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            row.get(&column.name)
                .or_else(|| row.values().nth(i))
                .map(sql_literal)
                .unwrap_or_else(|| "NULL".to_string())
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render a JSON value as an escaped SQL literal
fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote_string(s),
        nested => quote_string(&nested.to_string()),
    }
}

fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn column(name: &str, data_type: &str) -> ColumnSpec {
        ColumnSpec {
            name: name.to_string(),
            data_type: data_type.to_string(),
        }
    }

    fn row(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_sql_literal() {
        assert_eq!(sql_literal(&json!(null)), "NULL");
        assert_eq!(sql_literal(&json!(true)), "TRUE");
        assert_eq!(sql_literal(&json!(42)), "42");
        assert_eq!(sql_literal(&json!(1.5)), "1.5");
        assert_eq!(sql_literal(&json!("O'Brien")), "'O''Brien'");
        assert_eq!(sql_literal(&json!({"k": [1]})), "'{\"k\":[1]}'");
    }

    #[test]
    fn test_render_row_by_name_and_position() {
        let columns = vec![column("a", "INT"), column("b", "TEXT"), column("c", "TEXT")];

        // Reordered keys follow the declaration
        let r = row(json!({"b": "x", "a": 1, "c": null}));
        assert_eq!(render_row(&r, &columns), "1, 'x', NULL");

        // Unknown key at the position of a declared column
        let r = row(json!({"a": 1, "other": "y"}));
        assert_eq!(render_row(&r, &columns), "1, 'y', NULL");
    }

    #[test]
    fn test_create_table_sql() {
        let sql = create_table_sql(
            "\"uploaded\".\"t\"",
            &[column("id", "INT PRIMARY KEY"), column("na\"me", "VARCHAR(10)")],
        );
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"uploaded\".\"t\" (\"id\" INT PRIMARY KEY, \"na\"\"me\" VARCHAR(10))"
        );
    }

    #[test]
    fn test_check_dataset() {
        let sheet = |name: &str, types: Vec<ColumnSpec>| Sheet {
            sheet_name: name.to_string(),
            data_rows: Vec::new(),
            data_types: types,
        };

        let ok = TabularDataset {
            sheets: vec![sheet("t", vec![column("a", "INT")])],
        };
        assert!(check_dataset(&ok).is_ok());

        let no_columns = TabularDataset {
            sheets: vec![sheet("t", vec![])],
        };
        assert!(matches!(
            check_dataset(&no_columns),
            Err(IngestError::NoColumns { .. })
        ));

        let bad_type = TabularDataset {
            sheets: vec![sheet("t", vec![column("a", "INT); DROP SCHEMA x")])],
        };
        assert!(matches!(
            check_dataset(&bad_type),
            Err(IngestError::Invalid { ref sheet, .. }) if sheet == "t"
        ));
    }

    #[test]
    fn test_response_wire_shapes() {
        assert_eq!(
            serde_json::to_value(IngestResponse::Skipped).unwrap(),
            json!({"OK": ""})
        );
        assert_eq!(
            serde_json::to_value(IngestResponse::Created(vec!["t1".to_string()])).unwrap(),
            json!({"OK": ["t1"]})
        );

        let failed = IngestResponse::Failed {
            error: "boom".to_string(),
            diagnostics: Diagnostics::for_text("{bad"),
        };
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({"error": "boom", "data_length": 4, "first_200_chars": "{bad"})
        );
    }

    #[tokio::test]
    async fn test_skipped_upload_never_connects() {
        // Invalid config would fail if it were used
        let mut config = GatewayConfig::new();
        config.store.workspace = String::new();

        let response = ingest_payload(&config, "not even json", false).await.unwrap();
        assert_eq!(response, IngestResponse::Skipped);
    }

    #[tokio::test]
    async fn test_parse_failure_is_reported() {
        let config = GatewayConfig::duckdb(":memory:");
        let response = ingest_payload(&config, "<doc>{'data': [</doc>", true)
            .await
            .unwrap();

        match response {
            IngestResponse::Failed { error, diagnostics } => {
                assert!(error.starts_with("Failed to parse payload"));
                assert_eq!(diagnostics.first_200_chars, "{'data': [");
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
