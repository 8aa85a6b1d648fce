//! Schema introspection with low-cardinality value sampling
//!
//! Describes tables in the configured workspace: every column with its
//! backend-reported type and key classification, plus up to
//! [`SAMPLE_LIMIT`] distinct values for columns that have no more than that
//! many. When nothing has been uploaded yet the built-in catalog is returned.

pub mod builtin;

use serde::Serialize;
use serde::ser::SerializeMap;
use serde_json::Value;

use crate::database::{self, ColumnKey, GatewayConfig, StoreBackend, StoreError, quote_identifier};
use crate::error::GatewayError;

/// Largest distinct-value count for which a column is sampled
pub const SAMPLE_LIMIT: i64 = 25;

/// Which tables to describe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableSelection {
    /// The built-in catalog, without contacting the store
    Builtin,
    /// The named tables, in the given order
    Named(Vec<String>),
    /// Every base table in the workspace
    All,
}

/// Outcome of sampling one column
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    /// Distinct non-null values; the column has at most [`SAMPLE_LIMIT`]
    Present(Vec<Value>),
    /// No sample: the column is empty or has too many distinct values
    Absent { distinct_count: i64 },
    /// Sampling failed for this column
    Unknown { reason: String },
}

impl Sample {
    /// The sampled values, when present
    pub fn values(&self) -> Option<&[Value]> {
        match self {
            Sample::Present(values) => Some(values),
            _ => None,
        }
    }
}

/// One described column
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: String,
    pub key: ColumnKey,
    /// `None` for columns that were not sampled (the built-in catalog)
    pub sample: Option<Sample>,
    /// Human description (built-in catalog)
    pub comment: Option<String>,
    /// Illustrative values (built-in catalog)
    pub examples: Vec<Value>,
    /// Extra guidance on how to read the column (built-in catalog)
    pub note: Option<String>,
}

impl Serialize for ColumnDescriptor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("name", &self.name)?;
        map.serialize_entry("type", &self.data_type)?;
        match self.key {
            ColumnKey::Primary => map.serialize_entry("primary", &true)?,
            ColumnKey::Unique => map.serialize_entry("unique", &true)?,
            ColumnKey::None => {}
        }
        if let Some(values) = self.sample.as_ref().and_then(Sample::values) {
            map.serialize_entry("unique_values", values)?;
        }
        if let Some(comment) = &self.comment {
            map.serialize_entry("comment", comment)?;
        }
        if !self.examples.is_empty() {
            map.serialize_entry("examples", &self.examples)?;
        }
        if let Some(note) = &self.note {
            map.serialize_entry("description", note)?;
        }
        map.end()
    }
}

/// One described table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableDescriptor {
    pub table_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub columns: Vec<ColumnDescriptor>,
}

/// Wire response of the schema entry point
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaResponse {
    Tables(Vec<TableDescriptor>),
    Failed {
        error: String,
        workspace: String,
        tables_requested: Vec<String>,
    },
}

impl Serialize for SchemaResponse {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        match self {
            SchemaResponse::Tables(tables) => {
                map.serialize_entry("tables", tables)?;
            }
            SchemaResponse::Failed {
                error,
                workspace,
                tables_requested,
            } => {
                map.serialize_entry("error", error)?;
                map.serialize_entry(
                    "debug_info",
                    &serde_json::json!({
                        "workspace": workspace,
                        "tables_requested": tables_requested,
                    }),
                )?;
            }
        }
        map.end()
    }
}

/// Schema entry point
///
/// Configuration problems (including an empty table list) are returned as
/// errors; store failures are reported in the response.
pub async fn describe_schema(
    config: &GatewayConfig,
    selection: &TableSelection,
) -> Result<SchemaResponse, GatewayError> {
    let requested = match selection {
        TableSelection::Builtin => return Ok(SchemaResponse::Tables(builtin::catalog()?)),
        TableSelection::Named(tables) if tables.is_empty() => {
            return Err(GatewayError::Config(
                "table list must be a non-empty array".to_string(),
            ));
        }
        TableSelection::Named(tables) => tables.clone(),
        TableSelection::All => Vec::new(),
    };

    config.validate()?;

    let failed = |e: StoreError| SchemaResponse::Failed {
        error: e.to_string(),
        workspace: config.store.workspace.clone(),
        tables_requested: requested.clone(),
    };

    let store = match database::connect(config).await {
        Ok(store) => store,
        Err(StoreError::ConfigError(msg)) => return Err(GatewayError::Config(msg)),
        Err(e) => return Ok(failed(e)),
    };

    let result = describe(&*store, &config.store.workspace, selection).await;
    database::release(&*store).await;

    Ok(match result {
        Ok(tables) => SchemaResponse::Tables(tables),
        Err(e) => {
            tracing::warn!("Schema introspection failed: {}", e);
            failed(e)
        }
    })
}

/// Describe the selected tables on an open connection
///
/// Falls back to the built-in catalog when the workspace does not exist.
pub async fn describe(
    store: &dyn StoreBackend,
    workspace: &str,
    selection: &TableSelection,
) -> Result<Vec<TableDescriptor>, StoreError> {
    if *selection == TableSelection::Builtin {
        return builtin::catalog();
    }

    if !store.workspace_exists(workspace).await? {
        tracing::info!(
            "Workspace '{}' does not exist, returning built-in catalog",
            workspace
        );
        return builtin::catalog();
    }

    let tables = match selection {
        TableSelection::Named(tables) => tables.clone(),
        _ => store.list_tables(workspace).await?,
    };

    let mut described = Vec::with_capacity(tables.len());
    for table in tables {
        described.push(describe_table(store, workspace, &table).await?);
    }

    Ok(described)
}

/// Describe one table, sampling every column
pub async fn describe_table(
    store: &dyn StoreBackend,
    workspace: &str,
    table: &str,
) -> Result<TableDescriptor, StoreError> {
    let catalog_columns = store.table_columns(workspace, table).await?;
    if catalog_columns.is_empty() {
        tracing::warn!("Table '{}' has no columns in '{}'", table, workspace);
    }

    let qualified = store.qualified_name(workspace, table);
    let mut columns = Vec::with_capacity(catalog_columns.len());

    for column in catalog_columns {
        let sample = sample_column(store, &qualified, &column.name).await;
        columns.push(ColumnDescriptor {
            name: column.name,
            data_type: column.data_type,
            key: column.key,
            sample: Some(sample),
            comment: None,
            examples: Vec::new(),
            note: None,
        });
    }

    Ok(TableDescriptor {
        table_name: table.to_string(),
        description: None,
        columns,
    })
}

/// Sample a column's distinct values
///
/// Never fails: store errors become [`Sample::Unknown`].
pub async fn sample_column(store: &dyn StoreBackend, qualified_table: &str, column: &str) -> Sample {
    match try_sample(store, qualified_table, column).await {
        Ok(sample) => sample,
        Err(e) => {
            tracing::warn!(
                "Failed to sample {}.{}: {}",
                qualified_table,
                column,
                e
            );
            Sample::Unknown {
                reason: e.to_string(),
            }
        }
    }
}

async fn try_sample(
    store: &dyn StoreBackend,
    qualified_table: &str,
    column: &str,
) -> Result<Sample, StoreError> {
    let col = quote_identifier(column);

    let count = store
        .execute_query(&format!(
            "SELECT COUNT(DISTINCT {col}) AS cnt FROM {qualified_table}"
        ))
        .await?;
    let distinct_count = count.scalar().and_then(Value::as_i64).unwrap_or(0);

    if distinct_count <= 0 || distinct_count > SAMPLE_LIMIT {
        return Ok(Sample::Absent { distinct_count });
    }

    let result = store
        .execute_query(&format!(
            "SELECT DISTINCT {col} AS val FROM {qualified_table} \
             WHERE {col} IS NOT NULL ORDER BY 1 LIMIT {SAMPLE_LIMIT}"
        ))
        .await?;

    Ok(Sample::Present(
        result
            .rows
            .iter()
            .map(|row| row.get("val").cloned().unwrap_or(Value::Null))
            .collect(),
    ))
}
