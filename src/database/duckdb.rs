//! DuckDB store backend implementation
//!
//! Provides an embedded store backend using DuckDB. Catalog metadata is read
//! from the `information_schema` views; a workspace is a DuckDB schema.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Mutex;

use super::codes::duckdb_error_class;
use super::{
    BackendType, CatalogColumn, ColumnKey, QueryResult, StoreBackend, StoreError, StoreResult,
    WORKSPACE_ENCODING, quote_identifier,
};

const COLUMNS_SQL: &str = r#"
SELECT
    c.column_name,
    c.data_type,
    (
        SELECT CASE
            WHEN bool_or(tc.constraint_type = 'PRIMARY KEY') THEN 'PRI'
            WHEN bool_or(tc.constraint_type = 'UNIQUE') THEN 'UNI'
            ELSE ''
        END
        FROM duckdb_constraints() tc
        WHERE tc.schema_name = c.table_schema
          AND tc.table_name = c.table_name
          AND list_contains(tc.constraint_column_names, c.column_name)
    ) AS column_key
FROM information_schema.columns c
WHERE c.table_schema = ? AND c.table_name = ?
ORDER BY c.ordinal_position
"#;

const TABLES_SQL: &str = r#"
SELECT table_name
FROM information_schema.tables
WHERE table_schema = ? AND table_type = 'BASE TABLE'
ORDER BY table_name
"#;

const SCHEMA_EXISTS_SQL: &str =
    "SELECT COUNT(*) AS cnt FROM information_schema.schemata WHERE schema_name = ?";

/// DuckDB store backend
///
/// One value is one open connection; it is released by [`StoreBackend::close`]
/// and refuses further work afterwards.
pub struct DuckDBBackend {
    /// DuckDB connection, `None` once released
    connection: Mutex<Option<duckdb::Connection>>,
}

impl DuckDBBackend {
    /// Open a file-based DuckDB database
    pub fn new(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        let connection = duckdb::Connection::open(db_path.as_ref()).map_err(connection_error)?;

        Ok(Self {
            connection: Mutex::new(Some(connection)),
        })
    }

    /// Create an in-memory DuckDB backend
    ///
    /// Contents vanish with the connection, so a workspace created here does
    /// not outlive the entry point that created it.
    pub fn in_memory() -> StoreResult<Self> {
        let connection = duckdb::Connection::open_in_memory().map_err(connection_error)?;

        Ok(Self {
            connection: Mutex::new(Some(connection)),
        })
    }

    /// Run `f` against the open connection
    fn with_connection<T>(
        &self,
        f: impl FnOnce(&duckdb::Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let guard = self.connection.lock().map_err(|e| StoreError::ConnectionFailed {
            code: None,
            message: format!("Lock error: {}", e),
        })?;

        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(StoreError::Closed),
        }
    }

    /// Prepare, run and collect a statement
    fn run_query(
        conn: &duckdb::Connection,
        sql: &str,
        params: &[&dyn duckdb::ToSql],
    ) -> StoreResult<QueryResult> {
        let start = std::time::Instant::now();

        let mut stmt = conn.prepare(sql).map_err(query_error)?;

        // In DuckDB 1.4+, we need to execute the query first, then get columns
        let mut result_rows = stmt.query(params).map_err(query_error)?;

        let column_count = result_rows.as_ref().map(|r| r.column_count()).unwrap_or(0);
        let columns: Vec<String> = (0..column_count)
            .map(|i| {
                result_rows
                    .as_ref()
                    .and_then(|r| r.column_name(i).ok())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("col{}", i))
            })
            .collect();

        let mut rows = Vec::new();
        while let Some(row) = result_rows.next().map_err(query_error)? {
            rows.push(Self::row_to_json(row, &columns));
        }

        Ok(QueryResult {
            columns,
            rows,
            execution_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Convert a DuckDB row to a JSON object keyed by column name
    fn row_to_json(row: &duckdb::Row, columns: &[String]) -> serde_json::Value {
        let mut map = serde_json::Map::new();

        for (i, col_name) in columns.iter().enumerate() {
            let value = match row.get_ref(i) {
                Ok(value_ref) => Self::value_ref_to_json(value_ref),
                Err(_) => serde_json::Value::Null,
            };
            map.insert(col_name.clone(), value);
        }

        serde_json::Value::Object(map)
    }

    /// Convert a DuckDB ValueRef to a JSON value
    fn value_ref_to_json(value: duckdb::types::ValueRef) -> serde_json::Value {
        use duckdb::types::ValueRef;

        match value {
            ValueRef::Null => serde_json::Value::Null,
            ValueRef::Boolean(b) => serde_json::Value::Bool(b),
            ValueRef::TinyInt(i) => serde_json::Value::Number(i.into()),
            ValueRef::SmallInt(i) => serde_json::Value::Number(i.into()),
            ValueRef::Int(i) => serde_json::Value::Number(i.into()),
            ValueRef::BigInt(i) => serde_json::Value::Number(i.into()),
            ValueRef::HugeInt(i) => huge_int_json(i),
            ValueRef::UHugeInt(i) => huge_int_json(i),
            ValueRef::UTinyInt(i) => serde_json::Value::Number(i.into()),
            ValueRef::USmallInt(i) => serde_json::Value::Number(i.into()),
            ValueRef::UInt(i) => serde_json::Value::Number(i.into()),
            ValueRef::UBigInt(i) => serde_json::Value::Number(i.into()),
            ValueRef::Float(f) => (f as f64).into(),
            ValueRef::Double(f) => f.into(),
            ValueRef::Text(bytes) => String::from_utf8_lossy(bytes).into_owned().into(),
            ValueRef::Blob(bytes) => blob_json(bytes),
            ValueRef::Date32(days) => date_json(days),
            ValueRef::Timestamp(unit, raw) => timestamp_json(unit, raw),
            ValueRef::Time64(unit, raw) => time_json(unit, raw),
            ValueRef::Decimal(d) => serde_json::Value::String(d.to_string()),
            ValueRef::Interval {
                months,
                days,
                nanos,
            } => interval_json(months, days, nanos),
            ValueRef::Geometry(bytes) => blob_json(bytes),
            // Lists, structs, maps, unions and enums
            nested => Self::value_to_json(duckdb::types::Value::from(nested)),
        }
    }

    /// Convert an owned DuckDB value, recursing into nested types
    ///
    /// Lists and arrays become JSON arrays, structs JSON objects, maps JSON
    /// objects keyed by the text form of each key.
    fn value_to_json(value: duckdb::types::Value) -> serde_json::Value {
        use duckdb::types::Value;

        match value {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(b),
            Value::TinyInt(i) => i.into(),
            Value::SmallInt(i) => i.into(),
            Value::Int(i) => i.into(),
            Value::BigInt(i) => i.into(),
            Value::HugeInt(i) => huge_int_json(i),
            Value::UHugeInt(i) => huge_int_json(i),
            Value::UTinyInt(i) => i.into(),
            Value::USmallInt(i) => i.into(),
            Value::UInt(i) => i.into(),
            Value::UBigInt(i) => i.into(),
            Value::Float(f) => (f as f64).into(),
            Value::Double(f) => f.into(),
            Value::Decimal(d) => serde_json::Value::String(d.to_string()),
            Value::Timestamp(unit, raw) => timestamp_json(unit, raw),
            Value::Text(s) => serde_json::Value::String(s),
            Value::Blob(bytes) | Value::Geometry(bytes) => blob_json(&bytes),
            Value::Date32(days) => date_json(days),
            Value::Time64(unit, raw) => time_json(unit, raw),
            Value::Interval {
                months,
                days,
                nanos,
            } => interval_json(months, days, nanos),
            Value::Enum(s) => serde_json::Value::String(s),
            Value::List(items) | Value::Array(items) => {
                items.into_iter().map(Self::value_to_json).collect()
            }
            Value::Struct(fields) => {
                let mut map = serde_json::Map::new();
                for (name, field) in fields.iter() {
                    map.insert(name.clone(), Self::value_to_json(field.clone()));
                }
                serde_json::Value::Object(map)
            }
            Value::Map(entries) => {
                let mut map = serde_json::Map::new();
                for (key, entry) in entries.iter() {
                    let key = match Self::value_to_json(key.clone()) {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    map.insert(key, Self::value_to_json(entry.clone()));
                }
                serde_json::Value::Object(map)
            }
            Value::Union(inner) => Self::value_to_json(*inner),
            _ => serde_json::Value::Null,
        }
    }

    /// Read catalog rows into column metadata
    fn catalog_columns(result: &QueryResult) -> Vec<CatalogColumn> {
        result
            .rows
            .iter()
            .filter_map(|row| {
                let name = row.get("column_name")?.as_str()?.to_string();
                let data_type = row
                    .get("data_type")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let key = ColumnKey::from_flag(row.get("column_key").and_then(|v| v.as_str()));
                Some(CatalogColumn {
                    name,
                    data_type,
                    key,
                })
            })
            .collect()
    }
}

fn huge_int_json<T>(i: T) -> serde_json::Value
where
    T: Copy + ToString + TryInto<i64>,
{
    match i.try_into() {
        Ok(n) => n.into(),
        // 128-bit values beyond the JSON number range travel as text
        Err(_) => serde_json::Value::String(i.to_string()),
    }
}

fn blob_json(bytes: &[u8]) -> serde_json::Value {
    use base64::Engine;
    serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
}

fn date_json(days: i32) -> serde_json::Value {
    chrono::NaiveDate::from_ymd_opt(1970, 1, 1)
        .and_then(|epoch| epoch.checked_add_signed(chrono::TimeDelta::days(days as i64)))
        .map(|d| serde_json::Value::String(d.to_string()))
        .unwrap_or(serde_json::Value::Null)
}

fn timestamp_json(unit: duckdb::types::TimeUnit, raw: i64) -> serde_json::Value {
    chrono::DateTime::from_timestamp_micros(to_micros(unit, raw))
        .map(|ts| serde_json::Value::String(ts.naive_utc().to_string()))
        .unwrap_or(serde_json::Value::Null)
}

fn time_json(unit: duckdb::types::TimeUnit, raw: i64) -> serde_json::Value {
    let micros = to_micros(unit, raw);
    chrono::NaiveTime::from_num_seconds_from_midnight_opt(
        (micros / 1_000_000) as u32,
        ((micros % 1_000_000) * 1_000) as u32,
    )
    .map(|t| serde_json::Value::String(t.to_string()))
    .unwrap_or(serde_json::Value::Null)
}

fn interval_json(months: i32, days: i32, nanos: i64) -> serde_json::Value {
    serde_json::json!({ "months": months, "days": days, "nanos": nanos })
}

/// Normalize a DuckDB time value to microseconds
fn to_micros(unit: duckdb::types::TimeUnit, raw: i64) -> i64 {
    use duckdb::types::TimeUnit;

    match unit {
        TimeUnit::Second => raw.saturating_mul(1_000_000),
        TimeUnit::Millisecond => raw.saturating_mul(1_000),
        TimeUnit::Microsecond => raw,
        TimeUnit::Nanosecond => raw / 1_000,
    }
}

fn query_error(e: duckdb::Error) -> StoreError {
    let message = e.to_string();
    StoreError::QueryFailed {
        code: duckdb_error_class(&message),
        message,
    }
}

fn connection_error(e: duckdb::Error) -> StoreError {
    let message = e.to_string();
    StoreError::ConnectionFailed {
        code: duckdb_error_class(&message).or_else(|| Some("IO".to_string())),
        message,
    }
}

fn text_params(params: &[serde_json::Value]) -> Vec<String> {
    params
        .iter()
        .map(|p| match p {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        })
        .collect()
}

#[async_trait(?Send)]
impl StoreBackend for DuckDBBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::DuckDB
    }

    async fn execute_query(&self, sql: &str) -> StoreResult<QueryResult> {
        self.with_connection(|conn| Self::run_query(conn, sql, &[]))
    }

    async fn execute_query_params(
        &self,
        sql: &str,
        params: &[serde_json::Value],
    ) -> StoreResult<QueryResult> {
        let string_params = text_params(params);
        let param_refs: Vec<&dyn duckdb::ToSql> = string_params
            .iter()
            .map(|s| s as &dyn duckdb::ToSql)
            .collect();

        self.with_connection(|conn| Self::run_query(conn, sql, &param_refs))
    }

    async fn execute_batch(&self, sql: &str) -> StoreResult<()> {
        self.with_connection(|conn| conn.execute_batch(sql).map_err(query_error))
    }

    async fn reset_workspace(&self, workspace: &str) -> StoreResult<()> {
        // DuckDB stores all text as UTF-8; there is no per-schema encoding.
        tracing::debug!(
            "Resetting DuckDB workspace '{}' ({})",
            workspace,
            WORKSPACE_ENCODING
        );
        let ws = quote_identifier(workspace);
        self.execute_batch(&format!(
            "DROP SCHEMA IF EXISTS {ws} CASCADE; CREATE SCHEMA {ws};"
        ))
        .await
    }

    async fn workspace_exists(&self, workspace: &str) -> StoreResult<bool> {
        let result = self
            .execute_query_params(SCHEMA_EXISTS_SQL, &[workspace.into()])
            .await?;
        Ok(result.scalar().and_then(|v| v.as_i64()).unwrap_or(0) > 0)
    }

    async fn list_tables(&self, workspace: &str) -> StoreResult<Vec<String>> {
        let result = self
            .execute_query_params(TABLES_SQL, &[workspace.into()])
            .await?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| row.get("table_name")?.as_str().map(str::to_string))
            .collect())
    }

    async fn table_columns(
        &self,
        workspace: &str,
        table: &str,
    ) -> StoreResult<Vec<CatalogColumn>> {
        let result = self
            .execute_query_params(COLUMNS_SQL, &[workspace.into(), table.into()])
            .await?;
        Ok(Self::catalog_columns(&result))
    }

    async fn close(&self) -> StoreResult<()> {
        let mut guard = self.connection.lock().map_err(|e| StoreError::ConnectionFailed {
            code: None,
            message: format!("Lock error: {}", e),
        })?;

        match guard.take() {
            Some(conn) => conn.close().map_err(|(_, e)| connection_error(e)),
            None => Ok(()),
        }
    }
}
