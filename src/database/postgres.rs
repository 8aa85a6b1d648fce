//! PostgreSQL store backend implementation
//!
//! Provides a PostgreSQL backend for server deployments. Catalog metadata is
//! read from the system catalog (`pg_attribute`, `pg_class`, `pg_namespace`,
//! `pg_index`); a workspace is a PostgreSQL schema.

use std::error::Error;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{Client, Row, Statement};
use uuid::Uuid;

use super::codes::{CONNECTION_CLOSED, CONNECTION_REFUSED};
use super::{
    BackendType, CatalogColumn, ColumnKey, QueryResult, StoreBackend, StoreError, StoreResult,
    WORKSPACE_ENCODING, quote_identifier,
};

const COLUMNS_SQL: &str = r#"
SELECT
    a.attname::text AS column_name,
    format_type(a.atttypid, a.atttypmod) AS data_type,
    CASE
        WHEN EXISTS (
            SELECT 1 FROM pg_catalog.pg_index i
            WHERE i.indrelid = c.oid AND i.indisprimary AND a.attnum = ANY(i.indkey)
        ) THEN 'PRI'
        WHEN EXISTS (
            SELECT 1 FROM pg_catalog.pg_index i
            WHERE i.indrelid = c.oid AND i.indisunique AND a.attnum = ANY(i.indkey)
        ) THEN 'UNI'
        ELSE ''
    END AS column_key
FROM pg_catalog.pg_attribute a
JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = $1::text
  AND c.relname = $2::text
  AND a.attnum > 0
  AND NOT a.attisdropped
ORDER BY a.attnum
"#;

const TABLES_SQL: &str = r#"
SELECT c.relname::text AS table_name
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = $1::text AND c.relkind IN ('r', 'p')
ORDER BY 1
"#;

const DATABASE_ENCODING_SQL: &str =
    "SELECT pg_encoding_to_char(encoding) AS enc FROM pg_catalog.pg_database \
     WHERE datname = current_database()";

const SCHEMA_EXISTS_SQL: &str =
    "SELECT COUNT(*) AS cnt FROM pg_catalog.pg_namespace WHERE nspname = $1::text";

/// PostgreSQL store backend
///
/// One value is one open connection; the connection task is driven on the
/// tokio runtime and ends when the client is released.
pub struct PostgresBackend {
    /// PostgreSQL client, `None` once released
    client: Mutex<Option<tokio_postgres::Client>>,
    /// Task driving the connection
    driver: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PostgresBackend {
    /// Connect to PostgreSQL
    ///
    /// # Arguments
    /// * `connection_string` - URL or key/value connection string
    pub async fn new(connection_string: &str) -> StoreResult<Self> {
        let (client, connection) =
            tokio_postgres::connect(connection_string, tokio_postgres::NoTls)
                .await
                .map_err(|e| {
                    let (code, message) = native_error(&e);
                    StoreError::ConnectionFailed { code, message }
                })?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!("PostgreSQL connection error: {}", e);
            }
        });

        Ok(Self {
            client: Mutex::new(Some(client)),
            driver: Mutex::new(Some(driver)),
        })
    }

    /// Convert a PostgreSQL row to a JSON object keyed by column name
    fn row_to_json(row: &Row, columns: &[String]) -> serde_json::Value {
        let mut map = serde_json::Map::new();

        for (i, col_name) in columns.iter().enumerate() {
            map.insert(col_name.clone(), Self::get_column_value(row, i));
        }

        serde_json::Value::Object(map)
    }

    /// Get a column value as JSON
    fn get_column_value(row: &Row, idx: usize) -> serde_json::Value {
        match row.try_get::<_, Option<Cell>>(idx) {
            Ok(Some(Cell(value))) => value,
            Ok(None) => serde_json::Value::Null,
            Err(e) => {
                tracing::debug!("Column {} not decoded: {}", idx, e);
                serde_json::Value::Null
            }
        }
    }

    /// Re-prepare `sql` so that columns without a native conversion come back
    /// as `jsonb`
    ///
    /// Statements that cannot be wrapped in a subquery (DML with `RETURNING`,
    /// utility commands) keep their original form; such columns read as null.
    async fn with_jsonb_columns(client: &Client, sql: &str, statement: Statement) -> Statement {
        let columns: Vec<(&str, bool)> = statement
            .columns()
            .iter()
            .map(|c| (c.name(), decodes_natively(c.type_())))
            .collect();
        if columns.iter().all(|(_, native)| *native) {
            return statement;
        }

        match client.prepare(&jsonb_projection(sql, &columns)).await {
            Ok(wrapped) => wrapped,
            Err(e) => {
                tracing::debug!("Result columns left undecoded: {}", e);
                statement
            }
        }
    }
}

/// Whether [`Cell`] converts values of this type
fn decodes_natively(ty: &Type) -> bool {
    [
        Type::BOOL,
        Type::INT2,
        Type::INT4,
        Type::INT8,
        Type::OID,
        Type::FLOAT4,
        Type::FLOAT8,
        Type::NUMERIC,
        Type::DATE,
        Type::TIME,
        Type::TIMESTAMP,
        Type::TIMESTAMPTZ,
        Type::JSON,
        Type::JSONB,
        Type::UUID,
        Type::BYTEA,
    ]
    .contains(ty)
        || <&str as FromSql>::accepts(ty)
}

/// Wrap `sql` so that every column [`decodes_natively`] rejects is cast with
/// `to_jsonb`, keeping column names and order
fn jsonb_projection(sql: &str, columns: &[(&str, bool)]) -> String {
    let inner = sql.trim().trim_end_matches(';').trim_end();

    let aliases: Vec<String> = (1..=columns.len()).map(|i| format!("c{i}")).collect();
    let projection: Vec<String> = columns
        .iter()
        .zip(&aliases)
        .map(|((name, native), alias)| {
            if *native {
                format!("q.{alias} AS {}", quote_identifier(name))
            } else {
                format!("to_jsonb(q.{alias}) AS {}", quote_identifier(name))
            }
        })
        .collect();

    format!(
        "SELECT {} FROM (\n{}\n) AS q({})",
        projection.join(", "),
        inner,
        aliases.join(", ")
    )
}

/// One decoded column value
///
/// Dates and times render like the DuckDB backend's (ISO 8601, naive values
/// without an offset), NUMERIC as exact decimal text, BYTEA as base64.
struct Cell(serde_json::Value);

impl<'a> FromSql<'a> for Cell {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        use serde_json::Value;

        let value = if *ty == Type::BOOL {
            Value::Bool(<bool as FromSql>::from_sql(ty, raw)?)
        } else if *ty == Type::INT2 {
            <i16 as FromSql>::from_sql(ty, raw)?.into()
        } else if *ty == Type::INT4 {
            <i32 as FromSql>::from_sql(ty, raw)?.into()
        } else if *ty == Type::INT8 {
            <i64 as FromSql>::from_sql(ty, raw)?.into()
        } else if *ty == Type::OID {
            <u32 as FromSql>::from_sql(ty, raw)?.into()
        } else if *ty == Type::FLOAT4 {
            <f32 as FromSql>::from_sql(ty, raw)?.into()
        } else if *ty == Type::FLOAT8 {
            <f64 as FromSql>::from_sql(ty, raw)?.into()
        } else if *ty == Type::NUMERIC {
            Value::String(Decimal::from_sql(ty, raw)?.to_string())
        } else if *ty == Type::DATE {
            Value::String(NaiveDate::from_sql(ty, raw)?.to_string())
        } else if *ty == Type::TIME {
            Value::String(NaiveTime::from_sql(ty, raw)?.to_string())
        } else if *ty == Type::TIMESTAMP {
            Value::String(NaiveDateTime::from_sql(ty, raw)?.to_string())
        } else if *ty == Type::TIMESTAMPTZ {
            Value::String(
                DateTime::<Utc>::from_sql(ty, raw)?.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            )
        } else if *ty == Type::JSON || *ty == Type::JSONB {
            Value::from_sql(ty, raw)?
        } else if *ty == Type::UUID {
            Value::String(Uuid::from_sql(ty, raw)?.to_string())
        } else if *ty == Type::BYTEA {
            use base64::Engine;
            let bytes = <&[u8] as FromSql>::from_sql(ty, raw)?;
            Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
        } else if <&str as FromSql>::accepts(ty) {
            Value::String(<&str as FromSql>::from_sql(ty, raw)?.to_string())
        } else {
            return Err(format!("no conversion for type {}", ty).into());
        };

        Ok(Cell(value))
    }

    fn accepts(ty: &Type) -> bool {
        decodes_natively(ty)
    }
}

/// Extract the native code and message of a driver error
///
/// Server errors carry their SQLSTATE; transport failures get
/// `ECONNREFUSED` or `CONNECTION_CLOSED`.
fn native_error(e: &tokio_postgres::Error) -> (Option<String>, String) {
    if let Some(db) = e.as_db_error() {
        return (Some(db.code().code().to_string()), db.message().to_string());
    }

    if e.is_closed() {
        return (Some(CONNECTION_CLOSED.to_string()), e.to_string());
    }

    let refused = std::error::Error::source(e)
        .and_then(|s| s.downcast_ref::<std::io::Error>())
        .is_some_and(|io| io.kind() == std::io::ErrorKind::ConnectionRefused);
    if refused {
        return (Some(CONNECTION_REFUSED.to_string()), e.to_string());
    }

    (e.code().map(|c| c.code().to_string()), e.to_string())
}

fn query_error(e: tokio_postgres::Error) -> StoreError {
    let (code, message) = native_error(&e);
    StoreError::QueryFailed { code, message }
}

fn text_params(params: &[serde_json::Value]) -> Vec<Option<String>> {
    params
        .iter()
        .map(|p| match p {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        })
        .collect()
}

#[async_trait(?Send)]
impl StoreBackend for PostgresBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Postgres
    }

    async fn execute_query(&self, sql: &str) -> StoreResult<QueryResult> {
        self.execute_query_params(sql, &[]).await
    }

    async fn execute_query_params(
        &self,
        sql: &str,
        params: &[serde_json::Value],
    ) -> StoreResult<QueryResult> {
        let start = std::time::Instant::now();
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or(StoreError::Closed)?;

        // Preparing first exposes the result columns even when no row comes back
        let statement = client.prepare(sql).await.map_err(query_error)?;
        let statement = Self::with_jsonb_columns(client, sql, statement).await;
        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let string_params = text_params(params);
        let param_refs: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = string_params
            .iter()
            .map(|s| s as &(dyn tokio_postgres::types::ToSql + Sync))
            .collect();

        let rows = client
            .query(&statement, &param_refs)
            .await
            .map_err(query_error)?;

        let json_rows: Vec<serde_json::Value> = rows
            .iter()
            .map(|row| Self::row_to_json(row, &columns))
            .collect();

        Ok(QueryResult {
            columns,
            rows: json_rows,
            execution_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn execute_batch(&self, sql: &str) -> StoreResult<()> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or(StoreError::Closed)?;
        client.batch_execute(sql).await.map_err(query_error)
    }

    async fn reset_workspace(&self, workspace: &str) -> StoreResult<()> {
        // Schemas take the database encoding; it cannot be chosen here
        let encoding = self.execute_query(DATABASE_ENCODING_SQL).await?;
        if let Some(enc) = encoding.scalar().and_then(|v| v.as_str())
            && enc != WORKSPACE_ENCODING
        {
            tracing::warn!(
                "Database encoding is {}, workspace '{}' will not store {} text",
                enc,
                workspace,
                WORKSPACE_ENCODING
            );
        }

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
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or(StoreError::Closed)?;

        let rows = client
            .query(COLUMNS_SQL, &[&workspace, &table])
            .await
            .map_err(query_error)?;

        rows.iter()
            .map(|row| {
                let name: String = row.try_get("column_name").map_err(query_error)?;
                let data_type: String = row.try_get("data_type").map_err(query_error)?;
                let key: Option<String> = row.try_get("column_key").map_err(query_error)?;
                Ok(CatalogColumn {
                    name,
                    data_type,
                    key: ColumnKey::from_flag(key.as_deref()),
                })
            })
            .collect()
    }

    async fn close(&self) -> StoreResult<()> {
        // Dropping the client ends the connection task
        let client = self.client.lock().await.take();
        if client.is_none() {
            return Ok(());
        }
        drop(client);

        if let Some(driver) = self.driver.lock().await.take() {
            driver.await.map_err(|e| StoreError::ConnectionFailed {
                code: None,
                message: format!("Connection task failed: {}", e),
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(ty: &Type, raw: &[u8]) -> serde_json::Value {
        Cell::from_sql(ty, raw).unwrap().0
    }

    fn numeric(weight: i16, sign: u16, dscale: u16, digits: &[i16]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&(digits.len() as i16).to_be_bytes());
        raw.extend_from_slice(&weight.to_be_bytes());
        raw.extend_from_slice(&sign.to_be_bytes());
        raw.extend_from_slice(&dscale.to_be_bytes());
        for d in digits {
            raw.extend_from_slice(&d.to_be_bytes());
        }
        raw
    }

    // 2024-01-05 is day 8770 after the PostgreSQL epoch (2000-01-01)
    const DAY: i32 = 8770;
    const TEN_THIRTY_MICROS: i64 = 37_800_000_000;

    #[test]
    fn test_decode_dates_and_times() {
        assert_eq!(decode(&Type::DATE, &DAY.to_be_bytes()), "2024-01-05");

        let micros = DAY as i64 * 86_400_000_000 + TEN_THIRTY_MICROS;
        assert_eq!(
            decode(&Type::TIMESTAMP, &micros.to_be_bytes()),
            "2024-01-05 10:30:00"
        );
        assert_eq!(
            decode(&Type::TIMESTAMPTZ, &micros.to_be_bytes()),
            "2024-01-05T10:30:00Z"
        );
        assert_eq!(
            decode(&Type::TIME, &TEN_THIRTY_MICROS.to_be_bytes()),
            "10:30:00"
        );
    }

    #[test]
    fn test_decode_json() {
        assert_eq!(decode(&Type::JSON, br#"{"k":1}"#), serde_json::json!({"k": 1}));

        // JSONB carries a leading format version byte
        let mut jsonb = vec![1u8];
        jsonb.extend_from_slice(br#"{"k":[1,"a"]}"#);
        assert_eq!(decode(&Type::JSONB, &jsonb), serde_json::json!({"k": [1, "a"]}));
    }

    #[test]
    fn test_decode_numeric() {
        assert_eq!(decode(&Type::NUMERIC, &numeric(0, 0, 2, &[123, 4500])), "123.45");
        assert_eq!(decode(&Type::NUMERIC, &numeric(0, 0x4000, 0, &[42])), "-42");
        assert_eq!(decode(&Type::NUMERIC, &numeric(1, 0, 0, &[1])), "10000");
    }

    #[test]
    fn test_decode_uuid_bytea_and_scalars() {
        let bytes: Vec<u8> = (0u8..16).collect();
        assert_eq!(
            decode(&Type::UUID, &bytes),
            "00010203-0405-0607-0809-0a0b0c0d0e0f"
        );
        assert_eq!(decode(&Type::BYTEA, b"hi"), "aGk=");
        assert_eq!(decode(&Type::INT4, &7i32.to_be_bytes()), 7);
        assert_eq!(decode(&Type::FLOAT8, &1.5f64.to_be_bytes()), 1.5);
        assert_eq!(decode(&Type::BOOL, &[1]), true);
        assert_eq!(decode(&Type::VARCHAR, "서울".as_bytes()), "서울");
    }

    #[test]
    fn test_other_types_are_cast_by_the_server() {
        assert!(!Cell::accepts(&Type::INTERVAL));
        assert!(!Cell::accepts(&Type::INT4_ARRAY));
        assert!(Cell::accepts(&Type::TIMESTAMPTZ));
        assert!(Cell::accepts(&Type::TEXT));

        let sql = jsonb_projection(
            "SELECT id, span, tags FROM t;  ",
            &[("id", true), ("span", false), ("tags", false)],
        );
        assert_eq!(
            sql,
            "SELECT q.c1 AS \"id\", to_jsonb(q.c2) AS \"span\", to_jsonb(q.c3) AS \"tags\" \
             FROM (\nSELECT id, span, tags FROM t\n) AS q(c1, c2, c3)"
        );
    }

    #[test]
    fn test_text_params() {
        let params = text_params(&[
            serde_json::json!("a"),
            serde_json::json!(1),
            serde_json::Value::Null,
        ]);
        assert_eq!(
            params,
            vec![Some("a".to_string()), Some("1".to_string()), None]
        );
    }

    #[tokio::test]
    async fn test_connection_refused_is_classified() {
        let err = PostgresBackend::new("host=127.0.0.1 port=1 user=x password=y dbname=z")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::ConnectionFailed { .. }));
        assert_eq!(err.code(), Some(CONNECTION_REFUSED));
    }
}
