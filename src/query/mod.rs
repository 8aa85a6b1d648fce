//! Query execution and result shaping
//!
//! Runs exactly one caller statement on a fresh connection, pivots the rows
//! into columns and enforces the result size limit. Store failures are
//! normalized into an [`ErrorEnvelope`].

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde::ser::SerializeMap;
use serde_json::Value;
use sqlparser::dialect::{Dialect, DuckDbDialect, PostgreSqlDialect};
use sqlparser::parser::Parser;

use crate::database::{self, BackendType, GatewayConfig, QueryResult, StoreBackend, StoreError};
use crate::error::{ErrorEnvelope, ErrorKind, GatewayError};
use crate::payload::char_prefix;

/// Largest serialized pivot returned in full, in characters
pub const MAX_RESULT_CHARS: usize = 6000;

/// Characters of the statement written to the log
const PREVIEW_CHARS: usize = 100;

/// Column-oriented view of a result set
///
/// Column order follows the result's column order; every column holds one
/// value per row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pivot(Vec<(String, Vec<Value>)>);

impl Pivot {
    /// Pivot a result set's rows into columns
    pub fn from_result(result: &QueryResult) -> Self {
        let mut columns: Vec<(String, Vec<Value>)> = Vec::with_capacity(result.columns.len());

        for name in &result.columns {
            if columns.iter().any(|(existing, _)| existing == name) {
                continue;
            }
            let values = result
                .rows
                .iter()
                .map(|row| row.get(name).cloned().unwrap_or(Value::Null))
                .collect();
            columns.push((name.clone(), values));
        }

        Pivot(columns)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(name, _)| name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&[Value]> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Length in characters of the compact JSON serialization
    pub fn serialized_chars(&self) -> usize {
        serde_json::to_string(self)
            .map(|s| s.chars().count())
            .unwrap_or(usize::MAX)
    }
}

impl Serialize for Pivot {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, values) in &self.0 {
            map.serialize_entry(name, values)?;
        }
        map.end()
    }
}

/// Wire response of the query entry point
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResponse {
    /// Full result
    Success {
        columns: Pivot,
        data: Vec<Value>,
        row_count: usize,
    },
    /// The statement ran but its result was too large to return
    Oversize { size: usize },
    /// Normalized failure
    Failure {
        error: ErrorEnvelope,
        query: String,
        timestamp: DateTime<Utc>,
    },
}

impl QueryResponse {
    pub fn is_success(&self) -> bool {
        !matches!(self, QueryResponse::Failure { .. })
    }

    fn failure(error: ErrorEnvelope, query: &str) -> Self {
        QueryResponse::Failure {
            error,
            query: query.to_string(),
            timestamp: Utc::now(),
        }
    }
}

impl Serialize for QueryResponse {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        match self {
            QueryResponse::Success {
                columns,
                data,
                row_count,
            } => {
                map.serialize_entry("success", &true)?;
                map.serialize_entry("columns", columns)?;
                map.serialize_entry("data", data)?;
                map.serialize_entry("rowCount", row_count)?;
            }
            QueryResponse::Oversize { size } => {
                map.serialize_entry("success", &true)?;
                map.serialize_entry(
                    "columns",
                    &serde_json::json!({ "message": oversize_message(*size) }),
                )?;
            }
            QueryResponse::Failure {
                error,
                query,
                timestamp,
            } => {
                map.serialize_entry("success", &false)?;
                map.serialize_entry("error", error)?;
                map.serialize_entry("query", query)?;
                map.serialize_entry(
                    "timestamp",
                    &timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                )?;
            }
        }
        map.end()
    }
}

/// Advisory returned in place of an oversize result
pub fn oversize_message(size: usize) -> String {
    format!(
        "The query ran successfully, but its result is about {} characters, \
         which exceeds the {} character limit.\n\n\
         Narrow the query conditions so it returns fewer results and try again.",
        group_thousands(size),
        group_thousands(MAX_RESULT_CHARS)
    )
}

fn group_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Shape a result set: pivot it and apply the size limit
pub fn shape(result: QueryResult) -> QueryResponse {
    let columns = Pivot::from_result(&result);
    let size = columns.serialized_chars();

    if size > MAX_RESULT_CHARS {
        tracing::info!(
            "Result of {} rows is {} characters, returning advisory",
            result.row_count(),
            size
        );
        return QueryResponse::Oversize { size };
    }

    QueryResponse::Success {
        columns,
        row_count: result.row_count(),
        data: result.rows,
    }
}

fn dialect_for(backend: BackendType) -> Box<dyn Dialect> {
    match backend {
        BackendType::DuckDB => Box::new(DuckDbDialect {}),
        BackendType::Postgres => Box::new(PostgreSqlDialect {}),
    }
}

/// Number of statements in `sql`, when the parser understands it
fn statement_count(backend: BackendType, sql: &str) -> Option<usize> {
    Parser::parse_sql(dialect_for(backend).as_ref(), sql)
        .ok()
        .map(|statements| statements.len())
}

/// Query entry point
///
/// An empty statement and configuration problems are returned as errors
/// without contacting the store; every other failure is reported in the
/// response.
pub async fn execute(config: &GatewayConfig, sql: &str) -> Result<QueryResponse, GatewayError> {
    let statement = sql.trim();
    if statement.is_empty() {
        return Err(GatewayError::Config(
            "SQL statement cannot be empty".to_string(),
        ));
    }

    config.validate()?;

    let backend = config.store.backend;
    if let Some(count) = statement_count(backend, statement)
        && count > 1
    {
        return Ok(QueryResponse::failure(
            ErrorEnvelope::rejected(
                ErrorKind::SyntaxError,
                format!("expected a single statement, found {}", count),
            ),
            statement,
        ));
    }

    let store = match database::connect(config).await {
        Ok(store) => store,
        Err(StoreError::ConfigError(msg)) => return Err(GatewayError::Config(msg)),
        Err(e) => {
            tracing::warn!("Failed to connect to {}: {}", config.describe_store(), e);
            return Ok(QueryResponse::failure(
                ErrorEnvelope::from_store_error(backend, &e),
                statement,
            ));
        }
    };

    let response = execute_on(&*store, statement).await;
    database::release(&*store).await;

    Ok(response)
}

/// Run one statement on an open connection and shape the outcome
pub async fn execute_on(store: &dyn StoreBackend, sql: &str) -> QueryResponse {
    let statement = sql.trim();
    let preview = char_prefix(statement, PREVIEW_CHARS);
    let ellipsis = if statement.chars().count() > PREVIEW_CHARS {
        "..."
    } else {
        ""
    };
    tracing::info!("Executing SQL: {}{}", preview, ellipsis);

    match store.execute_query(statement).await {
        Ok(result) => {
            tracing::debug!(
                "Query returned {} rows in {}ms",
                result.row_count(),
                result.execution_time_ms
            );
            shape(result)
        }
        Err(e) => {
            let envelope = ErrorEnvelope::from_store_error(store.backend_type(), &e);
            tracing::warn!("SQL execution failed ({}): {}", envelope.kind, e);
            QueryResponse::failure(envelope, statement)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(columns: &[&str], rows: Vec<Value>) -> QueryResult {
        QueryResult::new(columns.iter().map(|c| c.to_string()).collect(), rows)
    }

    #[test]
    fn test_pivot_aligns_with_rows() {
        let r = result(
            &["b", "a"],
            vec![json!({"a": 1, "b": "x"}), json!({"a": 2, "b": null})],
        );
        let pivot = Pivot::from_result(&r);

        assert_eq!(pivot.column_names().collect::<Vec<_>>(), vec!["b", "a"]);
        for name in pivot.column_names() {
            let values = pivot.get(name).unwrap();
            assert_eq!(values.len(), r.row_count());
            for (i, row) in r.rows.iter().enumerate() {
                assert_eq!(values[i], row[name]);
            }
        }
        assert_eq!(
            serde_json::to_string(&pivot).unwrap(),
            r#"{"b":["x",null],"a":[1,2]}"#
        );
    }

    #[test]
    fn test_pivot_zero_rows() {
        let pivot = Pivot::from_result(&result(&["id", "name"], Vec::new()));
        assert_eq!(pivot.len(), 2);
        assert_eq!(serde_json::to_value(&pivot).unwrap(), json!({"id": [], "name": []}));
    }

    #[test]
    fn test_shape_at_and_over_limit() {
        // {"v":["xxx...x"]} is 10 characters of framing
        let fits = "x".repeat(MAX_RESULT_CHARS - 10);
        let response = shape(result(&["v"], vec![json!({ "v": fits })]));
        match &response {
            QueryResponse::Success { columns, row_count, .. } => {
                assert_eq!(columns.serialized_chars(), MAX_RESULT_CHARS);
                assert_eq!(*row_count, 1);
            }
            other => panic!("expected full result, got {:?}", other),
        }

        let over = "x".repeat(MAX_RESULT_CHARS - 9);
        let response = shape(result(&["v"], vec![json!({ "v": over })]));
        assert_eq!(
            response,
            QueryResponse::Oversize {
                size: MAX_RESULT_CHARS + 1
            }
        );

        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(wire["success"], true);
        assert!(wire.get("data").is_none());
        let message = wire["columns"]["message"].as_str().unwrap();
        assert!(message.contains("6,001"));
        assert!(message.contains("6,000"));
    }

    #[test]
    fn test_success_wire_shape() {
        let response = shape(result(&["n"], vec![json!({"n": 1})]));
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"success": true, "columns": {"n": [1]}, "data": [{"n": 1}], "rowCount": 1})
        );
    }

    #[test]
    fn test_failure_wire_shape() {
        let response = QueryResponse::failure(
            ErrorEnvelope::from_native(BackendType::Postgres, Some("42P01"), "relation \"x\" does not exist"),
            "SELECT * FROM x",
        );
        let wire = serde_json::to_value(&response).unwrap();

        assert_eq!(wire["success"], false);
        assert_eq!(wire["error"]["type"], "TABLE_NOT_FOUND");
        assert_eq!(wire["error"]["code"], "42P01");
        assert_eq!(wire["query"], "SELECT * FROM x");
        let ts = wire["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
        assert!(ts.ends_with('Z'));
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(6000), "6,000");
        assert_eq!(group_thousands(1234567), "1,234,567");
    }

    #[test]
    fn test_statement_count() {
        assert_eq!(statement_count(BackendType::DuckDB, "SELECT 1"), Some(1));
        assert_eq!(statement_count(BackendType::DuckDB, "SELECT 1;"), Some(1));
        assert_eq!(
            statement_count(BackendType::Postgres, "SELECT 1; DROP TABLE t"),
            Some(2)
        );
    }

    #[tokio::test]
    async fn test_empty_statement_is_rejected_before_connecting() {
        // An unusable config proves the store is never reached
        let config = GatewayConfig::postgres("");
        for sql in ["", "   \n\t "] {
            let err = execute(&config, sql).await.unwrap_err();
            assert!(matches!(err, GatewayError::Config(ref m) if m.contains("empty")));
        }
    }

    #[tokio::test]
    async fn test_multiple_statements_are_rejected() {
        let config = GatewayConfig::duckdb(":memory:");
        let response = execute(&config, "SELECT 1; SELECT 2").await.unwrap();

        match response {
            QueryResponse::Failure { error, .. } => assert_eq!(error.kind, ErrorKind::SyntaxError),
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
