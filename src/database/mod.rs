//! Store backend abstraction
//!
//! This module provides the connection contract every entry point works
//! through:
//! - DuckDB: embedded store, catalog read from `information_schema`
//! - PostgreSQL: server store, catalog read from the `pg_catalog` tables
//!
//! Each entry point opens one connection with [`connect`], works serially and
//! releases it with [`StoreBackend::close`] before returning.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod codes;
pub mod config;

#[cfg(feature = "duckdb-backend")]
pub mod duckdb;

#[cfg(feature = "postgres-backend")]
pub mod postgres;

#[cfg(feature = "duckdb-backend")]
pub use self::duckdb::DuckDBBackend;

#[cfg(feature = "postgres-backend")]
pub use self::postgres::PostgresBackend;

pub use config::{BackendType, GatewayConfig};

/// Character encoding workspace text is stored in
///
/// Neither backend sets an encoding per schema: DuckDB is always UTF-8 and a
/// PostgreSQL schema inherits the database encoding, which
/// [`StoreBackend::reset_workspace`] checks.
pub const WORKSPACE_ENCODING: &str = "UTF8";

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failed to connect to the store
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        code: Option<String>,
        message: String,
    },

    /// Statement execution failed
    #[error("Query failed: {message}")]
    QueryFailed {
        code: Option<String>,
        message: String,
    },

    /// Transaction control failed
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The connection was already released
    #[error("Connection already closed")]
    Closed,

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),
}

impl StoreError {
    /// Backend-native error code, when one is known
    pub fn code(&self) -> Option<&str> {
        match self {
            StoreError::ConnectionFailed { code, .. } | StoreError::QueryFailed { code, .. } => {
                code.as_deref()
            }
            StoreError::Closed => Some(codes::CONNECTION_CLOSED),
            _ => None,
        }
    }

    /// The backend's own message, without this crate's prefix
    pub fn backend_message(&self) -> String {
        match self {
            StoreError::ConnectionFailed { message, .. }
            | StoreError::QueryFailed { message, .. } => message.clone(),
            StoreError::TransactionFailed(msg)
            | StoreError::ConfigError(msg)
            | StoreError::SerializationError(msg)
            | StoreError::IoError(msg) => msg.clone(),
            StoreError::Closed => self.to_string(),
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Query result row as a JSON value
pub type QueryRow = serde_json::Value;

/// Query result set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names, in result order
    pub columns: Vec<String>,
    /// Rows of data, one JSON object per row
    pub rows: Vec<QueryRow>,
    /// Execution time in milliseconds
    pub execution_time_ms: u64,
}

impl QueryResult {
    /// Create a new query result
    pub fn new(columns: Vec<String>, rows: Vec<QueryRow>) -> Self {
        Self {
            columns,
            rows,
            execution_time_ms: 0,
        }
    }

    /// Create an empty result
    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// Get the number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Check if the result is empty
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First value of the first row, if any
    pub fn scalar(&self) -> Option<&serde_json::Value> {
        let column = self.columns.first()?;
        self.rows.first()?.get(column)
    }
}

/// Key classification of a catalog column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKey {
    #[default]
    None,
    Primary,
    Unique,
}

impl ColumnKey {
    /// Parse the catalog flag both adapters report (`PRI`, `UNI` or empty)
    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag.map(str::trim) {
            Some("PRI") => ColumnKey::Primary,
            Some("UNI") => ColumnKey::Unique,
            _ => ColumnKey::None,
        }
    }
}

/// Column metadata read from the store catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogColumn {
    pub name: String,
    pub data_type: String,
    pub key: ColumnKey,
}

/// Quote an identifier with double quotes, doubling embedded quotes
pub fn quote_identifier(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Store backend trait
///
/// One value of this trait is one open connection. All operations are async;
/// the DuckDB adapter performs its work inline, the PostgreSQL adapter awaits
/// the server.
#[async_trait(?Send)]
pub trait StoreBackend: Send + Sync {
    /// Get the store backend type
    fn backend_type(&self) -> BackendType;

    /// Fully qualified, quoted `workspace.table` name
    fn qualified_name(&self, workspace: &str, table: &str) -> String {
        format!("{}.{}", quote_identifier(workspace), quote_identifier(table))
    }

    /// Execute a SQL query and return results
    async fn execute_query(&self, sql: &str) -> StoreResult<QueryResult>;

    /// Execute a parameterized SQL query
    ///
    /// Parameters are bound as text; placeholders follow the backend's own
    /// syntax (`?` for DuckDB, `$1` for PostgreSQL).
    async fn execute_query_params(
        &self,
        sql: &str,
        params: &[serde_json::Value],
    ) -> StoreResult<QueryResult>;

    /// Execute one or more statements that return no rows
    async fn execute_batch(&self, sql: &str) -> StoreResult<()>;

    /// Start a transaction
    async fn begin(&self) -> StoreResult<()> {
        self.execute_batch("BEGIN TRANSACTION")
            .await
            .map_err(|e| StoreError::TransactionFailed(e.backend_message()))
    }

    /// Commit the current transaction
    async fn commit(&self) -> StoreResult<()> {
        self.execute_batch("COMMIT")
            .await
            .map_err(|e| StoreError::TransactionFailed(e.backend_message()))
    }

    /// Roll back the current transaction
    async fn rollback(&self) -> StoreResult<()> {
        self.execute_batch("ROLLBACK")
            .await
            .map_err(|e| StoreError::TransactionFailed(e.backend_message()))
    }

    /// Drop the workspace with everything in it and recreate it empty
    async fn reset_workspace(&self, workspace: &str) -> StoreResult<()>;

    /// Check whether the workspace exists
    async fn workspace_exists(&self, workspace: &str) -> StoreResult<bool>;

    /// Names of every base table in the workspace, sorted
    async fn list_tables(&self, workspace: &str) -> StoreResult<Vec<String>>;

    /// Column metadata for one table, ordered by physical position
    async fn table_columns(&self, workspace: &str, table: &str)
    -> StoreResult<Vec<CatalogColumn>>;

    /// Release the connection
    ///
    /// Idempotent: closing an already closed connection succeeds.
    async fn close(&self) -> StoreResult<()>;
}

/// Open one connection to the configured store
pub async fn connect(config: &GatewayConfig) -> StoreResult<Box<dyn StoreBackend>> {
    config.validate()?;

    tracing::debug!("Opening store connection to {}", config.describe_store());

    match config.store.backend {
        BackendType::DuckDB => {
            #[cfg(feature = "duckdb-backend")]
            {
                let backend = if config.duckdb.path == ":memory:" {
                    DuckDBBackend::in_memory()?
                } else {
                    DuckDBBackend::new(&config.duckdb.path)?
                };
                Ok(Box::new(backend))
            }
            #[cfg(not(feature = "duckdb-backend"))]
            {
                Err(StoreError::ConfigError(
                    "DuckDB backend not enabled. Build with --features duckdb-backend".to_string(),
                ))
            }
        }
        BackendType::Postgres => {
            #[cfg(feature = "postgres-backend")]
            {
                let conn_str = config.get_postgres_connection_string()?;
                let backend = PostgresBackend::new(&conn_str).await?;
                Ok(Box::new(backend))
            }
            #[cfg(not(feature = "postgres-backend"))]
            {
                Err(StoreError::ConfigError(
                    "PostgreSQL backend not enabled. Build with --features postgres-backend"
                        .to_string(),
                ))
            }
        }
    }
}

/// Release a connection, logging instead of failing
///
/// Release failures never override the outcome of the work done on the
/// connection.
pub async fn release(store: &dyn StoreBackend) {
    match store.close().await {
        Ok(()) => tracing::debug!("Released {} connection", store.backend_type()),
        Err(e) => tracing::warn!(
            "Failed to release {} connection: {}",
            store.backend_type(),
            e
        ),
    }
}
