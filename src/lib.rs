//! Tabular Gateway - push ad-hoc tabular data into a relational store,
//! describe what is there and run one-off queries against it
//!
//! Provides:
//! - Payload sanitizing and extraction ([`payload`])
//! - Destructive-replace ingestion driven by declared column types ([`ingest`])
//! - Catalog introspection with low-cardinality sampling ([`introspect`])
//! - Single-statement query execution with size-bounded, column-oriented
//!   results ([`query`])
//! - A closed, backend-agnostic error taxonomy ([`error`])
//!
//! Store access goes through [`database::StoreBackend`], implemented for
//! DuckDB (`duckdb-backend`, default) and PostgreSQL (`postgres-backend`).
//! Every entry point takes an explicit [`GatewayConfig`].

#[cfg(feature = "cli")]
pub mod cli;
pub mod database;
pub mod error;
pub mod ingest;
pub mod introspect;
pub mod payload;
pub mod query;

pub use database::{BackendType, GatewayConfig, StoreBackend, StoreError, StoreResult};
pub use error::{ErrorEnvelope, ErrorKind, GatewayError};
pub use ingest::{IngestError, IngestReport, IngestResponse, ingest, ingest_payload};
pub use introspect::{
    ColumnDescriptor, Sample, SchemaResponse, TableDescriptor, TableSelection, describe_schema,
};
pub use payload::{ColumnSpec, PayloadError, Sheet, TabularDataset, extract_dataset};
pub use query::{Pivot, QueryResponse, execute};
