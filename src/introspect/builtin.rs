//! Built-in catalog returned before anything has been uploaded.
//!
//! The catalog is embedded as JSON and parsed again on every call.

use serde::Deserialize;
use serde_json::Value;

use super::{ColumnDescriptor, TableDescriptor};
use crate::database::{ColumnKey, StoreError, StoreResult};

const BUILTIN_CATALOG: &str = include_str!("builtin_catalog.json");

#[derive(Deserialize)]
struct BuiltinTable {
    table_name: String,
    description: String,
    columns: Vec<BuiltinColumn>,
}

#[derive(Deserialize)]
struct BuiltinColumn {
    name: String,
    #[serde(rename = "type")]
    data_type: String,
    #[serde(default)]
    primary: bool,
    #[serde(default)]
    unique: bool,
    comment: String,
    #[serde(default)]
    examples: Vec<Value>,
    #[serde(default)]
    description: Option<String>,
}

impl From<BuiltinColumn> for ColumnDescriptor {
    fn from(col: BuiltinColumn) -> Self {
        let key = if col.primary {
            ColumnKey::Primary
        } else if col.unique {
            ColumnKey::Unique
        } else {
            ColumnKey::None
        };

        ColumnDescriptor {
            name: col.name,
            data_type: col.data_type,
            key,
            sample: None,
            comment: Some(col.comment),
            examples: col.examples,
            note: col.description,
        }
    }
}

/// Parse the built-in catalog
pub fn catalog() -> StoreResult<Vec<TableDescriptor>> {
    let tables: Vec<BuiltinTable> = serde_json::from_str(BUILTIN_CATALOG).map_err(|e| {
        StoreError::SerializationError(format!("Invalid built-in catalog: {}", e))
    })?;

    Ok(tables
        .into_iter()
        .map(|t| TableDescriptor {
            table_name: t.table_name,
            description: Some(t.description),
            columns: t.columns.into_iter().map(ColumnDescriptor::from).collect(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_tables() {
        let tables = catalog().unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.table_name.as_str()).collect();
        assert_eq!(names, vec!["NCONT001", "CRO001", "OBJ001", "COV001"]);

        let counts: Vec<usize> = tables.iter().map(|t| t.columns.len()).collect();
        assert_eq!(counts, vec![19, 6, 9, 12]);
    }

    #[test]
    fn test_catalog_keys_and_examples() {
        let tables = catalog().unwrap();
        let ncont = &tables[0];

        let primary: Vec<&str> = ncont
            .columns
            .iter()
            .filter(|c| c.key == ColumnKey::Primary)
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(
            primary,
            vec!["FIN_YM", "STND_CD", "CNSLT_SC_CD", "CLCT_CNSLT_NO"]
        );

        for table in &tables {
            assert!(table.description.is_some());
            for column in &table.columns {
                assert!(!column.examples.is_empty(), "{} has no examples", column.name);
                assert!(column.sample.is_none());
            }
        }
    }

    #[test]
    fn test_catalog_wire_shape() {
        let tables = catalog().unwrap();
        let value = serde_json::to_value(&tables[3]).unwrap();

        assert_eq!(value["table_name"], "COV001");
        assert_eq!(value["description"], "Riders");
        let amount = &value["columns"][9];
        assert_eq!(amount["name"], "CONT_AMT");
        assert_eq!(amount["type"], "int");
        assert!(amount.get("primary").is_none());
        assert!(amount.get("unique_values").is_none());
        assert_eq!(amount["examples"][0], 3845);
        assert!(amount["description"].is_string());
    }
}
