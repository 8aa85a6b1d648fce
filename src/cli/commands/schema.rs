//! Schema CLI command

use std::path::PathBuf;

use super::{load_config, print_json, runtime};
use crate::cli::error::CliError;
use crate::introspect::{SchemaResponse, TableSelection, describe_schema};
use crate::payload::parse_table_list;

/// Schema command arguments
#[derive(Debug, Clone, Default)]
pub struct SchemaArgs {
    /// Tables named one by one
    pub tables: Vec<String>,
    /// Table list as an ingest result or a quoted list
    pub table_list: Option<String>,
    /// Describe every table in the workspace
    pub all: bool,
    /// Print the built-in catalog
    pub builtin: bool,
    /// Directory holding the config file
    pub workspace_dir: PathBuf,
    /// Pretty-print output
    pub pretty: bool,
}

impl SchemaArgs {
    /// Resolve the flags into one selection
    pub fn selection(&self) -> Result<TableSelection, CliError> {
        let mut tables = self.tables.clone();
        if let Some(list) = &self.table_list {
            tables.extend(parse_table_list(list)?);
        }

        match (self.builtin, self.all, tables.is_empty()) {
            (true, false, true) => Ok(TableSelection::Builtin),
            (false, true, true) => Ok(TableSelection::All),
            (false, false, false) => Ok(TableSelection::Named(tables)),
            (false, false, true) => Err(CliError::InvalidArgument(
                "name at least one table, or pass --all or --builtin".to_string(),
            )),
            _ => Err(CliError::InvalidArgument(
                "--builtin, --all and table names are mutually exclusive".to_string(),
            )),
        }
    }
}

/// Describe tables and print the result
pub fn handle_schema(args: &SchemaArgs) -> Result<(), CliError> {
    let selection = args.selection()?;
    let config = load_config(&args.workspace_dir)?;

    let rt = runtime()?;
    let response = rt.block_on(describe_schema(&config, &selection))?;

    print_json(&response, args.pretty)?;

    if let SchemaResponse::Failed { .. } = response {
        return Err(CliError::OperationFailed("Schema introspection"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection() {
        let builtin = SchemaArgs {
            builtin: true,
            ..Default::default()
        };
        assert_eq!(builtin.selection().unwrap(), TableSelection::Builtin);

        let all = SchemaArgs {
            all: true,
            ..Default::default()
        };
        assert_eq!(all.selection().unwrap(), TableSelection::All);

        let named = SchemaArgs {
            tables: vec!["a".to_string()],
            table_list: Some(r#"{"OK": ["b", "c"]}"#.to_string()),
            ..Default::default()
        };
        assert_eq!(
            named.selection().unwrap(),
            TableSelection::Named(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );

        assert!(SchemaArgs::default().selection().is_err());

        let conflicting = SchemaArgs {
            all: true,
            tables: vec!["a".to_string()],
            ..Default::default()
        };
        assert!(conflicting.selection().is_err());
    }
}
