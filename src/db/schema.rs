//! Catalog row models
//!
//! Typed views over the metadata queries the administrative operations run.

use crate::db::types::QueryResults;
use serde::Serialize;

/// Tables of one schema, in catalog order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaTables {
    /// Schema name
    pub schema: String,
    /// Tables (and table-like relations) in this schema
    pub tables: Vec<TableEntry>,
}

/// A table-like relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableEntry {
    pub schema: String,
    pub name: String,
    /// `BASE TABLE`, `VIEW`, `MATERIALIZED VIEW`, ...
    pub table_type: String,
}

/// An extension available on the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extension {
    pub name: String,
    pub default_version: Option<String>,
    pub installed_version: Option<String>,
    pub comment: Option<String>,
}

impl Extension {
    pub fn is_installed(&self) -> bool {
        self.installed_version.is_some()
    }
}

/// Read `table_schema`, `table_name`, `table_type` rows
pub fn table_entries(results: &QueryResults) -> Vec<TableEntry> {
    let (Some(schema), Some(name), Some(kind)) = (
        results.column_index("table_schema"),
        results.column_index("table_name"),
        results.column_index("table_type"),
    ) else {
        return Vec::new();
    };
    results
        .rows
        .iter()
        .filter_map(|row| {
            Some(TableEntry {
                schema: row.text(schema)?.to_string(),
                name: row.text(name)?.to_string(),
                table_type: row.text(kind).unwrap_or_default().to_string(),
            })
        })
        .collect()
}

/// Group entries by schema, keeping first-seen schema order
pub fn group_by_schema(entries: Vec<TableEntry>) -> Vec<SchemaTables> {
    let mut groups: Vec<SchemaTables> = Vec::new();
    for entry in entries {
        match groups.iter_mut().find(|g| g.schema == entry.schema) {
            Some(group) => group.tables.push(entry),
            None => groups.push(SchemaTables {
                schema: entry.schema.clone(),
                tables: vec![entry],
            }),
        }
    }
    groups
}

/// Read rows of `pg_available_extensions`
pub fn extensions(results: &QueryResults) -> Vec<Extension> {
    let Some(name) = results.column_index("name") else {
        return Vec::new();
    };
    let text = |row: &crate::db::types::Row, column: &str| {
        results
            .column_index(column)
            .and_then(|idx| row.text(idx))
            .map(str::to_string)
    };
    results
        .rows
        .iter()
        .filter_map(|row| {
            Some(Extension {
                name: row.text(name)?.to_string(),
                default_version: text(row, "default_version"),
                installed_version: text(row, "installed_version"),
                comment: text(row, "comment"),
            })
        })
        .collect()
}
