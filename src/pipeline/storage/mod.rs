// Pipeline storage: the staging store and the analytical warehouse

pub mod in_memory;
pub mod sqlite;
pub mod warehouse_fs;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{EtlError, Result};
use crate::types::Table;

pub use in_memory::InMemoryWarehouse;
pub use sqlite::{BulkInsert, RowByRow, SqliteStore, WriteStrategy};
pub use warehouse_fs::FsWarehouse;

/// Primary store write side. `replace` is a destructive full refresh: prior
/// contents of `table_name` are discarded, nothing is merged.
#[async_trait]
pub trait StagingSink: Send + Sync {
    /// Returns the number of rows written.
    async fn replace(&self, table_name: &str, table: &Table) -> Result<usize>;
}

/// Primary store read side used by fact derivation and verification.
#[async_trait]
pub trait AnalyticStore: Send + Sync {
    /// Runs one self-contained query. `name` identifies it in errors.
    async fn query(&self, name: &str, sql: &str) -> Result<Table>;

    /// `None` when the table does not exist.
    async fn row_count(&self, table_name: &str) -> Result<Option<usize>>;

    async fn table_exists(&self, table_name: &str) -> Result<bool> {
        Ok(self.row_count(table_name).await?.is_some())
    }
}

/// Secondary analytical warehouse.
#[async_trait]
pub trait WarehouseSink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Empties the target table and loads `table` into it. Atomic per table
    /// only; other tables are untouched.
    async fn truncate_and_load(&self, table_id: &TableId, table: &Table) -> Result<usize>;

    async fn row_count(&self, table_id: &TableId) -> Result<Option<usize>>;
}

/// Fully qualified warehouse table identifier: `project.dataset.table`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableId {
    pub fn new(project: &str, dataset: &str, table: &str) -> Result<Self> {
        for (label, segment) in [("project", project), ("dataset", dataset), ("table", table)] {
            if segment.is_empty() || segment.contains('.') {
                return Err(EtlError::Configuration(format!(
                    "invalid warehouse {label} identifier '{segment}'"
                )));
            }
        }
        Ok(Self {
            project: project.to_string(),
            dataset: dataset.to_string(),
            table: table.to_string(),
        })
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// How rows are pushed into the staging store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    #[default]
    Bulk,
    RowByRow,
}

impl FromStr for WriteMode {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bulk" | "multi" => Ok(WriteMode::Bulk),
            "row_by_row" | "row-by-row" | "row" => Ok(WriteMode::RowByRow),
            other => Err(EtlError::Configuration(format!(
                "unknown write_mode '{other}' (expected 'bulk' or 'row_by_row')"
            ))),
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Bulk => f.write_str("bulk"),
            WriteMode::RowByRow => f.write_str("row_by_row"),
        }
    }
}
