//! Post-run checks: every published table must exist and hold rows, both in
//! the staging store and in the warehouse.

use serde::Serialize;
use std::fmt;
use tracing::{error, info, warn};

use crate::constants::PUBLISHED_TABLES;
use crate::pipeline::publish::WarehouseTarget;
use crate::pipeline::storage::{AnalyticStore, WarehouseSink};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Populated,
    Empty,
    Missing,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableCheck {
    pub table: String,
    pub rows: Option<usize>,
    pub status: CheckStatus,
}

impl TableCheck {
    fn from_count(table: &str, count: crate::error::Result<Option<usize>>) -> Self {
        let (rows, status) = match count {
            Ok(Some(0)) => (Some(0), CheckStatus::Empty),
            Ok(Some(n)) => (Some(n), CheckStatus::Populated),
            Ok(None) => (None, CheckStatus::Missing),
            Err(e) => (None, CheckStatus::Error(e.to_string())),
        };
        Self {
            table: table.to_string(),
            rows,
            status,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Populated
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    /// Which store was checked.
    pub store: String,
    pub checks: Vec<TableCheck>,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(TableCheck::passed)
    }

    pub fn failures(&self) -> Vec<&TableCheck> {
        self.checks.iter().filter(|c| !c.passed()).collect()
    }

    fn log(&self) {
        for check in &self.checks {
            match &check.status {
                CheckStatus::Populated => info!(
                    store = %self.store,
                    rows = check.rows.unwrap_or_default(),
                    "✅ Table {} contains data",
                    check.table
                ),
                CheckStatus::Empty => warn!(store = %self.store, "Table {} is empty", check.table),
                CheckStatus::Missing => warn!(store = %self.store, "Table {} does not exist", check.table),
                CheckStatus::Error(reason) => {
                    error!(store = %self.store, "❌ Error on table {}: {}", check.table, reason)
                }
            }
        }
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.store)?;
        for check in &self.checks {
            let status = match &check.status {
                CheckStatus::Populated => format!("ok ({} rows)", check.rows.unwrap_or_default()),
                CheckStatus::Empty => "EMPTY".to_string(),
                CheckStatus::Missing => "MISSING".to_string(),
                CheckStatus::Error(reason) => format!("ERROR: {reason}"),
            };
            writeln!(f, "   {:<16} {}", check.table, status)?;
        }
        Ok(())
    }
}

pub async fn verify_staging(store: &dyn AnalyticStore) -> VerificationReport {
    let mut checks = Vec::with_capacity(PUBLISHED_TABLES.len());
    for table in PUBLISHED_TABLES {
        checks.push(TableCheck::from_count(table, store.row_count(table).await));
    }
    let report = VerificationReport {
        store: "staging".to_string(),
        checks,
    };
    report.log();
    report
}

pub async fn verify_warehouse(
    warehouse: &dyn WarehouseSink,
    target: &WarehouseTarget,
) -> VerificationReport {
    let mut checks = Vec::with_capacity(PUBLISHED_TABLES.len());
    for table in PUBLISHED_TABLES {
        let count = match target.table_id(table) {
            Ok(id) => warehouse.row_count(&id).await,
            Err(e) => Err(e),
        };
        checks.push(TableCheck::from_count(table, count));
    }
    let report = VerificationReport {
        store: format!("warehouse {}.{}", target.project_id, target.dataset_id),
        checks,
    };
    report.log();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::storage::{InMemoryWarehouse, SqliteStore, StagingSink};
    use crate::types::{Column, ColumnType, Table, Value};

    fn one_row(name: &str) -> Table {
        Table::new(name, vec![Column::new("id", ColumnType::Integer)])
            .with_rows(vec![vec![Value::Integer(1)]])
    }

    #[tokio::test]
    async fn test_staging_report_classifies_tables() {
        let store = SqliteStore::open_in_memory().unwrap();
        for table in &PUBLISHED_TABLES[..6] {
            store.replace(table, &one_row(table)).await.unwrap();
        }
        let empty = Table::new("FACT_Livraison", vec![Column::new("id", ColumnType::Integer)]);
        store.replace("FACT_Livraison", &empty).await.unwrap();

        let report = verify_staging(&store).await;

        assert!(!report.passed());
        let failures: Vec<(&str, &CheckStatus)> = report
            .failures()
            .into_iter()
            .map(|c| (c.table.as_str(), &c.status))
            .collect();
        assert_eq!(
            failures,
            vec![
                ("FACT_Livraison", &CheckStatus::Empty),
                ("FACT_commandes", &CheckStatus::Missing),
            ]
        );
    }

    #[tokio::test]
    async fn test_warehouse_report_passes_when_every_table_has_rows() {
        let warehouse = InMemoryWarehouse::new();
        let target = WarehouseTarget::new("proj", "vente");
        for table in PUBLISHED_TABLES {
            let id = target.table_id(table).unwrap();
            warehouse.truncate_and_load(&id, &one_row(table)).await.unwrap();
        }

        let report = verify_warehouse(&warehouse, &target).await;

        assert!(report.passed(), "{report}");
        assert_eq!(report.checks.len(), 8);
        assert!(report.to_string().starts_with("warehouse proj.vente:"));
    }
}
