use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use crate::error::{EtlError, Result};
use crate::pipeline::processing::facts::FactSet;
use crate::pipeline::storage::{StagingSink, TableId, WarehouseSink};
use crate::types::Table;

/// Rows written for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableLoad {
    pub table: String,
    pub rows: usize,
}

/// Project and dataset every published table is namespaced under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarehouseTarget {
    pub project_id: String,
    pub dataset_id: String,
}

impl WarehouseTarget {
    pub fn new(project_id: impl Into<String>, dataset_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
        }
    }

    pub fn table_id(&self, table: &str) -> Result<TableId> {
        TableId::new(&self.project_id, &self.dataset_id, table)
    }
}

/// Outcome of a warehouse publish: every table either loaded or failed.
#[derive(Debug, Default)]
pub struct PublishReport {
    pub loaded: Vec<TableLoad>,
    pub failed: Vec<(String, EtlError)>,
}

impl PublishReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Loaded tables, or `PartialPublish` naming every table that failed.
    pub fn into_result(self) -> Result<Vec<TableLoad>> {
        if self.failed.is_empty() {
            Ok(self.loaded)
        } else {
            Err(EtlError::PartialPublish {
                failed: self.failed.into_iter().map(|(table, _)| table).collect(),
            })
        }
    }
}

/// Writes the fact tables back into the primary store, full refresh. The
/// first rejected write aborts.
#[instrument(skip_all)]
pub async fn load_facts(store: &dyn StagingSink, facts: &FactSet) -> Result<Vec<TableLoad>> {
    let mut loads = Vec::with_capacity(3);
    for table in facts.tables() {
        let rows = store.replace(&table.name, table).await?;
        loads.push(TableLoad {
            table: table.name.clone(),
            rows,
        });
    }
    Ok(loads)
}

/// Truncate-and-load of every table into the warehouse, concurrently.
///
/// Loads are independent: a failure is logged and recorded, sibling loads
/// still run, and tables already loaded stay loaded. Results come back in the
/// order of `tables`.
#[instrument(skip_all, fields(sink = warehouse.name(), project = %target.project_id, dataset = %target.dataset_id))]
pub async fn publish_tables(
    warehouse: Arc<dyn WarehouseSink>,
    target: &WarehouseTarget,
    tables: Vec<Arc<Table>>,
) -> PublishReport {
    let mut report = PublishReport::default();
    let mut tasks = JoinSet::new();

    for (position, table) in tables.into_iter().enumerate() {
        let table_id = match target.table_id(&table.name) {
            Ok(id) => id,
            Err(e) => {
                error!(table = %table.name, "❌ {}", e);
                report.failed.push((table.name.clone(), e));
                continue;
            }
        };
        let warehouse = Arc::clone(&warehouse);
        tasks.spawn(async move {
            let outcome = warehouse.truncate_and_load(&table_id, &table).await;
            (position, table.name.clone(), outcome)
        });
    }

    let mut finished = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => finished.push(result),
            Err(e) => {
                warn!("Warehouse load task did not complete: {}", e);
                report
                    .failed
                    .push(("<unknown>".to_string(), EtlError::Task(e.to_string())));
            }
        }
    }
    finished.sort_by_key(|(position, _, _)| *position);

    for (_, table, outcome) in finished {
        match outcome {
            Ok(rows) => report.loaded.push(TableLoad { table, rows }),
            Err(e) => {
                error!(table = %table, "❌ Warehouse load failed: {}", e);
                report.failed.push((table, e));
            }
        }
    }

    info!(
        loaded = report.loaded.len(),
        failed = report.failed.len(),
        "Warehouse publish finished"
    );
    report
}
