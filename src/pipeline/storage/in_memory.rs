use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::{TableId, WarehouseSink};
use crate::error::{EtlError, Result};
use crate::types::Table;

/// In-memory warehouse for development/testing
#[derive(Debug, Clone, Default)]
pub struct InMemoryWarehouse {
    tables: Arc<Mutex<HashMap<String, Table>>>,
    rejected: Arc<Mutex<HashSet<String>>>,
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent load of `table` fail, as a warehouse rejecting
    /// the write would.
    pub fn reject_table(&self, table: &str) {
        if let Ok(mut rejected) = self.rejected.lock() {
            rejected.insert(table.to_string());
        }
    }

    pub fn table(&self, table_id: &TableId) -> Option<Table> {
        self.tables
            .lock()
            .ok()
            .and_then(|tables| tables.get(&table_id.to_string()).cloned())
    }

    pub fn table_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .tables
            .lock()
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    fn lock_error(table_id: &TableId) -> EtlError {
        EtlError::sink_write("in_memory_warehouse", &table_id.to_string(), "warehouse lock poisoned")
    }
}

#[async_trait]
impl WarehouseSink for InMemoryWarehouse {
    fn name(&self) -> &'static str {
        "in_memory_warehouse"
    }

    async fn truncate_and_load(&self, table_id: &TableId, table: &Table) -> Result<usize> {
        let rejected = self
            .rejected
            .lock()
            .map_err(|_| Self::lock_error(table_id))?
            .contains(&table_id.table);
        if rejected {
            return Err(EtlError::sink_write(
                self.name(),
                &table_id.to_string(),
                "table rejected by warehouse",
            ));
        }

        let mut tables = self.tables.lock().map_err(|_| Self::lock_error(table_id))?;
        tables.insert(table_id.to_string(), table.clone());
        debug!("Loaded {} rows into {}", table.len(), table_id);
        Ok(table.len())
    }

    async fn row_count(&self, table_id: &TableId) -> Result<Option<usize>> {
        let tables = self.tables.lock().map_err(|_| Self::lock_error(table_id))?;
        Ok(tables.get(&table_id.to_string()).map(Table::len))
    }
}
