use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use super::{TableId, WarehouseSink};
use crate::error::{EtlError, Result};
use crate::metrics;
use crate::types::{Column, Table};

const SINK: &str = "warehouse";

#[derive(Debug, Serialize)]
struct TableManifest<'a> {
    table_id: String,
    columns: &'a [Column],
    rows: usize,
    loaded_at: String,
}

/// Directory-backed analytical store.
///
/// Layout: `<root>/<project>/<dataset>/<table>.ndjson` with one JSON object per
/// row, plus `<table>.schema.json`. Loads go through a temp file and a rename,
/// so readers see either the previous or the new contents of a table.
#[derive(Debug, Clone)]
pub struct FsWarehouse {
    root: PathBuf,
}

impl FsWarehouse {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dataset_dir(&self, id: &TableId) -> PathBuf {
        self.root.join(&id.project).join(&id.dataset)
    }

    pub fn data_path(&self, id: &TableId) -> PathBuf {
        self.dataset_dir(id).join(format!("{}.ndjson", id.table))
    }

    pub fn schema_path(&self, id: &TableId) -> PathBuf {
        self.dataset_dir(id).join(format!("{}.schema.json", id.table))
    }

    async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = path.with_file_name(format!(".{file_name}.tmp"));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await
    }

    async fn load(&self, id: &TableId, table: &Table) -> Result<usize> {
        tokio::fs::create_dir_all(self.dataset_dir(id)).await?;

        let mut body = Vec::new();
        for row in &table.rows {
            let object: serde_json::Map<String, serde_json::Value> = table
                .columns
                .iter()
                .zip(row)
                .map(|(column, value)| (column.name.clone(), value.to_json()))
                .collect();
            serde_json::to_writer(&mut body, &object)?;
            body.push(b'\n');
        }

        let manifest = TableManifest {
            table_id: id.to_string(),
            columns: &table.columns,
            rows: table.len(),
            loaded_at: Utc::now().to_rfc3339(),
        };
        let manifest = serde_json::to_vec_pretty(&manifest)?;

        Self::write_atomic(&self.data_path(id), &body).await?;
        Self::write_atomic(&self.schema_path(id), &manifest).await?;
        Ok(table.len())
    }
}

#[async_trait]
impl WarehouseSink for FsWarehouse {
    fn name(&self) -> &'static str {
        "fs_warehouse"
    }

    async fn truncate_and_load(&self, table_id: &TableId, table: &Table) -> Result<usize> {
        info!("📤 Uploading {} to warehouse → {} ...", table.name, table_id);
        match self.load(table_id, table).await {
            Ok(rows) => {
                metrics::sink::rows_written(SINK, &table_id.table, rows);
                info!(rows, "✅ Table {} uploaded successfully.", table_id);
                Ok(rows)
            }
            Err(e) => {
                metrics::sink::write_failed(SINK, &table_id.table);
                Err(EtlError::sink_write(SINK, &table_id.to_string(), e))
            }
        }
    }

    async fn row_count(&self, table_id: &TableId) -> Result<Option<usize>> {
        match tokio::fs::read_to_string(self.data_path(table_id)).await {
            Ok(contents) => Ok(Some(contents.lines().filter(|l| !l.is_empty()).count())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
