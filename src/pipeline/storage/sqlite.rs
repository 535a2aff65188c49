use async_trait::async_trait;
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, Transaction};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::{AnalyticStore, StagingSink, WriteMode};
use crate::constants::{DEFAULT_CHUNK_SIZE, MAX_BIND_PARAMS};
use crate::error::{EtlError, Result};
use crate::metrics;
use crate::types::{Column, ColumnType, Table, Value};

const SINK: &str = "staging";

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Integer(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Timestamp(_) | Value::Date(_) => {
                ToSqlOutput::Owned(SqlValue::Text(self.to_iso_text().unwrap_or_default()))
            }
            Value::Boolean(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
        })
    }
}

fn value_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) | ValueRef::Blob(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Target of an INSERT: quoted table name and column list.
pub struct InsertTarget {
    prefix: String,
    row_placeholder: String,
    width: usize,
}

impl InsertTarget {
    pub fn new(table: &str, columns: &[Column]) -> Self {
        let names: Vec<String> = columns.iter().map(|c| quote_ident(&c.name)).collect();
        Self {
            prefix: format!("INSERT INTO {} ({}) VALUES ", quote_ident(table), names.join(", ")),
            row_placeholder: format!("({})", vec!["?"; columns.len()].join(", ")),
            width: columns.len(),
        }
    }

    fn statement(&self, rows: usize) -> String {
        let mut sql = self.prefix.clone();
        sql.push_str(&vec![self.row_placeholder.as_str(); rows].join(", "));
        sql
    }
}

/// How one chunk of rows is submitted inside its transaction.
pub trait WriteStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn write_chunk(
        &self,
        tx: &Transaction<'_>,
        target: &InsertTarget,
        rows: &[Vec<Value>],
    ) -> rusqlite::Result<usize>;
}

/// Multi-row `INSERT ... VALUES (...), (...)`, split so no statement binds
/// more than `MAX_BIND_PARAMS` parameters.
#[derive(Debug, Default, Clone, Copy)]
pub struct BulkInsert;

impl WriteStrategy for BulkInsert {
    fn name(&self) -> &'static str {
        "bulk"
    }

    fn write_chunk(
        &self,
        tx: &Transaction<'_>,
        target: &InsertTarget,
        rows: &[Vec<Value>],
    ) -> rusqlite::Result<usize> {
        let per_statement = (MAX_BIND_PARAMS / target.width.max(1)).max(1);
        let mut written = 0;
        for batch in rows.chunks(per_statement) {
            let mut stmt = tx.prepare_cached(&target.statement(batch.len()))?;
            written += stmt.execute(params_from_iter(batch.iter().flatten()))?;
        }
        Ok(written)
    }
}

/// One prepared-statement execution per row.
#[derive(Debug, Default, Clone, Copy)]
pub struct RowByRow;

impl WriteStrategy for RowByRow {
    fn name(&self) -> &'static str {
        "row_by_row"
    }

    fn write_chunk(
        &self,
        tx: &Transaction<'_>,
        target: &InsertTarget,
        rows: &[Vec<Value>],
    ) -> rusqlite::Result<usize> {
        let mut stmt = tx.prepare_cached(&target.statement(1))?;
        let mut written = 0;
        for row in rows {
            written += stmt.execute(params_from_iter(row.iter()))?;
        }
        Ok(written)
    }
}

impl From<WriteMode> for Arc<dyn WriteStrategy> {
    fn from(mode: WriteMode) -> Self {
        match mode {
            WriteMode::Bulk => Arc::new(BulkInsert),
            WriteMode::RowByRow => Arc::new(RowByRow),
        }
    }
}

/// Drops and recreates `name`, then inserts `table` in chunks of `chunk_size`
/// rows, one transaction per chunk.
pub fn replace_table(
    conn: &mut Connection,
    name: &str,
    table: &Table,
    strategy: &dyn WriteStrategy,
    chunk_size: usize,
) -> Result<usize> {
    let fail = |e: rusqlite::Error| EtlError::sink_write(SINK, name, e);

    if table.columns.is_empty() {
        return Err(EtlError::sink_write(SINK, name, "table has no columns"));
    }
    let width = table.columns.len();
    if let Some((idx, row)) = table.rows.iter().enumerate().find(|(_, r)| r.len() != width) {
        return Err(EtlError::sink_write(
            SINK,
            name,
            format!("row {} has {} values, expected {}", idx + 1, row.len(), width),
        ));
    }

    let definitions: Vec<String> = table
        .columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.column_type.sql_type()))
        .collect();
    let quoted = quote_ident(name);

    let tx = conn.transaction().map_err(fail)?;
    tx.execute_batch(&format!(
        "DROP TABLE IF EXISTS {quoted}; CREATE TABLE {quoted} ({});",
        definitions.join(", ")
    ))
    .map_err(fail)?;
    tx.commit().map_err(fail)?;

    let target = InsertTarget::new(name, &table.columns);
    let mut written = 0;
    for (chunk_no, chunk) in table.rows.chunks(chunk_size.max(1)).enumerate() {
        let tx = conn.transaction().map_err(fail)?;
        written += strategy.write_chunk(&tx, &target, chunk).map_err(fail)?;
        tx.commit().map_err(fail)?;
        debug!(table = name, chunk = chunk_no + 1, rows = chunk.len(), "Committed chunk");
    }
    Ok(written)
}

/// Runs `sql` and materializes the result set as a table named `name`.
pub fn query_table(conn: &Connection, name: &str, sql: &str) -> rusqlite::Result<Table> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
    let width = names.len();

    let mut collected = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for idx in 0..width {
            values.push(value_from_ref(row.get_ref(idx)?));
        }
        collected.push(values);
    }

    let columns = names
        .into_iter()
        .map(|n| Column::new(n, ColumnType::Text))
        .collect();
    let mut table = Table::new(name, columns).with_rows(collected);
    table.infer_column_types();
    Ok(table)
}

/// Embedded SQL staging store. One connection per run, released on drop.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    strategy: Arc<dyn WriteStrategy>,
    chunk_size: usize,
    location: String,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let location = path.display().to_string();
        if location == ":memory:" {
            return Self::open_in_memory();
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| EtlError::sink_write(SINK, &location, e))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| EtlError::sink_write(SINK, &location, e))?;
        info!(store = %location, "🔌 Opened staging store");
        Ok(Self::from_connection(conn, location))
    }

    /// Opens a store a previous run created. Unlike `open`, a missing file is
    /// an error rather than a new empty store.
    pub fn open_existing<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str() != ":memory:" && !path.is_file() {
            return Err(EtlError::StoreNotFound {
                path: path.to_path_buf(),
            });
        }
        Self::open(path)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| EtlError::sink_write(SINK, ":memory:", e))?;
        Ok(Self::from_connection(conn, ":memory:".to_string()))
    }

    fn from_connection(conn: Connection, location: String) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            strategy: Arc::new(BulkInsert),
            chunk_size: DEFAULT_CHUNK_SIZE,
            location,
        }
    }

    pub fn with_write_mode(self, mode: WriteMode) -> Self {
        self.with_strategy(mode.into())
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn WriteStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub async fn table_names(&self) -> Result<Vec<String>> {
        self.run_blocking(|conn| {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .map_err(|e| EtlError::derivation("table_names", e))?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
                .map_err(|e| EtlError::derivation("table_names", e))?;
            Ok(names)
        })
        .await
    }

    async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| EtlError::Task("staging connection lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| EtlError::Task(format!("staging store task failed: {e}")))?
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        debug!(store = %self.location, "Released staging connection");
    }
}

#[async_trait]
impl StagingSink for SqliteStore {
    async fn replace(&self, table_name: &str, table: &Table) -> Result<usize> {
        let name = table_name.to_string();
        let rows = table.clone();
        let strategy = Arc::clone(&self.strategy);
        let chunk_size = self.chunk_size;

        let result = self
            .run_blocking(move |conn| replace_table(conn, &name, &rows, strategy.as_ref(), chunk_size))
            .await;

        match &result {
            Ok(written) => {
                metrics::sink::rows_written(SINK, table_name, *written);
                info!(
                    table = table_name,
                    rows = *written,
                    strategy = self.strategy.name(),
                    "---Loaded {} into staging store---",
                    table_name
                );
            }
            Err(_) => metrics::sink::write_failed(SINK, table_name),
        }
        result
    }
}

#[async_trait]
impl AnalyticStore for SqliteStore {
    async fn query(&self, name: &str, sql: &str) -> Result<Table> {
        let query_name = name.to_string();
        let sql = sql.to_string();
        self.run_blocking(move |conn| {
            query_table(conn, &query_name, &sql).map_err(|e| EtlError::derivation(&query_name, e))
        })
        .await
    }

    async fn row_count(&self, table_name: &str) -> Result<Option<usize>> {
        let name = table_name.to_string();
        self.run_blocking(move |conn| {
            let label = format!("row_count({name})");
            let exists: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .map_err(|e| EtlError::derivation(&label, e))?;
            if exists == 0 {
                return Ok(None);
            }
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", quote_ident(&name)), [], |row| {
                    row.get(0)
                })
                .map_err(|e| EtlError::derivation(&label, e))?;
            Ok(Some(count as usize))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn orders(rows: &[(&str, i64)]) -> Table {
        Table::new(
            "stg_commandes",
            vec![
                Column::new("id_produit", ColumnType::Text),
                Column::new("quantite", ColumnType::Integer),
            ],
        )
        .with_rows(
            rows.iter()
                .map(|(p, q)| vec![Value::from(*p), Value::Integer(*q)])
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_replace_leaves_no_residue() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = orders(&[("A", 1), ("B", 2), ("C", 3)]);
        let b = orders(&[("Z", 9)]);

        assert_eq!(store.replace("stg_commandes", &a).await.unwrap(), 3);
        assert_eq!(store.replace("stg_commandes", &b).await.unwrap(), 1);

        let stored = store
            .query("check", "SELECT id_produit, quantite FROM stg_commandes")
            .await
            .unwrap();
        assert_eq!(stored.rows, b.rows);
        assert_eq!(store.row_count("stg_commandes").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_chunked_writes_cover_every_row_for_both_strategies() {
        let rows: Vec<(String, i64)> = (0..7).map(|i| (format!("P{i}"), i)).collect();
        let borrowed: Vec<(&str, i64)> = rows.iter().map(|(p, q)| (p.as_str(), *q)).collect();
        let table = orders(&borrowed);

        for mode in [WriteMode::Bulk, WriteMode::RowByRow] {
            let store = SqliteStore::open_in_memory()
                .unwrap()
                .with_write_mode(mode)
                .with_chunk_size(3);
            assert_eq!(store.replace("t", &table).await.unwrap(), 7);
            let stored = store.query("check", "SELECT * FROM t ORDER BY rowid").await.unwrap();
            assert_eq!(stored.rows, table.rows, "mode {mode}");
        }
    }

    #[tokio::test]
    async fn test_bulk_insert_splits_wide_chunks() {
        let columns: Vec<Column> = (0..10)
            .map(|i| Column::new(format!("c{i}"), ColumnType::Integer))
            .collect();
        let rows: Vec<Vec<Value>> = (0..250)
            .map(|r| (0..10).map(|c| Value::Integer(r * 10 + c)).collect())
            .collect();
        let table = Table::new("wide", columns).with_rows(rows);

        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.replace("wide", &table).await.unwrap(), 250);
        assert_eq!(store.row_count("wide").await.unwrap(), Some(250));
    }

    #[tokio::test]
    async fn test_temporal_values_are_stored_as_iso_text() {
        let day = NaiveDate::from_ymd_opt(2025, 5, 9).unwrap();
        let table = Table::new(
            "d",
            vec![
                Column::new("jour", ColumnType::Date),
                Column::new("ok", ColumnType::Boolean),
            ],
        )
        .with_rows(vec![vec![Value::Date(day), Value::Boolean(true)]]);

        let store = SqliteStore::open_in_memory().unwrap();
        store.replace("d", &table).await.unwrap();
        let stored = store
            .query("check", "SELECT jour, strftime('%m', jour) AS mois, ok FROM d")
            .await
            .unwrap();
        assert_eq!(stored.rows[0][0], Value::from("2025-05-09"));
        assert_eq!(stored.rows[0][1], Value::from("05"));
        assert_eq!(stored.rows[0][2], Value::Integer(1));
    }

    #[tokio::test]
    async fn test_rejects_ragged_rows() {
        let mut table = orders(&[("A", 1)]);
        table.rows.push(vec![Value::from("B")]);

        let store = SqliteStore::open_in_memory().unwrap();
        let err = store.replace("stg_commandes", &table).await.unwrap_err();
        assert!(matches!(err, EtlError::SinkWrite { .. }));
        assert!(err.to_string().contains("row 2 has 1 values"));
    }

    #[tokio::test]
    async fn test_query_against_missing_table_is_derivation_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store.query("FACT_x", "SELECT * FROM nowhere").await.unwrap_err();
        assert!(matches!(err, EtlError::DerivationQuery { ref query, .. } if query == "FACT_x"));
        assert_eq!(store.row_count("nowhere").await.unwrap(), None);
    }

    #[test]
    fn test_open_existing_does_not_create_a_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("typo").join("staging.db");

        let err = SqliteStore::open_existing(&path).err().unwrap();

        assert!(matches!(err, EtlError::StoreNotFound { .. }));
        assert!(err.to_string().starts_with("staging store not found"));
        assert!(!path.exists());
        assert!(!dir.path().join("typo").exists());
        assert!(SqliteStore::open_existing(":memory:").is_ok());
    }

    #[tokio::test]
    async fn test_file_store_persists_between_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("staging.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.replace("stg_commandes", &orders(&[("A", 1)])).await.unwrap();
        }
        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.table_names().await.unwrap(), vec!["stg_commandes".to_string()]);
    }
}
