use csv::{ReaderBuilder, StringRecord, Trim};
use std::collections::HashSet;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, instrument};

use super::schema::{parse_cell, TypeCandidates};
use crate::error::{EtlError, Result};
use crate::types::{Column, Entity, Table};

/// One-shot reader for the five flat-file exports under a base directory.
#[derive(Debug, Clone)]
pub struct SourceReader {
    base_path: PathBuf,
}

impl SourceReader {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn path_for(&self, entity: Entity) -> PathBuf {
        self.base_path.join(entity.file_name())
    }

    /// Reads every entity. Each file is attempted even if an earlier one
    /// failed, so a single run reports all missing or malformed inputs.
    #[instrument(skip(self), fields(base_path = %self.base_path.display()))]
    pub fn read_all(&self) -> Result<Vec<Table>> {
        let mut tables = Vec::with_capacity(Entity::ALL.len());
        let mut failures = Vec::new();

        for entity in Entity::ALL {
            match self.read_entity(entity) {
                Ok(table) => tables.push(table),
                Err(e) => {
                    error!(entity = %entity, "❌ {}", e);
                    failures.push(e);
                }
            }
        }

        if !failures.is_empty() {
            return Err(EtlError::Sources(failures));
        }
        info!("📥 Read {} source files", tables.len());
        Ok(tables)
    }

    pub fn read_entity(&self, entity: Entity) -> Result<Table> {
        let path = self.path_for(entity);
        let file = File::open(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => EtlError::SourceNotFound {
                entity: entity.name().to_string(),
                path: path.clone(),
            },
            _ => parse_error(entity, &path, None, e),
        })?;
        let table = read_table(entity, &path, file)?;
        debug!(
            entity = %entity,
            rows = table.len(),
            columns = table.columns.len(),
            "Loaded {}",
            path.display()
        );
        Ok(table)
    }
}

fn parse_error(entity: Entity, path: &Path, line: Option<u64>, reason: impl ToString) -> EtlError {
    EtlError::SourceParse {
        entity: entity.name().to_string(),
        path: path.to_path_buf(),
        line,
        reason: reason.to_string(),
    }
}

/// Parses one delimited export into a typed table named after the entity's
/// staging table. Every record must have exactly as many fields as the header.
pub fn read_table<R: Read>(entity: Entity, path: &Path, input: R) -> Result<Table> {
    let mut reader = ReaderBuilder::new()
        .delimiter(entity.delimiter())
        .has_headers(true)
        .flexible(false)
        .trim(Trim::Headers)
        .from_reader(input);

    let headers = reader
        .headers()
        .map_err(|e| parse_error(entity, path, Some(1), e))?
        .clone();
    let names = validate_headers(entity, path, &headers)?;

    let mut records: Vec<StringRecord> = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| {
            let line = e.position().map(|p| p.line());
            parse_error(entity, path, line, e)
        })?;
        records.push(record);
    }

    let columns: Vec<Column> = names
        .into_iter()
        .enumerate()
        .map(|(idx, name)| {
            let mut candidates = TypeCandidates::default();
            for record in &records {
                candidates.observe(record.get(idx).unwrap_or_default());
            }
            Column::new(name, candidates.resolve())
        })
        .collect();

    let rows = records
        .iter()
        .map(|record| {
            columns
                .iter()
                .enumerate()
                .map(|(idx, column)| parse_cell(record.get(idx).unwrap_or_default(), column.column_type))
                .collect()
        })
        .collect();

    Ok(Table::new(entity.staging_table(), columns).with_rows(rows))
}

fn validate_headers(entity: Entity, path: &Path, headers: &StringRecord) -> Result<Vec<String>> {
    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        return Err(parse_error(entity, path, Some(1), "missing header row"));
    }
    let mut seen = HashSet::new();
    let mut names = Vec::with_capacity(headers.len());
    for (idx, name) in headers.iter().enumerate() {
        if name.is_empty() {
            return Err(parse_error(
                entity,
                path,
                Some(1),
                format!("header column {} has no name", idx + 1),
            ));
        }
        if !seen.insert(name) {
            return Err(parse_error(
                entity,
                path,
                Some(1),
                format!("duplicate header column '{name}'"),
            ));
        }
        names.push(name.to_string());
    }
    Ok(names)
}
