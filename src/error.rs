use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("source file for {entity} not found: {}", .path.display())]
    SourceNotFound { entity: String, path: PathBuf },

    #[error("malformed {entity} source {}{}: {reason}", .path.display(), .line.map(|l| format!(" (line {l})")).unwrap_or_default())]
    SourceParse {
        entity: String,
        path: PathBuf,
        line: Option<u64>,
        reason: String,
    },

    #[error("{} source file(s) could not be read: {}", .0.len(), join_errors(.0))]
    Sources(Vec<EtlError>),

    #[error("{sink} rejected write to table {table}: {reason}")]
    SinkWrite {
        sink: String,
        table: String,
        reason: String,
    },

    #[error("derivation query for {query} failed: {reason}")]
    DerivationQuery { query: String, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("warehouse publish incomplete, failed tables: {}", .failed.join(", "))]
    PartialPublish { failed: Vec<String> },

    #[error("stage {stage} timed out after {}s", .timeout.as_secs())]
    StageTimeout { stage: String, timeout: Duration },

    #[error("stage {stage} entered out of order, expected {expected}")]
    StageOrder { stage: String, expected: String },

    #[error("staging store not found: {}", .path.display())]
    StoreNotFound { path: PathBuf },

    #[error("background task failed: {0}")]
    Task(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl EtlError {
    pub fn sink_write(sink: &str, table: &str, reason: impl ToString) -> Self {
        EtlError::SinkWrite {
            sink: sink.to_string(),
            table: table.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn derivation(query: &str, reason: impl ToString) -> Self {
        EtlError::DerivationQuery {
            query: query.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Files or tables a failed run should point the operator at.
    pub fn implicated(&self) -> Vec<String> {
        match self {
            EtlError::SourceNotFound { path, .. }
            | EtlError::SourceParse { path, .. }
            | EtlError::StoreNotFound { path } => {
                vec![path.display().to_string()]
            }
            EtlError::Sources(errors) => errors.iter().flat_map(|e| e.implicated()).collect(),
            EtlError::SinkWrite { table, .. } => vec![table.clone()],
            EtlError::DerivationQuery { query, .. } => vec![query.clone()],
            EtlError::PartialPublish { failed } => failed.clone(),
            _ => Vec::new(),
        }
    }
}

fn join_errors(errors: &[EtlError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, EtlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_source_errors_name_every_file() {
        let err = EtlError::Sources(vec![
            EtlError::SourceNotFound {
                entity: "product".to_string(),
                path: PathBuf::from("data/produit.csv"),
            },
            EtlError::SourceParse {
                entity: "movement".to_string(),
                path: PathBuf::from("data/mouvements.csv"),
                line: Some(4),
                reason: "expected 5 fields, found 3".to_string(),
            },
        ]);

        let message = err.to_string();
        assert!(message.starts_with("2 source file(s)"));
        assert!(message.contains("data/produit.csv"));
        assert!(message.contains("(line 4)"));
        assert_eq!(
            err.implicated(),
            vec!["data/produit.csv".to_string(), "data/mouvements.csv".to_string()]
        );
    }
}
