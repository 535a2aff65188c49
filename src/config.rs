use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_CONFIG_FILE, DEFAULT_STAGE_TIMEOUT_SECS, DEFAULT_WAREHOUSE_PATH,
};
use crate::error::{EtlError, Result};
use crate::pipeline::publish::WarehouseTarget;
use crate::pipeline::storage::WriteMode;

/// Settings as they appear in the TOML file, before environment overrides
/// and validation.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawConfig {
    pub server: Option<String>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub driver: Option<String>,
    pub base_path: Option<String>,
    pub project_id: Option<String>,
    pub dataset_id: Option<String>,
    pub credentials_path: Option<String>,
    pub warehouse_path: Option<String>,
    pub chunk_size: Option<usize>,
    pub write_mode: Option<String>,
    pub stage_timeout_secs: Option<u64>,
}

impl RawConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Overrides file values with whatever `lookup` finds. Blank variables are
    /// ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        for (slot, name) in [
            (&mut self.server, "SQL_SERVER"),
            (&mut self.database, "SQL_DATABASE"),
            (&mut self.username, "SQL_USERNAME"),
            (&mut self.password, "SQL_PASSWORD"),
            (&mut self.driver, "SQL_DRIVER"),
            (&mut self.base_path, "DATA_BASE_PATH"),
            (&mut self.project_id, "GCP_PROJECT_ID"),
            (&mut self.dataset_id, "BQ_DATASET_ID"),
            (&mut self.credentials_path, "GOOGLE_APPLICATION_CREDENTIALS"),
            (&mut self.warehouse_path, "ETL_WAREHOUSE_PATH"),
            (&mut self.write_mode, "ETL_WRITE_MODE"),
        ] {
            if let Some(value) = get(name) {
                *slot = Some(value);
            }
        }

        if let Some(value) = get("ETL_CHUNK_SIZE") {
            self.chunk_size = Some(parse_number("ETL_CHUNK_SIZE", &value)?);
        }
        if let Some(value) = get("ETL_STAGE_TIMEOUT_SECS") {
            self.stage_timeout_secs = Some(parse_number("ETL_STAGE_TIMEOUT_SECS", &value)?);
        }
        Ok(())
    }
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| EtlError::Configuration(format!("{name} must be a whole number, got '{value}'")))
}

fn required(value: Option<String>, key: &str, env: &str) -> Result<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            EtlError::Configuration(format!("missing required setting '{key}' (or env {env})"))
        })
}

/// Embedded SQL engines the staging store can be opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Driver {
    #[default]
    Sqlite,
    Libsql,
}

impl FromStr for Driver {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Driver::Sqlite),
            "libsql" => Ok(Driver::Libsql),
            other => Err(EtlError::Configuration(format!(
                "unsupported driver '{other}' (expected 'sqlite' or 'libsql')"
            ))),
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Driver::Sqlite => f.write_str("sqlite"),
            Driver::Libsql => f.write_str("libsql"),
        }
    }
}

/// Primary store connection settings.
#[derive(Clone)]
pub struct StagingConfig {
    pub server: Option<String>,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub driver: Driver,
    pub chunk_size: usize,
    pub write_mode: WriteMode,
}

impl fmt::Debug for StagingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagingConfig")
            .field("server", &self.server)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("driver", &self.driver)
            .field("chunk_size", &self.chunk_size)
            .field("write_mode", &self.write_mode)
            .finish()
    }
}

/// Analytical warehouse settings.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    pub project_id: String,
    pub dataset_id: String,
    pub credentials_path: Option<PathBuf>,
    /// Root directory of the filesystem warehouse.
    pub path: PathBuf,
}

impl WarehouseConfig {
    pub fn target(&self) -> WarehouseTarget {
        WarehouseTarget::new(&self.project_id, &self.dataset_id)
    }
}

/// Validated process configuration.
#[derive(Debug, Clone)]
pub struct EtlConfig {
    pub base_path: PathBuf,
    pub staging: StagingConfig,
    pub warehouse: WarehouseConfig,
    pub stage_timeout: Duration,
}

impl EtlConfig {
    /// Loads `path` (or `etl.toml` when absent, which may not exist), applies
    /// environment overrides and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let raw = match path {
            Some(path) => {
                let contents = fs::read_to_string(path).map_err(|e| {
                    EtlError::Configuration(format!(
                        "Failed to read config file '{}': {}",
                        path.display(),
                        e
                    ))
                })?;
                RawConfig::from_toml_str(&contents)?
            }
            None => match fs::read_to_string(DEFAULT_CONFIG_FILE) {
                Ok(contents) => RawConfig::from_toml_str(&contents)?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => RawConfig::default(),
                Err(e) => return Err(e.into()),
            },
        };
        Self::from_sources(raw, |name| std::env::var(name).ok())
    }

    /// File settings only, no environment.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Self::from_raw(RawConfig::from_toml_str(contents)?)
    }

    pub fn from_sources<F>(mut raw: RawConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        raw.apply_env(lookup)?;
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: RawConfig) -> Result<Self> {
        let database = required(raw.database, "database", "SQL_DATABASE")?;
        let base_path = required(raw.base_path, "base_path", "DATA_BASE_PATH")?;
        let project_id = required(raw.project_id, "project_id", "GCP_PROJECT_ID")?;
        let dataset_id = required(raw.dataset_id, "dataset_id", "BQ_DATASET_ID")?;

        for (key, value) in [("project_id", &project_id), ("dataset_id", &dataset_id)] {
            if value.contains('.') {
                return Err(EtlError::Configuration(format!(
                    "'{key}' must not contain '.', got '{value}'"
                )));
            }
        }

        let driver = match raw.driver.as_deref() {
            Some(d) if !d.trim().is_empty() => d.parse()?,
            _ => Driver::default(),
        };

        let chunk_size = raw.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
        if chunk_size == 0 {
            return Err(EtlError::Configuration(
                "'chunk_size' must be greater than 0".to_string(),
            ));
        }

        let write_mode = match raw.write_mode.as_deref() {
            Some(mode) => mode.parse()?,
            None => WriteMode::default(),
        };

        let credentials_path = raw
            .credentials_path
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        if let Some(path) = &credentials_path {
            if !path.is_file() {
                return Err(EtlError::Configuration(format!(
                    "credentials file '{}' does not exist",
                    path.display()
                )));
            }
        }

        let stage_timeout_secs = raw.stage_timeout_secs.unwrap_or(DEFAULT_STAGE_TIMEOUT_SECS);
        if stage_timeout_secs == 0 {
            return Err(EtlError::Configuration(
                "'stage_timeout_secs' must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            base_path: PathBuf::from(base_path),
            staging: StagingConfig {
                server: raw.server,
                database,
                username: raw.username,
                password: raw.password,
                driver,
                chunk_size,
                write_mode,
            },
            warehouse: WarehouseConfig {
                project_id,
                dataset_id,
                credentials_path,
                path: PathBuf::from(
                    raw.warehouse_path
                        .unwrap_or_else(|| DEFAULT_WAREHOUSE_PATH.to_string()),
                ),
            },
            stage_timeout: Duration::from_secs(stage_timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MINIMAL: &str = r#"
        database = "staging.db"
        base_path = "data"
        project_id = "pipeline-458019"
        dataset_id = "vente"
    "#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = EtlConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.staging.driver, Driver::Sqlite);
        assert_eq!(config.staging.chunk_size, 1000);
        assert_eq!(config.staging.write_mode, WriteMode::Bulk);
        assert_eq!(config.warehouse.path, PathBuf::from("warehouse"));
        assert_eq!(config.stage_timeout, Duration::from_secs(300));
        assert_eq!(config.warehouse.target().table_id("FACT_commandes").unwrap().to_string(),
            "pipeline-458019.vente.FACT_commandes");
    }

    #[test]
    fn test_missing_required_key_names_env_variable() {
        let err = EtlConfig::from_toml_str("database = \"x.db\"").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("base_path"), "{message}");
        assert!(message.contains("DATA_BASE_PATH"), "{message}");
    }

    #[test]
    fn test_env_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SQL_DATABASE", "override.db"),
            ("BQ_DATASET_ID", "ventes_2025"),
            ("ETL_CHUNK_SIZE", "250"),
            ("ETL_WRITE_MODE", "row_by_row"),
            ("SQL_SERVER", "   "),
        ]);
        let raw = RawConfig::from_toml_str(MINIMAL).unwrap();
        let config =
            EtlConfig::from_sources(raw, |name| env.get(name).map(|v| v.to_string())).unwrap();

        assert_eq!(config.staging.database, "override.db");
        assert_eq!(config.warehouse.dataset_id, "ventes_2025");
        assert_eq!(config.staging.chunk_size, 250);
        assert_eq!(config.staging.write_mode, WriteMode::RowByRow);
        assert_eq!(config.staging.server, None);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for extra in [
            "chunk_size = 0",
            "driver = \"odbc\"",
            "write_mode = \"upsert\"",
            "credentials_path = \"/definitely/not/here.json\"",
        ] {
            let contents = format!("{MINIMAL}\n{extra}");
            assert!(
                matches!(EtlConfig::from_toml_str(&contents), Err(EtlError::Configuration(_))),
                "{extra}"
            );
        }

        let dotted = MINIMAL.replace("\"vente\"", "\"a.b\"");
        assert!(EtlConfig::from_toml_str(&dotted).is_err());

        let bad_number = RawConfig::default()
            .apply_env(|name| (name == "ETL_CHUNK_SIZE").then(|| "many".to_string()));
        assert!(bad_number.is_err());
    }

    #[test]
    fn test_password_is_redacted() {
        let contents = format!("{MINIMAL}\npassword = \"hunter2\"");
        let config = EtlConfig::from_toml_str(&contents).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_existing_credentials_file_is_accepted() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let contents = format!(
            "{MINIMAL}\ncredentials_path = \"{}\"",
            file.path().display().to_string().replace('\\', "/")
        );
        let config = EtlConfig::from_toml_str(&contents).unwrap();
        assert_eq!(config.warehouse.credentials_path.as_deref(), Some(file.path()));
    }
}
