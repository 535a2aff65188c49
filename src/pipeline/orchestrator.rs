use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, Instrument};
use uuid::Uuid;

use crate::config::EtlConfig;
use crate::error::{EtlError, Result};
use crate::metrics;
use crate::pipeline::ingestion::SourceReader;
use crate::pipeline::processing::{FactDerivation, Normalizer};
use crate::pipeline::publish::{self, TableLoad};
use crate::pipeline::storage::{FsWarehouse, SqliteStore, StagingSink, WarehouseSink};
use crate::types::Table;

/// Stages of one run, in execution order, plus the two terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    Read,
    Normalize,
    StageLoad,
    Derive,
    FactLoad,
    WarehousePublish,
    Done,
    Failed,
}

impl Stage {
    pub const SEQUENCE: [Stage; 6] = [
        Stage::Read,
        Stage::Normalize,
        Stage::StageLoad,
        Stage::Derive,
        Stage::FactLoad,
        Stage::WarehousePublish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Read => "Read",
            Stage::Normalize => "Normalize",
            Stage::StageLoad => "StageLoad",
            Stage::Derive => "Derive",
            Stage::FactLoad => "FactLoad",
            Stage::WarehousePublish => "WarehousePublish",
            Stage::Done => "Done",
            Stage::Failed => "Failed",
        }
    }

    /// Successor on the happy path. Terminal states stay put.
    pub fn next(&self) -> Stage {
        match self {
            Stage::Read => Stage::Normalize,
            Stage::Normalize => Stage::StageLoad,
            Stage::StageLoad => Stage::Derive,
            Stage::Derive => Stage::FactLoad,
            Stage::FactLoad => Stage::WarehousePublish,
            Stage::WarehousePublish => Stage::Done,
            Stage::Done => Stage::Done,
            Stage::Failed => Stage::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a run currently is. Stages may only be entered in sequence and
/// `Failed` absorbs everything.
#[derive(Debug, Clone)]
pub struct RunState {
    run_id: Uuid,
    current: Option<Stage>,
    completed: Vec<Stage>,
}

impl RunState {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            current: None,
            completed: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn current(&self) -> Option<Stage> {
        self.current
    }

    pub fn completed(&self) -> &[Stage] {
        &self.completed
    }

    /// Stage the run may enter next.
    pub fn expected(&self) -> Stage {
        match self.completed.last() {
            Some(last) => last.next(),
            None => Stage::Read,
        }
    }

    /// Enters `stage`. Returns false when the run is terminal or `stage` is
    /// not the next one in sequence.
    pub fn enter(&mut self, stage: Stage) -> bool {
        if self.current.is_some_and(|s| s.is_terminal()) || stage != self.expected() {
            return false;
        }
        self.current = Some(stage);
        true
    }

    pub fn complete(&mut self) {
        if let Some(stage) = self.current.filter(|s| !s.is_terminal()) {
            self.completed.push(stage);
            self.current = Some(stage.next()).filter(|next| next.is_terminal());
        }
    }

    pub fn fail(&mut self) {
        self.current = Some(Stage::Failed);
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub load_date: NaiveDate,
    pub staged: Vec<TableLoad>,
    pub facts: Vec<TableLoad>,
    pub published: Vec<TableLoad>,
    pub elapsed: Duration,
}

/// Terminal error of a run: the stage that failed and why.
#[derive(Debug, Error)]
#[error("run {run_id} failed at stage {stage}{}: {source}", implicated_suffix(.source))]
pub struct PipelineFailure {
    pub stage: Stage,
    pub run_id: Uuid,
    pub source: EtlError,
}

impl PipelineFailure {
    pub fn implicated(&self) -> Vec<String> {
        self.source.implicated()
    }
}

fn implicated_suffix(source: &EtlError) -> String {
    let implicated = source.implicated();
    if implicated.is_empty() {
        String::new()
    } else {
        format!(" [{}]", implicated.join(", "))
    }
}

/// Runs the full refresh: read, normalize, stage, derive, write facts back,
/// publish everything to the warehouse.
pub struct Pipeline {
    config: EtlConfig,
    warehouse: Arc<dyn WarehouseSink>,
    load_date: Option<NaiveDate>,
    stage_timeout: Duration,
}

impl Pipeline {
    pub fn new(config: EtlConfig, warehouse: Arc<dyn WarehouseSink>) -> Self {
        let stage_timeout = config.stage_timeout;
        Self {
            config,
            warehouse,
            load_date: None,
            stage_timeout,
        }
    }

    /// Pipeline publishing to the filesystem warehouse named in `config`.
    pub fn from_config(config: EtlConfig) -> Self {
        let warehouse = Arc::new(FsWarehouse::new(config.warehouse.path.clone()));
        Self::new(config, warehouse)
    }

    /// Pins the load date instead of taking today's.
    pub fn with_load_date(mut self, load_date: NaiveDate) -> Self {
        self.load_date = Some(load_date);
        self
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn config(&self) -> &EtlConfig {
        &self.config
    }

    pub async fn run(&self) -> std::result::Result<RunReport, PipelineFailure> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("etl_run", %run_id);
        let result = self.execute(run_id).instrument(span).await;
        metrics::run::finished(result.is_ok());
        result
    }

    async fn execute(&self, run_id: Uuid) -> std::result::Result<RunReport, PipelineFailure> {
        let started = Instant::now();
        let normalizer = match self.load_date {
            Some(load_date) => Normalizer::new(load_date),
            None => Normalizer::for_today(),
        };
        let load_date = normalizer.load_date();
        let mut state = RunState::new(run_id);
        info!(
            %load_date,
            base_path = %self.config.base_path.display(),
            "🚀 Starting ETL run"
        );

        // The staging connection lives from here until the fact load is done.
        let (store, raw_tables) = self.stage(&mut state, Stage::Read, self.read()).await?;

        let staged_tables = self
            .stage(&mut state, Stage::Normalize, async {
                Ok(raw_tables
                    .into_iter()
                    .map(|table| normalizer.normalize(table))
                    .collect::<Vec<_>>())
            })
            .await?;

        let staged = self
            .stage(&mut state, Stage::StageLoad, load_staging(&store, &staged_tables))
            .await?;

        let facts = self
            .stage(&mut state, Stage::Derive, FactDerivation::new().derive(&store))
            .await?;

        let fact_loads = self
            .stage(&mut state, Stage::FactLoad, publish::load_facts(&store, &facts))
            .await?;

        drop(store);

        let tables: Vec<Arc<Table>> = staged_tables
            .into_iter()
            .chain(facts.into_tables())
            .map(Arc::new)
            .collect();
        let target = self.config.warehouse.target();
        let warehouse = Arc::clone(&self.warehouse);
        let published = self
            .stage(&mut state, Stage::WarehousePublish, async move {
                publish::publish_tables(warehouse, &target, tables)
                    .await
                    .into_result()
            })
            .await?;

        let report = RunReport {
            run_id,
            load_date,
            staged,
            facts: fact_loads,
            published,
            elapsed: started.elapsed(),
        };
        info!(
            elapsed_ms = report.elapsed.as_millis() as u64,
            tables = report.published.len(),
            "🎉 ETL run completed"
        );
        Ok(report)
    }

    async fn read(&self) -> Result<(SqliteStore, Vec<Table>)> {
        let staging = &self.config.staging;
        let store = SqliteStore::open(&staging.database)?
            .with_write_mode(staging.write_mode)
            .with_chunk_size(staging.chunk_size);
        info!(
            driver = %staging.driver,
            strategy = store.strategy_name(),
            "Staging store ready"
        );

        let reader = SourceReader::new(self.config.base_path.clone());
        let tables = tokio::task::spawn_blocking(move || reader.read_all())
            .await
            .map_err(|e| EtlError::Task(format!("source read task failed: {e}")))??;
        Ok((store, tables))
    }

    /// Runs one stage under the stage timeout, with boundary logging and
    /// timing. Any error becomes the run's terminal failure.
    async fn stage<T, F>(
        &self,
        state: &mut RunState,
        stage: Stage,
        work: F,
    ) -> std::result::Result<T, PipelineFailure>
    where
        F: Future<Output = Result<T>>,
    {
        if !state.enter(stage) {
            let expected = state.expected();
            state.fail();
            let source = EtlError::StageOrder {
                stage: stage.to_string(),
                expected: expected.to_string(),
            };
            error!(stage = %stage, "❌ {}", source);
            return Err(PipelineFailure {
                stage,
                run_id: state.run_id(),
                source,
            });
        }
        info!(stage = %stage, "▶️ Stage {} started", stage);
        let timer = metrics::time_stage(stage.as_str());

        let outcome = match tokio::time::timeout(self.stage_timeout, work).await {
            Ok(outcome) => outcome,
            Err(_) => Err(EtlError::StageTimeout {
                stage: stage.to_string(),
                timeout: self.stage_timeout,
            }),
        };
        let elapsed_secs = timer.elapsed_secs();
        drop(timer);

        match outcome {
            Ok(value) => {
                state.complete();
                info!(stage = %stage, elapsed_secs, "✅ Stage {} completed", stage);
                Ok(value)
            }
            Err(source) => {
                state.fail();
                metrics::run::stage_failed(stage.as_str());
                error!(stage = %stage, "❌ Stage {} failed: {}", stage, source);
                Err(PipelineFailure {
                    stage,
                    run_id: state.run_id(),
                    source,
                })
            }
        }
    }
}

/// Staging tables are written one after another; the embedded store has a
/// single writer.
async fn load_staging(store: &dyn StagingSink, tables: &[Table]) -> Result<Vec<TableLoad>> {
    let mut loads = Vec::with_capacity(tables.len());
    for table in tables {
        let rows = store.replace(&table.name, table).await?;
        loads.push(TableLoad {
            table: table.name.clone(),
            rows,
        });
    }
    Ok(loads)
}
