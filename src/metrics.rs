//! Metrics for the ETL pipeline
//!
//! Thin helpers over the `metrics` facade so metric names live in one place.
//! Nothing is exported unless the binary installs a recorder.

use std::time::Instant;

/// A timing guard that records a stage's duration when dropped
pub struct StageTimer {
    start: Instant,
    stage: &'static str,
}

impl StageTimer {
    pub fn new(stage: &'static str) -> Self {
        Self {
            start: Instant::now(),
            stage,
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        ::metrics::histogram!("etl_stage_duration_seconds", "stage" => self.stage)
            .record(self.elapsed_secs());
    }
}

pub fn time_stage(stage: &'static str) -> StageTimer {
    StageTimer::new(stage)
}

pub mod normalize {
    pub fn rows_dropped(table: &str, reason: &'static str, count: usize) {
        if count == 0 {
            return;
        }
        ::metrics::counter!(
            "etl_normalize_rows_dropped_total",
            "table" => table.to_string(),
            "reason" => reason
        )
        .increment(count as u64);
    }
}

pub mod sink {
    pub fn rows_written(sink: &'static str, table: &str, rows: usize) {
        ::metrics::counter!(
            "etl_sink_rows_written_total",
            "sink" => sink,
            "table" => table.to_string()
        )
        .increment(rows as u64);
    }

    pub fn write_failed(sink: &'static str, table: &str) {
        ::metrics::counter!(
            "etl_sink_write_errors_total",
            "sink" => sink,
            "table" => table.to_string()
        )
        .increment(1);
    }
}

pub mod run {
    pub fn finished(success: bool) {
        let outcome = if success { "success" } else { "failure" };
        ::metrics::counter!("etl_runs_total", "outcome" => outcome).increment(1);
    }

    pub fn stage_failed(stage: &'static str) {
        ::metrics::counter!("etl_stage_failures_total", "stage" => stage).increment(1);
    }
}
