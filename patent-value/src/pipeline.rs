//! End-to-end pipeline: read, value, allocate, write.
//!
//! Stages run in order over a fully materialized table. A stage failure is
//! logged with its stage name and returned; nothing is written unless both
//! computing stages succeeded.

use std::path::Path;
use std::time::Instant;

use patent_common::config::Config;
use serde::Serialize;

use crate::allocation::{AggregationDiagnostics, Allocator, DEFAULT_VALUE_TOLERANCE};
use crate::dataset;
use crate::error::{Result, ValuationError};
use crate::record::{EventTable, FirmDayTable, ValuedTable};
use crate::transform::{TransformDiagnostics, ValuationModel};

/// Parameters for one run.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Signal-to-noise parameter
    pub gamma: f64,
    /// Relative tolerance for the within-group value check
    pub value_tolerance: f64,
}

impl PipelineOptions {
    pub fn new(gamma: f64) -> Self {
        Self {
            gamma,
            value_tolerance: DEFAULT_VALUE_TOLERANCE,
        }
    }
}

impl From<&Config> for PipelineOptions {
    fn from(config: &Config) -> Self {
        Self {
            gamma: config.valuation.gamma,
            value_tolerance: config.valuation.mw_tolerance,
        }
    }
}

/// Every table produced by a run.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub events: EventTable,
    pub valued: ValuedTable,
    pub firm_days: FirmDayTable,
}

#[derive(Serialize)]
struct RunDiagnostics<'a> {
    gamma: f64,
    delta: f64,
    transform: &'a TransformDiagnostics,
    aggregation: &'a AggregationDiagnostics,
}

impl PipelineRun {
    /// Stage diagnostics of this run as a single JSON object.
    pub fn diagnostics_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&RunDiagnostics {
            gamma: self.valued.gamma,
            delta: self.valued.delta,
            transform: &self.valued.diagnostics,
            aggregation: &self.firm_days.diagnostics,
        })
    }
}

/// The two-stage valuation pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    model: ValuationModel,
    allocator: Allocator,
}

fn log_failure(stage: &'static str) -> impl Fn(&ValuationError) {
    move |e| tracing::error!(stage, error = %e, kind = ?e.kind(), "Pipeline stage failed")
}

impl Pipeline {
    /// Build a pipeline; fails on an invalid `gamma` before any data is read.
    pub fn new(options: PipelineOptions) -> Result<Self> {
        let model = ValuationModel::new(options.gamma).inspect_err(log_failure("configure"))?;
        Ok(Self {
            model,
            allocator: Allocator::new(options.value_tolerance),
        })
    }

    pub fn model(&self) -> &ValuationModel {
        &self.model
    }

    /// Run both stages over an in-memory table.
    pub fn run(&self, events: EventTable) -> PipelineRun {
        let started = Instant::now();
        let valued = self.model.value_table(&events);
        let firm_days = self.allocator.run(&valued);

        tracing::info!(
            rows = events.len(),
            firm_days = firm_days.len(),
            gamma = self.model.gamma(),
            delta = self.model.delta(),
            undefined_values = valued.diagnostics.undefined_value,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Pipeline complete"
        );

        let run = PipelineRun {
            events,
            valued,
            firm_days,
        };
        match run.diagnostics_json() {
            Ok(diagnostics) => tracing::debug!(%diagnostics, "Run diagnostics"),
            Err(e) => tracing::warn!(error = %e, "Could not serialize run diagnostics"),
        }
        run
    }

    /// Read events from `input`, run both stages and write firm-days to `output`.
    pub fn run_files(&self, input: &Path, output: &Path) -> Result<PipelineRun> {
        tracing::info!(input = %input.display(), "Reading event records");
        let events = dataset::read_events_path(input).inspect_err(log_failure("read"))?;

        let run = self.run(events);

        dataset::write_firm_days_path(output, &run.firm_days).inspect_err(log_failure("write"))?;
        tracing::info!(
            output = %output.display(),
            rows = run.firm_days.len(),
            "Results saved"
        );

        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::EventRecord;
    use chrono::NaiveDate;

    #[test]
    fn test_invalid_gamma_fails_before_reading() {
        let err = Pipeline::new(PipelineOptions::new(0.0)).unwrap_err();
        assert!(matches!(err, ValuationError::InvalidGamma(_)));
    }

    #[test]
    fn test_options_from_config() {
        let mut config = Config::default();
        config.valuation.gamma = 0.02;
        config.valuation.mw_tolerance = 0.5;
        let options = PipelineOptions::from(&config);
        assert!((options.gamma - 0.02).abs() < f64::EPSILON);
        assert!((options.value_tolerance - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_run_in_memory() {
        let day = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let events = EventTable::from_rows(vec![
            EventRecord::new("A", day, [0.01, 0.0, 0.0], 0.02, 1e6),
            EventRecord::new("A", day, [0.01, 0.0, 0.0], 0.02, 1e6),
        ]);
        let pipeline = Pipeline::new(PipelineOptions::new(0.007)).unwrap();
        let run = pipeline.run(events);

        assert_eq!(run.events.len(), 2);
        assert_eq!(run.valued.len(), 2);
        assert_eq!(run.firm_days.len(), 1);
        assert_eq!(run.firm_days.rows[0].patent_count, 2);
        assert!((run.firm_days.rows[0].value_avg * 2.0 - run.valued.rows[0].value).abs() < 1e-9);
    }

    #[test]
    fn test_diagnostics_json() {
        let day = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let events = EventTable::from_rows(vec![
            EventRecord::new("A", day, [0.01, 0.0, 0.0], 0.02, 1e6),
            EventRecord::new("B", day, [0.01, 0.0, 0.0], 0.0, 1e6),
        ]);
        let run = Pipeline::new(PipelineOptions::new(0.007)).unwrap().run(events);

        let json: serde_json::Value =
            serde_json::from_str(&run.diagnostics_json().unwrap()).unwrap();
        assert_eq!(json["gamma"], 0.007);
        assert_eq!(json["transform"]["rows"], 2);
        assert_eq!(json["transform"]["undefined_surprise"], 1);
        assert_eq!(json["aggregation"]["groups"], 2);
    }

    #[test]
    fn test_missing_input_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.csv");
        let pipeline = Pipeline::new(PipelineOptions::new(0.007)).unwrap();

        let err = pipeline
            .run_files(&dir.path().join("absent.csv"), &output)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
        assert!(!output.exists());
    }
}
