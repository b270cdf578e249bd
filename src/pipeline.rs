//! # Pipeline Runner
//!
//! Runs the enabled stages for one experiment and reports each outcome to
//! the `ResultsManager`.
//!
//! ## Stage Order
//!
//! The fault stage belongs to the run, not to an experiment, and is driven
//! once by `run_fault_stage` before any experiment. Per experiment the
//! stages run in `Stage::EXPERIMENT_ORDER`:
//!
//! 1. **log**: reformat and chunk `logs.csv` into `<output_root>/log/`
//! 2. **trace**: reformat and chunk `traces.csv`, extract trace ids
//! 3. **metric**: split `request_metrics.csv` per service into `request/`
//! 4. **merge**: latency pipeline over `request/`, merged table
//!
//! A stage whose input export is not configured is reported as not run. The
//! first failing stage ends the experiment; the caller decides whether the
//! run continues with the next experiment.

use crate::cli::Stage;
use crate::config::{ExperimentConfig, PipelineConfig};
use crate::faults::convert_fault_schedule;
use crate::logs::convert_logs;
use crate::merge::MergeOrchestrator;
use crate::metrics::split_request_metrics;
use crate::results::{ResultsManager, StageReport};
use crate::traces::convert_traces;
use anyhow::{Context, Result};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Banner describing an experiment before its stages run.
struct ExperimentDisplay<'a> {
    config: &'a PipelineConfig,
    experiment: &'a ExperimentConfig,
}

impl<'a> std::fmt::Display for ExperimentDisplay<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |path: &Option<std::path::PathBuf>| {
            path.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string())
        };
        let stages: Vec<String> = Stage::EXPERIMENT_ORDER
            .iter()
            .filter(|s| self.config.stage_enabled(**s))
            .map(|s| s.to_string())
            .collect();

        writeln!(f, "Experiment: {}", self.experiment.name)?;
        writeln!(f, "  Stages:  {}", stages.join(", "))?;
        writeln!(f, "  Logs:    {}", show(&self.experiment.logs))?;
        writeln!(f, "  Traces:  {}", show(&self.experiment.traces))?;
        write!(f, "  Metrics: {}", show(&self.experiment.metrics))
    }
}

/// Runs the per-experiment stages
pub struct PipelineRunner<'a> {
    config: &'a PipelineConfig,
    experiment: &'a ExperimentConfig,
}

impl<'a> PipelineRunner<'a> {
    pub fn new(config: &'a PipelineConfig, experiment: &'a ExperimentConfig) -> Self {
        Self { config, experiment }
    }

    /// Run every enabled stage in order
    ///
    /// Each stage's outcome, including a failure, is added to
    /// `results_manager` before returning.
    ///
    /// ## Returns
    /// - `Ok(())` when no stage failed
    /// - `Err(anyhow::Error)` with the first stage failure
    pub fn run(&self, results_manager: &mut ResultsManager) -> Result<()> {
        info!(
            "{}",
            ExperimentDisplay {
                config: self.config,
                experiment: self.experiment,
            }
        );

        for stage in Stage::EXPERIMENT_ORDER {
            if !self.config.stage_enabled(stage) {
                debug!("Stage {} disabled for {}", stage, self.experiment.name);
                continue;
            }

            info!("Running {} stage for {}", stage, self.experiment.name);
            let start_time = Instant::now();
            let report = StageReport::new(Some(&self.experiment.name), stage);

            match self.run_stage(stage, report) {
                Ok(mut report) => {
                    report.elapsed = start_time.elapsed();
                    results_manager.add_report(report);
                }
                Err(e) => {
                    let mut report =
                        StageReport::new(Some(&self.experiment.name), stage).failed(&e);
                    report.elapsed = start_time.elapsed();
                    results_manager.add_report(report);
                    return Err(e);
                }
            }
        }

        info!("All stages completed for {}", self.experiment.name);
        Ok(())
    }

    fn run_stage(&self, stage: Stage, report: StageReport) -> Result<StageReport> {
        match stage {
            Stage::Log => match &self.experiment.logs {
                Some(input) => self.run_log_stage(input, report),
                None => Ok(report.not_run("no log export configured")),
            },
            Stage::Trace => match &self.experiment.traces {
                Some(input) => self.run_trace_stage(input, report),
                None => Ok(report.not_run("no trace export configured")),
            },
            Stage::Metric => match &self.experiment.metrics {
                Some(input) => self.run_metric_stage(input, report),
                None => Ok(report.not_run("no request-metrics export configured")),
            },
            Stage::Merge => self.run_merge_stage(report),
            Stage::Fault | Stage::All => Ok(report.not_run("not a per-experiment stage")),
        }
    }

    fn run_log_stage(&self, input: &Path, mut report: StageReport) -> Result<StageReport> {
        report.files_written = convert_logs(
            input,
            &self.config.log_dir(),
            &self.config.log_node,
            &self.config.log_container,
            self.config.chunking,
        )
        .with_context(|| format!("Failed to convert logs from {}", input.display()))?;
        Ok(report)
    }

    fn run_trace_stage(&self, input: &Path, mut report: StageReport) -> Result<StageReport> {
        let output = convert_traces(
            input,
            self.config.chunking,
            &self.config.trace_dir(),
            &self.config.traceid_dir(),
        )
        .with_context(|| format!("Failed to convert traces from {}", input.display()))?;
        report.files_written = output.into_files();
        Ok(report)
    }

    fn run_metric_stage(&self, input: &Path, mut report: StageReport) -> Result<StageReport> {
        report.files_written =
            split_request_metrics(input, &self.config.request_dir(self.experiment))
                .with_context(|| {
                    format!("Failed to split request metrics from {}", input.display())
                })?;
        Ok(report)
    }

    fn run_merge_stage(&self, mut report: StageReport) -> Result<StageReport> {
        let input_dir = self.config.request_dir(self.experiment);
        let merged_path = self
            .config
            .merged_metric_dir()
            .join(format!("{}.csv", self.experiment.output_stem()));

        let summary = MergeOrchestrator::new(&self.config.bucket_weights, self.config.strict_counts)
            .run(
                &input_dir,
                &self.config.service_metric_dir(self.experiment),
                &merged_path,
            )
            .with_context(|| format!("Failed to merge latencies in {}", input_dir.display()))?;

        let (files, skipped) = summary.into_files();
        report.files_written = files;
        report.skipped_files = skipped;
        Ok(report)
    }
}

/// Convert the fault schedule, if one is configured
///
/// ## Returns
/// - `Ok(())` when the stage completed or had nothing to do
/// - `Err(anyhow::Error)` when the schedule could not be converted
pub fn run_fault_stage(config: &PipelineConfig, results_manager: &mut ResultsManager) -> Result<()> {
    let report = StageReport::new(None, Stage::Fault);
    let Some(schedule) = &config.fault_schedule else {
        results_manager.add_report(report.not_run("no fault schedule configured"));
        return Ok(());
    };

    info!("Converting fault schedule {}", schedule.display());
    let start_time = Instant::now();
    let result = convert_fault_schedule(schedule, &config.output_root, config.fault_output.as_deref())
        .with_context(|| format!("Failed to convert fault schedule {}", schedule.display()));

    match result {
        Ok(written) => {
            let mut report = report;
            report.files_written.push(written);
            report.elapsed = start_time.elapsed();
            results_manager.add_report(report);
            Ok(())
        }
        Err(e) => {
            let mut report = report.failed(&e);
            report.elapsed = start_time.elapsed();
            results_manager.add_report(report);
            Err(e)
        }
    }
}
