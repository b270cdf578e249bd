use crate::cli::Stage;
use crate::utils::format_duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// A file produced by a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrittenFile {
    pub path: PathBuf,
    pub rows: usize,
}

/// An input file a stage could not process and left out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub file: String,
    pub error: String,
}

/// How a stage ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    /// Not run, e.g. because the experiment has no export for it.
    NotRun { reason: String },
    Failed { error: String },
}

/// Outcome of one stage for one experiment (or of the run-wide fault stage)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub experiment: Option<String>,
    pub stage: Stage,
    pub status: StageStatus,
    pub files_written: Vec<WrittenFile>,
    pub skipped_files: Vec<SkippedFile>,
    pub elapsed: Duration,
}

impl StageReport {
    pub fn new(experiment: Option<&str>, stage: Stage) -> Self {
        Self {
            experiment: experiment.map(str::to_string),
            stage,
            status: StageStatus::Completed,
            files_written: Vec::new(),
            skipped_files: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn not_run(mut self, reason: impl Into<String>) -> Self {
        self.status = StageStatus::NotRun {
            reason: reason.into(),
        };
        self
    }

    pub fn failed(mut self, error: &anyhow::Error) -> Self {
        self.status = StageStatus::Failed {
            error: format!("{:#}", error),
        };
        self
    }

    pub fn rows_written(&self) -> usize {
        self.files_written.iter().map(|f| f.rows).sum()
    }

    fn label(&self) -> String {
        match &self.experiment {
            Some(experiment) => format!("{}/{}", experiment, self.stage),
            None => self.stage.to_string(),
        }
    }
}

/// Results manager for collecting stage outcomes and writing the run summary
pub struct ResultsManager {
    output_file: PathBuf,
    reports: Vec<StageReport>,
}

impl ResultsManager {
    /// Create a new results manager
    pub fn new(output_file: &Path) -> Result<Self> {
        Ok(Self {
            output_file: output_file.to_path_buf(),
            reports: Vec::new(),
        })
    }

    /// Record the outcome of a stage
    pub fn add_report(&mut self, report: StageReport) {
        match &report.status {
            StageStatus::Completed => info!(
                "{} finished in {}: {} files, {} rows, {} skipped",
                report.label(),
                format_duration(report.elapsed),
                report.files_written.len(),
                report.rows_written(),
                report.skipped_files.len()
            ),
            StageStatus::NotRun { reason } => warn!("{} not run: {}", report.label(), reason),
            StageStatus::Failed { error } => error!("{} failed: {}", report.label(), error),
        }

        self.reports.push(report);
    }

    pub fn reports(&self) -> &[StageReport] {
        &self.reports
    }

    /// Finalize results and write the summary file
    pub fn finalize(&self) -> Result<RunReport> {
        info!("Finalizing run summary");

        let report = RunReport {
            metadata: RunMetadata {
                version: crate::VERSION.to_string(),
                timestamp: chrono::Utc::now(),
                total_stages: self.reports.len(),
            },
            stages: self.reports.clone(),
            summary: self.calculate_overall_summary(),
        };

        if let Some(parent) = self.output_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(&self.output_file, json).with_context(|| {
            format!("Failed to write summary to {}", self.output_file.display())
        })?;

        let summary = &report.summary;
        info!(
            "{} experiments, {} files written ({} rows), {} files skipped, {} stages failed",
            summary.experiments,
            summary.files_written,
            summary.rows_written,
            summary.skipped_files,
            summary.failed_stages
        );
        debug!("Summary written to: {:?}", self.output_file);
        Ok(report)
    }

    /// Calculate totals across all stages
    fn calculate_overall_summary(&self) -> OverallSummary {
        let experiments: BTreeSet<&str> = self
            .reports
            .iter()
            .filter_map(|r| r.experiment.as_deref())
            .collect();

        OverallSummary {
            experiments: experiments.len(),
            files_written: self.reports.iter().map(|r| r.files_written.len()).sum(),
            rows_written: self.reports.iter().map(StageReport::rows_written).sum(),
            skipped_files: self.reports.iter().map(|r| r.skipped_files.len()).sum(),
            failed_stages: self
                .reports
                .iter()
                .filter(|r| matches!(r.status, StageStatus::Failed { .. }))
                .count(),
        }
    }
}

/// Final run summary structure
#[derive(Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub metadata: RunMetadata,
    pub stages: Vec<StageReport>,
    pub summary: OverallSummary,
}

/// Run metadata
#[derive(Debug, Serialize, Deserialize)]
pub struct RunMetadata {
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub total_stages: usize,
}

/// Totals across all stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverallSummary {
    pub experiments: usize,
    pub files_written: usize,
    pub rows_written: usize,
    pub skipped_files: usize,
    pub failed_stages: usize,
}

impl OverallSummary {
    /// No stage failed, including ones passed over by `continue_on_error`.
    pub fn all_succeeded(&self) -> bool {
        self.failed_stages == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn completed(experiment: &str, stage: Stage, rows: &[usize]) -> StageReport {
        let mut report = StageReport::new(Some(experiment), stage);
        report.files_written = rows
            .iter()
            .enumerate()
            .map(|(i, &rows)| WrittenFile {
                path: PathBuf::from(format!("{}.csv", i)),
                rows,
            })
            .collect();
        report
    }

    #[test]
    fn test_results_manager_creation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("summary.json");
        let manager = ResultsManager::new(&path).unwrap();

        assert_eq!(manager.output_file, path);
        assert!(manager.reports().is_empty());
    }

    #[test]
    fn test_overall_summary() {
        let dir = tempdir().unwrap();
        let mut manager = ResultsManager::new(&dir.path().join("out").join("summary.json")).unwrap();

        manager.add_report(completed("exp-a", Stage::Log, &[3, 4]));
        let mut merge = completed("exp-a", Stage::Merge, &[2]);
        merge.skipped_files.push(SkippedFile {
            file: "ts-auth.csv".to_string(),
            error: "missing required column \"BucketCounts\"".to_string(),
        });
        manager.add_report(merge);
        manager.add_report(
            StageReport::new(Some("exp-b"), Stage::Trace).failed(&anyhow::anyhow!("boom")),
        );
        manager.add_report(StageReport::new(None, Stage::Fault).not_run("no schedule"));

        let report = manager.finalize().unwrap();
        assert_eq!(
            report.summary,
            OverallSummary {
                experiments: 2,
                files_written: 3,
                rows_written: 9,
                skipped_files: 1,
                failed_stages: 1,
            }
        );

        let written = std::fs::read_to_string(dir.path().join("out").join("summary.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed["metadata"]["total_stages"], 4);
        assert_eq!(parsed["stages"][2]["status"]["status"], "failed");
        assert_eq!(parsed["stages"][1]["skipped_files"][0]["file"], "ts-auth.csv");
    }

    #[test]
    fn test_continued_failure_is_not_success() {
        let dir = tempdir().unwrap();
        let mut manager = ResultsManager::new(&dir.path().join("summary.json")).unwrap();

        manager.add_report(completed("exp-a", Stage::Log, &[1]));
        assert!(manager.finalize().unwrap().summary.all_succeeded());

        manager.add_report(
            StageReport::new(Some("exp-b"), Stage::Merge).failed(&anyhow::anyhow!("bad dir")),
        );
        manager.add_report(completed("exp-c", Stage::Log, &[1]));
        let summary = manager.finalize().unwrap().summary;
        assert!(!summary.all_succeeded());
        assert_eq!(summary.failed_stages, 1);
    }

    #[test]
    fn test_stage_report_label() {
        assert_eq!(StageReport::new(Some("exp"), Stage::Merge).label(), "exp/merge");
        assert_eq!(StageReport::new(None, Stage::Fault).label(), "fault");
    }
}
