//! # Pipeline Configuration
//!
//! Everything a run needs is collected into one `PipelineConfig` before any
//! file is touched: which experiments to convert, where their exports live,
//! where output goes, and the knobs of the individual stages.
//!
//! ## Sources
//!
//! Values are layered, later sources winning:
//!
//! 1. Built-in defaults (`crate::defaults`)
//! 2. The TOML file named by `--config`
//! 3. Command-line options
//!
//! ## Experiments
//!
//! Experiments are either listed explicitly in the TOML file
//! (`[[experiments]]` tables with `name`, `logs`, `traces`, `metrics`) or
//! discovered from `experiments_root`: every sub-directory is one experiment
//! whose exports live in `<dir>/<variant>/{logs,traces,request_metrics}.csv`.
//!
//! ## Example
//!
//! ```toml
//! output_root = "/data/rca/ts-1024"
//! fault_schedule = "/data/ts-1024/fault_injection.toml"
//! stages = ["metric", "merge"]
//! strict_counts = false
//!
//! [[experiments]]
//! name = "ts-order-service-cpu"
//! metrics = "/data/ts-1024/ts-order-service-cpu/abnormal/request_metrics.csv"
//! ```

use crate::cli::{Args, Stage};
use crate::defaults;
use crate::error::{TransError, TransResult};
use crate::histogram::BucketWeights;
use crate::utils::sanitize_file_stem;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Input exports of one fault-injection experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentConfig {
    pub name: String,
    #[serde(default)]
    pub logs: Option<PathBuf>,
    #[serde(default)]
    pub traces: Option<PathBuf>,
    #[serde(default)]
    pub metrics: Option<PathBuf>,
}

impl ExperimentConfig {
    /// Describe the experiment stored in `dir`, looking for the standard
    /// export file names under `dir/<variant>`. Files that do not exist are
    /// left unset.
    pub fn discover(dir: &Path, variant: &str) -> Self {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let base = dir.join(variant);
        let existing = |file: &str| {
            let path = base.join(file);
            path.is_file().then_some(path)
        };

        Self {
            name,
            logs: existing(defaults::LOGS_FILE),
            traces: existing(defaults::TRACES_FILE),
            metrics: existing(defaults::METRICS_FILE),
        }
    }

    /// Name used for this experiment's output paths.
    pub fn output_stem(&self) -> String {
        sanitize_file_stem(&self.name)
    }
}

/// Longest total chunk span accepted by `validate`: one year of minutes.
pub const MAX_CHUNK_SPAN_MINUTES: u64 = 366 * 24 * 60;

/// One-minute chunking parameters shared by the log and trace stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpec {
    pub count: usize,
    pub width_minutes: u32,
}

impl Default for ChunkSpec {
    fn default() -> Self {
        Self {
            count: defaults::CHUNK_COUNT,
            width_minutes: defaults::CHUNK_MINUTES,
        }
    }
}

/// Contents of a `--config` TOML file. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub output_root: Option<PathBuf>,
    pub experiments_root: Option<PathBuf>,
    pub variant: Option<String>,
    pub fault_schedule: Option<PathBuf>,
    pub fault_output: Option<String>,
    pub stages: Option<Vec<Stage>>,
    pub log_node: Option<String>,
    pub log_container: Option<String>,
    pub bucket_weights: Option<BucketWeights>,
    pub strict_counts: Option<bool>,
    pub continue_on_error: Option<bool>,
    pub chunk_count: Option<usize>,
    pub chunk_minutes: Option<u32>,
    pub summary_output: Option<PathBuf>,
    pub experiments: Vec<ExperimentConfig>,
}

impl FileConfig {
    pub fn from_toml_str(content: &str) -> TransResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

/// Fully resolved configuration for one run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    /// Root of all output; log/trace/traceid/metric directories live here.
    pub output_root: PathBuf,

    /// Experiments in processing order.
    pub experiments: Vec<ExperimentConfig>,

    /// Enabled stages, already expanded (never contains `Stage::All`).
    pub stages: Vec<Stage>,

    pub fault_schedule: Option<PathBuf>,

    /// File name of the fault JSON inside `output_root`; derived from the
    /// first injection date when unset.
    pub fault_output: Option<String>,

    /// Fixed `Node` value written to every log row.
    pub log_node: String,

    /// Fixed `Container` value written to every log row.
    pub log_container: String,

    pub bucket_weights: BucketWeights,

    /// Reject rows whose `Count` differs from the sum of their buckets.
    pub strict_counts: bool,

    /// Keep going with the next experiment after a fatal stage error.
    pub continue_on_error: bool,

    pub chunking: ChunkSpec,

    pub summary_output: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let output_root = PathBuf::from(defaults::OUTPUT_ROOT);
        Self {
            summary_output: output_root.join(defaults::SUMMARY_FILE),
            output_root,
            experiments: Vec::new(),
            stages: Stage::expand_all(Vec::new()),
            fault_schedule: None,
            fault_output: None,
            log_node: defaults::LOG_NODE.to_string(),
            log_container: defaults::LOG_CONTAINER.to_string(),
            bucket_weights: BucketWeights::default(),
            strict_counts: false,
            continue_on_error: false,
            chunking: ChunkSpec::default(),
        }
    }
}

impl PipelineConfig {
    /// Create the pipeline configuration from CLI arguments
    ///
    /// Loads the `--config` file when given, applies command-line overrides,
    /// discovers experiments if none are listed, and validates the result.
    ///
    /// ## Errors
    /// - unreadable or malformed config file
    /// - unreadable `experiments_root`
    /// - any `validate` failure
    pub fn from_args(args: &Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        let config = Self::resolve(file, args)?;
        config.validate()?;
        Ok(config)
    }

    /// Merge a config file with CLI overrides, without validating.
    pub fn resolve(file: FileConfig, args: &Args) -> Result<Self> {
        let base = Self::default();

        let output_root = args
            .output_root
            .clone()
            .or(file.output_root)
            .unwrap_or(base.output_root);

        let stages = if args.stages.is_empty() {
            Stage::expand_all(file.stages.unwrap_or_default())
        } else {
            Stage::expand_all(args.stages.clone())
        };

        let mut experiments = file.experiments;
        if experiments.is_empty() {
            let root = args.experiments_root.clone().or(file.experiments_root);
            let variant = args
                .variant
                .clone()
                .or(file.variant)
                .unwrap_or_else(|| defaults::VARIANT.to_string());
            if let Some(root) = root {
                experiments = discover_experiments(&root, &variant).with_context(|| {
                    format!("Failed to list experiments under {}", root.display())
                })?;
            }
        }

        let summary_output = args
            .summary_output
            .clone()
            .or(file.summary_output)
            .unwrap_or_else(|| output_root.join(defaults::SUMMARY_FILE));

        Ok(Self {
            output_root,
            experiments,
            stages,
            fault_schedule: args.fault_schedule.clone().or(file.fault_schedule),
            fault_output: file.fault_output,
            log_node: file.log_node.unwrap_or(base.log_node),
            log_container: file.log_container.unwrap_or(base.log_container),
            bucket_weights: file.bucket_weights.unwrap_or(base.bucket_weights),
            strict_counts: args.strict_counts || file.strict_counts.unwrap_or(false),
            continue_on_error: args.continue_on_error || file.continue_on_error.unwrap_or(false),
            chunking: ChunkSpec {
                count: file.chunk_count.unwrap_or(base.chunking.count),
                width_minutes: file.chunk_minutes.unwrap_or(base.chunking.width_minutes),
            },
            summary_output,
        })
    }

    /// Check the configuration before any stage runs
    ///
    /// ## Rules
    /// - at least one experiment unless only the fault stage is enabled
    /// - experiment names non-empty and unique after file-name sanitizing
    /// - chunk count and width non-zero, total span at most a year
    /// - bucket weights non-empty, finite, non-negative
    pub fn validate(&self) -> TransResult<()> {
        let needs_experiments = self.stages.iter().any(|s| *s != Stage::Fault);
        if needs_experiments && self.experiments.is_empty() {
            return Err(TransError::Config(
                "no experiments configured; list [[experiments]] or set experiments_root"
                    .to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for experiment in &self.experiments {
            if experiment.name.trim().is_empty() {
                return Err(TransError::Config(
                    "experiment names must not be empty".to_string(),
                ));
            }
            if !seen.insert(experiment.output_stem()) {
                return Err(TransError::Config(format!(
                    "duplicate experiment name {:?}",
                    experiment.name
                )));
            }
        }

        if self.chunking.count == 0 || self.chunking.width_minutes == 0 {
            return Err(TransError::Config(
                "chunk_count and chunk_minutes must be greater than zero".to_string(),
            ));
        }
        let span = (self.chunking.count as u64).saturating_mul(u64::from(self.chunking.width_minutes));
        if span > MAX_CHUNK_SPAN_MINUTES {
            return Err(TransError::Config(format!(
                "chunk_count * chunk_minutes is {} minutes; at most {} allowed",
                span, MAX_CHUNK_SPAN_MINUTES
            )));
        }

        // Re-run the weight checks for configs built in code.
        BucketWeights::new(self.bucket_weights.as_slice().to_vec())?;

        Ok(())
    }

    pub fn stage_enabled(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.output_root.join("log")
    }

    pub fn trace_dir(&self) -> PathBuf {
        self.output_root.join("trace")
    }

    pub fn traceid_dir(&self) -> PathBuf {
        self.output_root.join("traceid")
    }

    pub fn merged_metric_dir(&self) -> PathBuf {
        self.output_root.join("metric")
    }

    /// Per-service raw histogram files written by the metric stage.
    pub fn request_dir(&self, experiment: &ExperimentConfig) -> PathBuf {
        self.output_root.join(experiment.output_stem()).join("request")
    }

    /// Per-service time-bucketed latency files written by the merge stage.
    pub fn service_metric_dir(&self, experiment: &ExperimentConfig) -> PathBuf {
        self.output_root.join(experiment.output_stem()).join("metric")
    }
}

/// One experiment per sub-directory of `root`, sorted by name.
pub fn discover_experiments(root: &Path, variant: &str) -> TransResult<Vec<ExperimentConfig>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();

    let experiments: Vec<_> = dirs
        .iter()
        .map(|dir| ExperimentConfig::discover(dir, variant))
        .collect();
    debug!(
        "Discovered {} experiments under {}",
        experiments.len(),
        root.display()
    );
    Ok(experiments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_config_parse() {
        let file = FileConfig::from_toml_str(
            r#"
            output_root = "/tmp/out"
            stages = ["metric", "merge"]
            bucket_weights = [1.0, 2.0]
            strict_counts = true

            [[experiments]]
            name = "cpu-stress"
            metrics = "/data/cpu/request_metrics.csv"
            "#,
        )
        .unwrap();

        assert_eq!(file.output_root, Some(PathBuf::from("/tmp/out")));
        assert_eq!(file.stages, Some(vec![Stage::Metric, Stage::Merge]));
        assert_eq!(file.experiments.len(), 1);
        assert!(file.experiments[0].logs.is_none());

        let config = PipelineConfig::resolve(file, &Args::default()).unwrap();
        assert!(config.strict_counts);
        assert_eq!(config.bucket_weights.len(), 2);
        assert_eq!(config.summary_output, PathBuf::from("/tmp/out/run_summary.json"));
        assert!(config.validate().is_ok());
        assert!(!config.stage_enabled(Stage::Log));
    }

    #[test]
    fn test_file_config_rejects_unknown_keys_and_bad_weights() {
        assert!(FileConfig::from_toml_str("outptu_root = \"x\"").is_err());
        assert!(FileConfig::from_toml_str("bucket_weights = []").is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = FileConfig::from_toml_str("output_root = \"/from/file\"\nstages = [\"log\"]").unwrap();
        let args = Args {
            output_root: Some(PathBuf::from("/from/cli")),
            stages: vec![Stage::Merge],
            ..Default::default()
        };
        let config = PipelineConfig::resolve(file, &args).unwrap();
        assert_eq!(config.output_root, PathBuf::from("/from/cli"));
        assert_eq!(config.stages, vec![Stage::Merge]);
        assert_eq!(config.log_node, "33.33.33.80");
        assert_eq!(config.chunking, ChunkSpec { count: 10, width_minutes: 1 });
    }

    #[test]
    fn test_validate_rejects_duplicates_and_empty_runs() {
        let mut config = PipelineConfig::default();
        assert!(matches!(config.validate(), Err(TransError::Config(_))));

        config.stages = vec![Stage::Fault];
        assert!(config.validate().is_ok());

        config.stages = vec![Stage::Merge];
        let experiment = ExperimentConfig {
            name: "a b".to_string(),
            logs: None,
            traces: None,
            metrics: None,
        };
        let twin = ExperimentConfig {
            name: "a_b".to_string(),
            ..experiment.clone()
        };
        config.experiments = vec![experiment, twin];
        assert!(matches!(config.validate(), Err(TransError::Config(_))));

        config.experiments.pop();
        config.chunking.count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_chunk_span() {
        let mut config = PipelineConfig {
            stages: vec![Stage::Fault],
            ..PipelineConfig::default()
        };

        config.chunking = ChunkSpec {
            count: 100,
            width_minutes: u32::MAX,
        };
        assert!(matches!(config.validate(), Err(TransError::Config(_))));

        config.chunking = ChunkSpec {
            count: usize::MAX,
            width_minutes: 1,
        };
        assert!(matches!(config.validate(), Err(TransError::Config(_))));

        config.chunking = ChunkSpec {
            count: 24 * 60,
            width_minutes: 366,
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_discover_experiments() {
        let root = tempdir().unwrap();
        let with_metrics = root.path().join("exp-b").join("abnormal");
        fs::create_dir_all(&with_metrics).unwrap();
        fs::write(with_metrics.join("request_metrics.csv"), "ServiceName\n").unwrap();
        fs::create_dir_all(root.path().join("exp-a")).unwrap();
        fs::write(root.path().join("stray.txt"), "").unwrap();

        let experiments = discover_experiments(root.path(), "abnormal").unwrap();
        assert_eq!(experiments.len(), 2);
        assert_eq!(experiments[0].name, "exp-a");
        assert!(experiments[0].metrics.is_none());
        assert_eq!(experiments[1].name, "exp-b");
        assert_eq!(
            experiments[1].metrics,
            Some(with_metrics.join("request_metrics.csv"))
        );
        assert!(experiments[1].logs.is_none());
    }
}
