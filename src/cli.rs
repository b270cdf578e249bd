use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// rca-trans - Reshape fault-injection telemetry for root-cause analysis
#[derive(Parser, Debug, Clone, Default)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// TOML configuration file; command-line options override its values
    #[clap(long, help_heading = "Core Options")]
    pub config: Option<PathBuf>,

    /// Directory holding one sub-directory per experiment
    #[clap(long, help_heading = "Core Options")]
    pub experiments_root: Option<PathBuf>,

    /// Sub-directory of each experiment to read (e.g. abnormal, normal)
    #[clap(long, help_heading = "Core Options")]
    pub variant: Option<String>,

    /// Root directory for all converted output
    #[clap(short = 'o', long, help_heading = "Core Options")]
    pub output_root: Option<PathBuf>,

    /// Stages to run (space-separated: fault, log, trace, metric, merge, or all)
    #[clap(short = 's', long, value_enum, num_args = 1..)]
    pub stages: Vec<Stage>,

    /// Fault-injection schedule (TOML) to convert
    #[clap(long)]
    pub fault_schedule: Option<PathBuf>,

    /// Keep processing other experiments when one fails
    #[clap(long, default_value_t = false)]
    pub continue_on_error: bool,

    /// Reject histogram rows whose Count differs from the bucket sum
    #[clap(long, default_value_t = false)]
    pub strict_counts: bool,

    /// JSON file for the run summary [default: <output-root>/run_summary.json]
    #[clap(long)]
    pub summary_output: Option<PathBuf>,

    /// Also write plain (uncolored) log output to this file
    #[clap(long)]
    pub log_file: Option<PathBuf>,

    /// Verbose output
    #[clap(short = 'v', long, default_value_t = false)]
    pub verbose: bool,
}

/// Pipeline stages
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Fault schedule TOML to hour-keyed JSON
    #[clap(name = "fault")]
    Fault,

    /// Log reformatting and minute chunking
    #[clap(name = "log")]
    Log,

    /// Trace reformatting, chunking and trace-id extraction
    #[clap(name = "trace")]
    Trace,

    /// Split request metrics per service
    #[clap(name = "metric")]
    Metric,

    /// Latency percentiles and cross-service merge
    #[clap(name = "merge")]
    Merge,

    /// All stages
    #[clap(name = "all")]
    All,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Fault => write!(f, "fault"),
            Stage::Log => write!(f, "log"),
            Stage::Trace => write!(f, "trace"),
            Stage::Metric => write!(f, "metric"),
            Stage::Merge => write!(f, "merge"),
            Stage::All => write!(f, "all"),
        }
    }
}

impl Stage {
    /// Per-experiment stages in execution order.
    pub const EXPERIMENT_ORDER: [Stage; 4] = [Stage::Log, Stage::Trace, Stage::Metric, Stage::Merge];

    /// Expand the "All" variant to every stage; an empty list also means all
    pub fn expand_all(stages: Vec<Stage>) -> Vec<Stage> {
        if stages.is_empty() || stages.contains(&Stage::All) {
            vec![
                Stage::Fault,
                Stage::Log,
                Stage::Trace,
                Stage::Metric,
                Stage::Merge,
            ]
        } else {
            let mut unique = Vec::with_capacity(stages.len());
            for stage in stages {
                if !unique.contains(&stage) {
                    unique.push(stage);
                }
            }
            unique
        }
    }
}
