//! # rca-trans
//!
//! Offline batch converter that reshapes telemetry exported from a
//! fault-injection testbed (OpenTelemetry-style logs, traces and request
//! metrics plus a chaos schedule) into the per-minute and per-service tables
//! a root-cause-analysis tool reads.
//!
//! ## Stages
//!
//! - **fault**: chaos schedule TOML to an hour-keyed JSON fault list
//! - **log**: log export to per-minute log chunks
//! - **trace**: trace export to per-minute span chunks and trace-id lists
//! - **metric**: raw request metrics split into one file per service
//! - **merge**: latency histograms to P90/P95/P99 estimates per service,
//!   averaged per timestamp and concatenated across services
//!
//! ## Latency Pipeline
//!
//! Every histogram row goes through the same steps:
//!
//! 1. Bucket counts are divided by `Count` (`histogram::normalize`)
//! 2. The top 10%, 5% and 1% of the mass is located by walking the buckets
//!    from the highest down (`histogram::extract_tail`)
//! 3. Each tail is reduced to one number with fixed bucket weights and a
//!    tail divisor of 10, 5 or 1 (`histogram::collapse`)
//! 4. The scalar goes to the client or server columns depending on the
//!    metric name (`metrics::split_dimensions`)
//! 5. Rows sharing a timestamp are averaged, ignoring zeros
//!    (`metrics::average_by_timestamp`)
//!
//! ## Usage Example
//!
//! ```rust
//! use rca_trans::histogram::{collapse, extract_tail, normalize, BucketCounts, BucketWeights, TailFraction};
//!
//! let counts = BucketCounts::parse("[10, 20, 30, 40]")?;
//! let mass = normalize(&counts, 100, false)?;
//! let tail = extract_tail(mass.as_slice(), TailFraction::P99.fraction())?;
//! let weights = BucketWeights::new(vec![1.0, 2.0, 3.0, 4.0])?;
//!
//! let p99 = collapse(&tail, &weights, TailFraction::P99)?;
//! assert!((p99 - 4.0).abs() < 1e-9);
//! # Ok::<(), rca_trans::TransError>(())
//! ```

/// Minute windows shared by the log and trace stages
pub mod chunking;

/// Command-line interface
///
/// Argument parsing with clap and the `Stage` enumeration with "all"
/// expansion.
pub mod cli;

/// Run configuration
///
/// Layers built-in defaults, an optional TOML file and command-line options
/// into one validated `PipelineConfig`, and discovers experiments on disk.
pub mod config;

pub mod error;

/// Chaos schedule to hour-keyed fault list
pub mod faults;

/// Histogram normalization, tail extraction and weighted collapse
///
/// Pure numeric functions with no I/O; every latency estimate produced by
/// the merge stage comes from here.
pub mod histogram;

pub mod logging;

/// Log export reformatting and chunking
pub mod logs;

/// Per-service latency pipeline and merged output
pub mod merge;

/// Typed rows of the request-latency pipeline
///
/// Parsing histogram rows out of CSV tables, client/server routing, the
/// per-timestamp average and the per-service split of raw exports.
pub mod metrics;

/// Stage orchestration for one experiment
pub mod pipeline;

/// Run summary collection and output
///
/// Every stage reports its written files, skipped inputs and duration to a
/// `ResultsManager`, which writes the JSON run summary at the end.
pub mod results;

pub mod table;

/// Trace export reformatting, chunking and trace-id extraction
pub mod traces;

pub mod utils;

pub use cli::{Args, Stage};
pub use config::{ExperimentConfig, PipelineConfig};
pub use error::{TransError, TransResult};
pub use histogram::{BucketCounts, BucketWeights, TailFraction};
pub use merge::{MergeOrchestrator, MergeSummary};
pub use pipeline::{run_fault_stage, PipelineRunner};
pub use results::{ResultsManager, RunReport, StageReport};

/// The current version of rca-trans
///
/// Populated from Cargo.toml and written into the run summary.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    /// Default root directory for converted output
    pub const OUTPUT_ROOT: &str = "rca-output";

    /// Sub-directory of an experiment holding the exports to convert
    ///
    /// Each experiment directory keeps a `normal` and an `abnormal` capture;
    /// root-cause analysis works on the latter.
    pub const VARIANT: &str = "abnormal";

    /// `Node` column of every log row
    pub const LOG_NODE: &str = "33.33.33.80";

    /// `Container` column of every log row
    pub const LOG_CONTAINER: &str = "server";

    /// Number of chunk windows cut from each log and trace export
    pub const CHUNK_COUNT: usize = 10;

    /// Width of one chunk window in minutes
    pub const CHUNK_MINUTES: u32 = 1;

    /// Run summary file name inside the output root
    pub const SUMMARY_FILE: &str = "run_summary.json";

    /// Export file names looked up during experiment discovery
    pub const LOGS_FILE: &str = "logs.csv";
    pub const TRACES_FILE: &str = "traces.csv";
    pub const METRICS_FILE: &str = "request_metrics.csv";
}
