//! # Error Types
//!
//! Typed failures raised by the transformation stages. The orchestration
//! layer (`pipeline`, `main`) wraps these in `anyhow` with file context; the
//! merge stage inspects them to decide whether a file can be skipped.
//!
//! ## Failure Classes
//!
//! - **Configuration**: bad weights, impossible chunking, no experiments.
//!   Raised before any file is read and always abort the run.
//! - **Histogram**: zero mass, zero `Count`, bucket/weight length mismatch,
//!   malformed bucket sequences.
//! - **Tabular**: missing columns, unparseable cells and timestamps.
//! - **I/O and codecs**: filesystem, CSV, JSON and TOML errors.

use thiserror::Error;

/// Result alias used throughout the transformation modules.
pub type TransResult<T> = std::result::Result<T, TransError>;

#[derive(Debug, Error)]
pub enum TransError {
    /// A histogram row whose `Count` column is zero cannot be normalized.
    #[error("histogram row has Count = 0 and cannot be normalized")]
    ZeroCount,

    /// The normalized histogram carries no mass, so no tail can be located.
    #[error("histogram has zero total mass")]
    ZeroHistogramMass,

    /// Only raised when strict count validation is enabled.
    #[error("Count {count} does not match the bucket sum {bucket_sum}")]
    CountMismatch { count: u64, bucket_sum: u64 },

    #[error("bucket sequence has {buckets} entries but {weights} weights are configured")]
    WeightLengthMismatch { buckets: usize, weights: usize },

    #[error("malformed bucket sequence {input:?}: {reason}")]
    MalformedSequence { input: String, reason: String },

    #[error("column {column} has malformed value {value:?}")]
    MalformedValue { column: String, value: String },

    #[error("missing required column {column:?}")]
    MissingColumn { column: String },

    #[error("unparseable timestamp {0:?}")]
    Timestamp(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl TransError {
    /// Whether a failure confined to one input file may be skipped while the
    /// rest of the stage continues.
    ///
    /// Configuration errors describe the whole run and are never recoverable.
    /// A bucket/weight length mismatch means the configured weights do not fit
    /// the exported histogram layout, which is a configuration problem too.
    /// Everything else originates from the contents of a single file.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            TransError::Config(_) | TransError::WeightLengthMismatch { .. }
        )
    }
}
