//! # Latency Histogram Arithmetic
//!
//! Reconstructs tail-latency estimates from the bucketed request-duration
//! histograms exported by the testbed's metric pipeline. A row of the export
//! carries one count per latency bucket plus the total observation count;
//! this module turns that into three scalar latencies (P90, P95, P99).
//!
//! ## Processing Steps
//!
//! 1. **Parse**: `BucketCounts::parse` validates the textual list exported for
//!    each row (`"[0, 3, 12, ...]"`) into a sequence of non-negative counts.
//! 2. **Normalize**: `normalize` divides every bucket by the row's `Count`,
//!    producing per-bucket probability mass.
//! 3. **Extract**: `extract_tail` walks the buckets from the highest latency
//!    down and collects exactly `fraction` of the total mass, expressed as a
//!    percentage per bucket. Only a suffix of the buckets is non-zero.
//! 4. **Collapse**: `weighted_sum` multiplies each bucket percentage by the
//!    bucket's representative latency; `collapse` additionally divides by the
//!    tail's divisor (10 for P90, 5 for P95, 1 for P99).
//!
//! ## Accuracy
//!
//! The collapsed value is a proxy for the percentile latency, not an
//! interpolated quantile: it weights the tail mass by assumed per-bucket
//! latencies.
//!
//! ## Example
//!
//! ```rust
//! use rca_trans::histogram::{extract_tail, normalize, weighted_sum, BucketCounts, BucketWeights};
//!
//! let counts = BucketCounts::parse("[10, 20, 30, 40]").unwrap();
//! let mass = normalize(&counts, 100, false).unwrap();
//! let p99 = extract_tail(mass.as_slice(), 0.01).unwrap();
//! let weights = BucketWeights::new(vec![1.0, 2.0, 3.0, 4.0]).unwrap();
//! assert!((weighted_sum(&p99, &weights).unwrap() - 4.0).abs() < 1e-9);
//! ```

use crate::error::{TransError, TransResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Representative latency of each exported histogram bucket, in seconds.
///
/// Index-aligned with the 15 bucket counts of the `http.*.request.duration`
/// histograms; the last two buckets share the same weight because the
/// overflow bucket has no upper bound.
pub const DEFAULT_BUCKET_WEIGHTS: [f64; 15] = [
    0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0, 10.0,
];

/// Validated per-bucket latency weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct BucketWeights(Vec<f64>);

impl BucketWeights {
    /// Create a weight table, rejecting empty, negative or non-finite weights.
    pub fn new(weights: Vec<f64>) -> TransResult<Self> {
        if weights.is_empty() {
            return Err(TransError::Config(
                "bucket weights must not be empty".to_string(),
            ));
        }
        if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(TransError::Config(format!(
                "bucket weight {} is not a finite non-negative number",
                bad
            )));
        }
        Ok(Self(weights))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

impl Default for BucketWeights {
    fn default() -> Self {
        Self(DEFAULT_BUCKET_WEIGHTS.to_vec())
    }
}

impl TryFrom<Vec<f64>> for BucketWeights {
    type Error = TransError;

    fn try_from(weights: Vec<f64>) -> TransResult<Self> {
        Self::new(weights)
    }
}

impl From<BucketWeights> for Vec<f64> {
    fn from(weights: BucketWeights) -> Self {
        weights.0
    }
}

/// Raw bucket counts of one histogram row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketCounts(Vec<u64>);

impl BucketCounts {
    pub fn new(counts: Vec<u64>) -> Self {
        Self(counts)
    }

    /// Parse the exported textual list form, e.g. `"[0, 3, 12]"`
    ///
    /// Every element must be a non-negative integer. Integral floats such as
    /// `3.0` are accepted because some exporters write counts that way.
    /// Anything else, including an empty list, is a `MalformedSequence`.
    pub fn parse(text: &str) -> TransResult<Self> {
        let malformed = |reason: &str| TransError::MalformedSequence {
            input: text.to_string(),
            reason: reason.to_string(),
        };

        let inner = text
            .trim()
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(|| malformed("expected a bracketed list"))?;

        if inner.trim().is_empty() {
            return Err(malformed("list has no buckets"));
        }

        inner
            .split(',')
            .map(|item| parse_count(item.trim()).ok_or_else(|| malformed("element is not a count")))
            .collect::<TransResult<Vec<_>>>()
            .map(Self)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.0
    }

    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }
}

fn parse_count(item: &str) -> Option<u64> {
    if let Ok(count) = item.parse::<u64>() {
        return Some(count);
    }
    let value = item.parse::<f64>().ok()?;
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= u64::MAX as f64 {
        Some(value as u64)
    } else {
        None
    }
}

/// Per-bucket probability mass of one histogram row.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedHistogram(Vec<f64>);

impl NormalizedHistogram {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn total_mass(&self) -> f64 {
        self.0.iter().sum()
    }
}

/// Divide every bucket count by the row's total observation count.
///
/// `Count == 0` is rejected. When `strict` is false a `Count` that differs
/// from the bucket sum is accepted and yields masses that do not sum to one;
/// when `strict` is true it is a `CountMismatch`.
pub fn normalize(counts: &BucketCounts, count: u64, strict: bool) -> TransResult<NormalizedHistogram> {
    if count == 0 {
        return Err(TransError::ZeroCount);
    }

    let bucket_sum = counts.total();
    if strict && bucket_sum != count {
        return Err(TransError::CountMismatch { count, bucket_sum });
    }

    let total = count as f64;
    Ok(NormalizedHistogram(
        counts.as_slice().iter().map(|&c| c as f64 / total).collect(),
    ))
}

/// The three tails reported downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailFraction {
    P90,
    P95,
    P99,
}

impl TailFraction {
    pub const ALL: [TailFraction; 3] = [TailFraction::P90, TailFraction::P95, TailFraction::P99];

    /// Share of observations counted as the slow tail.
    pub fn fraction(self) -> f64 {
        match self {
            TailFraction::P90 => 0.10,
            TailFraction::P95 => 0.05,
            TailFraction::P99 => 0.01,
        }
    }

    /// Divisor applied after the weighted sum.
    ///
    /// The tail percentages sum to `fraction * 100`, so dividing by this
    /// brings every tail back onto the same scale.
    pub fn divisor(self) -> f64 {
        match self {
            TailFraction::P90 => 10.0,
            TailFraction::P95 => 5.0,
            TailFraction::P99 => 1.0,
        }
    }
}

impl fmt::Display for TailFraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TailFraction::P90 => write!(f, "P90"),
            TailFraction::P95 => write!(f, "P95"),
            TailFraction::P99 => write!(f, "P99"),
        }
    }
}

/// State carried while walking buckets from the highest latency down.
#[derive(Debug, Clone, Copy)]
struct TailWalk {
    accumulated: f64,
    done: bool,
}

/// Locate the top `fraction` of the histogram mass
///
/// ## Parameters
/// - `mass`: per-bucket mass ordered by ascending latency
/// - `fraction`: tail share in `(0, 1]`, e.g. `0.01` for P99
///
/// ## Returns
/// A sequence of the same length holding, per bucket, the percentage of the
/// total mass that bucket contributes to the tail. The non-zero entries sum to
/// `fraction * 100`. Buckets are consumed whole from the top until the next
/// one would reach the target; that boundary bucket contributes only the
/// remaining share and every lower bucket is zero.
///
/// ## Errors
/// - `ZeroHistogramMass` when the buckets hold no mass
/// - `Config` when `fraction` is outside `(0, 1]`
///
/// ## Rounding
///
/// Should floating-point error leave the walk short of the target after the
/// lowest bucket, that bucket absorbs the remainder; the result is accepted.
pub fn extract_tail(mass: &[f64], fraction: f64) -> TransResult<Vec<f64>> {
    if !(fraction > 0.0 && fraction <= 1.0) {
        return Err(TransError::Config(format!(
            "tail fraction {} is outside (0, 1]",
            fraction
        )));
    }

    let total: f64 = mass.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return Err(TransError::ZeroHistogramMass);
    }

    let target = total * fraction;
    let mut percentages = vec![0.0; mass.len()];

    mass.iter().enumerate().rev().fold(
        TailWalk {
            accumulated: 0.0,
            done: false,
        },
        |walk, (i, &bucket)| {
            if walk.done || walk.accumulated >= target {
                return TailWalk { done: true, ..walk };
            }
            if walk.accumulated + bucket >= target || i == 0 {
                percentages[i] = (target - walk.accumulated) / total * 100.0;
                TailWalk {
                    accumulated: target,
                    done: true,
                }
            } else {
                percentages[i] = bucket / total * 100.0;
                TailWalk {
                    accumulated: walk.accumulated + bucket,
                    done: false,
                }
            }
        },
    );

    Ok(percentages)
}

/// Sum of `percentage[i] * weight[i]`; lengths must match.
pub fn weighted_sum(percentages: &[f64], weights: &BucketWeights) -> TransResult<f64> {
    if percentages.len() != weights.len() {
        return Err(TransError::WeightLengthMismatch {
            buckets: percentages.len(),
            weights: weights.len(),
        });
    }

    Ok(percentages
        .iter()
        .zip(weights.as_slice())
        .map(|(p, w)| p * w)
        .sum())
}

/// Weighted sum scaled by the tail's divisor.
pub fn collapse(percentages: &[f64], weights: &BucketWeights, tail: TailFraction) -> TransResult<f64> {
    Ok(weighted_sum(percentages, weights)? / tail.divisor())
}
