//! Encoding analyzers: one calibration algorithm per quantization scheme

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    config::QuantizerConfig,
    error::{QuantError, QuantResult},
    quantization::{
        encoding::{Encoding, EncodingParams, GridShape},
        histogram::Histogram,
        simulation::nearest_grid_value,
    },
};

/// Calibration scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QuantScheme {
    /// Observed extremes
    #[default]
    MinMax,
    /// Histogram search minimising expected quantization noise
    TfEnhanced,
    /// Observed extremes after trimming both histogram tails
    Percentile,
}

impl QuantScheme {
    /// Build the analyzer for this scheme, tuned by `config`
    pub fn analyzer(self, config: &QuantizerConfig) -> Box<dyn EncodingAnalyzer> {
        match self {
            QuantScheme::MinMax => Box::new(MinMaxAnalyzer),
            QuantScheme::TfEnhanced => Box::new(TfEnhancedAnalyzer {
                symmetric_candidates: config.tf_enhanced.symmetric_candidates,
                asymmetric_grid: config.tf_enhanced.asymmetric_grid,
                clip_penalty: config.tf_enhanced.clip_penalty,
            }),
            QuantScheme::Percentile => Box::new(PercentileAnalyzer::new(config.percentile.percentile)),
        }
    }
}

impl TryFrom<i32> for QuantScheme {
    type Error = QuantError;

    fn try_from(value: i32) -> QuantResult<Self> {
        match value {
            0 => Ok(QuantScheme::MinMax),
            1 => Ok(QuantScheme::TfEnhanced),
            2 => Ok(QuantScheme::Percentile),
            other => Err(QuantError::unsupported_mode("QuantScheme", other)),
        }
    }
}

impl fmt::Display for QuantScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QuantScheme::MinMax => "min-max",
            QuantScheme::TfEnhanced => "tf-enhanced",
            QuantScheme::Percentile => "percentile",
        };
        f.write_str(name)
    }
}

/// Derives an encoding from accumulated statistics.
///
/// Implementations only choose the candidate range; the symmetry policy is
/// applied afterwards by [`Encoding::from_candidate`] so every scheme shares it.
pub trait EncodingAnalyzer: fmt::Debug + Send + Sync {
    fn scheme(&self) -> QuantScheme;

    /// Candidate `(min, max)` for a non-empty summary
    fn select_range(&self, stats: &Histogram, params: &EncodingParams) -> QuantResult<(f64, f64)>;

    fn compute_encoding(&self, stats: &Histogram, params: &EncodingParams) -> QuantResult<Encoding> {
        params.validate()?;
        if stats.is_empty() {
            return Err(QuantError::no_statistics());
        }

        let (min, max) = self.select_range(stats, params)?;
        let shape = params.grid_shape(stats.is_non_negative());
        Encoding::from_candidate(min, max, shape, params.bitwidth)
    }
}

fn observed_range(stats: &Histogram) -> QuantResult<(f64, f64)> {
    stats.range().ok_or_else(QuantError::no_statistics)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MinMaxAnalyzer;

impl EncodingAnalyzer for MinMaxAnalyzer {
    fn scheme(&self) -> QuantScheme {
        QuantScheme::MinMax
    }

    fn select_range(&self, stats: &Histogram, _params: &EncodingParams) -> QuantResult<(f64, f64)> {
        observed_range(stats)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PercentileAnalyzer {
    percentile: f64,
}

impl PercentileAnalyzer {
    /// `percentile` is clamped to `[50, 100]`; NaN means no trimming.
    pub fn new(percentile: f64) -> Self {
        let percentile = if percentile.is_nan() { 100.0 } else { percentile.clamp(50.0, 100.0) };
        Self { percentile }
    }

    pub fn percentile(&self) -> f64 {
        self.percentile
    }
}

impl EncodingAnalyzer for PercentileAnalyzer {
    fn scheme(&self) -> QuantScheme {
        QuantScheme::Percentile
    }

    fn select_range(&self, stats: &Histogram, _params: &EncodingParams) -> QuantResult<(f64, f64)> {
        let (observed_min, observed_max) = observed_range(stats)?;
        let tail = (100.0 - self.percentile) / 100.0;

        let lower = stats.quantile(tail).unwrap_or(observed_min);
        let upper = stats.quantile(1.0 - tail).unwrap_or(observed_max);
        Ok((lower.max(observed_min), upper.min(observed_max).max(lower)))
    }
}

/// Scores candidate ranges against the histogram and keeps the cheapest.
///
/// Cost of a candidate is the density-weighted squared error between each
/// bucket centre and its quantized value; error from centres outside the
/// candidate range is multiplied by `clip_penalty`.
#[derive(Debug, Clone, Copy)]
pub struct TfEnhancedAnalyzer {
    pub symmetric_candidates: usize,
    pub asymmetric_grid: usize,
    pub clip_penalty: f64,
}

impl TfEnhancedAnalyzer {
    fn candidates(&self, observed_min: f64, observed_max: f64, shape: GridShape) -> Vec<(f64, f64)> {
        let mut candidates = Vec::new();
        match shape {
            GridShape::SignedSymmetric => {
                let abs_max = observed_min.abs().max(observed_max.abs());
                let n = self.symmetric_candidates.max(1);
                for k in (1..=n).rev() {
                    let a = abs_max * k as f64 / n as f64;
                    candidates.push((-a, a));
                }
            }
            GridShape::UnsignedSymmetric => {
                let n = self.symmetric_candidates.max(1);
                for k in (1..=n).rev() {
                    candidates.push((0.0, observed_max * k as f64 / n as f64));
                }
            }
            GridShape::Asymmetric => {
                let lo = observed_min.min(0.0);
                let hi = observed_max.max(0.0);
                let g = self.asymmetric_grid.max(1);
                let lo_steps = if lo < 0.0 { g } else { 1 };
                let hi_steps = if hi > 0.0 { g } else { 1 };
                for i in (1..=lo_steps).rev() {
                    for j in (1..=hi_steps).rev() {
                        candidates.push((lo * i as f64 / lo_steps as f64, hi * j as f64 / hi_steps as f64));
                    }
                }
            }
        }
        candidates
    }

    fn cost(&self, encoding: &Encoding, buckets: &[(f64, f64)]) -> f64 {
        buckets
            .iter()
            .filter(|(_, density)| *density > 0.0)
            .map(|&(center, density)| {
                let error = (center - nearest_grid_value(center, encoding)).powi(2);
                let clipped = center < encoding.min || center > encoding.max;
                let weight = if clipped { self.clip_penalty } else { 1.0 };
                density * error * weight
            })
            .sum()
    }
}

impl EncodingAnalyzer for TfEnhancedAnalyzer {
    fn scheme(&self) -> QuantScheme {
        QuantScheme::TfEnhanced
    }

    fn select_range(&self, stats: &Histogram, params: &EncodingParams) -> QuantResult<(f64, f64)> {
        let (observed_min, observed_max) = observed_range(stats)?;
        if observed_min == observed_max {
            return Ok((observed_min, observed_max));
        }

        let shape = params.grid_shape(stats.is_non_negative());
        let buckets = stats.bucket_centers();

        let mut best = (observed_min, observed_max);
        let mut best_cost = f64::INFINITY;
        // widest candidates come first, so ties keep the wider range
        for (min, max) in self.candidates(observed_min, observed_max, shape) {
            let encoding = Encoding::from_candidate(min, max, shape, params.bitwidth)?;
            let cost = self.cost(&encoding, &buckets);
            if cost < best_cost {
                best_cost = cost;
                best = (min, max);
            }
        }

        tracing::trace!(min = best.0, max = best.1, cost = best_cost, "tf-enhanced range selected");
        Ok(best)
    }
}
