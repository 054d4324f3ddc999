//! Running statistics summary used to calibrate encodings

use crate::{
    error::{QuantError, QuantResult},
    tensor::{chunks, Device, MemoryAccess, TensorElement},
};

/// Elements scanned per work item when folding a batch
const SCAN_CHUNK: usize = 4096;

/// Equal-width histogram over the observed range `[min, max]`.
///
/// When a batch lands outside the current range the boundaries are
/// stretched and the existing bucket mass is spread over the new buckets in
/// proportion to overlap, so previously folded batches are never revisited.
/// Masses are plain element counts; densities are masses divided by their
/// sum and therefore always total 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    num_buckets: usize,
    min: f64,
    max: f64,
    masses: Vec<f64>,
    count: u64,
}

#[derive(Debug, Clone, Copy)]
struct ChunkScan {
    min: f64,
    max: f64,
    non_finite: usize,
}

impl ChunkScan {
    const EMPTY: ChunkScan = ChunkScan {
        min: f64::INFINITY,
        max: f64::NEG_INFINITY,
        non_finite: 0,
    };

    fn merge(self, other: ChunkScan) -> ChunkScan {
        ChunkScan {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
            non_finite: self.non_finite + other.non_finite,
        }
    }
}

impl Histogram {
    pub fn new(num_buckets: usize) -> Self {
        Self {
            num_buckets: num_buckets.max(1),
            min: 0.0,
            max: 0.0,
            masses: Vec::new(),
            count: 0,
        }
    }

    /// Build a summary from a single buffer
    pub fn from_values<T: TensorElement>(values: &[T], num_buckets: usize, device: Device) -> QuantResult<Self> {
        let mut histogram = Self::new(num_buckets);
        histogram.update(values, device)?;
        Ok(histogram)
    }

    pub fn num_buckets(&self) -> usize {
        self.num_buckets
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of elements folded in so far
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn min(&self) -> Option<f64> {
        (!self.is_empty()).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (!self.is_empty()).then_some(self.max)
    }

    /// Observed `(min, max)`, `None` when nothing has been seen
    pub fn range(&self) -> Option<(f64, f64)> {
        (!self.is_empty()).then_some((self.min, self.max))
    }

    pub fn is_non_negative(&self) -> bool {
        !self.is_empty() && self.min >= 0.0
    }

    pub fn reset(&mut self) {
        self.min = 0.0;
        self.max = 0.0;
        self.masses.clear();
        self.count = 0;
    }

    /// Fold a batch into the summary.
    ///
    /// The batch is rejected as a whole when it is empty or holds a
    /// non-finite value; the summary is unchanged in that case.
    pub fn update<T: TensorElement>(&mut self, values: &[T], device: Device) -> QuantResult<()> {
        if values.is_empty() {
            return Err(QuantError::invalid_argument("values", "cannot update statistics with an empty buffer"));
        }

        match device.memory_access() {
            MemoryAccess::Direct => self.fold(values, device),
            MemoryAccess::Staged => {
                let staged = values.to_vec();
                self.fold(&staged, device)
            }
        }
    }

    fn fold<T: TensorElement>(&mut self, values: &[T], device: Device) -> QuantResult<()> {
        let scan = scan_batch(values, device.runs_parallel());
        if scan.non_finite > 0 {
            tracing::warn!(non_finite = scan.non_finite, len = values.len(), "rejecting batch with non-finite values");
            return Err(QuantError::invalid_argument(
                "values",
                &format!("{} of {} values are not finite", scan.non_finite, values.len()),
            ));
        }

        let (new_min, new_max) = if self.is_empty() {
            (scan.min, scan.max)
        } else {
            (self.min.min(scan.min), self.max.max(scan.max))
        };
        if !(new_max - new_min).is_finite() {
            tracing::warn!(min = new_min, max = new_max, "rejecting batch whose range overflows");
            return Err(QuantError::invalid_argument(
                "values",
                &format!("range [{}, {}] is too wide to represent", new_min, new_max),
            ));
        }

        if self.is_empty() {
            self.min = scan.min;
            self.max = scan.max;
            self.masses = vec![0.0; self.num_buckets];
        } else if scan.min < self.min || scan.max > self.max {
            self.rebin(self.min.min(scan.min), self.max.max(scan.max));
        }

        let counts = self.bucket_counts(values, device.runs_parallel());
        for (mass, added) in self.masses.iter_mut().zip(counts) {
            *mass += added;
        }
        self.count += values.len() as u64;

        tracing::trace!(
            len = values.len(),
            min = self.min,
            max = self.max,
            total = self.count,
            device = device.name(),
            "folded batch into histogram"
        );
        Ok(())
    }

    fn width(&self) -> f64 {
        (self.max - self.min) / self.num_buckets as f64
    }

    fn bucket_of(&self, value: f64) -> usize {
        let width = self.width();
        if width <= 0.0 {
            return 0;
        }
        let idx = ((value - self.min) / width).floor();
        if idx <= 0.0 {
            0
        } else {
            (idx as usize).min(self.num_buckets - 1)
        }
    }

    fn bucket_counts<T: TensorElement>(&self, values: &[T], parallel: bool) -> Vec<f64> {
        let count_chunk = |chunk: &[T]| {
            let mut counts = vec![0.0; self.num_buckets];
            for &v in chunk {
                counts[self.bucket_of(v.to_f64())] += 1.0;
            }
            counts
        };
        let add = |mut a: Vec<f64>, b: Vec<f64>| {
            for (x, y) in a.iter_mut().zip(b) {
                *x += y;
            }
            a
        };

        chunks::map_reduce(values, SCAN_CHUNK, parallel, || vec![0.0; self.num_buckets], count_chunk, add)
    }

    /// Stretch the range to `[new_min, new_max]`, moving existing mass
    fn rebin(&mut self, new_min: f64, new_max: f64) {
        let n = self.num_buckets;
        let old_min = self.min;
        let old_width = self.width();
        let old_masses = std::mem::replace(&mut self.masses, vec![0.0; n]);

        self.min = new_min;
        self.max = new_max;
        let new_width = self.width();

        if old_width <= 0.0 {
            let total: f64 = old_masses.iter().sum();
            let idx = self.bucket_of(old_min);
            self.masses[idx] += total;
            return;
        }

        for (i, &mass) in old_masses.iter().enumerate() {
            if mass == 0.0 {
                continue;
            }
            let lo = old_min + i as f64 * old_width;
            let hi = lo + old_width;
            let first = self.bucket_of(lo);
            let last = self.bucket_of(hi).max(first);

            let mut placed = 0.0;
            for j in first..=last {
                let edge_lo = self.min + j as f64 * new_width;
                let edge_hi = if j + 1 == n { self.max } else { edge_lo + new_width };
                let overlap = hi.min(edge_hi) - lo.max(edge_lo);
                if overlap > 0.0 {
                    let share = mass * overlap / old_width;
                    self.masses[j] += share;
                    placed += share;
                }
            }
            // rounding leftovers stay in the bucket holding the old left edge
            self.masses[first] = (self.masses[first] + mass - placed).max(0.0);
        }
    }

    fn total_mass(&self) -> f64 {
        self.masses.iter().sum()
    }

    /// Buckets as `(left_edge, density)`; empty when nothing was observed.
    /// A single-point range is reported as one bucket holding all the mass.
    pub fn as_histogram(&self) -> Vec<(f64, f64)> {
        if self.is_empty() {
            return Vec::new();
        }
        if self.width() <= 0.0 {
            return vec![(self.min, 1.0)];
        }

        let total = self.total_mass();
        let width = self.width();
        self.masses
            .iter()
            .enumerate()
            .map(|(i, &mass)| (self.min + i as f64 * width, mass / total))
            .collect()
    }

    /// Buckets as `(center, density)`, used to score candidate ranges
    pub fn bucket_centers(&self) -> Vec<(f64, f64)> {
        let width = self.width();
        self.as_histogram()
            .into_iter()
            .map(|(edge, density)| (edge + width / 2.0, density))
            .collect()
    }

    /// Value below which a fraction `q` of the mass lies, interpolated
    /// linearly inside the bucket where the cumulative density crosses `q`.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        let q = q.clamp(0.0, 1.0);
        let width = self.width();
        if width <= 0.0 || q <= 0.0 {
            return Some(self.min);
        }
        if q >= 1.0 {
            return Some(self.max);
        }

        let total = self.total_mass();
        let target = q * total;
        let mut cumulative = 0.0;
        for (i, &mass) in self.masses.iter().enumerate() {
            if mass > 0.0 && cumulative + mass >= target {
                let fraction = (target - cumulative) / mass;
                let value = self.min + (i as f64 + fraction) * width;
                return Some(value.clamp(self.min, self.max));
            }
            cumulative += mass;
        }
        Some(self.max)
    }
}

fn scan_batch<T: TensorElement>(values: &[T], parallel: bool) -> ChunkScan {
    let scan_chunk = |chunk: &[T]| {
        chunk.iter().fold(ChunkScan::EMPTY, |acc, &v| {
            let v = v.to_f64();
            if v.is_finite() {
                ChunkScan {
                    min: acc.min.min(v),
                    max: acc.max.max(v),
                    non_finite: acc.non_finite,
                }
            } else {
                ChunkScan {
                    non_finite: acc.non_finite + 1,
                    ..acc
                }
            }
        })
    };

    chunks::map_reduce(values, SCAN_CHUNK, parallel, || ChunkScan::EMPTY, scan_chunk, ChunkScan::merge)
}
