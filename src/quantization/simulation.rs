//! Quantize-dequantize kernel

use std::fmt;

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{
    config::SimulationConfig,
    error::{QuantError, QuantResult},
    quantization::encoding::Encoding,
    tensor::{chunks, Device, MemoryAccess, TensorElement},
};

/// How a scaled value is turned into an integer code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RoundingMode {
    /// Round half to even
    #[default]
    Nearest,
    /// `floor(v + u)` with `u` uniform in `[0, 1)`; unbiased in expectation
    /// over positions.
    ///
    /// The dither stream restarts from `simulation.stochastic_seed` on every
    /// call, so the same element at the same position rounds the same way on
    /// every call. Output is reproducible but not re-dithered between steps;
    /// change the seed between steps when that matters.
    Stochastic,
}

impl TryFrom<i32> for RoundingMode {
    type Error = QuantError;

    fn try_from(value: i32) -> QuantResult<Self> {
        match value {
            0 => Ok(RoundingMode::Nearest),
            1 => Ok(RoundingMode::Stochastic),
            other => Err(QuantError::unsupported_mode("RoundingMode", other)),
        }
    }
}

impl fmt::Display for RoundingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundingMode::Nearest => f.write_str("nearest"),
            RoundingMode::Stochastic => f.write_str("stochastic"),
        }
    }
}

/// Nearest grid value for `value`, clamping to the encoding range first
#[inline]
pub fn nearest_grid_value(value: f64, encoding: &Encoding) -> f64 {
    let clamped = value.clamp(encoding.min, encoding.max);
    let code = ((clamped - encoding.min) / encoding.delta)
        .round_ties_even()
        .clamp(0.0, encoding.max_code());
    encoding.dequantize_code(code)
}

#[inline]
fn stochastic_grid_value(value: f64, encoding: &Encoding, dither: f64) -> f64 {
    let clamped = value.clamp(encoding.min, encoding.max);
    let code = ((clamped - encoding.min) / encoding.delta + dither)
        .floor()
        .clamp(0.0, encoding.max_code());
    encoding.dequantize_code(code)
}

/// Stateless quantize-dequantize engine.
///
/// Output depends only on the input, the encoding, the rounding mode and the
/// configured seed; chunk boundaries are fixed by `chunk_size` so the host
/// and accelerated paths produce identical bits.
#[derive(Debug, Clone)]
pub struct QuantizationSimulator {
    chunk_size: usize,
    seed: u64,
}

impl QuantizationSimulator {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            seed: config.stochastic_seed,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn quantize_dequantize<T: TensorElement>(
        &self,
        input: &[T],
        output: &mut [T],
        encoding: &Encoding,
        rounding: RoundingMode,
        device: Device,
    ) -> QuantResult<()> {
        encoding.validate()?;
        if input.is_empty() {
            return Err(QuantError::invalid_argument("input", "cannot quantize an empty buffer"));
        }
        if input.len() != output.len() {
            return Err(QuantError::invalid_argument(
                "output",
                &format!("length {} does not match input length {}", output.len(), input.len()),
            ));
        }

        tracing::trace!(
            len = input.len(),
            min = encoding.min,
            max = encoding.max,
            bitwidth = encoding.bitwidth,
            %rounding,
            device = device.name(),
            "quantize-dequantize"
        );

        match device.memory_access() {
            MemoryAccess::Direct => self.run(input, output, encoding, rounding, device),
            MemoryAccess::Staged => {
                let staged_in = input.to_vec();
                let mut staged_out = output.to_vec();
                self.run(&staged_in, &mut staged_out, encoding, rounding, device);
                output.copy_from_slice(&staged_out);
            }
        }
        Ok(())
    }

    fn run<T: TensorElement>(&self, input: &[T], output: &mut [T], encoding: &Encoding, rounding: RoundingMode, device: Device) {
        let seed = self.seed;
        chunks::zip_for_each(input, output, self.chunk_size, device.runs_parallel(), |index, src, dst| {
            match rounding {
                RoundingMode::Nearest => {
                    for (d, &s) in dst.iter_mut().zip(src) {
                        *d = T::from_f64(nearest_grid_value(s.to_f64(), encoding));
                    }
                }
                RoundingMode::Stochastic => {
                    let mut rng = chunk_rng(seed, index);
                    for (d, &s) in dst.iter_mut().zip(src) {
                        let dither: f64 = rng.gen();
                        *d = T::from_f64(stochastic_grid_value(s.to_f64(), encoding, dither));
                    }
                }
            }
        });
    }
}

impl Default for QuantizationSimulator {
    fn default() -> Self {
        Self::new(&SimulationConfig::default())
    }
}

/// Dither source for one chunk; depends only on the seed and chunk position
fn chunk_rng(seed: u64, chunk_index: usize) -> StdRng {
    StdRng::seed_from_u64(seed ^ (chunk_index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantization::encoding::GridShape;

    fn example_encoding() -> Encoding {
        Encoding::from_candidate(-1.0, 2.0, GridShape::Asymmetric, 8).unwrap()
    }

    fn qdq(values: &[f32], encoding: &Encoding) -> Vec<f32> {
        let mut output = vec![0.0; values.len()];
        QuantizationSimulator::default()
            .quantize_dequantize(values, &mut output, encoding, RoundingMode::Nearest, Device::Host)
            .unwrap();
        output
    }

    #[test]
    fn test_rounding_mode_from_i32() {
        assert_eq!(RoundingMode::try_from(0).unwrap(), RoundingMode::Nearest);
        assert_eq!(RoundingMode::try_from(1).unwrap(), RoundingMode::Stochastic);
        assert!(RoundingMode::try_from(2).is_err());
    }

    #[test]
    fn test_example_rounds_half_to_even() {
        let output = qdq(&[1.5], &example_encoding());
        assert!((output[0] - 1.494_117_6).abs() < 1e-5, "got {}", output[0]);
    }

    #[test]
    fn test_clamps_to_range() {
        let encoding = example_encoding();
        let output = qdq(&[-5.0, 7.0, 0.0], &encoding);
        assert!((output[0] as f64 - encoding.min).abs() < 1e-6);
        assert!((output[1] as f64 - encoding.max).abs() < 1e-6);
        assert_eq!(output[2], 0.0);
    }

    #[test]
    fn test_error_bound_and_idempotence() {
        let encoding = example_encoding();
        let values: Vec<f64> = (0..=3000).map(|i| -1.0 + i as f64 * 0.001).collect();
        let mut once = vec![0.0; values.len()];
        let mut twice = vec![0.0; values.len()];
        let simulator = QuantizationSimulator::default();

        simulator
            .quantize_dequantize(&values, &mut once, &encoding, RoundingMode::Nearest, Device::Host)
            .unwrap();
        simulator
            .quantize_dequantize(&once, &mut twice, &encoding, RoundingMode::Nearest, Device::Host)
            .unwrap();

        for (x, q) in values.iter().zip(&once) {
            assert!((x - q).abs() <= encoding.delta / 2.0 + 1e-12, "x {} q {}", x, q);
        }
        assert_eq!(once, twice);
    }

    #[test]
    fn test_error_bound_and_idempotence_all_grids() {
        let simulator = QuantizationSimulator::default();
        let shapes = [
            (GridShape::Asymmetric, -1.0, 2.0),
            (GridShape::SignedSymmetric, -1.0, 2.0),
            (GridShape::UnsignedSymmetric, 0.5, 3.0),
        ];

        for (shape, lo, hi) in shapes {
            for bitwidth in [2, 3, 4, 8, 12, 16] {
                let computed = Encoding::from_candidate(lo, hi, shape, bitwidth).unwrap();
                let rebuilt = Encoding::from_range(computed.min, computed.max, bitwidth).unwrap();

                for encoding in [computed, rebuilt] {
                    let span = encoding.max - encoding.min;
                    let values: Vec<f32> = (0..=2000)
                        .map(|i| (encoding.min + span * i as f64 / 2000.0) as f32)
                        .collect();
                    let mut once = vec![0.0f32; values.len()];
                    let mut twice = vec![0.0f32; values.len()];

                    simulator
                        .quantize_dequantize(&values, &mut once, &encoding, RoundingMode::Nearest, Device::Host)
                        .unwrap();
                    simulator
                        .quantize_dequantize(&once, &mut twice, &encoding, RoundingMode::Nearest, Device::Host)
                        .unwrap();

                    for (x, q) in values.iter().zip(&once) {
                        let error = (*x as f64 - *q as f64).abs();
                        assert!(
                            error <= encoding.delta / 2.0 + 1e-6,
                            "{:?} bitwidth {}: x {} q {}",
                            shape,
                            bitwidth,
                            x,
                            q
                        );
                    }
                    assert_eq!(once, twice, "{:?} bitwidth {} not idempotent", shape, bitwidth);
                }
            }
        }
    }

    #[test]
    fn test_stochastic_repeats_per_seed() {
        let encoding = example_encoding();
        let input = vec![0.3 * encoding.delta; 5000];
        let run = |seed| {
            let simulator = QuantizationSimulator::new(&SimulationConfig {
                stochastic_seed: seed,
                chunk_size: 1024,
            });
            let mut output = vec![0.0; input.len()];
            simulator
                .quantize_dequantize(&input, &mut output, &encoding, RoundingMode::Stochastic, Device::Host)
                .unwrap();
            output
        };

        assert_eq!(run(1), run(1));
        assert_ne!(run(1), run(2));
    }

    #[test]
    fn test_symmetric_zero_is_exact() {
        let encoding = Encoding::from_candidate(-1.0, 2.0, GridShape::SignedSymmetric, 8).unwrap();
        let output = qdq(&[0.0, 1e-9, -1e-9], &encoding);
        assert_eq!(output, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_stochastic_is_unbiased() {
        let encoding = example_encoding();
        let x = 0.3 * encoding.delta;
        let input = vec![x; 200_000];
        let mut output = vec![0.0; input.len()];
        QuantizationSimulator::default()
            .quantize_dequantize(&input, &mut output, &encoding, RoundingMode::Stochastic, Device::Host)
            .unwrap();

        assert!(output.iter().all(|&v| v == 0.0 || (v - encoding.delta).abs() < 1e-12));
        let mean = output.iter().sum::<f64>() / output.len() as f64;
        assert!((mean - x).abs() < 0.01 * encoding.delta, "mean {} expected {}", mean, x);
    }

    #[test]
    fn test_devices_agree() {
        let encoding = example_encoding();
        let input: Vec<f32> = (0..10_000).map(|i| ((i * 37) % 300) as f32 / 100.0 - 1.0).collect();
        let simulator = QuantizationSimulator::new(&SimulationConfig {
            stochastic_seed: 7,
            chunk_size: 1000,
        });

        for rounding in [RoundingMode::Nearest, RoundingMode::Stochastic] {
            let mut host = vec![0.0; input.len()];
            let mut accelerated = vec![0.0; input.len()];
            simulator.quantize_dequantize(&input, &mut host, &encoding, rounding, Device::Host).unwrap();
            simulator
                .quantize_dequantize(&input, &mut accelerated, &encoding, rounding, Device::Accelerated)
                .unwrap();
            assert_eq!(host, accelerated, "{} rounding differs", rounding);
        }
    }

    #[test]
    fn test_invalid_arguments() {
        let simulator = QuantizationSimulator::default();
        let encoding = example_encoding();
        let mut short = vec![0.0f32; 1];

        let result = simulator.quantize_dequantize(&[1.0f32, 2.0], &mut short, &encoding, RoundingMode::Nearest, Device::Host);
        assert!(matches!(result, Err(QuantError::InvalidArgument(_))));

        let result = simulator.quantize_dequantize::<f32>(&[], &mut [], &encoding, RoundingMode::Nearest, Device::Host);
        assert!(matches!(result, Err(QuantError::InvalidArgument(_))));

        let inverted = Encoding {
            min: 1.0,
            max: -1.0,
            ..encoding
        };
        let result = simulator.quantize_dequantize(&[0.0f32], &mut short, &inverted, RoundingMode::Nearest, Device::Host);
        assert!(matches!(result, Err(QuantError::InvalidArgument(_))));
    }
}
