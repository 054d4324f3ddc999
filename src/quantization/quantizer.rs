//! Per-tensor quantizer: owns the statistics, the analyzer for the selected
//! scheme and the simulator, and tracks whether its encoding is valid.

use crate::{
    config::{self, QuantizerConfig},
    error::{ErrorContext, QuantError, QuantResult, WithContext},
    quantization::{
        analyzers::{EncodingAnalyzer, QuantScheme},
        encoding::{Encoding, EncodingParams},
        histogram::Histogram,
        simulation::{QuantizationSimulator, RoundingMode},
    },
    tensor::{Device, TensorElement},
};

/// Lifecycle of a [`TensorQuantizer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuantizerState {
    /// No statistics, no encoding
    Fresh,
    /// Statistics collected since the last encoding was computed
    Accumulating,
    /// Encoding computed from the current statistics
    Calibrated,
}

/// What a single `apply` call does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpMode {
    /// Update stats, compute an encoding, quantize with it
    OneShotQuantizeDequantize,
    /// Update stats and pass the input through
    UpdateStats,
    /// Quantize with the encoding supplied by the caller
    QuantizeDequantize,
    /// Copy input to output
    PassThrough,
}

impl TryFrom<i32> for OpMode {
    type Error = QuantError;

    fn try_from(value: i32) -> QuantResult<Self> {
        match value {
            0 => Ok(OpMode::OneShotQuantizeDequantize),
            1 => Ok(OpMode::UpdateStats),
            2 => Ok(OpMode::QuantizeDequantize),
            3 => Ok(OpMode::PassThrough),
            other => Err(QuantError::unsupported_mode("OpMode", other)),
        }
    }
}

/// Per-call arguments for [`TensorQuantizer::apply`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApplyRequest {
    pub bitwidth: u32,
    pub symmetric: bool,
    /// Required by `OpMode::QuantizeDequantize`, ignored otherwise
    pub encoding: Option<Encoding>,
    pub device: Device,
}

impl ApplyRequest {
    pub fn new(bitwidth: u32, symmetric: bool) -> Self {
        Self {
            bitwidth,
            symmetric,
            encoding: None,
            device: Device::Host,
        }
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn on_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }
}

/// Quantizer for one tensor, or one channel slice of a tensor.
///
/// Calls that mutate statistics take `&mut self`; a per-channel driver keeps
/// one instance per channel and may run them on separate threads.
#[derive(Debug)]
pub struct TensorQuantizer {
    quant_scheme: QuantScheme,
    rounding_mode: RoundingMode,
    strict_symmetric: bool,
    unsigned_symmetric: bool,
    encoding_valid: bool,
    state: QuantizerState,
    last_encoding: Option<Encoding>,
    config: QuantizerConfig,
    stats: Histogram,
    analyzer: Box<dyn EncodingAnalyzer>,
    simulator: QuantizationSimulator,
}

impl TensorQuantizer {
    /// Create a quantizer using the process-wide default configuration
    pub fn new(quant_scheme: QuantScheme, rounding_mode: RoundingMode) -> Self {
        // the global default is validated whenever it is replaced
        Self::from_validated(quant_scheme, rounding_mode, config::get_config())
    }

    /// Create a quantizer with an explicit configuration, rejecting invalid ones
    pub fn with_config(
        quant_scheme: QuantScheme,
        rounding_mode: RoundingMode,
        config: QuantizerConfig,
    ) -> QuantResult<Self> {
        config.validate()?;
        Ok(Self::from_validated(quant_scheme, rounding_mode, config))
    }

    fn from_validated(quant_scheme: QuantScheme, rounding_mode: RoundingMode, config: QuantizerConfig) -> Self {
        Self {
            quant_scheme,
            rounding_mode,
            strict_symmetric: false,
            unsigned_symmetric: false,
            encoding_valid: false,
            state: QuantizerState::Fresh,
            last_encoding: None,
            stats: Histogram::new(config.histogram.num_buckets),
            analyzer: quant_scheme.analyzer(&config),
            simulator: QuantizationSimulator::new(&config.simulation),
            config,
        }
    }

    pub fn state(&self) -> QuantizerState {
        self.state
    }

    pub fn is_encoding_valid(&self) -> bool {
        self.encoding_valid
    }

    /// Encoding from the last successful `compute_encoding`, if still valid
    pub fn last_encoding(&self) -> Option<Encoding> {
        self.last_encoding
    }

    pub fn rounding_mode(&self) -> RoundingMode {
        self.rounding_mode
    }

    pub fn config(&self) -> &QuantizerConfig {
        &self.config
    }

    pub fn stats(&self) -> &Histogram {
        &self.stats
    }

    pub fn quant_scheme(&self) -> QuantScheme {
        self.quant_scheme
    }

    /// Swap the analyzer. Collected statistics are kept and the new scheme
    /// is used from the next `compute_encoding` on.
    pub fn set_quant_scheme(&mut self, quant_scheme: QuantScheme) {
        tracing::debug!(from = %self.quant_scheme, to = %quant_scheme, "quant scheme changed");
        self.quant_scheme = quant_scheme;
        self.analyzer = quant_scheme.analyzer(&self.config);
    }

    pub fn strict_symmetric(&self) -> bool {
        self.strict_symmetric
    }

    pub fn set_strict_symmetric(&mut self, strict_symmetric: bool) {
        self.strict_symmetric = strict_symmetric;
    }

    pub fn unsigned_symmetric(&self) -> bool {
        self.unsigned_symmetric
    }

    pub fn set_unsigned_symmetric(&mut self, unsigned_symmetric: bool) {
        self.unsigned_symmetric = unsigned_symmetric;
    }

    /// Forget all statistics and the encoding
    pub fn reset_encoding_stats(&mut self) {
        self.stats.reset();
        self.encoding_valid = false;
        self.last_encoding = None;
        self.state = QuantizerState::Fresh;
        tracing::debug!("encoding stats reset");
    }

    /// Fold a batch into the statistics. Any previously computed encoding
    /// no longer describes the statistics and is marked invalid.
    pub fn update_stats<T: TensorElement>(&mut self, values: &[T], device: Device) -> QuantResult<()> {
        self.stats.update(values, device)?;
        self.encoding_valid = false;
        self.state = QuantizerState::Accumulating;

        tracing::debug!(len = values.len(), total = self.stats.count(), "stats updated");
        Ok(())
    }

    fn encoding_params(&self, bitwidth: u32, symmetric: bool) -> EncodingParams {
        EncodingParams::new(bitwidth, symmetric)
            .with_unsigned_symmetric(self.unsigned_symmetric)
            .with_strict_symmetric(self.strict_symmetric)
    }

    /// Compute an encoding from the statistics collected so far
    pub fn compute_encoding(&mut self, bitwidth: u32, symmetric: bool) -> QuantResult<Encoding> {
        let params = self.encoding_params(bitwidth, symmetric);

        match self.analyzer.compute_encoding(&self.stats, &params) {
            Ok(encoding) => {
                self.encoding_valid = true;
                self.last_encoding = Some(encoding);
                self.state = QuantizerState::Calibrated;

                tracing::debug!(
                    scheme = %self.quant_scheme,
                    bitwidth,
                    symmetric,
                    min = encoding.min,
                    max = encoding.max,
                    delta = encoding.delta,
                    "encoding computed"
                );
                Ok(encoding)
            }
            Err(err) => {
                self.encoding_valid = false;
                self.last_encoding = None;
                self.state = if self.stats.is_empty() {
                    QuantizerState::Fresh
                } else {
                    QuantizerState::Accumulating
                };

                tracing::warn!(scheme = %self.quant_scheme, bitwidth, error = %err, "encoding computation failed");
                Err(err)
            }
        }
    }

    /// One-shot calibration over `data`.
    ///
    /// Uses the same scheme and algorithm as `compute_encoding` but neither
    /// reads nor changes the accumulated statistics, flags or state.
    pub fn compute_encoding_from_data<T: TensorElement>(
        &self,
        bitwidth: u32,
        data: &[T],
        symmetric: bool,
        unsigned_symmetric: bool,
        strict_symmetric: bool,
    ) -> QuantResult<Encoding> {
        let params = EncodingParams::new(bitwidth, symmetric)
            .with_unsigned_symmetric(unsigned_symmetric)
            .with_strict_symmetric(strict_symmetric);
        params.validate()?;

        let stats = Histogram::from_values(data, self.config.histogram.num_buckets, Device::Host).with_context(|| {
            ErrorContext::new("compute_encoding_from_data")
                .with_tensor_len(data.len())
                .with_bitwidth(bitwidth)
        })?;
        self.analyzer.compute_encoding(&stats, &params)
    }

    /// Quantize-dequantize against the grid described by `(encoding_min, encoding_max)`
    pub fn quantize_dequantize<T: TensorElement>(
        &self,
        input: &[T],
        output: &mut [T],
        encoding_min: f64,
        encoding_max: f64,
        bitwidth: u32,
        device: Device,
    ) -> QuantResult<()> {
        let encoding = Encoding::from_range(encoding_min, encoding_max, bitwidth)?;
        self.quantize_dequantize_with(input, output, &encoding, device)
    }

    /// Quantize-dequantize with a complete encoding
    pub fn quantize_dequantize_with<T: TensorElement>(
        &self,
        input: &[T],
        output: &mut [T],
        encoding: &Encoding,
        device: Device,
    ) -> QuantResult<()> {
        self.simulator
            .quantize_dequantize(input, output, encoding, self.rounding_mode, device)
    }

    /// Histogram of everything observed so far as `(left_edge, density)`
    pub fn stats_histogram(&self) -> Vec<(f64, f64)> {
        self.stats.as_histogram()
    }

    /// Run one operating mode over `input`, writing `output`.
    ///
    /// Returns the encoding the output was quantized with, if any.
    pub fn apply<T: TensorElement>(
        &mut self,
        mode: OpMode,
        input: &[T],
        output: &mut [T],
        request: &ApplyRequest,
    ) -> QuantResult<Option<Encoding>> {
        if input.len() != output.len() {
            return Err(QuantError::invalid_argument(
                "output",
                &format!("length {} does not match input length {}", output.len(), input.len()),
            ));
        }

        match mode {
            OpMode::PassThrough => {
                output.copy_from_slice(input);
                Ok(None)
            }
            OpMode::UpdateStats => {
                self.update_stats(input, request.device)?;
                output.copy_from_slice(input);
                Ok(None)
            }
            OpMode::OneShotQuantizeDequantize => {
                let non_negative = (self.stats.is_empty() || self.stats.is_non_negative())
                    && input.iter().all(|v| v.to_f64() >= 0.0);
                self.encoding_params(request.bitwidth, request.symmetric)
                    .validate_for(non_negative)?;

                // a failed call leaves statistics and state as they were
                let saved = (self.stats.clone(), self.state, self.encoding_valid, self.last_encoding);
                self.update_stats(input, request.device)?;
                let encoding = match self.compute_encoding(request.bitwidth, request.symmetric) {
                    Ok(encoding) => encoding,
                    Err(err) => {
                        (self.stats, self.state, self.encoding_valid, self.last_encoding) = saved;
                        return Err(err);
                    }
                };
                self.quantize_dequantize_with(input, output, &encoding, request.device)?;
                Ok(Some(encoding))
            }
            OpMode::QuantizeDequantize => {
                let encoding = request.encoding.ok_or_else(|| {
                    QuantError::invalid_argument("encoding", "quantize-dequantize mode needs an encoding")
                })?;
                self.quantize_dequantize_with(input, output, &encoding, request.device)?;
                Ok(Some(encoding))
            }
        }
    }
}
