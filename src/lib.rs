//! qsim - quantization simulation for floating-point tensors
//!
//! Features:
//! - Histogram statistics accumulated across batches
//! - Min-max, TF-enhanced and percentile calibration
//! - Asymmetric, signed symmetric and unsigned symmetric grids
//! - Quantize-dequantize with nearest or stochastic rounding
//! - Host and accelerated (staged, parallel) execution

pub mod config;
pub mod error;
pub mod quantization;
pub mod tensor;

use crate::error::QuantResult;

pub use config::{ConfigBuilder, ConfigManager, QuantizerConfig};
pub use error::{ErrorCode, QuantError};
pub use quantization::{
    ApplyRequest, Encoding, EncodingAnalyzer, Histogram, OpMode, QuantScheme, QuantizerState, RoundingMode,
    TensorQuantizer,
};
pub use tensor::{Device, TensorElement};

/// Install a `tracing` subscriber for the process.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init() -> QuantResult<()> {
    if tracing_subscriber::fmt().try_init().is_ok() {
        tracing::info!(version = version(), "qsim initialized");
    }
    Ok(())
}

/// Get the current crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
