//! Calibration and quantize-dequantize simulation

pub mod analyzers;
pub mod encoding;
pub mod histogram;
pub mod quantizer;
pub mod simulation;

pub use analyzers::{EncodingAnalyzer, MinMaxAnalyzer, PercentileAnalyzer, QuantScheme, TfEnhancedAnalyzer};
pub use encoding::{Encoding, EncodingParams, GridShape, MAX_BITWIDTH, MIN_BITWIDTH, MIN_RANGE};
pub use histogram::Histogram;
pub use quantizer::{ApplyRequest, OpMode, QuantizerState, TensorQuantizer};
pub use simulation::{QuantizationSimulator, RoundingMode};
