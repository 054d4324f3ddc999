//! Quantization encodings and the symmetry policies that shape them

use serde::{Deserialize, Serialize};

use crate::error::{QuantError, QuantResult};

pub const MIN_BITWIDTH: u32 = 1;
pub const MAX_BITWIDTH: u32 = 32;

/// Narrowest range an encoding may cover; wider ranges are left alone
pub const MIN_RANGE: f64 = 1e-5;

/// A quantization grid: codes `0..=2^bitwidth - 1` map to `min + code * delta`.
///
/// Encodings built by [`Encoding::from_candidate`] always hold zero exactly
/// on the grid: `min == -(offset * delta)` with an integral `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Encoding {
    pub min: f64,
    pub max: f64,
    pub delta: f64,
    pub offset: f64,
    pub bitwidth: u32,
}

/// Shape of the grid after the symmetry policy has been applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GridShape {
    #[default]
    Asymmetric,
    /// `[-a, a]` with the top code unused so zero sits on the centre code
    SignedSymmetric,
    /// `[0, a]` for non-negative data
    UnsignedSymmetric,
}

/// Everything `compute_encoding` needs besides the statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingParams {
    pub bitwidth: u32,
    pub symmetric: bool,
    pub unsigned_symmetric: bool,
    pub strict_symmetric: bool,
}

impl EncodingParams {
    pub fn new(bitwidth: u32, symmetric: bool) -> Self {
        Self {
            bitwidth,
            symmetric,
            unsigned_symmetric: false,
            strict_symmetric: false,
        }
    }

    pub fn with_unsigned_symmetric(mut self, unsigned_symmetric: bool) -> Self {
        self.unsigned_symmetric = unsigned_symmetric;
        self
    }

    pub fn with_strict_symmetric(mut self, strict_symmetric: bool) -> Self {
        self.strict_symmetric = strict_symmetric;
        self
    }

    pub fn validate(&self) -> QuantResult<()> {
        validate_bitwidth(self.bitwidth)
    }

    /// Like [`validate`](Self::validate), and also rejects a signed
    /// symmetric grid below 2 bits for data of the given sign.
    pub fn validate_for(&self, non_negative_data: bool) -> QuantResult<()> {
        self.validate()?;
        if self.grid_shape(non_negative_data) == GridShape::SignedSymmetric {
            check_signed_bitwidth(self.bitwidth)?;
        }
        Ok(())
    }

    /// Resolve the symmetry flags against the data's sign.
    ///
    /// Unsigned-symmetric applies only to non-negative data and never in
    /// strict mode; everything else symmetric is signed.
    pub fn grid_shape(&self, non_negative_data: bool) -> GridShape {
        if !self.symmetric {
            GridShape::Asymmetric
        } else if self.unsigned_symmetric && !self.strict_symmetric && non_negative_data {
            GridShape::UnsignedSymmetric
        } else {
            GridShape::SignedSymmetric
        }
    }
}

pub fn validate_bitwidth(bitwidth: u32) -> QuantResult<()> {
    if !(MIN_BITWIDTH..=MAX_BITWIDTH).contains(&bitwidth) {
        return Err(QuantError::invalid_argument(
            "bitwidth",
            &format!("{} is outside [{}, {}]", bitwidth, MIN_BITWIDTH, MAX_BITWIDTH),
        ));
    }
    Ok(())
}

/// Largest code, `2^bitwidth - 1`
pub fn max_code(bitwidth: u32) -> f64 {
    2f64.powi(bitwidth as i32) - 1.0
}

impl Encoding {
    /// Turn a candidate range chosen by an analyzer into an encoding
    pub fn from_candidate(min: f64, max: f64, shape: GridShape, bitwidth: u32) -> QuantResult<Self> {
        validate_bitwidth(bitwidth)?;
        check_range(min, max)?;
        let levels = max_code(bitwidth);

        match shape {
            GridShape::Asymmetric => {
                let min = min.min(0.0);
                let mut max = max.max(0.0);
                if max - min < MIN_RANGE {
                    max = min + MIN_RANGE;
                }
                let delta = (max - min) / levels;
                let offset = (-min / delta).round();
                let min = -(offset * delta);
                Self {
                    min,
                    max: min + levels * delta,
                    delta,
                    offset,
                    bitwidth,
                }
                .checked()
            }
            GridShape::SignedSymmetric => {
                check_signed_bitwidth(bitwidth)?;
                let abs_max = min.abs().max(max.abs()).max(MIN_RANGE / 2.0);
                let offset = (levels - 1.0) / 2.0;
                // abs_max / offset == 2 * abs_max / steps without overflowing near f64::MAX
                let delta = abs_max / offset;
                let half = offset * delta;
                Self {
                    min: -half,
                    max: half,
                    delta,
                    offset,
                    bitwidth,
                }
                .checked()
            }
            GridShape::UnsignedSymmetric => {
                let max = max.max(MIN_RANGE);
                let delta = max / levels;
                Self {
                    min: 0.0,
                    max: levels * delta,
                    delta,
                    offset: 0.0,
                    bitwidth,
                }
                .checked()
            }
        }
    }

    /// Rebuild an encoding from a bare `(min, max)` pair.
    ///
    /// A balanced non-zero range (`min == -max`) is read as a signed
    /// symmetric grid so it reproduces what `from_candidate` produced; any
    /// other range spans all `2^bitwidth - 1` steps and keeps its end points.
    pub fn from_range(min: f64, max: f64, bitwidth: u32) -> QuantResult<Self> {
        validate_bitwidth(bitwidth)?;
        check_range(min, max)?;
        if max - min <= 0.0 {
            return Err(QuantError::invalid_argument("encoding", "range must have positive width"));
        }

        let levels = max_code(bitwidth);
        if bitwidth >= 2 && max > 0.0 && min == -max {
            let offset = (levels - 1.0) / 2.0;
            return Self {
                min,
                max,
                delta: max / offset,
                offset,
                bitwidth,
            }
            .checked();
        }

        let delta = (max - min) / levels;
        Self {
            min,
            max,
            delta,
            offset: (-min / delta).round(),
            bitwidth,
        }
        .checked()
    }

    /// Reject encodings the simulator cannot use
    pub fn validate(&self) -> QuantResult<()> {
        validate_bitwidth(self.bitwidth)?;
        check_range(self.min, self.max)?;
        if !(self.delta.is_finite() && self.delta > 0.0) {
            return Err(QuantError::invalid_argument(
                "encoding",
                &format!("delta must be positive and finite, got {}", self.delta),
            ));
        }
        Ok(())
    }

    fn checked(self) -> QuantResult<Self> {
        self.validate()?;
        Ok(self)
    }

    pub fn max_code(&self) -> f64 {
        max_code(self.bitwidth)
    }

    pub fn is_symmetric(&self) -> bool {
        self.min == -self.max
    }

    /// Grid value for an integer code
    #[inline]
    pub fn dequantize_code(&self, code: f64) -> f64 {
        self.min + code * self.delta
    }
}

fn check_signed_bitwidth(bitwidth: u32) -> QuantResult<()> {
    if bitwidth < 2 {
        return Err(QuantError::invalid_argument(
            "bitwidth",
            "signed symmetric encodings need at least 2 bits",
        ));
    }
    Ok(())
}

fn check_range(min: f64, max: f64) -> QuantResult<()> {
    if !min.is_finite() || !max.is_finite() {
        return Err(QuantError::invalid_argument("encoding", "range must be finite"));
    }
    if min > max {
        return Err(QuantError::invalid_argument(
            "encoding",
            &format!("min {} is greater than max {}", min, max),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_asymmetric_example() {
        let encoding = Encoding::from_candidate(-1.0, 2.0, GridShape::Asymmetric, 8).unwrap();
        assert!(approx(encoding.min, -1.0));
        assert!(approx(encoding.max, 2.0));
        assert!(approx(encoding.delta, 3.0 / 255.0));
        assert_eq!(encoding.offset, 85.0);
        assert_eq!(encoding.dequantize_code(encoding.offset), 0.0);
    }

    #[test]
    fn test_asymmetric_includes_zero() {
        let positive = Encoding::from_candidate(1.0, 3.0, GridShape::Asymmetric, 8).unwrap();
        assert_eq!(positive.min, 0.0);
        assert!(approx(positive.max, 3.0));
        assert_eq!(positive.offset, 0.0);

        let negative = Encoding::from_candidate(-4.0, -2.0, GridShape::Asymmetric, 4).unwrap();
        assert!(approx(negative.min, -4.0));
        assert!(negative.max.abs() < 1e-12);
        assert_eq!(negative.offset, 15.0);
    }

    #[test]
    fn test_signed_symmetric_example() {
        let encoding = Encoding::from_candidate(-1.0, 2.0, GridShape::SignedSymmetric, 8).unwrap();
        assert!(approx(encoding.max, 2.0));
        assert_eq!(encoding.min, -encoding.max);
        assert!(approx(encoding.delta, 4.0 / 254.0));
        assert_eq!(encoding.offset, 127.0);
        assert_eq!(encoding.dequantize_code(127.0), 0.0);
    }

    #[test]
    fn test_signed_symmetric_needs_two_bits() {
        let result = Encoding::from_candidate(-1.0, 1.0, GridShape::SignedSymmetric, 1);
        assert!(matches!(result, Err(QuantError::InvalidArgument(_))));
    }

    #[test]
    fn test_unsigned_symmetric() {
        let encoding = Encoding::from_candidate(0.5, 3.0, GridShape::UnsignedSymmetric, 8).unwrap();
        assert_eq!(encoding.min, 0.0);
        assert!(approx(encoding.max, 3.0));
        assert!(approx(encoding.delta, 3.0 / 255.0));
        assert_eq!(encoding.offset, 0.0);
    }

    #[test]
    fn test_grid_shape_precedence() {
        let params = EncodingParams::new(8, true).with_unsigned_symmetric(true);
        assert_eq!(params.grid_shape(true), GridShape::UnsignedSymmetric);
        // mixed-sign data falls back to signed
        assert_eq!(params.grid_shape(false), GridShape::SignedSymmetric);
        // strict wins over unsigned
        assert_eq!(params.with_strict_symmetric(true).grid_shape(true), GridShape::SignedSymmetric);
        assert_eq!(EncodingParams::new(8, false).with_unsigned_symmetric(true).grid_shape(true), GridShape::Asymmetric);
    }

    #[test]
    fn test_degenerate_range_is_widened() {
        let encoding = Encoding::from_candidate(0.0, 0.0, GridShape::Asymmetric, 8).unwrap();
        assert!(encoding.delta > 0.0);
        assert!(encoding.max - encoding.min >= MIN_RANGE * (1.0 - 1e-9));
        assert!(encoding.validate().is_ok());

        let symmetric = Encoding::from_candidate(0.0, 0.0, GridShape::SignedSymmetric, 8).unwrap();
        assert!(symmetric.delta > 0.0);
    }

    #[test]
    fn test_bitwidth_bounds() {
        assert!(validate_bitwidth(0).is_err());
        assert!(validate_bitwidth(33).is_err());
        assert!(validate_bitwidth(1).is_ok());
        assert!(validate_bitwidth(32).is_ok());
        assert_eq!(max_code(32), 4_294_967_295.0);
    }

    #[test]
    fn test_from_range_matches_candidate() {
        let symmetric = Encoding::from_candidate(-1.0, 2.0, GridShape::SignedSymmetric, 8).unwrap();
        let rebuilt = Encoding::from_range(symmetric.min, symmetric.max, 8).unwrap();
        assert!(approx(rebuilt.delta, symmetric.delta));
        assert_eq!(rebuilt.offset, symmetric.offset);

        let asymmetric = Encoding::from_candidate(-1.0, 2.0, GridShape::Asymmetric, 8).unwrap();
        let rebuilt = Encoding::from_range(asymmetric.min, asymmetric.max, 8).unwrap();
        assert!(approx(rebuilt.delta, asymmetric.delta));
        assert_eq!(rebuilt.offset, asymmetric.offset);
    }

    #[test]
    fn test_malformed_ranges() {
        assert!(Encoding::from_range(1.0, -1.0, 8).is_err());
        assert!(Encoding::from_range(1.0, 1.0, 8).is_err());
        assert!(Encoding::from_range(f64::NAN, 1.0, 8).is_err());
        assert!(Encoding::from_candidate(2.0, 1.0, GridShape::Asymmetric, 8).is_err());

        let broken = Encoding {
            min: 0.0,
            max: 1.0,
            delta: 0.0,
            offset: 0.0,
            bitwidth: 8,
        };
        assert!(broken.validate().is_err());
    }

    #[test]
    fn test_overflowing_ranges_are_rejected() {
        let huge = f64::MAX;
        assert!(Encoding::from_range(-huge, huge / 2.0, 8).is_err());
        assert!(Encoding::from_candidate(-huge, huge, GridShape::Asymmetric, 8).is_err());

        // half-width extremes still give a finite signed grid
        let symmetric = Encoding::from_candidate(-1e308, 0.0, GridShape::SignedSymmetric, 8).unwrap();
        assert!(symmetric.delta.is_finite());
        assert!(symmetric.min.is_finite() && symmetric.max.is_finite());
        assert_eq!(symmetric.min, -symmetric.max);
    }

    #[test]
    fn test_validate_for_data_sign() {
        let params = EncodingParams::new(1, true).with_unsigned_symmetric(true);
        assert!(params.validate_for(true).is_ok());
        assert!(params.validate_for(false).is_err());
        assert!(EncodingParams::new(1, false).validate_for(false).is_ok());
        assert!(EncodingParams::new(0, false).validate_for(true).is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let encoding = Encoding::from_candidate(-1.0, 2.0, GridShape::Asymmetric, 8).unwrap();
        let json = serde_json::to_string(&encoding).unwrap();
        let parsed: Encoding = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, encoding);
    }
}
