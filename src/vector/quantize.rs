//! Float vector quantization to int8 and binary

use super::types::Vector;
use crate::error::{Result, VecError};
use serde::{Deserialize, Serialize};

/// Mapping from float elements onto the signed byte range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Int8Scheme {
    /// Map [-1, 1] onto [-128, 127]; values outside are clamped
    Unit,
    /// Map the vector's own [min, max] onto [-128, 127]
    MinMax,
}

impl Int8Scheme {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "unit" => Some(Int8Scheme::Unit),
            "minmax" | "min_max" => Some(Int8Scheme::MinMax),
            _ => None,
        }
    }
}

/// Quantize float elements to int8
pub fn quantize_int8(values: &[f32], scheme: Int8Scheme) -> Vec<i8> {
    let (min, max) = match scheme {
        Int8Scheme::Unit => (-1.0f32, 1.0f32),
        Int8Scheme::MinMax => values
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v))),
    };
    let range = max - min;
    if !range.is_finite() || range <= 0.0 {
        return vec![0; values.len()];
    }

    values
        .iter()
        .map(|v| {
            let scaled = (v.clamp(min, max) - min) / range * 255.0 - 128.0;
            scaled.clamp(-128.0, 127.0) as i8
        })
        .collect()
}

/// Quantize float elements to bits: bit i is set when element i is positive
pub fn quantize_binary(values: &[f32]) -> Vec<u8> {
    let mut out = vec![0u8; values.len().div_ceil(8)];
    for (i, v) in values.iter().enumerate() {
        if *v > 0.0 {
            out[i / 8] |= 1 << (i % 8);
        }
    }
    out
}

impl Vector {
    /// Quantize a float32 vector to int8
    pub fn to_int8(&self, scheme: Int8Scheme) -> Result<Vector> {
        match self {
            Vector::Float32(v) => Ok(Vector::Int8(quantize_int8(v, scheme))),
            other => Err(VecError::TypeMismatch(format!(
                "int8 quantization requires a float vector, got {}",
                other.element_type().name()
            ))),
        }
    }

    /// Quantize a float32 vector to a bit vector. The dimension must be a multiple of 8.
    pub fn to_bit(&self) -> Result<Vector> {
        match self {
            Vector::Float32(v) if v.len() % 8 == 0 => Ok(Vector::Bit(quantize_binary(v))),
            Vector::Float32(v) => Err(VecError::MalformedLiteral(format!(
                "binary quantization requires a dimension divisible by 8, got {}",
                v.len()
            ))),
            other => Err(VecError::TypeMismatch(format!(
                "binary quantization requires a float vector, got {}",
                other.element_type().name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_scheme_endpoints() {
        let q = quantize_int8(&[-1.0, 0.0, 1.0, 5.0, -5.0], Int8Scheme::Unit);
        assert_eq!(q, vec![-128, 0, 127, 127, -128]);
    }

    #[test]
    fn test_minmax_scheme() {
        let q = quantize_int8(&[2.0, 4.0, 6.0], Int8Scheme::MinMax);
        assert_eq!(q[0], -128);
        assert_eq!(q[2], 127);
        assert!(q[1] > -10 && q[1] < 10);

        // constant input has no range to map
        assert_eq!(quantize_int8(&[3.0, 3.0], Int8Scheme::MinMax), vec![0, 0]);
    }

    #[test]
    fn test_binary_sign_threshold() {
        let v = [0.5, -0.5, 0.0, 2.0, -1.0, 1.0, 1.0, -3.0, 0.1];
        assert_eq!(quantize_binary(&v), vec![0b0110_1001, 0b0000_0001]);
    }

    #[test]
    fn test_vector_quantization_type_checks() {
        let v = Vector::Float32(vec![0.1, 0.5, -0.3]);
        assert!(matches!(v.to_int8(Int8Scheme::Unit), Ok(Vector::Int8(_))));
        assert!(v.to_bit().is_err());
        assert!(Vector::Int8(vec![1]).to_int8(Int8Scheme::Unit).is_err());
    }

    #[test]
    fn test_quantization_is_deterministic() {
        let v: Vec<f32> = (0..32).map(|i| (i as f32 - 16.0) / 16.0).collect();
        assert_eq!(
            quantize_int8(&v, Int8Scheme::Unit),
            quantize_int8(&v, Int8Scheme::Unit)
        );
    }
}
