//! Distance functions for vector operations
//!
//! All metrics are "smaller is closer". L2 ranks on the squared distance
//! internally ([`score`]) and only takes the square root for reported values
//! ([`finish`]), which keeps the ordering identical while skipping a sqrt per
//! candidate.

use super::types::{DistanceMetric, Vector, VectorRef};
use crate::error::{Result, VecError};
use crate::types::CosineZeroNorm;

/// Calculate the distance between two vectors using the specified metric.
///
/// Cosine distance on a zero-norm operand reports 2.0; use [`distance_with`]
/// to choose a different policy.
pub fn distance(a: &Vector, b: &Vector, metric: DistanceMetric) -> Result<f64> {
    distance_with(a.as_ref(), b.as_ref(), metric, CosineZeroNorm::MaxDistance)
}

/// Calculate a distance with an explicit zero-norm policy for cosine
pub fn distance_with(
    a: VectorRef<'_>,
    b: VectorRef<'_>,
    metric: DistanceMetric,
    zero_norm: CosineZeroNorm,
) -> Result<f64> {
    Ok(finish(score(a, b, metric, zero_norm)?, metric))
}

/// Ranking score: the distance itself, except squared for L2
#[inline]
pub fn score(
    a: VectorRef<'_>,
    b: VectorRef<'_>,
    metric: DistanceMetric,
    zero_norm: CosineZeroNorm,
) -> Result<f64> {
    if !metric.supports(a.element_type()) {
        return Err(VecError::IncompatibleVectors(format!(
            "{} distance is not defined for {} vectors",
            metric.name(),
            a.element_type().name()
        )));
    }
    match (a, b) {
        (VectorRef::Float32(x), VectorRef::Float32(y)) if x.len() == y.len() => {
            numeric_score(x, y, metric, zero_norm)
        }
        (VectorRef::Int8(x), VectorRef::Int8(y)) if x.len() == y.len() => {
            numeric_score(x, y, metric, zero_norm)
        }
        (VectorRef::Bit(x), VectorRef::Bit(y)) if x.len() == y.len() => {
            Ok(hamming_distance(x, y) as f64)
        }
        _ => Err(VecError::IncompatibleVectors(format!(
            "cannot compare {}[{}] with {}[{}]",
            a.element_type().name(),
            a.dimensions(),
            b.element_type().name(),
            b.dimensions()
        ))),
    }
}

/// Convert a ranking score into the reported distance
#[inline]
pub fn finish(score: f64, metric: DistanceMetric) -> f64 {
    match metric {
        DistanceMetric::L2 => score.sqrt(),
        _ => score,
    }
}

#[inline]
fn numeric_score<T: Copy + Into<f64>>(
    a: &[T],
    b: &[T],
    metric: DistanceMetric,
    zero_norm: CosineZeroNorm,
) -> Result<f64> {
    let pairs = || {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| -> (f64, f64) { ((*x).into(), (*y).into()) })
    };
    let value: f64 = match metric {
        DistanceMetric::L2 => pairs().map(|(x, y)| (x - y) * (x - y)).sum(),
        DistanceMetric::L1 => pairs().map(|(x, y)| (x - y).abs()).sum(),
        DistanceMetric::Dot => -pairs().map(|(x, y)| x * y).sum::<f64>(),
        DistanceMetric::Cosine => {
            let (dot, norm_a, norm_b) = pairs().fold((0.0f64, 0.0f64, 0.0f64), |(d, na, nb), (x, y)| {
                (d + x * y, na + x * x, nb + y * y)
            });
            if norm_a == 0.0 || norm_b == 0.0 {
                return match zero_norm {
                    CosineZeroNorm::MaxDistance => Ok(2.0),
                    CosineZeroNorm::Error => Err(VecError::IncompatibleVectors(
                        "cosine distance is undefined for a zero-norm vector".into(),
                    )),
                };
            }
            let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
            // Clamp to handle floating point errors
            1.0 - similarity.clamp(-1.0, 1.0)
        }
        DistanceMetric::Hamming => {
            return Err(VecError::IncompatibleVectors(
                "hamming distance is only defined for bit vectors".into(),
            ))
        }
    };
    Ok(value)
}

/// Popcount of the XOR of two packed bit vectors
#[inline]
pub fn hamming_distance(a: &[u8], b: &[u8]) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}
