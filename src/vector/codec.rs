//! Parsing and serialization of vector values
//!
//! A vector reaches the table in one of three forms:
//!
//! - a JSON array literal in text (`'[1, 2, 3]'`), accepted for float and int8 columns
//! - raw packed bytes of exactly the declared length
//! - a pre-typed value produced by one of the wrappers [`vec_f32`], [`vec_int8`], [`vec_bit`]
//!
//! Whatever the form, the result must match the column's element type and dimension.

use super::quantize::Int8Scheme;
use super::types::{ElementType, Vector};
use crate::error::{Result, VecError};
use crate::types::Value;

/// Parse `input` as a vector of `element` with exactly `dimensions` elements
pub fn parse(input: &Value, element: ElementType, dimensions: usize) -> Result<Vector> {
    let vector = parse_any_length(input, element)?;
    if vector.dimensions() != dimensions {
        return Err(VecError::DimensionMismatch {
            expected: dimensions,
            actual: vector.dimensions(),
        });
    }
    Ok(vector)
}

/// Packed little-endian byte representation
pub fn serialize(vector: &Vector) -> Vec<u8> {
    match vector {
        Vector::Float32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        Vector::Int8(v) => v.iter().map(|x| *x as u8).collect(),
        Vector::Bit(v) => v.clone(),
    }
}

/// Tag `input` as a float32 vector
pub fn vec_f32(input: &Value) -> Result<Vector> {
    wrap(input, ElementType::Float32)
}

/// Tag `input` as an int8 vector
pub fn vec_int8(input: &Value) -> Result<Vector> {
    wrap(input, ElementType::Int8)
}

/// Tag `input` as a bit vector. Only blobs (or bit vectors) are accepted.
pub fn vec_bit(input: &Value) -> Result<Vector> {
    wrap(input, ElementType::Bit)
}

/// Quantize a float32 vector to int8 under the named scheme (`unit` or `minmax`)
pub fn vec_quantize_int8(input: &Value, scheme: &str) -> Result<Vector> {
    let scheme = Int8Scheme::parse(scheme).ok_or_else(|| {
        VecError::InvalidQuery(format!("unknown int8 quantization scheme '{}'", scheme))
    })?;
    vec_f32(input)?.to_int8(scheme)
}

/// Quantize a float32 vector to one sign bit per element
pub fn vec_quantize_binary(input: &Value) -> Result<Vector> {
    vec_f32(input)?.to_bit()
}

fn wrap(input: &Value, element: ElementType) -> Result<Vector> {
    let vector = parse_any_length(input, element)?;
    if vector.dimensions() == 0 {
        return Err(VecError::MalformedLiteral(
            "zero-length vectors are not supported".into(),
        ));
    }
    Ok(vector)
}

fn parse_any_length(input: &Value, element: ElementType) -> Result<Vector> {
    match input {
        Value::Vector(Vector::Float32(v)) if element == ElementType::Float32 => finite(v.clone()),
        Value::Vector(v) if v.element_type() == element => Ok(v.clone()),
        Value::Vector(v) => Err(VecError::TypeMismatch(format!(
            "expected {} vector, got {} vector",
            element.name(),
            v.element_type().name()
        ))),
        Value::Text(text) => parse_text(text, element),
        Value::Blob(bytes) => decode_blob(bytes, element),
        other => Err(VecError::TypeMismatch(format!(
            "{} vectors must be text or blob, got {}",
            element.name(),
            other.type_name()
        ))),
    }
}

fn parse_text(text: &str, element: ElementType) -> Result<Vector> {
    let malformed = |e: serde_json::Error| VecError::MalformedLiteral(format!("{}: {}", text.trim(), e));
    match element {
        ElementType::Float32 => {
            let values: Vec<f32> = serde_json::from_str(text).map_err(malformed)?;
            finite(values)
        }
        ElementType::Int8 => {
            let values: Vec<i8> = serde_json::from_str(text).map_err(malformed)?;
            Ok(Vector::Int8(values))
        }
        ElementType::Bit => Err(VecError::TypeMismatch(
            "bit vectors must be provided as a blob".into(),
        )),
    }
}

fn decode_blob(bytes: &[u8], element: ElementType) -> Result<Vector> {
    match element {
        ElementType::Float32 => {
            if bytes.len() % 4 != 0 {
                return Err(VecError::TypeMismatch(format!(
                    "float32 vector blob length {} is not a multiple of 4",
                    bytes.len()
                )));
            }
            finite(
                bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            )
        }
        ElementType::Int8 => Ok(Vector::Int8(bytes.iter().map(|b| *b as i8).collect())),
        ElementType::Bit => Ok(Vector::Bit(bytes.to_vec())),
    }
}

/// Float vectors must not carry NaN or infinities
fn finite(values: Vec<f32>) -> Result<Vector> {
    if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
        return Err(VecError::MalformedLiteral(format!("non-finite element {}", bad)));
    }
    Ok(Vector::Float32(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_text_literal() {
        let v = parse(&Value::from("[1, 2.5, -3]"), ElementType::Float32, 3).unwrap();
        assert_eq!(v, Vector::Float32(vec![1.0, 2.5, -3.0]));

        let v = parse(&Value::from(" [1,-2,127] "), ElementType::Int8, 3).unwrap();
        assert_eq!(v, Vector::Int8(vec![1, -2, 127]));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse(&Value::from("[1,2,3]"), ElementType::Float32, 4),
            Err(VecError::DimensionMismatch { expected: 4, actual: 3 })
        ));
        assert!(matches!(
            parse(&Value::from("[1,2,"), ElementType::Float32, 3),
            Err(VecError::MalformedLiteral(_))
        ));
        assert!(matches!(
            parse(&Value::from("[1,2,300]"), ElementType::Int8, 3),
            Err(VecError::MalformedLiteral(_))
        ));
        assert!(matches!(
            parse(&Value::Blob(vec![0; 7]), ElementType::Float32, 2),
            Err(VecError::TypeMismatch(_))
        ));
        assert!(matches!(
            parse(&Value::Integer(4), ElementType::Float32, 1),
            Err(VecError::TypeMismatch(_))
        ));
        assert!(matches!(
            parse(&Value::from("[1,0]"), ElementType::Bit, 8),
            Err(VecError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_typed_wrap_must_match_column_type() {
        let tagged = Value::Vector(vec_int8(&Value::from("[1,2,3,4]")).unwrap());
        assert!(parse(&tagged, ElementType::Int8, 4).is_ok());
        assert!(matches!(
            parse(&tagged, ElementType::Float32, 4),
            Err(VecError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_wrap_rejects_empty() {
        assert!(matches!(vec_f32(&Value::from("[]")), Err(VecError::MalformedLiteral(_))));
        assert!(vec_bit(&Value::Blob(vec![])).is_err());
    }

    #[test]
    fn test_non_finite_floats_rejected() {
        for bad in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let blob = Value::Blob(serialize(&Vector::Float32(vec![1.0, bad])));
            assert!(matches!(
                parse(&blob, ElementType::Float32, 2),
                Err(VecError::MalformedLiteral(_))
            ));
            let tagged = Value::Vector(Vector::Float32(vec![bad, 0.0]));
            assert!(matches!(
                parse(&tagged, ElementType::Float32, 2),
                Err(VecError::MalformedLiteral(_))
            ));
        }
        assert!(matches!(
            vec_f32(&Value::Blob(serialize(&Vector::Float32(vec![f32::NAN])))),
            Err(VecError::MalformedLiteral(_))
        ));
    }

    #[test]
    fn test_quantize_functions() {
        let input = Value::from("[-1, 0, 1, 0.5, -0.5, 1, 1, -1]");
        assert_eq!(
            vec_quantize_int8(&input, "unit").unwrap(),
            Vector::Int8(vec![-128, 0, 127, 63, -64, 127, 127, -128])
        );
        assert!(matches!(
            vec_quantize_int8(&input, "MinMax").unwrap(),
            Vector::Int8(v) if v.len() == 8
        ));
        assert!(matches!(
            vec_quantize_int8(&input, "log"),
            Err(VecError::InvalidQuery(_))
        ));
        assert_eq!(
            vec_quantize_binary(&input).unwrap(),
            Vector::Bit(vec![0b0110_1100])
        );
        assert!(vec_quantize_binary(&Value::from("[1, 2, 3]")).is_err());
    }

    #[test]
    fn test_blob_dimension_check() {
        let v = Vector::Float32(vec![1.0, 2.0]);
        let blob = Value::Blob(serialize(&v));
        assert!(matches!(
            parse(&blob, ElementType::Float32, 3),
            Err(VecError::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }

    proptest! {
        #[test]
        fn prop_float_round_trip(values in prop::collection::vec(-1e6f32..1e6f32, 1..64)) {
            let v = Vector::Float32(values);
            let dims = v.dimensions();
            let parsed = parse(&Value::Blob(serialize(&v)), ElementType::Float32, dims).unwrap();
            prop_assert_eq!(parsed, v);
        }

        #[test]
        fn prop_int8_round_trip(values in prop::collection::vec(any::<i8>(), 1..64)) {
            let v = Vector::Int8(values);
            let dims = v.dimensions();
            let parsed = parse(&Value::Blob(serialize(&v)), ElementType::Int8, dims).unwrap();
            prop_assert_eq!(parsed, v);
        }

        #[test]
        fn prop_bit_round_trip(bytes in prop::collection::vec(any::<u8>(), 1..16)) {
            let v = Vector::Bit(bytes);
            let dims = v.dimensions();
            let parsed = parse(&Value::Blob(serialize(&v)), ElementType::Bit, dims).unwrap();
            prop_assert_eq!(parsed, v);
        }
    }
}
