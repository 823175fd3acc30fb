use crate::error::{Result, VecError};
use crate::vector::Vector;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A 64-bit row identifier
pub type RowId = i64;

/// A value crossing the table boundary: DML inputs, filter operands and
/// projected result columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    /// A pre-typed vector, as produced by the `vec_f32`/`vec_int8`/`vec_bit` wrappers
    Vector(Vector),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of the value's storage class, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "float",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
            Value::Vector(_) => "vector",
        }
    }

    /// Payload size used for the auxiliary inline/overflow decision
    pub fn payload_len(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::Integer(_) | Value::Real(_) => 8,
            Value::Text(s) => s.len(),
            Value::Blob(b) => b.len(),
            Value::Vector(v) => v.byte_len(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Plain JSON rendering for CLI output: blobs become byte arrays and
    /// vectors become element arrays
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Real(r) => serde_json::Value::from(*r),
            Value::Text(s) => serde_json::Value::from(s.as_str()),
            Value::Blob(b) => serde_json::Value::from(b.clone()),
            Value::Vector(v) => serde_json::from_str(&v.to_json()).unwrap_or_default(),
        }
    }

    /// Inverse of [`Value::to_json`] for shell input. Arrays become vector
    /// text literals and booleans become 0/1.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Integer(*b as i64),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Real(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        }
    }

    /// Compare two values the way metadata filters do: integers and floats
    /// compare numerically, text and blobs bytewise, anything else is unordered.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Real(b)) => compare_int_real(*a, *b),
            (Value::Real(a), Value::Integer(b)) => compare_int_real(*b, *a).map(Ordering::reverse),
            (Value::Real(a), Value::Real(b)) => a.partial_cmp(b),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Blob(a), Value::Blob(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// Exact ordering of an integer against a float, without rounding the
/// integer through f64
fn compare_int_real(i: i64, r: f64) -> Option<Ordering> {
    const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;
    if r.is_nan() {
        return None;
    }
    if r >= TWO_POW_63 {
        return Some(Ordering::Less);
    }
    if r < -TWO_POW_63 {
        return Some(Ordering::Greater);
    }
    let whole = r.trunc();
    match i.cmp(&(whole as i64)) {
        Ordering::Equal => 0.0f64.partial_cmp(&(r - whole)),
        unequal => Some(unequal),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Text(s) => write!(f, "{}", s),
            Value::Blob(b) => write!(f, "<blob {} bytes>", b.len()),
            Value::Vector(v) => write!(f, "{}", v.to_json()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<Vector> for Value {
    fn from(v: Vector) -> Self {
        Value::Vector(v)
    }
}

/// Declared type of a non-vector column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarType {
    Integer,
    Float,
    Text,
    Boolean,
    Blob,
}

impl ScalarType {
    pub fn name(&self) -> &'static str {
        match self {
            ScalarType::Integer => "integer",
            ScalarType::Float => "float",
            ScalarType::Text => "text",
            ScalarType::Boolean => "boolean",
            ScalarType::Blob => "blob",
        }
    }

    /// Check `value` against this type, widening integers to floats where
    /// the column is a float column. NULL is accepted only when `nullable`.
    pub fn coerce(&self, value: &Value, nullable: bool) -> Result<Value> {
        match (self, value) {
            (_, Value::Null) if nullable => Ok(Value::Null),
            (ScalarType::Integer, Value::Integer(_)) => Ok(value.clone()),
            (ScalarType::Float, Value::Real(_)) => Ok(value.clone()),
            (ScalarType::Float, Value::Integer(i)) => Ok(Value::Real(*i as f64)),
            (ScalarType::Text, Value::Text(_)) => Ok(value.clone()),
            (ScalarType::Blob, Value::Blob(_)) => Ok(value.clone()),
            (ScalarType::Boolean, Value::Integer(i)) if *i == 0 || *i == 1 => Ok(value.clone()),
            _ => Err(VecError::TypeMismatch(format!(
                "expected {} value, got {}",
                self.name(),
                value.type_name()
            ))),
        }
    }
}

/// A partition key value. Partition keys are restricted to integers and text
/// so that they can key the chunk directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PartitionValue {
    Integer(i64),
    Text(String),
}

impl PartitionValue {
    pub fn to_value(&self) -> Value {
        match self {
            PartitionValue::Integer(i) => Value::Integer(*i),
            PartitionValue::Text(s) => Value::Text(s.clone()),
        }
    }
}

/// Behaviour of cosine distance when either operand has zero norm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CosineZeroNorm {
    /// Report the maximal cosine distance, 2.0
    #[default]
    MaxDistance,
    /// Fail with `IncompatibleVectors`
    Error,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Default rows per chunk, overridable per table with `chunk_size=`
    pub chunk_size: usize,
    /// Auxiliary payloads longer than this many bytes go to the overflow area
    pub aux_inline_threshold: usize,
    /// Upper bound on overflow area bytes per table; `None` is unbounded
    pub max_overflow_bytes: Option<usize>,
    pub cosine_zero_norm: CosineZeroNorm,
    /// Write the snapshot after every DML statement on file-backed databases
    pub auto_checkpoint: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            aux_inline_threshold: 128,
            max_overflow_bytes: None,
            cosine_zero_norm: CosineZeroNorm::MaxDistance,
            auto_checkpoint: true,
        }
    }
}

/// Statistics about a table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableStats {
    pub name: String,
    pub row_count: usize,
    pub chunk_count: usize,
    pub chunk_size: usize,
    pub vector_columns: usize,
    /// Bytes held by the packed vector arrays of all chunks
    pub vector_bytes: usize,
    pub overflow_records: usize,
    pub overflow_live_bytes: usize,
    pub overflow_dead_bytes: usize,
    pub created_at: i64,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_coercion() {
        assert_eq!(
            ScalarType::Float.coerce(&Value::Integer(3), false).unwrap(),
            Value::Real(3.0)
        );
        assert!(ScalarType::Integer.coerce(&Value::Text("x".into()), false).is_err());
        assert!(ScalarType::Boolean.coerce(&Value::Integer(2), false).is_err());
        assert!(ScalarType::Text.coerce(&Value::Null, false).is_err());
        assert_eq!(ScalarType::Text.coerce(&Value::Null, true).unwrap(), Value::Null);
    }

    #[test]
    fn test_value_compare() {
        assert_eq!(Value::Integer(2).compare(&Value::Real(2.5)), Some(Ordering::Less));
        assert_eq!(
            Value::Text("b".into()).compare(&Value::Text("a".into())),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::Text("1".into()).compare(&Value::Integer(1)), None);

        let big = (1i64 << 53) + 1;
        assert_eq!(
            Value::Integer(big).compare(&Value::Real(9_007_199_254_740_992.0)),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::Real(-2.5).compare(&Value::Integer(-2)), Some(Ordering::Less));
        assert_eq!(Value::Integer(i64::MAX).compare(&Value::Real(1e19)), Some(Ordering::Less));
        assert_eq!(Value::Integer(3).compare(&Value::Real(f64::NAN)), None);
    }

    #[test]
    fn test_value_json() {
        assert_eq!(Value::Integer(3).to_json(), serde_json::json!(3));
        assert_eq!(Value::Null.to_json(), serde_json::Value::Null);
        assert_eq!(
            Value::Vector(Vector::Int8(vec![1, -2])).to_json(),
            serde_json::json!([1, -2])
        );
        assert_eq!(Value::Blob(vec![7]).to_json(), serde_json::json!([7]));
    }

    #[test]
    fn test_value_from_json() {
        assert_eq!(Value::from_json(&serde_json::json!(true)), Value::Integer(1));
        assert_eq!(Value::from_json(&serde_json::json!(1.5)), Value::Real(1.5));
        assert_eq!(
            Value::from_json(&serde_json::json!([1, 2])),
            Value::Text("[1,2]".into())
        );
    }
}
