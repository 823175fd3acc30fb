//! Vector types and data structures

use serde::{Deserialize, Serialize};

/// Element encoding of a vector column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    /// 32-bit IEEE float, 4 bytes per element
    Float32,
    /// Signed byte, 1 byte per element
    Int8,
    /// Single bit, packed 8 per byte, least significant bit first
    Bit,
}

impl ElementType {
    /// Returns the name used in column declarations
    pub fn name(&self) -> &'static str {
        match self {
            ElementType::Float32 => "float",
            ElementType::Int8 => "int8",
            ElementType::Bit => "bit",
        }
    }

    /// Packed size in bytes of a vector with `dimensions` elements
    pub fn byte_len(&self, dimensions: usize) -> usize {
        match self {
            ElementType::Float32 => dimensions * 4,
            ElementType::Int8 => dimensions,
            ElementType::Bit => dimensions / 8,
        }
    }
}

/// An owned vector value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Vector {
    Float32(Vec<f32>),
    Int8(Vec<i8>),
    /// Packed bits; the dimension is always `8 * bytes.len()`
    Bit(Vec<u8>),
}

impl Vector {
    pub fn element_type(&self) -> ElementType {
        match self {
            Vector::Float32(_) => ElementType::Float32,
            Vector::Int8(_) => ElementType::Int8,
            Vector::Bit(_) => ElementType::Bit,
        }
    }

    /// Number of elements (bits, for bit vectors)
    pub fn dimensions(&self) -> usize {
        self.as_ref().dimensions()
    }

    /// Size of the packed representation
    pub fn byte_len(&self) -> usize {
        self.element_type().byte_len(self.dimensions())
    }

    /// Borrow this vector
    pub fn as_ref(&self) -> VectorRef<'_> {
        match self {
            Vector::Float32(v) => VectorRef::Float32(v),
            Vector::Int8(v) => VectorRef::Int8(v),
            Vector::Bit(v) => VectorRef::Bit(v),
        }
    }

    /// Render as a JSON array. Bit vectors render one 0/1 entry per bit.
    pub fn to_json(&self) -> String {
        match self {
            Vector::Float32(v) => serde_json::to_string(v).unwrap_or_default(),
            Vector::Int8(v) => serde_json::to_string(v).unwrap_or_default(),
            Vector::Bit(bytes) => {
                let bits: Vec<u8> = (0..bytes.len() * 8)
                    .map(|i| (bytes[i / 8] >> (i % 8)) & 1)
                    .collect();
                serde_json::to_string(&bits).unwrap_or_default()
            }
        }
    }
}

/// A borrowed vector, typically a slot inside a chunk's packed array
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VectorRef<'a> {
    Float32(&'a [f32]),
    Int8(&'a [i8]),
    Bit(&'a [u8]),
}

impl<'a> VectorRef<'a> {
    pub fn element_type(&self) -> ElementType {
        match self {
            VectorRef::Float32(_) => ElementType::Float32,
            VectorRef::Int8(_) => ElementType::Int8,
            VectorRef::Bit(_) => ElementType::Bit,
        }
    }

    pub fn dimensions(&self) -> usize {
        match self {
            VectorRef::Float32(v) => v.len(),
            VectorRef::Int8(v) => v.len(),
            VectorRef::Bit(v) => v.len() * 8,
        }
    }

    pub fn to_vector(&self) -> Vector {
        match self {
            VectorRef::Float32(v) => Vector::Float32(v.to_vec()),
            VectorRef::Int8(v) => Vector::Int8(v.to_vec()),
            VectorRef::Bit(v) => Vector::Bit(v.to_vec()),
        }
    }
}

/// Distance metric for similarity calculations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DistanceMetric {
    /// Euclidean (L2) distance
    #[default]
    L2,
    /// Manhattan (L1) distance
    L1,
    /// Cosine distance (1 - cosine_sim), range [0, 2]
    Cosine,
    /// Negative dot product, so that smaller is closer
    Dot,
    /// Number of differing bits; bit vectors only
    Hamming,
}

impl DistanceMetric {
    /// Returns the name of the distance metric
    pub fn name(&self) -> &'static str {
        match self {
            DistanceMetric::L2 => "l2",
            DistanceMetric::L1 => "l1",
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Dot => "dot",
            DistanceMetric::Hamming => "hamming",
        }
    }

    /// Parse a metric name, case-insensitively
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "l2" => Some(DistanceMetric::L2),
            "l1" => Some(DistanceMetric::L1),
            "cosine" => Some(DistanceMetric::Cosine),
            "dot" => Some(DistanceMetric::Dot),
            "hamming" => Some(DistanceMetric::Hamming),
            _ => None,
        }
    }

    /// Whether this metric is defined for vectors of `element`
    pub fn supports(&self, element: ElementType) -> bool {
        match element {
            ElementType::Bit => *self == DistanceMetric::Hamming,
            ElementType::Float32 | ElementType::Int8 => *self != DistanceMetric::Hamming,
        }
    }

    /// The metric a column of `element` uses when none is declared
    pub fn default_for(element: ElementType) -> Self {
        match element {
            ElementType::Bit => DistanceMetric::Hamming,
            ElementType::Float32 | ElementType::Int8 => DistanceMetric::L2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimensions_and_byte_len() {
        let f = Vector::Float32(vec![1.0, 2.0, 3.0]);
        assert_eq!(f.dimensions(), 3);
        assert_eq!(f.byte_len(), 12);

        let b = Vector::Bit(vec![0xff, 0x00]);
        assert_eq!(b.dimensions(), 16);
        assert_eq!(b.byte_len(), 2);
    }

    #[test]
    fn test_to_json() {
        assert_eq!(Vector::Int8(vec![1, -2]).to_json(), "[1,-2]");
        assert_eq!(Vector::Bit(vec![0b0000_0101]).to_json(), "[1,0,1,0,0,0,0,0]");
    }

    #[test]
    fn test_metric_family() {
        assert!(DistanceMetric::Hamming.supports(ElementType::Bit));
        assert!(!DistanceMetric::L2.supports(ElementType::Bit));
        assert!(DistanceMetric::Cosine.supports(ElementType::Int8));
        assert_eq!(DistanceMetric::parse("L1"), Some(DistanceMetric::L1));
        assert_eq!(DistanceMetric::parse("invalid"), None);
    }
}
