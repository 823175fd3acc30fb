//! Vector type system for KeraVec
//!
//! Vectors come in three element encodings, each with a fixed dimension
//! declared by the column that stores them:
//!
//! - **float**: 32-bit floats, compared with L2, L1, cosine or dot product
//! - **int8**: signed bytes, same metrics as float
//! - **bit**: packed bits, compared with Hamming distance
//!
//! # Example
//!
//! ```ignore
//! use keravec::vector::{codec, distance, DistanceMetric, ElementType};
//!
//! let a = codec::parse(&"[1, 2, 3]".into(), ElementType::Float32, 3)?;
//! let b = codec::vec_f32(&"[1, 2, 4]".into())?;
//! let d = distance::distance(&a, &b, DistanceMetric::L2)?;
//! ```

pub mod types;
pub mod codec;
pub mod distance;
pub mod quantize;

pub use types::*;
pub use codec::{vec_bit, vec_f32, vec_int8, vec_quantize_binary, vec_quantize_int8};
pub use distance::distance;
pub use quantize::Int8Scheme;
