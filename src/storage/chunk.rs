//! Fixed-capacity columnar chunks
//!
//! A chunk holds up to `capacity` rows. Every per-column array has exactly
//! `capacity` entries (packed vectors have `capacity * stride` elements), and
//! slot `i` of every array belongs to the same row. Deleted slots keep their
//! stale bytes until reused; the validity bitmap is the source of truth.

use crate::error::{Result, VecError};
use crate::schema::{ColumnKind, TableSchema, MAX_CHUNK_SIZE};
use crate::types::{PartitionValue, RowId, ScalarType, Value};
use crate::vector::{ElementType, Vector, VectorRef};
use serde::{Deserialize, Serialize};

pub type ChunkId = u64;

/// Physical address of a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowLocation {
    pub chunk_id: ChunkId,
    pub slot: usize,
}

/// Packed vectors of one column, `dimensions` elements per slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorArray {
    dimensions: usize,
    data: VectorData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum VectorData {
    Float32(Vec<f32>),
    Int8(Vec<i8>),
    Bit(Vec<u8>),
}

impl VectorArray {
    fn new(element: ElementType, dimensions: usize, capacity: usize) -> Result<Self> {
        let (stride, width) = match element {
            ElementType::Float32 => (dimensions, 4),
            ElementType::Int8 => (dimensions, 1),
            ElementType::Bit => (dimensions / 8, 1),
        };
        let len = stride
            .checked_mul(capacity)
            .filter(|len| len.checked_mul(width).is_some_and(|bytes| bytes <= isize::MAX as usize))
            .ok_or_else(|| {
                VecError::InvalidDefinition(format!(
                    "{} rows of {} dimensions do not fit in one chunk",
                    capacity, dimensions
                ))
            })?;
        let data = match element {
            ElementType::Float32 => VectorData::Float32(vec![0.0; len]),
            ElementType::Int8 => VectorData::Int8(vec![0; len]),
            ElementType::Bit => VectorData::Bit(vec![0; len]),
        };
        Ok(Self { dimensions, data })
    }

    #[inline]
    pub fn get(&self, slot: usize) -> VectorRef<'_> {
        match &self.data {
            VectorData::Float32(v) => {
                VectorRef::Float32(&v[slot * self.dimensions..(slot + 1) * self.dimensions])
            }
            VectorData::Int8(v) => {
                VectorRef::Int8(&v[slot * self.dimensions..(slot + 1) * self.dimensions])
            }
            VectorData::Bit(v) => {
                let stride = self.dimensions / 8;
                VectorRef::Bit(&v[slot * stride..(slot + 1) * stride])
            }
        }
    }

    fn set(&mut self, slot: usize, vector: VectorRef<'_>) -> Result<()> {
        if vector.dimensions() != self.dimensions {
            return Err(VecError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.dimensions(),
            });
        }
        match (&mut self.data, vector) {
            (VectorData::Float32(dst), VectorRef::Float32(src)) => {
                dst[slot * self.dimensions..(slot + 1) * self.dimensions].copy_from_slice(src)
            }
            (VectorData::Int8(dst), VectorRef::Int8(src)) => {
                dst[slot * self.dimensions..(slot + 1) * self.dimensions].copy_from_slice(src)
            }
            (VectorData::Bit(dst), VectorRef::Bit(src)) => {
                let stride = self.dimensions / 8;
                dst[slot * stride..(slot + 1) * stride].copy_from_slice(src)
            }
            (_, other) => {
                return Err(VecError::TypeMismatch(format!(
                    "cannot store {} vector in this column",
                    other.element_type().name()
                )))
            }
        }
        Ok(())
    }

    fn byte_len(&self) -> usize {
        match &self.data {
            VectorData::Float32(v) => v.len() * 4,
            VectorData::Int8(v) => v.len(),
            VectorData::Bit(v) => v.len(),
        }
    }
}

/// Typed values of one metadata column
#[derive(Debug, Clone, Serialize, Deserialize)]
enum MetadataArray {
    Integer(Vec<i64>),
    Float(Vec<f64>),
    Text(Vec<String>),
    Boolean(Vec<bool>),
}

impl MetadataArray {
    fn new(ty: ScalarType, capacity: usize) -> Self {
        match ty {
            ScalarType::Integer => MetadataArray::Integer(vec![0; capacity]),
            ScalarType::Float => MetadataArray::Float(vec![0.0; capacity]),
            ScalarType::Boolean => MetadataArray::Boolean(vec![false; capacity]),
            ScalarType::Text | ScalarType::Blob => MetadataArray::Text(vec![String::new(); capacity]),
        }
    }

    fn get(&self, slot: usize) -> Value {
        match self {
            MetadataArray::Integer(v) => Value::Integer(v[slot]),
            MetadataArray::Float(v) => Value::Real(v[slot]),
            MetadataArray::Text(v) => Value::Text(v[slot].clone()),
            MetadataArray::Boolean(v) => Value::Integer(v[slot] as i64),
        }
    }

    fn set(&mut self, slot: usize, value: &Value) -> Result<()> {
        match (self, value) {
            (MetadataArray::Integer(v), Value::Integer(i)) => v[slot] = *i,
            (MetadataArray::Float(v), Value::Real(r)) => v[slot] = *r,
            (MetadataArray::Float(v), Value::Integer(i)) => v[slot] = *i as f64,
            (MetadataArray::Text(v), Value::Text(s)) => v[slot] = s.clone(),
            (MetadataArray::Boolean(v), Value::Integer(i)) => v[slot] = *i != 0,
            (_, other) => {
                return Err(VecError::TypeMismatch(format!(
                    "cannot store {} in metadata column",
                    other.type_name()
                )))
            }
        }
        Ok(())
    }

    fn is_numeric(&self) -> bool {
        matches!(self, MetadataArray::Integer(_) | MetadataArray::Float(_))
    }
}

/// Bounds of every value ever written to a numeric metadata column of a
/// chunk. Only widened on write, so it may be looser than the live rows.
/// Integer columns keep exact `i64` bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum NumericRange {
    Integer { min: i64, max: i64 },
    Float { min: f64, max: f64 },
}

impl NumericRange {
    pub fn min(&self) -> Value {
        match *self {
            NumericRange::Integer { min, .. } => Value::Integer(min),
            NumericRange::Float { min, .. } => Value::Real(min),
        }
    }

    pub fn max(&self) -> Value {
        match *self {
            NumericRange::Integer { max, .. } => Value::Integer(max),
            NumericRange::Float { max, .. } => Value::Real(max),
        }
    }

    fn widen(range: &mut Option<NumericRange>, value: &Value) {
        *range = match (*range, value) {
            (None, Value::Integer(i)) => Some(NumericRange::Integer { min: *i, max: *i }),
            (None, Value::Real(r)) => Some(NumericRange::Float { min: *r, max: *r }),
            (Some(NumericRange::Integer { min, max }), Value::Integer(i)) => Some(NumericRange::Integer {
                min: min.min(*i),
                max: max.max(*i),
            }),
            (Some(NumericRange::Float { min, max }), Value::Real(r)) => Some(NumericRange::Float {
                min: min.min(*r),
                max: max.max(*r),
            }),
            (unchanged, _) => unchanged,
        };
    }
}

/// One auxiliary value as seen from the chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AuxCell {
    Null,
    Inline(Value),
    /// Stored in the overflow area under this row's key
    Overflow { len: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    /// Partition key values shared by every row of the chunk
    pub partition: Vec<PartitionValue>,
    capacity: usize,
    rowids: Vec<RowId>,
    validity: Vec<u8>,
    live: usize,
    vectors: Vec<VectorArray>,
    metadata: Vec<MetadataArray>,
    summaries: Vec<Option<NumericRange>>,
    aux: Vec<Vec<AuxCell>>,
}

impl Chunk {
    /// Allocate an empty chunk sized for `schema`. Fails when the packed
    /// arrays would not be addressable.
    pub fn new(id: ChunkId, partition: Vec<PartitionValue>, schema: &TableSchema) -> Result<Self> {
        let capacity = schema.chunk_size;
        if capacity == 0 || capacity > MAX_CHUNK_SIZE {
            return Err(VecError::InvalidDefinition(format!(
                "chunk size {} is out of range (1..={})",
                capacity, MAX_CHUNK_SIZE
            )));
        }
        let mut vectors = Vec::new();
        let mut metadata = Vec::new();
        let mut aux = Vec::new();
        for column in &schema.columns {
            match column.kind {
                ColumnKind::Vector {
                    element, dimensions, ..
                } => vectors.push(VectorArray::new(element, dimensions, capacity)?),
                ColumnKind::Metadata(ty) => metadata.push(MetadataArray::new(ty, capacity)),
                ColumnKind::Auxiliary(_) => aux.push(vec![AuxCell::Null; capacity]),
                ColumnKind::PartitionKey(_) | ColumnKind::PrimaryKey => {}
            }
        }

        Ok(Self {
            id,
            partition,
            capacity,
            rowids: vec![0; capacity],
            validity: vec![0; capacity.div_ceil(8)],
            live: 0,
            summaries: vec![None; metadata.len()],
            vectors,
            metadata,
            aux,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn is_full(&self) -> bool {
        self.live >= self.capacity
    }

    #[inline]
    pub fn is_valid(&self, slot: usize) -> bool {
        slot < self.capacity && self.validity[slot / 8] & (1 << (slot % 8)) != 0
    }

    /// First unoccupied slot, scanning the validity bitmap
    pub fn first_free_slot(&self) -> Option<usize> {
        self.validity
            .iter()
            .enumerate()
            .find(|(_, byte)| **byte != 0xff)
            .map(|(i, byte)| i * 8 + byte.trailing_ones() as usize)
            .filter(|slot| *slot < self.capacity)
    }

    /// Occupied slots in ascending order
    pub fn live_slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.capacity).filter(move |slot| self.is_valid(*slot))
    }

    #[inline]
    pub fn rowid(&self, slot: usize) -> RowId {
        self.rowids[slot]
    }

    #[inline]
    pub fn vector(&self, column: usize, slot: usize) -> VectorRef<'_> {
        self.vectors[column].get(slot)
    }

    pub fn metadata(&self, column: usize, slot: usize) -> Value {
        self.metadata[column].get(slot)
    }

    pub fn summary(&self, column: usize) -> Option<NumericRange> {
        self.summaries[column]
    }

    pub fn aux_cell(&self, column: usize, slot: usize) -> &AuxCell {
        &self.aux[column][slot]
    }

    pub fn vector_bytes(&self) -> usize {
        self.vectors.iter().map(VectorArray::byte_len).sum()
    }

    pub(crate) fn occupy(&mut self, slot: usize, rowid: RowId) {
        if !self.is_valid(slot) {
            self.validity[slot / 8] |= 1 << (slot % 8);
            self.live += 1;
        }
        self.rowids[slot] = rowid;
    }

    pub(crate) fn vacate(&mut self, slot: usize) {
        if self.is_valid(slot) {
            self.validity[slot / 8] &= !(1 << (slot % 8));
            self.live -= 1;
        }
        for column in &mut self.aux {
            column[slot] = AuxCell::Null;
        }
    }

    pub(crate) fn set_vector(&mut self, column: usize, slot: usize, vector: &Vector) -> Result<()> {
        self.vectors[column].set(slot, vector.as_ref())
    }

    pub(crate) fn set_metadata(&mut self, column: usize, slot: usize, value: &Value) -> Result<()> {
        self.metadata[column].set(slot, value)?;
        if self.metadata[column].is_numeric() {
            let stored = self.metadata[column].get(slot);
            NumericRange::widen(&mut self.summaries[column], &stored);
        }
        Ok(())
    }

    pub(crate) fn set_aux_cell(&mut self, column: usize, slot: usize, cell: AuxCell) {
        self.aux[column][slot] = cell;
    }

    /// Copy every column of `src`'s slot into `dst_slot` of this chunk.
    /// Auxiliary cells are copied as-is; moving overflow records is the
    /// caller's job.
    pub(crate) fn copy_slot_from(&mut self, dst_slot: usize, src: &Chunk, src_slot: usize) -> Result<()> {
        self.occupy(dst_slot, src.rowid(src_slot));
        for column in 0..self.vectors.len() {
            self.vectors[column].set(dst_slot, src.vector(column, src_slot))?;
        }
        for column in 0..self.metadata.len() {
            let value = src.metadata(column, src_slot);
            self.set_metadata(column, dst_slot, &value)?;
        }
        for column in 0..self.aux.len() {
            self.aux[column][dst_slot] = src.aux_cell(column, src_slot).clone();
        }
        Ok(())
    }
}
