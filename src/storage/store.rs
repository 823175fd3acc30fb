use super::chunk::{AuxCell, Chunk, ChunkId, RowLocation};
use super::index::{KeyIndex, RowidIndex};
use super::overflow::{OverflowArea, OverflowKey};
use crate::error::{Result, VecError};
use crate::schema::{ColumnDef, ColumnKind, TableSchema};
use crate::types::{PartitionValue, RowId, Value};
use crate::vector::Vector;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// A validated row, one entry per column of each kind in slot order
#[derive(Debug, Clone, PartialEq)]
pub struct RowData {
    pub vectors: Vec<Vector>,
    pub metadata: Vec<Value>,
    pub aux: Vec<Value>,
    pub partition: Vec<PartitionValue>,
    /// Text primary key, when the table declares one
    pub key: Option<String>,
}

/// An owned copy of a stored row
#[derive(Debug, Clone, PartialEq)]
pub struct RowView {
    pub rowid: RowId,
    pub location: RowLocation,
    pub vectors: Vec<Vector>,
    pub metadata: Vec<Value>,
    pub aux: Vec<Value>,
    pub partition: Vec<PartitionValue>,
    pub key: Option<String>,
}

/// Storage of one table: an arena of chunks, the rowid index, the text key
/// map and the overflow area
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkStore {
    schema: TableSchema,
    inline_threshold: usize,
    chunks: Vec<Chunk>,
    index: RowidIndex,
    keys: KeyIndex,
    overflow: OverflowArea,
}

impl ChunkStore {
    pub fn new(schema: TableSchema, inline_threshold: usize, max_overflow_bytes: Option<usize>) -> Self {
        Self {
            schema,
            inline_threshold,
            chunks: Vec::new(),
            index: RowidIndex::new(),
            keys: KeyIndex::new(),
            overflow: OverflowArea::new(max_overflow_bytes),
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn index(&self) -> &RowidIndex {
        &self.index
    }

    pub fn keys(&self) -> &KeyIndex {
        &self.keys
    }

    /// Rowid of the row holding text primary key `key`
    pub fn find_key(&self, key: &str) -> Option<RowId> {
        self.keys.find(key)
    }

    pub fn overflow(&self) -> &OverflowArea {
        &self.overflow
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn row_count(&self) -> usize {
        self.index.len()
    }

    /// Apply limits from the current configuration, e.g. after loading a snapshot
    pub fn configure(&mut self, inline_threshold: usize, max_overflow_bytes: Option<usize>) {
        self.inline_threshold = inline_threshold;
        self.overflow.set_max_bytes(max_overflow_bytes);
    }

    pub fn locate(&self, rowid: RowId) -> Option<RowLocation> {
        self.index.find(rowid)
    }

    pub fn chunk(&self, chunk_id: ChunkId) -> Option<&Chunk> {
        self.chunks.get(chunk_id as usize)
    }

    /// Whether `value` goes to the overflow area rather than inline
    pub fn spills(&self, value: &Value) -> bool {
        matches!(value, Value::Text(_) | Value::Blob(_)) && value.payload_len() > self.inline_threshold
    }

    /// Check the overflow area can absorb the given auxiliary writes.
    /// `replacing` holds, per written value, the location whose old record
    /// the write will free.
    pub fn check_overflow_capacity<'a>(
        &self,
        writes: impl IntoIterator<Item = (&'a Value, Option<OverflowKey>)>,
    ) -> Result<()> {
        let mut added = 0;
        let mut freed = 0;
        for (value, replacing) in writes {
            if self.spills(value) {
                added += value.payload_len();
            }
            if let Some(key) = replacing {
                freed += self.overflow.record_len(&key);
            }
        }
        if added == 0 {
            return Ok(());
        }
        self.overflow.check_capacity(added, freed)
    }

    /// Pick a free slot in a chunk of `partition`, allocating a new chunk
    /// when every chunk of the partition is full
    pub fn allocate_slot(&mut self, partition: &[PartitionValue]) -> Result<RowLocation> {
        let reusable = self
            .chunks
            .iter()
            .find(|c| c.partition.as_slice() == partition && !c.is_full())
            .and_then(|c| c.first_free_slot().map(|slot| (c.id, slot)));
        if let Some((chunk_id, slot)) = reusable {
            return Ok(RowLocation { chunk_id, slot });
        }

        let chunk_id = self.chunks.len() as ChunkId;
        self.chunks
            .push(Chunk::new(chunk_id, partition.to_vec(), &self.schema)?);
        debug!(
            "Allocated chunk {} ({} slots) for partition {:?}",
            chunk_id, self.schema.chunk_size, partition
        );
        Ok(RowLocation { chunk_id, slot: 0 })
    }

    /// Write a validated row into a slot returned by [`allocate_slot`](Self::allocate_slot)
    pub fn write_row(&mut self, location: RowLocation, rowid: RowId, row: &RowData) -> Result<()> {
        if self.index.contains(rowid) {
            return Err(VecError::DuplicateRowid(rowid));
        }
        if let Some(key) = row.key.as_deref() {
            if self.keys.find(key).is_some() {
                return Err(VecError::DuplicateKey(key.to_string()));
            }
        }
        {
            let chunk = self.chunk_mut(location)?;
            if chunk.is_valid(location.slot) {
                return Err(VecError::corruption(
                    location.chunk_id,
                    location.slot,
                    "slot is already occupied",
                ));
            }
            for (column, vector) in row.vectors.iter().enumerate() {
                chunk.set_vector(column, location.slot, vector)?;
            }
            for (column, value) in row.metadata.iter().enumerate() {
                chunk.set_metadata(column, location.slot, value)?;
            }
            chunk.occupy(location.slot, rowid);
        }
        for (column, value) in row.aux.iter().enumerate() {
            self.write_aux(location, column, value)?;
        }
        if let Some(key) = row.key.as_deref() {
            self.keys.insert(key, rowid)?;
        }
        self.index.insert(rowid, location)
    }

    pub fn update_vector(&mut self, location: RowLocation, column: usize, vector: &Vector) -> Result<()> {
        self.live_chunk_mut(location)?
            .set_vector(column, location.slot, vector)
    }

    pub fn update_metadata(&mut self, location: RowLocation, column: usize, value: &Value) -> Result<()> {
        self.live_chunk_mut(location)?
            .set_metadata(column, location.slot, value)
    }

    pub fn update_aux(&mut self, location: RowLocation, column: usize, value: &Value) -> Result<()> {
        self.live_chunk_mut(location)?;
        self.write_aux(location, column, value)
    }

    /// Store an auxiliary value inline or out of line, dropping whatever the
    /// cell held before
    fn write_aux(&mut self, location: RowLocation, column: usize, value: &Value) -> Result<()> {
        let key = OverflowKey::new(location, column);
        let cell = if value.is_null() {
            self.overflow.remove(&key);
            AuxCell::Null
        } else if self.spills(value) {
            self.overflow.put(key, value)?;
            AuxCell::Overflow {
                len: value.payload_len(),
            }
        } else {
            self.overflow.remove(&key);
            AuxCell::Inline(value.clone())
        };
        self.chunk_mut(location)?
            .set_aux_cell(column, location.slot, cell);
        Ok(())
    }

    /// Resolve one auxiliary value, fetching overflow records as needed
    pub fn aux_value(&self, location: RowLocation, column: usize) -> Result<Value> {
        let chunk = self.live_chunk(location)?;
        match chunk.aux_cell(column, location.slot) {
            AuxCell::Null => Ok(Value::Null),
            AuxCell::Inline(value) => Ok(value.clone()),
            AuxCell::Overflow { .. } => self
                .overflow
                .get(&OverflowKey::new(location, column))?
                .ok_or_else(|| {
                    VecError::corruption(location.chunk_id, location.slot, "missing overflow record")
                }),
        }
    }

    /// Resolve the value of one declared column of a live row
    pub fn column_value(&self, location: RowLocation, column: &ColumnDef) -> Result<Value> {
        let chunk = self.live_chunk(location)?;
        match column.kind {
            ColumnKind::Vector { .. } => Ok(Value::Vector(
                chunk.vector(column.slot, location.slot).to_vector(),
            )),
            ColumnKind::Metadata(_) => Ok(chunk.metadata(column.slot, location.slot)),
            ColumnKind::Auxiliary(_) => self.aux_value(location, column.slot),
            ColumnKind::PartitionKey(_) => chunk
                .partition
                .get(column.slot)
                .map(PartitionValue::to_value)
                .ok_or_else(|| {
                    VecError::corruption(location.chunk_id, location.slot, "chunk is missing a partition value")
                }),
            ColumnKind::PrimaryKey => self
                .keys
                .key_of(chunk.rowid(location.slot))
                .map(Value::from)
                .ok_or_else(|| {
                    VecError::corruption(location.chunk_id, location.slot, "row has no primary key")
                }),
        }
    }

    pub fn read_row(&self, location: RowLocation) -> Result<RowView> {
        let chunk = self.live_chunk(location)?;
        let slot = location.slot;
        let vectors = self
            .schema
            .vector_columns()
            .map(|c| chunk.vector(c.slot, slot).to_vector())
            .collect();
        let metadata = self
            .schema
            .metadata_columns()
            .map(|c| chunk.metadata(c.slot, slot))
            .collect();
        let aux = self
            .schema
            .auxiliary_columns()
            .map(|c| self.aux_value(location, c.slot))
            .collect::<Result<Vec<_>>>()?;

        Ok(RowView {
            rowid: chunk.rowid(slot),
            location,
            vectors,
            metadata,
            aux,
            partition: chunk.partition.clone(),
            key: self.keys.key_of(chunk.rowid(slot)).map(str::to_string),
        })
    }

    /// Vacate a slot, releasing its index entry and overflow records
    pub fn mark_deleted(&mut self, location: RowLocation) -> Result<()> {
        let aux_columns = self.schema.auxiliary_columns().count();
        let rowid = self.live_chunk(location)?.rowid(location.slot);
        for column in 0..aux_columns {
            self.overflow.remove(&OverflowKey::new(location, column));
        }
        self.chunk_mut(location)?.vacate(location.slot);
        self.index.remove(rowid);
        self.keys.remove(rowid);
        Ok(())
    }

    /// Chunks whose partition tuple matches every `(partition slot, value)`
    /// pair, in chunk id order
    pub fn scan_chunks<'a>(
        &'a self,
        partition: &'a [(usize, PartitionValue)],
    ) -> impl Iterator<Item = &'a Chunk> + 'a {
        self.chunks.iter().filter(move |chunk| {
            partition
                .iter()
                .all(|(slot, value)| chunk.partition.get(*slot) == Some(value))
        })
    }

    /// Rewrite every live row densely into fresh chunks, ordered by
    /// partition then rowid
    pub fn vacuum(&mut self) -> Result<()> {
        let dangling = self.index.iter().find(|(_, location)| {
            !self
                .chunk(location.chunk_id)
                .is_some_and(|c| c.is_valid(location.slot))
        });
        if let Some((_, from)) = dangling {
            return Err(self.corrupt(from, "rowid index points at a slot that is not live"));
        }

        let old = std::mem::take(&mut self.chunks);
        let mut entries: Vec<(RowId, RowLocation)> = self.index.iter().collect();
        entries.sort_by(|a, b| {
            let pa = &old[a.1.chunk_id as usize].partition;
            let pb = &old[b.1.chunk_id as usize].partition;
            pa.cmp(pb).then(a.0.cmp(&b.0))
        });

        let aux_columns = self.schema.auxiliary_columns().count();
        let mut moves = Vec::new();
        self.index.clear();

        for (rowid, from) in entries {
            let src = old.get(from.chunk_id as usize).ok_or_else(|| {
                VecError::corruption(from.chunk_id, from.slot, "rowid index points past the last chunk")
            })?;
            let to = self.allocate_slot(&src.partition)?;
            self.chunk_mut(to)?.copy_slot_from(to.slot, src, from.slot)?;
            for column in 0..aux_columns {
                if matches!(src.aux_cell(column, from.slot), AuxCell::Overflow { .. }) {
                    moves.push((OverflowKey::new(from, column), OverflowKey::new(to, column)));
                }
            }
            self.index.insert(rowid, to)?;
        }

        self.overflow.relocate(&moves);
        self.overflow.compact();
        info!(
            "Vacuumed {} rows from {} chunks into {}",
            self.index.len(),
            old.len(),
            self.chunks.len()
        );
        Ok(())
    }

    /// Check the rowid index, chunk validity bitmaps and overflow records
    /// agree with each other
    pub fn verify(&self) -> Result<()> {
        for (rowid, location) in self.index.iter() {
            let chunk = self.live_chunk(location)?;
            if chunk.rowid(location.slot) != rowid {
                return Err(self.corrupt(location, format!(
                    "slot holds rowid {} but index says {}",
                    chunk.rowid(location.slot),
                    rowid
                )));
            }
        }

        let aux_columns = self.schema.auxiliary_columns().count();
        let mut live = 0;
        for chunk in &self.chunks {
            let slots: Vec<usize> = chunk.live_slots().collect();
            if slots.len() != chunk.live_count() {
                return Err(self.corrupt(
                    RowLocation { chunk_id: chunk.id, slot: 0 },
                    format!("live count {} disagrees with bitmap ({})", chunk.live_count(), slots.len()),
                ));
            }
            for slot in slots {
                let location = RowLocation { chunk_id: chunk.id, slot };
                if self.index.find(chunk.rowid(slot)) != Some(location) {
                    return Err(self.corrupt(location, "live slot is missing from the rowid index"));
                }
                for column in 0..aux_columns {
                    let spilled = matches!(chunk.aux_cell(column, slot), AuxCell::Overflow { .. });
                    if spilled != self.overflow.contains(&OverflowKey::new(location, column)) {
                        return Err(self.corrupt(location, "overflow marker without matching record"));
                    }
                }
            }
            live += chunk.live_count();
        }

        if live != self.index.len() {
            return Err(VecError::StorageCorruption {
                chunk_id: 0,
                slot: 0,
                detail: format!("{} live slots but {} indexed rows", live, self.index.len()),
            });
        }
        if self.schema.primary_key().is_some() || !self.keys.is_empty() {
            if self.keys.len() != self.index.len() {
                return Err(VecError::StorageCorruption {
                    chunk_id: 0,
                    slot: 0,
                    detail: format!("{} primary keys but {} indexed rows", self.keys.len(), self.index.len()),
                });
            }
            if let Some((key, rowid)) = self.keys.iter().find(|(_, rowid)| !self.index.contains(*rowid)) {
                return Err(VecError::StorageCorruption {
                    chunk_id: 0,
                    slot: 0,
                    detail: format!("primary key '{}' maps to missing rowid {}", key, rowid),
                });
            }
        }
        if let Some(key) = self.overflow.keys().find(|k| {
            !self
                .chunk(k.chunk_id)
                .is_some_and(|c| c.is_valid(k.slot))
        }) {
            return Err(VecError::corruption(key.chunk_id, key.slot, "orphaned overflow record"));
        }
        Ok(())
    }

    fn corrupt(&self, location: RowLocation, detail: impl Into<String>) -> VecError {
        let err = VecError::corruption(location.chunk_id, location.slot, detail);
        warn!("{}", err);
        err
    }

    fn chunk_mut(&mut self, location: RowLocation) -> Result<&mut Chunk> {
        self.chunks
            .get_mut(location.chunk_id as usize)
            .ok_or_else(|| VecError::corruption(location.chunk_id, location.slot, "no such chunk"))
    }

    fn live_chunk(&self, location: RowLocation) -> Result<&Chunk> {
        let chunk = self.chunk(location.chunk_id).ok_or_else(|| {
            VecError::corruption(location.chunk_id, location.slot, "no such chunk")
        })?;
        if !chunk.is_valid(location.slot) {
            return Err(self.corrupt(location, "slot is not live"));
        }
        Ok(chunk)
    }

    fn live_chunk_mut(&mut self, location: RowLocation) -> Result<&mut Chunk> {
        self.live_chunk(location)?;
        self.chunk_mut(location)
    }
}
