//! Append-only overflow area for large auxiliary payloads
//!
//! Records are appended to a single byte buffer and addressed by the owning
//! (chunk, slot, column). Replaced and removed records leave dead bytes
//! behind until the area is compacted.

use super::chunk::{ChunkId, RowLocation};
use crate::error::{Result, VecError};
use crate::types::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Dead space below this many bytes is never worth compacting
const COMPACT_MIN_DEAD_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OverflowKey {
    pub chunk_id: ChunkId,
    pub slot: usize,
    pub column: usize,
}

impl OverflowKey {
    pub fn new(location: RowLocation, column: usize) -> Self {
        Self {
            chunk_id: location.chunk_id,
            slot: location.slot,
            column,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum PayloadKind {
    Text,
    Blob,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Extent {
    offset: usize,
    len: usize,
    kind: PayloadKind,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverflowArea {
    data: Vec<u8>,
    records: BTreeMap<OverflowKey, Extent>,
    dead_bytes: usize,
    max_bytes: Option<usize>,
}

impl OverflowArea {
    pub fn new(max_bytes: Option<usize>) -> Self {
        Self {
            max_bytes,
            ..Default::default()
        }
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn live_bytes(&self) -> usize {
        self.data.len() - self.dead_bytes
    }

    pub fn dead_bytes(&self) -> usize {
        self.dead_bytes
    }

    pub fn contains(&self, key: &OverflowKey) -> bool {
        self.records.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &OverflowKey> {
        self.records.keys()
    }

    pub fn set_max_bytes(&mut self, max_bytes: Option<usize>) {
        self.max_bytes = max_bytes;
    }

    /// Check that `added` new live bytes fit once `freed` live bytes are
    /// released. Dead bytes never count against the limit since they can be
    /// compacted away.
    pub fn check_capacity(&self, added: usize, freed: usize) -> Result<()> {
        let Some(max) = self.max_bytes else {
            return Ok(());
        };
        let needed = (self.live_bytes() + added).saturating_sub(freed);
        if needed > max {
            return Err(VecError::ResourceExhausted(format!(
                "overflow area needs {} bytes, limit is {}",
                needed, max
            )));
        }
        Ok(())
    }

    /// Live length of the record under `key`, 0 when absent
    pub fn record_len(&self, key: &OverflowKey) -> usize {
        self.records.get(key).map(|e| e.len).unwrap_or(0)
    }

    /// Store `value` under `key`, replacing any previous record
    pub fn put(&mut self, key: OverflowKey, value: &Value) -> Result<()> {
        let (bytes, kind) = match value {
            Value::Text(s) => (s.as_bytes(), PayloadKind::Text),
            Value::Blob(b) => (b.as_slice(), PayloadKind::Blob),
            other => {
                return Err(VecError::TypeMismatch(format!(
                    "{} values are never stored out of line",
                    other.type_name()
                )))
            }
        };
        self.check_capacity(bytes.len(), self.record_len(&key))?;

        self.remove(&key);
        if let Some(max) = self.max_bytes {
            if self.data.len() + bytes.len() > max {
                self.compact();
            }
        }
        let extent = Extent {
            offset: self.data.len(),
            len: bytes.len(),
            kind,
        };
        self.data.extend_from_slice(bytes);
        self.records.insert(key, extent);
        Ok(())
    }

    pub fn get(&self, key: &OverflowKey) -> Result<Option<Value>> {
        let Some(extent) = self.records.get(key) else {
            return Ok(None);
        };
        let bytes = self
            .data
            .get(extent.offset..extent.offset + extent.len)
            .ok_or_else(|| {
                VecError::corruption(key.chunk_id, key.slot, "overflow record out of bounds")
            })?;
        let value = match extent.kind {
            PayloadKind::Blob => Value::Blob(bytes.to_vec()),
            PayloadKind::Text => Value::Text(String::from_utf8(bytes.to_vec()).map_err(|_| {
                VecError::corruption(key.chunk_id, key.slot, "overflow text is not valid UTF-8")
            })?),
        };
        Ok(Some(value))
    }

    /// Drop the record under `key`. Returns whether one existed.
    pub fn remove(&mut self, key: &OverflowKey) -> bool {
        match self.records.remove(key) {
            Some(extent) => {
                self.dead_bytes += extent.len;
                self.maybe_compact();
                true
            }
            None => false,
        }
    }

    /// Re-key records after rows moved. Records whose key is not moved are
    /// dropped.
    pub fn relocate(&mut self, moves: &[(OverflowKey, OverflowKey)]) {
        let mut records = BTreeMap::new();
        for (old, new) in moves {
            if let Some(extent) = self.records.remove(old) {
                records.insert(*new, extent);
            }
        }
        self.dead_bytes += self.records.values().map(|e| e.len).sum::<usize>();
        self.records = records;
    }

    fn maybe_compact(&mut self) {
        if self.dead_bytes >= COMPACT_MIN_DEAD_BYTES && self.dead_bytes > self.live_bytes() {
            self.compact();
        }
    }

    /// Rewrite the area without dead bytes
    pub fn compact(&mut self) {
        if self.dead_bytes == 0 {
            return;
        }
        let reclaimed = self.dead_bytes;
        let mut data = Vec::with_capacity(self.live_bytes());
        for extent in self.records.values_mut() {
            let start = data.len();
            data.extend_from_slice(&self.data[extent.offset..extent.offset + extent.len]);
            extent.offset = start;
        }
        self.data = data;
        self.dead_bytes = 0;
        debug!("Compacted overflow area, reclaimed {} bytes", reclaimed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(slot: usize) -> OverflowKey {
        OverflowKey {
            chunk_id: 0,
            slot,
            column: 0,
        }
    }

    #[test]
    fn test_put_get_replace() {
        let mut area = OverflowArea::new(None);
        area.put(key(0), &Value::Text("a".repeat(200))).unwrap();
        area.put(key(1), &Value::Blob(vec![7; 300])).unwrap();
        assert_eq!(area.record_count(), 2);
        assert_eq!(area.live_bytes(), 500);

        area.put(key(0), &Value::Text("b".repeat(150))).unwrap();
        assert_eq!(area.get(&key(0)).unwrap(), Some(Value::Text("b".repeat(150))));
        assert_eq!(area.live_bytes(), 450);
        assert_eq!(area.dead_bytes(), 200);
        assert_eq!(area.get(&key(9)).unwrap(), None);
    }

    #[test]
    fn test_remove_and_compact() {
        let mut area = OverflowArea::new(None);
        area.put(key(0), &Value::Text("x".repeat(500))).unwrap();
        area.put(key(1), &Value::Text("y".repeat(300))).unwrap();
        assert!(area.remove(&key(0)));
        assert!(!area.remove(&key(0)));
        assert_eq!(area.dead_bytes(), 500);

        area.compact();
        assert_eq!(area.dead_bytes(), 0);
        assert_eq!(area.live_bytes(), 300);
        assert_eq!(area.get(&key(1)).unwrap(), Some(Value::Text("y".repeat(300))));
    }

    #[test]
    fn test_dead_space_triggers_compaction() {
        let mut area = OverflowArea::new(None);
        area.put(key(0), &Value::Blob(vec![1; 5000])).unwrap();
        area.put(key(1), &Value::Blob(vec![2; 100])).unwrap();
        area.remove(&key(0));
        assert_eq!(area.dead_bytes(), 0);
        assert_eq!(area.live_bytes(), 100);
    }

    #[test]
    fn test_capacity_limit() {
        let mut area = OverflowArea::new(Some(1000));
        area.put(key(0), &Value::Blob(vec![0; 800])).unwrap();
        let err = area.put(key(1), &Value::Blob(vec![0; 300])).unwrap_err();
        assert!(matches!(err, VecError::ResourceExhausted(_)));
        assert!(err.is_retryable());
        assert_eq!(area.record_count(), 1);

        // replacing a record only needs the difference
        area.put(key(0), &Value::Blob(vec![0; 900])).unwrap();
        assert_eq!(area.live_bytes(), 900);
    }

    #[test]
    fn test_relocate() {
        let mut area = OverflowArea::new(None);
        area.put(key(0), &Value::Text("a".repeat(200))).unwrap();
        area.put(key(1), &Value::Text("b".repeat(200))).unwrap();
        area.relocate(&[(key(1), key(0))]);
        assert_eq!(area.record_count(), 1);
        assert_eq!(area.get(&key(0)).unwrap(), Some(Value::Text("b".repeat(200))));
        assert_eq!(area.dead_bytes(), 200);
    }
}
