use super::chunk::RowLocation;
use crate::error::{Result, VecError};
use crate::types::RowId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered rowid -> location map (primary key)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RowidIndex {
    entries: BTreeMap<RowId, RowLocation>,
}

impl RowidIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry into the index
    pub fn insert(&mut self, rowid: RowId, location: RowLocation) -> Result<()> {
        if self.entries.contains_key(&rowid) {
            return Err(VecError::DuplicateRowid(rowid));
        }
        self.entries.insert(rowid, location);
        Ok(())
    }

    /// Find an entry in the index
    pub fn find(&self, rowid: RowId) -> Option<RowLocation> {
        self.entries.get(&rowid).copied()
    }

    pub fn contains(&self, rowid: RowId) -> bool {
        self.entries.contains_key(&rowid)
    }

    /// Remove an entry from the index
    pub fn remove(&mut self, rowid: RowId) -> Option<RowLocation> {
        self.entries.remove(&rowid)
    }

    /// Largest rowid in use
    pub fn max_rowid(&self) -> Option<RowId> {
        self.entries.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending rowid order
    pub fn iter(&self) -> impl Iterator<Item = (RowId, RowLocation)> + '_ {
        self.entries.iter().map(|(r, l)| (*r, *l))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Bidirectional text key <-> rowid map for tables with a `text primary key`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyIndex {
    by_key: BTreeMap<String, RowId>,
    by_rowid: BTreeMap<RowId, String>,
}

impl KeyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, rowid: RowId) -> Result<()> {
        if self.by_key.contains_key(key) {
            return Err(VecError::DuplicateKey(key.to_string()));
        }
        self.by_key.insert(key.to_string(), rowid);
        self.by_rowid.insert(rowid, key.to_string());
        Ok(())
    }

    /// Rowid of the row holding `key`
    pub fn find(&self, key: &str) -> Option<RowId> {
        self.by_key.get(key).copied()
    }

    pub fn key_of(&self, rowid: RowId) -> Option<&str> {
        self.by_rowid.get(&rowid).map(String::as_str)
    }

    pub fn remove(&mut self, rowid: RowId) -> Option<String> {
        let key = self.by_rowid.remove(&rowid)?;
        self.by_key.remove(&key);
        Some(key)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Entries in ascending key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, RowId)> + '_ {
        self.by_key.iter().map(|(k, r)| (k.as_str(), *r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(chunk_id: u64, slot: usize) -> RowLocation {
        RowLocation { chunk_id, slot }
    }

    #[test]
    fn test_insert_find_remove() {
        let mut index = RowidIndex::new();
        index.insert(5, loc(0, 0)).unwrap();
        index.insert(-3, loc(0, 1)).unwrap();

        assert_eq!(index.find(5), Some(loc(0, 0)));
        assert!(matches!(index.insert(5, loc(1, 0)), Err(VecError::DuplicateRowid(5))));
        assert_eq!(index.max_rowid(), Some(5));
        assert_eq!(index.iter().map(|(r, _)| r).collect::<Vec<_>>(), vec![-3, 5]);

        assert_eq!(index.remove(5), Some(loc(0, 0)));
        assert_eq!(index.find(5), None);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_key_index() {
        let mut keys = KeyIndex::new();
        keys.insert("alpha", 1).unwrap();
        keys.insert("beta", 2).unwrap();
        assert!(matches!(keys.insert("alpha", 3), Err(VecError::DuplicateKey(k)) if k == "alpha"));

        assert_eq!(keys.find("beta"), Some(2));
        assert_eq!(keys.key_of(1), Some("alpha"));
        assert_eq!(keys.remove(1), Some("alpha".to_string()));
        assert_eq!(keys.find("alpha"), None);
        assert_eq!(keys.remove(1), None);
        assert_eq!(keys.iter().collect::<Vec<_>>(), vec![("beta", 2)]);
    }
}
