//! Exact k-nearest-neighbour search over chunked storage
//!
//! Every live row that passes the filters is scored once. A bounded max-heap
//! keeps the k best candidates seen so far, so memory stays O(k) regardless
//! of table size.

use super::filter::BoundFilter;
use crate::error::{Result, VecError};
use crate::storage::{ChunkStore, RowLocation};
use crate::types::{CosineZeroNorm, PartitionValue, RowId};
use crate::vector::distance::{finish, score};
use crate::vector::{DistanceMetric, Vector};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::debug;

/// Cancellation flag shared between a running query and whoever wants to stop it
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the running query to stop at its next check
    pub fn interrupt(&self) {
        self.0.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(AtomicOrdering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, AtomicOrdering::SeqCst);
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_interrupted() {
            Err(VecError::Interrupted)
        } else {
            Ok(())
        }
    }
}

/// One KNN result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub rowid: RowId,
    pub location: RowLocation,
    pub distance: f64,
}

/// Heap entry ordered by (score, rowid)
#[derive(Debug, Clone, Copy)]
struct Candidate {
    score: f64,
    rowid: RowId,
    location: RowLocation,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then(self.rowid.cmp(&other.rowid))
    }
}

/// The k smallest candidates seen so far
struct TopK {
    k: usize,
    heap: BinaryHeap<Candidate>,
}

impl TopK {
    fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k.min(4096) + 1),
        }
    }

    #[inline]
    fn push(&mut self, candidate: Candidate) {
        if self.heap.len() < self.k {
            self.heap.push(candidate);
        } else if let Some(mut worst) = self.heap.peek_mut() {
            if candidate < *worst {
                *worst = candidate;
            }
        }
    }

    /// Candidates in ascending (score, rowid) order
    fn into_sorted(self) -> Vec<Candidate> {
        self.heap.into_sorted_vec()
    }
}

/// Parameters of one KNN scan
pub struct KnnQuery<'a> {
    /// Vector column slot
    pub column: usize,
    pub query: &'a Vector,
    pub k: usize,
    pub metric: DistanceMetric,
    pub filters: &'a [BoundFilter],
    pub partition: &'a [(usize, PartitionValue)],
    pub zero_norm: CosineZeroNorm,
}

/// Scan every chunk and return the k nearest rows, nearest first. Ties are
/// broken by ascending rowid.
pub fn search(store: &ChunkStore, query: &KnnQuery<'_>, interrupt: Option<&Interrupt>) -> Result<Vec<Neighbor>> {
    let k = query.k.min(store.row_count());
    if k == 0 {
        return Ok(Vec::new());
    }

    let mut top = TopK::new(k);
    let mut scanned = 0usize;
    let target = query.query.as_ref();

    for chunk in store.scan_chunks(query.partition) {
        if let Some(interrupt) = interrupt {
            interrupt.check()?;
        }
        if chunk.live_count() == 0 || !query.filters.iter().all(|f| f.may_match_chunk(chunk)) {
            continue;
        }

        for slot in chunk.live_slots() {
            if !query.filters.iter().all(|f| f.matches(chunk, slot)) {
                continue;
            }
            let s = score(chunk.vector(query.column, slot), target, query.metric, query.zero_norm)?;
            top.push(Candidate {
                score: s,
                rowid: chunk.rowid(slot),
                location: RowLocation {
                    chunk_id: chunk.id,
                    slot,
                },
            });
            scanned += 1;
        }
    }

    let neighbors: Vec<Neighbor> = top
        .into_sorted()
        .into_iter()
        .map(|c| Neighbor {
            rowid: c.rowid,
            location: c.location,
            distance: finish(c.score, query.metric),
        })
        .collect();
    debug!(
        "KNN scored {} rows, returning {} (k = {})",
        scanned,
        neighbors.len(),
        query.k
    );
    Ok(neighbors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::filter::{FilterCondition, FilterTarget};
    use crate::schema::TableSchema;
    use crate::storage::RowData;
    use crate::types::Value;

    fn build(rows: &[(RowId, [f32; 2], i64)]) -> ChunkStore {
        let schema = TableSchema::parse("v float[2], category integer, chunk_size=8", 1024).unwrap();
        let mut store = ChunkStore::new(schema, 128, None);
        for (rowid, v, category) in rows {
            let data = RowData {
                vectors: vec![Vector::Float32(v.to_vec())],
                metadata: vec![Value::Integer(*category)],
                aux: vec![],
                partition: vec![],
                key: None,
            };
            let location = store.allocate_slot(&[]).unwrap();
            store.write_row(location, *rowid, &data).unwrap();
        }
        store
    }

    fn knn<'a>(query: &'a Vector, k: usize, filters: &'a [BoundFilter]) -> KnnQuery<'a> {
        KnnQuery {
            column: 0,
            query,
            k,
            metric: DistanceMetric::L2,
            filters,
            partition: &[],
            zero_norm: CosineZeroNorm::MaxDistance,
        }
    }

    #[test]
    fn test_top_k_order_and_ties() {
        let store = build(&[
            (5, [1.0, 0.0], 0),
            (2, [0.0, 1.0], 0),
            (9, [3.0, 4.0], 0),
            (1, [0.0, 0.0], 0),
        ]);
        let q = Vector::Float32(vec![0.0, 0.0]);
        let result = search(&store, &knn(&q, 3, &[]), None).unwrap();

        let rowids: Vec<RowId> = result.iter().map(|n| n.rowid).collect();
        assert_eq!(rowids, vec![1, 2, 5]);
        assert_eq!(result[0].distance, 0.0);
        assert_eq!(result[1].distance, 1.0);
    }

    #[test]
    fn test_k_clamped_and_zero() {
        let store = build(&[(1, [0.0, 0.0], 0), (2, [1.0, 1.0], 0)]);
        let q = Vector::Float32(vec![0.0, 0.0]);
        assert_eq!(search(&store, &knn(&q, 100, &[]), None).unwrap().len(), 2);
        assert!(search(&store, &knn(&q, 0, &[]), None).unwrap().is_empty());
    }

    #[test]
    fn test_filters_apply_per_candidate() {
        let rows: Vec<(RowId, [f32; 2], i64)> =
            (0..20).map(|i| (i, [i as f32, 0.0], i % 2)).collect();
        let store = build(&rows);
        let filters = [BoundFilter {
            target: FilterTarget::Metadata(0),
            condition: FilterCondition::Eq(Value::Integer(1)),
        }];
        let q = Vector::Float32(vec![0.0, 0.0]);
        let result = search(&store, &knn(&q, 3, &filters), None).unwrap();
        let rowids: Vec<RowId> = result.iter().map(|n| n.rowid).collect();
        assert_eq!(rowids, vec![1, 3, 5]);
    }

    #[test]
    fn test_interrupted_scan() {
        let store = build(&[(1, [0.0, 0.0], 0)]);
        let interrupt = Interrupt::new();
        interrupt.interrupt();
        let q = Vector::Float32(vec![0.0, 0.0]);
        assert!(matches!(
            search(&store, &knn(&q, 1, &[]), Some(&interrupt)),
            Err(VecError::Interrupted)
        ));
        interrupt.reset();
        assert_eq!(search(&store, &knn(&q, 1, &[]), Some(&interrupt)).unwrap().len(), 1);
    }
}
