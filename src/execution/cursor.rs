//! Result cursors
//!
//! A cursor borrows a table's storage for the duration of one query. It is
//! planned once, then positioned on the first matching row; `advance` moves it
//! forward until it is exhausted. Full scans are lazy, KNN results are
//! computed eagerly on `begin` and replayed one row per step.

use super::filter::{BoundFilter, FilterCondition, FilterTarget};
use super::knn::{self, Interrupt, KnnQuery};
use super::planner::{self, Constraint, QueryPlan, Strategy};
use crate::error::{Result, VecError};
use crate::storage::{Chunk, ChunkId, ChunkStore, RowLocation};
use crate::types::{CosineZeroNorm, PartitionValue, RowId, Value};
use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Idle,
    Planned,
    Iterating,
    Exhausted,
}

/// One output column of a cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projected {
    Rowid,
    Distance,
    /// Declared column by schema index
    Column(usize),
}

/// A projected result row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub rowid: RowId,
    /// Distance to the query vector, only for KNN results
    pub distance: Option<f64>,
    /// Projected columns as (name, value) in projection order
    pub values: Vec<(String, Value)>,
}

impl ResultRow {
    /// Look up a projected value by column name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Render the row as a JSON object
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("rowid".into(), self.rowid.into());
        if let Some(d) = self.distance {
            map.insert("distance".into(), d.into());
        }
        for (name, value) in &self.values {
            map.insert(name.clone(), value.to_json());
        }
        serde_json::Value::Object(map)
    }
}

#[derive(Debug, Clone, Copy)]
struct Hit {
    rowid: RowId,
    location: RowLocation,
    distance: Option<f64>,
}

#[derive(Debug, Default)]
struct ScanPosition {
    chunks: Vec<ChunkId>,
    chunk: usize,
    slot: usize,
}

pub struct Cursor<'a> {
    store: &'a ChunkStore,
    zero_norm: CosineZeroNorm,
    interrupt: Option<Interrupt>,
    projection: Vec<Projected>,
    state: CursorState,
    plan: Option<QueryPlan>,
    buffered: VecDeque<Hit>,
    scan: Option<ScanPosition>,
    current: Option<Hit>,
}

impl<'a> Cursor<'a> {
    pub fn new(store: &'a ChunkStore, zero_norm: CosineZeroNorm) -> Self {
        let projection = (0..store.schema().columns.len()).map(Projected::Column).collect();
        Self {
            store,
            zero_norm,
            interrupt: None,
            projection,
            state: CursorState::Idle,
            plan: None,
            buffered: VecDeque::new(),
            scan: None,
            current: None,
        }
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    /// Restrict the output to the named columns. `rowid` (or its alias) and
    /// `distance` may be named as well.
    pub fn with_projection<S: AsRef<str>>(mut self, names: &[S]) -> Result<Self> {
        let schema = self.store.schema();
        self.projection = names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                if schema.is_rowid(name) {
                    Ok(Projected::Rowid)
                } else if name.eq_ignore_ascii_case("distance") {
                    Ok(Projected::Distance)
                } else {
                    schema
                        .column_index(name)
                        .map(Projected::Column)
                        .ok_or_else(|| VecError::InvalidQuery(format!("no such column: {}", name)))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self)
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn plan(&self) -> Option<&QueryPlan> {
        self.plan.as_ref()
    }

    /// Names of the projected columns, in output order
    pub fn column_names(&self) -> Vec<String> {
        self.projection.iter().map(|p| self.projected_name(*p)).collect()
    }

    fn projected_name(&self, projected: Projected) -> String {
        let schema = self.store.schema();
        match projected {
            Projected::Rowid => schema.rowid_alias.clone().unwrap_or_else(|| "rowid".into()),
            Projected::Distance => "distance".into(),
            Projected::Column(i) => schema.column(i).name.clone(),
        }
    }

    /// Plan the query and position the cursor on its first row
    pub fn begin(&mut self, constraints: &[Constraint]) -> Result<()> {
        self.reset();
        let mut plan = planner::plan(self.store.schema(), constraints, self.store.row_count())?;
        self.resolve_key(&mut plan);
        self.plan = Some(plan);
        self.state = CursorState::Planned;

        if let Err(e) = self.start() {
            self.reset();
            self.state = CursorState::Exhausted;
            return Err(e);
        }
        Ok(())
    }

    /// Turn a text primary key restriction into a rowid filter. A key with
    /// no row resolves to a filter nothing passes.
    fn resolve_key(&self, plan: &mut QueryPlan) {
        let Some(key) = plan.key.as_deref() else {
            return;
        };
        let rowid = self.store.find_key(key);
        plan.filters.push(BoundFilter {
            target: FilterTarget::Rowid,
            condition: FilterCondition::In(rowid.map(Value::Integer).into_iter().collect()),
        });
        if let Some(rowid) = rowid {
            if matches!(plan.strategy, Strategy::Key(_)) {
                plan.strategy = Strategy::Point(rowid);
            }
        }
    }

    fn start(&mut self) -> Result<()> {
        let Some(plan) = self.plan.as_ref() else {
            return Err(VecError::InvalidQuery("cursor has no plan".into()));
        };

        match &plan.strategy {
            Strategy::Knn {
                column,
                query,
                k,
                metric,
            } => {
                let request = KnnQuery {
                    column: self.store.schema().column(*column).slot,
                    query,
                    k: *k,
                    metric: *metric,
                    filters: &plan.filters,
                    partition: &plan.partition,
                    zero_norm: self.zero_norm,
                };
                let neighbors = knn::search(self.store, &request, self.interrupt.as_ref())?;
                self.buffered = neighbors
                    .into_iter()
                    .map(|n| Hit {
                        rowid: n.rowid,
                        location: n.location,
                        distance: Some(n.distance),
                    })
                    .collect();
            }
            Strategy::Point(rowid) => {
                if let Some(location) = self.store.locate(*rowid) {
                    let chunk = self.store.chunk(location.chunk_id).ok_or_else(|| {
                        VecError::corruption(location.chunk_id, location.slot, "no such chunk")
                    })?;
                    if passes(chunk, location.slot, &plan.partition, &plan.filters) {
                        self.buffered.push_back(Hit {
                            rowid: *rowid,
                            location,
                            distance: None,
                        });
                    }
                }
            }
            // unknown key
            Strategy::Key(_) => {}
            Strategy::FullScan => {
                self.scan = Some(ScanPosition {
                    chunks: self.store.scan_chunks(&plan.partition).map(|c| c.id).collect(),
                    ..Default::default()
                });
            }
        }

        self.state = CursorState::Iterating;
        self.step()
    }

    /// Move to the next row. Advancing an exhausted cursor is a no-op.
    pub fn advance(&mut self) -> Result<()> {
        if self.state != CursorState::Iterating {
            return Ok(());
        }
        let result = self.step();
        if result.is_err() {
            self.reset();
            self.state = CursorState::Exhausted;
        }
        result
    }

    fn step(&mut self) -> Result<()> {
        self.current = if self.scan.is_some() {
            self.next_scanned()?
        } else {
            self.buffered.pop_front()
        };
        if self.current.is_none() {
            self.reset();
            self.state = CursorState::Exhausted;
        }
        Ok(())
    }

    fn next_scanned(&mut self) -> Result<Option<Hit>> {
        let (Some(scan), Some(plan)) = (self.scan.as_mut(), self.plan.as_ref()) else {
            return Ok(None);
        };

        while let Some(&chunk_id) = scan.chunks.get(scan.chunk) {
            let chunk = self.store.chunk(chunk_id).ok_or_else(|| {
                VecError::corruption(chunk_id, 0, "scanned chunk disappeared")
            })?;
            if scan.slot == 0 {
                if let Some(interrupt) = &self.interrupt {
                    interrupt.check()?;
                }
                if !plan.filters.iter().all(|f| f.may_match_chunk(chunk)) {
                    scan.chunk += 1;
                    continue;
                }
            }

            while scan.slot < chunk.capacity() {
                let slot = scan.slot;
                scan.slot += 1;
                if chunk.is_valid(slot) && plan.filters.iter().all(|f| f.matches(chunk, slot)) {
                    return Ok(Some(Hit {
                        rowid: chunk.rowid(slot),
                        location: RowLocation { chunk_id, slot },
                        distance: None,
                    }));
                }
            }
            scan.chunk += 1;
            scan.slot = 0;
        }
        Ok(None)
    }

    fn reset(&mut self) {
        self.buffered = VecDeque::new();
        self.scan = None;
        self.current = None;
    }

    pub fn eof(&self) -> bool {
        self.current.is_none()
    }

    pub fn rowid(&self) -> Result<RowId> {
        self.current
            .map(|h| h.rowid)
            .ok_or_else(|| VecError::InvalidQuery("cursor is not positioned on a row".into()))
    }

    pub fn distance(&self) -> Option<f64> {
        self.current.and_then(|h| h.distance)
    }

    /// Value of a declared column (schema index) for the current row.
    /// Auxiliary values are fetched here, never during the scan.
    pub fn column(&self, index: usize) -> Result<Value> {
        let hit = self
            .current
            .ok_or_else(|| VecError::InvalidQuery("cursor is not positioned on a row".into()))?;
        let schema = self.store.schema();
        if index >= schema.columns.len() {
            return Err(VecError::InvalidQuery(format!("column index {} out of range", index)));
        }
        self.store.column_value(hit.location, schema.column(index))
    }

    /// The current row with the cursor's projection applied
    pub fn row(&self) -> Result<ResultRow> {
        let hit = self
            .current
            .ok_or_else(|| VecError::InvalidQuery("cursor is not positioned on a row".into()))?;
        let values = self
            .projection
            .iter()
            .map(|p| {
                let value = match p {
                    Projected::Rowid => Value::Integer(hit.rowid),
                    Projected::Distance => hit.distance.map(Value::Real).unwrap_or(Value::Null),
                    Projected::Column(i) => self.column(*i)?,
                };
                Ok((self.projected_name(*p), value))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ResultRow {
            rowid: hit.rowid,
            distance: hit.distance,
            values,
        })
    }
}

impl Iterator for Cursor<'_> {
    type Item = Result<ResultRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.eof() {
            return None;
        }
        let row = self.row();
        if let Err(e) = self.advance() {
            return Some(Err(e));
        }
        Some(row)
    }
}

fn passes(chunk: &Chunk, slot: usize, partition: &[(usize, PartitionValue)], filters: &[BoundFilter]) -> bool {
    chunk.is_valid(slot)
        && partition
            .iter()
            .all(|(i, value)| chunk.partition.get(*i) == Some(value))
        && filters.iter().all(|f| f.matches(chunk, slot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::filter::FilterCondition;
    use crate::schema::TableSchema;
    use crate::storage::RowData;
    use crate::vector::Vector;

    fn store() -> ChunkStore {
        let schema = TableSchema::parse(
            "v float[2], category integer, user text partition key, +note text, chunk_size=8",
            1024,
        )
        .unwrap();
        let mut store = ChunkStore::new(schema, 16, None);
        for i in 0..20i64 {
            let user = if i < 10 { "alice" } else { "bob" };
            let data = RowData {
                vectors: vec![Vector::Float32(vec![i as f32, 0.0])],
                metadata: vec![Value::Integer(i % 3)],
                aux: vec![Value::from(format!("note {}", i))],
                partition: vec![PartitionValue::Text(user.into())],
                key: None,
            };
            let location = store.allocate_slot(&data.partition).unwrap();
            store.write_row(location, i, &data).unwrap();
        }
        store
    }

    fn rowids(cursor: Cursor<'_>) -> Vec<RowId> {
        cursor.map(|r| r.unwrap().rowid).collect()
    }

    #[test]
    fn test_full_scan_with_filters() {
        let store = store();
        let mut cursor = Cursor::new(&store, CosineZeroNorm::MaxDistance);
        assert_eq!(cursor.state(), CursorState::Idle);
        cursor
            .begin(&[
                Constraint::filter("category", FilterCondition::Eq(Value::Integer(0))),
                Constraint::filter("user", FilterCondition::Eq(Value::from("bob"))),
            ])
            .unwrap();
        assert_eq!(cursor.state(), CursorState::Iterating);
        assert_eq!(rowids(cursor), vec![12, 15, 18]);
    }

    #[test]
    fn test_knn_replay_and_exhaustion() {
        let store = store();
        let mut cursor = Cursor::new(&store, CosineZeroNorm::MaxDistance);
        cursor
            .begin(&[Constraint::matches("v", "[4.2, 0]"), Constraint::k(3)])
            .unwrap();

        let mut seen = Vec::new();
        while !cursor.eof() {
            seen.push((cursor.rowid().unwrap(), cursor.distance().unwrap()));
            cursor.advance().unwrap();
        }
        assert_eq!(seen.iter().map(|s| s.0).collect::<Vec<_>>(), vec![4, 5, 3]);
        assert!(seen.windows(2).all(|w| w[0].1 <= w[1].1));

        assert_eq!(cursor.state(), CursorState::Exhausted);
        cursor.advance().unwrap();
        assert!(cursor.eof());
    }

    #[test]
    fn test_point_lookup_and_projection() {
        let store = store();
        let mut cursor = Cursor::new(&store, CosineZeroNorm::MaxDistance)
            .with_projection(&["rowid", "note", "user"])
            .unwrap();
        cursor.begin(&[Constraint::Rowid(7)]).unwrap();

        let row = cursor.row().unwrap();
        assert_eq!(row.rowid, 7);
        assert_eq!(row.get("note"), Some(&Value::from("note 7")));
        assert_eq!(row.get("user"), Some(&Value::from("alice")));
        assert_eq!(cursor.column_names(), vec!["rowid", "note", "user"]);

        cursor.advance().unwrap();
        assert!(cursor.eof());

        let mut missing = Cursor::new(&store, CosineZeroNorm::MaxDistance);
        missing.begin(&[Constraint::Rowid(700)]).unwrap();
        assert!(missing.eof());
        assert!(missing.rowid().is_err());
    }

    #[test]
    fn test_interrupted_knn_releases_buffers() {
        let store = store();
        let interrupt = Interrupt::new();
        interrupt.interrupt();
        let mut cursor = Cursor::new(&store, CosineZeroNorm::MaxDistance).with_interrupt(interrupt);
        let result = cursor.begin(&[Constraint::matches("v", "[1, 1]"), Constraint::k(5)]);
        assert!(matches!(result, Err(VecError::Interrupted)));
        assert_eq!(cursor.state(), CursorState::Exhausted);
        assert!(cursor.eof());
    }

    #[test]
    fn test_plan_errors_surface_from_begin() {
        let store = store();
        let mut cursor = Cursor::new(&store, CosineZeroNorm::MaxDistance);
        assert!(matches!(
            cursor.begin(&[Constraint::k(5)]),
            Err(VecError::MissingMatchVector)
        ));
        assert!(matches!(
            Cursor::new(&store, CosineZeroNorm::MaxDistance).with_projection(&["nope"]),
            Err(VecError::InvalidQuery(_))
        ));
    }
}
