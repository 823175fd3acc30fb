//! Virtual table interface
//!
//! The host-facing contract: a host plans a query through
//! [`VirtualTable::best_index`], opens a cursor, hands it the constraints and
//! then walks it with `next`/`eof`, reading `rowid`, `column` and `distance`
//! for each row. Cursors borrow the table, so the table cannot be mutated
//! while one is open, and dropping a cursor releases everything it buffered.

use crate::error::Result;
use crate::execution::{Constraint, Cursor, QueryPlan};
use crate::table::{ColumnValue, VecTable};
use crate::types::{RowId, Value};

/// Host-side description of how a plan uses the offered constraints
#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    /// Per offered constraint: whether the table evaluates it
    pub constraint_usage: Vec<bool>,
    pub estimated_cost: f64,
    pub plan: QueryPlan,
}

pub trait VirtualTable {
    type Cursor<'a>: VirtualCursor
    where
        Self: 'a;

    /// Choose a strategy for the offered constraints
    fn best_index(&self, constraints: &[Constraint]) -> Result<IndexInfo>;

    fn open(&self) -> Self::Cursor<'_>;

    /// Insert a row and return its rowid
    fn insert(&mut self, rowid: Option<RowId>, values: Vec<Value>) -> Result<RowId>;

    fn update(&mut self, rowid: RowId, values: Vec<ColumnValue>) -> Result<()>;

    fn delete(&mut self, rowid: RowId) -> Result<()>;
}

pub trait VirtualCursor {
    /// Start a query, positioning the cursor on the first row
    fn filter(&mut self, constraints: &[Constraint]) -> Result<()>;

    fn next(&mut self) -> Result<()>;

    fn eof(&self) -> bool;

    fn rowid(&self) -> Result<RowId>;

    /// Value of a declared column, by position in the table definition
    fn column(&self, index: usize) -> Result<Value>;

    /// Distance of the current row, only set for KNN queries
    fn distance(&self) -> Option<f64>;
}

impl VirtualTable for VecTable {
    type Cursor<'a> = Cursor<'a>;

    fn best_index(&self, constraints: &[Constraint]) -> Result<IndexInfo> {
        let plan = self.plan(constraints)?;
        let mut constraint_usage = vec![false; constraints.len()];
        for i in &plan.consumed {
            constraint_usage[*i] = true;
        }
        Ok(IndexInfo {
            constraint_usage,
            estimated_cost: plan.estimated_cost,
            plan,
        })
    }

    fn open(&self) -> Cursor<'_> {
        self.cursor()
    }

    fn insert(&mut self, rowid: Option<RowId>, values: Vec<Value>) -> Result<RowId> {
        VecTable::insert(self, rowid, values)
    }

    fn update(&mut self, rowid: RowId, values: Vec<ColumnValue>) -> Result<()> {
        VecTable::update(self, rowid, values)
    }

    fn delete(&mut self, rowid: RowId) -> Result<()> {
        VecTable::delete(self, rowid)
    }
}

impl VirtualCursor for Cursor<'_> {
    fn filter(&mut self, constraints: &[Constraint]) -> Result<()> {
        Cursor::begin(self, constraints)
    }

    fn next(&mut self) -> Result<()> {
        self.advance()
    }

    fn eof(&self) -> bool {
        Cursor::eof(self)
    }

    fn rowid(&self) -> Result<RowId> {
        Cursor::rowid(self)
    }

    fn column(&self, index: usize) -> Result<Value> {
        Cursor::column(self, index)
    }

    fn distance(&self) -> Option<f64> {
        Cursor::distance(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::Strategy;
    use crate::types::Config;

    /// Drive a table the way a host would, generic over the trait
    fn knn_rowids<T: VirtualTable>(table: &T, query: &str, k: i64) -> Vec<(RowId, f64)> {
        let constraints = [Constraint::matches("v", query), Constraint::k(k)];
        let info = table.best_index(&constraints).unwrap();
        assert!(info.constraint_usage.iter().all(|used| *used));

        let mut cursor = table.open();
        VirtualCursor::filter(&mut cursor, &constraints).unwrap();
        let mut out = Vec::new();
        while !VirtualCursor::eof(&cursor) {
            out.push((
                VirtualCursor::rowid(&cursor).unwrap(),
                VirtualCursor::distance(&cursor).unwrap(),
            ));
            VirtualCursor::next(&mut cursor).unwrap();
        }
        out
    }

    #[test]
    fn test_host_style_knn() {
        let mut table = VecTable::create("t", "v float[2], +label text", &Config::default()).unwrap();
        for i in 0..10 {
            VirtualTable::insert(
                &mut table,
                Some(i),
                vec![format!("[{}, 0]", i).into(), format!("row {}", i).into()],
            )
            .unwrap();
        }

        let hits = knn_rowids(&table, "[2, 0]", 3);
        assert_eq!(hits.iter().map(|h| h.0).collect::<Vec<_>>(), vec![2, 1, 3]);
        assert_eq!(hits[0].1, 0.0);

        let mut cursor = table.open();
        VirtualCursor::filter(&mut cursor, &[Constraint::Rowid(4)]).unwrap();
        assert_eq!(VirtualCursor::column(&cursor, 1).unwrap(), Value::from("row 4"));
        assert_eq!(VirtualCursor::distance(&cursor), None);
    }

    #[test]
    fn test_best_index_costs() {
        let table = VecTable::create("t", "v float[2]", &Config::default()).unwrap();
        let knn = table
            .best_index(&[Constraint::matches("v", "[0, 0]"), Constraint::k(5)])
            .unwrap();
        let scan = table.best_index(&[]).unwrap();
        assert!(matches!(knn.plan.strategy, Strategy::Knn { .. }));
        assert_eq!(scan.plan.strategy, Strategy::FullScan);
        assert!(knn.estimated_cost < scan.estimated_cost);
    }
}
