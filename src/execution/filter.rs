use crate::storage::{Chunk, NumericRange};
use crate::types::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Filter condition for a single column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterCondition {
    /// Equality check
    Eq(Value),
    /// Not equal
    Ne(Value),
    /// Greater than
    Gt(Value),
    /// Greater than or equal
    Gte(Value),
    /// Less than
    Lt(Value),
    /// Less than or equal
    Lte(Value),
    /// Value is in list
    In(Vec<Value>),
}

impl FilterCondition {
    /// Build a condition from an operator token such as `>=`
    pub fn from_op(op: &str, value: Value) -> Option<Self> {
        Some(match op {
            "=" | "==" => FilterCondition::Eq(value),
            "!=" | "<>" => FilterCondition::Ne(value),
            ">" => FilterCondition::Gt(value),
            ">=" => FilterCondition::Gte(value),
            "<" => FilterCondition::Lt(value),
            "<=" => FilterCondition::Lte(value),
            _ => return None,
        })
    }

    pub fn op(&self) -> &'static str {
        match self {
            FilterCondition::Eq(_) => "=",
            FilterCondition::Ne(_) => "!=",
            FilterCondition::Gt(_) => ">",
            FilterCondition::Gte(_) => ">=",
            FilterCondition::Lt(_) => "<",
            FilterCondition::Lte(_) => "<=",
            FilterCondition::In(_) => "IN",
        }
    }

    /// Operand values of the condition
    pub fn operands(&self) -> &[Value] {
        match self {
            FilterCondition::Eq(v)
            | FilterCondition::Ne(v)
            | FilterCondition::Gt(v)
            | FilterCondition::Gte(v)
            | FilterCondition::Lt(v)
            | FilterCondition::Lte(v) => std::slice::from_ref(v),
            FilterCondition::In(values) => values,
        }
    }

    /// Check if a value matches this condition
    pub fn matches(&self, actual: &Value) -> bool {
        match self {
            FilterCondition::Eq(expected) => actual.compare(expected) == Some(Ordering::Equal),
            FilterCondition::Ne(expected) => {
                matches!(actual.compare(expected), Some(Ordering::Less | Ordering::Greater))
            }
            FilterCondition::Gt(expected) => actual.compare(expected) == Some(Ordering::Greater),
            FilterCondition::Gte(expected) => {
                matches!(actual.compare(expected), Some(Ordering::Greater | Ordering::Equal))
            }
            FilterCondition::Lt(expected) => actual.compare(expected) == Some(Ordering::Less),
            FilterCondition::Lte(expected) => {
                matches!(actual.compare(expected), Some(Ordering::Less | Ordering::Equal))
            }
            FilterCondition::In(values) => values
                .iter()
                .any(|v| actual.compare(v) == Some(Ordering::Equal)),
        }
    }

    /// Whether any value inside `range` could match. `false` lets a scan
    /// skip the whole chunk. Bounds are compared with [`Value::compare`],
    /// the same ordering row matching uses; an incomparable operand never
    /// prunes.
    pub fn may_match(&self, range: NumericRange) -> bool {
        let (min, max) = (range.min(), range.max());
        let within = |v: &Value| match (min.compare(v), max.compare(v)) {
            (Some(lo), Some(hi)) => lo != Ordering::Greater && hi != Ordering::Less,
            _ => true,
        };
        match self {
            FilterCondition::Eq(v) => within(v),
            FilterCondition::Ne(v) => {
                !(min.compare(v) == Some(Ordering::Equal) && max.compare(v) == Some(Ordering::Equal))
            }
            FilterCondition::Gt(v) => max.compare(v).map_or(true, |o| o == Ordering::Greater),
            FilterCondition::Gte(v) => max.compare(v).map_or(true, |o| o != Ordering::Less),
            FilterCondition::Lt(v) => min.compare(v).map_or(true, |o| o == Ordering::Less),
            FilterCondition::Lte(v) => min.compare(v).map_or(true, |o| o != Ordering::Greater),
            FilterCondition::In(values) => values.iter().any(within),
        }
    }
}

/// What a resolved filter reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterTarget {
    Rowid,
    /// Metadata column by slot
    Metadata(usize),
}

/// A filter resolved against a table schema
#[derive(Debug, Clone, PartialEq)]
pub struct BoundFilter {
    pub target: FilterTarget,
    pub condition: FilterCondition,
}

impl BoundFilter {
    pub fn matches(&self, chunk: &Chunk, slot: usize) -> bool {
        match self.target {
            FilterTarget::Rowid => self.condition.matches(&Value::Integer(chunk.rowid(slot))),
            FilterTarget::Metadata(column) => self.condition.matches(&chunk.metadata(column, slot)),
        }
    }

    /// Chunk-level pruning through the numeric summaries
    pub fn may_match_chunk(&self, chunk: &Chunk) -> bool {
        match self.target {
            FilterTarget::Rowid => true,
            FilterTarget::Metadata(column) => match chunk.summary(column) {
                Some(range) => self.condition.may_match(range),
                None => true,
            },
        }
    }
}
