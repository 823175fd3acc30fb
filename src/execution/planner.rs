//! Query planning
//!
//! Turns the constraints of a query into one of three strategies:
//!
//! | constraints          | strategy  | cost               |
//! |----------------------|-----------|--------------------|
//! | match + k (+filters) | KNN       | 10 + log2(k + 1)   |
//! | rowid (no match)     | point     | 1                  |
//! | text key (no match)  | key       | 1                  |
//! | anything else        | full scan | 1e6 + rows         |

use super::filter::{BoundFilter, FilterCondition, FilterTarget};
use crate::error::{Result, VecError};
use crate::schema::{ColumnKind, TableSchema};
use crate::types::{PartitionValue, RowId, ScalarType, Value};
use crate::vector::{codec, DistanceMetric, Vector};
use serde::{Deserialize, Serialize};

/// One predicate of a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constraint {
    /// `column MATCH vector`
    Match { column: String, vector: Value },
    /// `k = value`
    K(Value),
    /// Comparison on a metadata, partition key or rowid column
    Filter {
        column: String,
        condition: FilterCondition,
    },
    /// `rowid = value`
    Rowid(RowId),
    /// Override the matched column's distance metric
    Metric(DistanceMetric),
}

impl Constraint {
    pub fn matches(column: &str, vector: impl Into<Value>) -> Self {
        Constraint::Match {
            column: column.to_string(),
            vector: vector.into(),
        }
    }

    pub fn k(k: i64) -> Self {
        Constraint::K(Value::Integer(k))
    }

    pub fn filter(column: &str, condition: FilterCondition) -> Self {
        Constraint::Filter {
            column: column.to_string(),
            condition,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    /// Single lookup through the rowid index
    Point(RowId),
    /// Single lookup through the text primary key map
    Key(String),
    /// Exact nearest neighbours of `query` in one vector column
    Knn {
        /// Index into the schema's columns
        column: usize,
        query: Vector,
        k: usize,
        metric: DistanceMetric,
    },
    FullScan,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Point(_) => "point",
            Strategy::Key(_) => "key",
            Strategy::Knn { .. } => "knn",
            Strategy::FullScan => "full scan",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub strategy: Strategy,
    /// Per-row predicates
    pub filters: Vec<BoundFilter>,
    /// Partition equality restrictions as (partition slot, value)
    pub partition: Vec<(usize, PartitionValue)>,
    /// Text primary key the result is restricted to
    pub key: Option<String>,
    /// Indices of the constraints the plan evaluates itself
    pub consumed: Vec<usize>,
    pub estimated_cost: f64,
}

/// Plan a query over a table with `row_count` live rows
pub fn plan(schema: &TableSchema, constraints: &[Constraint], row_count: usize) -> Result<QueryPlan> {
    let mut matched: Option<(usize, &Value)> = None;
    let mut k: Option<usize> = None;
    let mut metric: Option<DistanceMetric> = None;
    let mut point: Option<RowId> = None;
    let mut key: Option<String> = None;
    let mut filters = Vec::new();
    let mut partition = Vec::new();

    for constraint in constraints {
        match constraint {
            Constraint::Match { column, vector } => {
                let index = schema.column_index(column).ok_or_else(|| {
                    VecError::InvalidQuery(format!("no such column: {}", column))
                })?;
                if !matches!(schema.column(index).kind, ColumnKind::Vector { .. }) {
                    return Err(VecError::InvalidQuery(format!(
                        "MATCH requires a vector column, '{}' is not one",
                        column
                    )));
                }
                if matched.is_some() {
                    return Err(VecError::InvalidQuery(
                        "only one MATCH constraint is allowed per query".into(),
                    ));
                }
                matched = Some((index, vector));
            }
            Constraint::K(value) => {
                if k.is_some() {
                    return Err(VecError::InvalidQuery("k is constrained twice".into()));
                }
                k = Some(parse_k(value)?);
            }
            Constraint::Metric(m) => {
                if metric.replace(*m).is_some() {
                    return Err(VecError::InvalidQuery("distance metric is given twice".into()));
                }
            }
            Constraint::Rowid(rowid) => {
                point.get_or_insert(*rowid);
                filters.push(BoundFilter {
                    target: FilterTarget::Rowid,
                    condition: FilterCondition::Eq(Value::Integer(*rowid)),
                });
            }
            Constraint::Filter { column, condition } => {
                if schema.is_rowid(column) {
                    check_operands(condition, true, column)?;
                    if let FilterCondition::Eq(Value::Integer(rowid)) = condition {
                        point.get_or_insert(*rowid);
                    }
                    filters.push(BoundFilter {
                        target: FilterTarget::Rowid,
                        condition: condition.clone(),
                    });
                    continue;
                }

                let index = schema.column_index(column).ok_or_else(|| {
                    VecError::InvalidQuery(format!("no such column: {}", column))
                })?;
                let def = schema.column(index);
                match def.kind {
                    ColumnKind::Metadata(ty) => {
                        let numeric = !matches!(ty, ScalarType::Text);
                        check_operands(condition, numeric, column)?;
                        filters.push(BoundFilter {
                            target: FilterTarget::Metadata(def.slot),
                            condition: condition.clone(),
                        });
                    }
                    ColumnKind::PartitionKey(ty) => {
                        let FilterCondition::Eq(value) = condition else {
                            return Err(VecError::InvalidQuery(format!(
                                "partition key '{}' only supports equality, got {}",
                                column,
                                condition.op()
                            )));
                        };
                        let value = match (ty, value) {
                            (ScalarType::Integer, Value::Integer(i)) => {
                                PartitionValue::Integer(*i)
                            }
                            (ScalarType::Text, Value::Text(s)) => {
                                PartitionValue::Text(s.clone())
                            }
                            (_, other) => {
                                return Err(VecError::InvalidQuery(format!(
                                    "cannot compare {} partition key '{}' with {}",
                                    ty.name(),
                                    column,
                                    other.type_name()
                                )))
                            }
                        };
                        partition.push((def.slot, value));
                    }
                    ColumnKind::PrimaryKey => {
                        let FilterCondition::Eq(Value::Text(value)) = condition else {
                            return Err(VecError::InvalidQuery(format!(
                                "primary key '{}' only supports equality with text, got {}",
                                column,
                                condition.op()
                            )));
                        };
                        if key.as_ref().is_some_and(|k| k != value) {
                            return Err(VecError::InvalidQuery(format!(
                                "primary key '{}' is constrained to two different values",
                                column
                            )));
                        }
                        key = Some(value.clone());
                    }
                    ColumnKind::Auxiliary(_) => {
                        return Err(VecError::InvalidQuery(format!(
                            "auxiliary column '{}' cannot be filtered",
                            column
                        )))
                    }
                    ColumnKind::Vector { .. } => {
                        return Err(VecError::InvalidQuery(format!(
                            "vector column '{}' can only be used with MATCH",
                            column
                        )))
                    }
                }
            }
        }
    }

    let consumed = (0..constraints.len()).collect();
    let (strategy, estimated_cost) = match (matched, k) {
        (Some((index, value)), Some(k)) => {
            let ColumnKind::Vector {
                element,
                dimensions,
                metric: declared,
            } = schema.column(index).kind
            else {
                return Err(VecError::InvalidQuery("MATCH requires a vector column".into()));
            };
            let query = codec::parse(value, element, dimensions)?;
            let metric = metric.unwrap_or(declared);
            if !metric.supports(element) {
                return Err(VecError::InvalidQuery(format!(
                    "{} distance cannot be used on {} column '{}'",
                    metric.name(),
                    element.name(),
                    schema.column(index).name
                )));
            }
            (
                Strategy::Knn {
                    column: index,
                    query,
                    k,
                    metric,
                },
                10.0 + (k as f64 + 1.0).log2(),
            )
        }
        (Some((index, _)), None) => {
            return Err(VecError::MissingKConstraint(schema.column(index).name.clone()))
        }
        (None, Some(_)) => return Err(VecError::MissingMatchVector),
        (None, None) => {
            if metric.is_some() {
                return Err(VecError::InvalidQuery(
                    "a distance metric requires a MATCH constraint".into(),
                ));
            }
            match (point, &key) {
                (Some(rowid), _) => (Strategy::Point(rowid), 1.0),
                (None, Some(key)) => (Strategy::Key(key.clone()), 1.0),
                (None, None) => (Strategy::FullScan, 1e6 + row_count as f64),
            }
        }
    };

    Ok(QueryPlan {
        strategy,
        filters,
        partition,
        key,
        consumed,
        estimated_cost,
    })
}

fn parse_k(value: &Value) -> Result<usize> {
    match value {
        Value::Integer(k) if *k >= 0 => Ok(*k as usize),
        Value::Integer(k) => Err(VecError::InvalidQuery(format!(
            "k must be non-negative, got {}",
            k
        ))),
        other => Err(VecError::InvalidQuery(format!(
            "k must be an integer, got {}",
            other.type_name()
        ))),
    }
}

/// Operands must be comparable with the column they filter
fn check_operands(condition: &FilterCondition, numeric: bool, column: &str) -> Result<()> {
    for operand in condition.operands() {
        let ok = match operand {
            Value::Integer(_) | Value::Real(_) => numeric,
            Value::Text(_) => !numeric,
            _ => false,
        };
        if !ok {
            return Err(VecError::InvalidQuery(format!(
                "cannot filter column '{}' with a {} value",
                column,
                operand.type_name()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> TableSchema {
        TableSchema::parse(
            "id integer primary key, v float[3], b bit[8], category integer, label text, user text partition key, +body text",
            1024,
        )
        .unwrap()
    }

    fn plan_of(constraints: &[Constraint]) -> Result<QueryPlan> {
        plan(&schema(), constraints, 500)
    }

    #[test]
    fn test_knn_plan() {
        let plan = plan_of(&[
            Constraint::matches("v", "[1, 2, 3]"),
            Constraint::k(5),
            Constraint::filter("category", FilterCondition::Eq(Value::Integer(2))),
        ])
        .unwrap();

        match &plan.strategy {
            Strategy::Knn { column, k, metric, query } => {
                assert_eq!(*column, 0);
                assert_eq!(*k, 5);
                assert_eq!(*metric, DistanceMetric::L2);
                assert_eq!(query, &Vector::Float32(vec![1.0, 2.0, 3.0]));
            }
            other => panic!("expected knn, got {:?}", other),
        }
        assert_eq!(plan.filters.len(), 1);
        assert_eq!(plan.consumed, vec![0, 1, 2]);
        assert!(plan.estimated_cost < 20.0);
    }

    #[test]
    fn test_missing_constraints() {
        assert!(matches!(
            plan_of(&[Constraint::matches("v", "[1, 2, 3]")]),
            Err(VecError::MissingKConstraint(c)) if c == "v"
        ));
        assert!(matches!(
            plan_of(&[Constraint::k(3)]),
            Err(VecError::MissingMatchVector)
        ));
    }

    #[test]
    fn test_k_validation() {
        let knn = |k: Value| plan_of(&[Constraint::matches("v", "[1, 2, 3]"), Constraint::K(k)]);
        assert!(matches!(knn(Value::Integer(-1)), Err(VecError::InvalidQuery(_))));
        assert!(matches!(knn(Value::Real(2.5)), Err(VecError::InvalidQuery(_))));
        assert!(knn(Value::Integer(0)).is_ok());
    }

    #[test]
    fn test_invalid_targets() {
        for constraints in [
            vec![Constraint::filter("body", FilterCondition::Eq(Value::from("x")))],
            vec![Constraint::filter("v", FilterCondition::Eq(Value::from("[1,2,3]")))],
            vec![Constraint::filter("nope", FilterCondition::Eq(Value::Integer(1)))],
            vec![Constraint::matches("category", "[1, 2, 3]"), Constraint::k(1)],
            vec![
                Constraint::matches("v", "[1, 2, 3]"),
                Constraint::matches("v", "[1, 2, 3]"),
                Constraint::k(1),
            ],
            vec![Constraint::filter("user", FilterCondition::Gt(Value::from("a")))],
            vec![Constraint::filter("category", FilterCondition::Eq(Value::from("two")))],
            vec![Constraint::Metric(DistanceMetric::Cosine)],
        ] {
            assert!(
                matches!(plan_of(&constraints), Err(VecError::InvalidQuery(_))),
                "expected InvalidQuery for {:?}",
                constraints
            );
        }
    }

    #[test]
    fn test_metric_override() {
        let plan = plan_of(&[
            Constraint::matches("v", "[1, 2, 3]"),
            Constraint::k(1),
            Constraint::Metric(DistanceMetric::Cosine),
        ])
        .unwrap();
        assert!(matches!(plan.strategy, Strategy::Knn { metric: DistanceMetric::Cosine, .. }));

        let bad = plan_of(&[
            Constraint::matches("b", Value::Blob(vec![0xff])),
            Constraint::k(1),
            Constraint::Metric(DistanceMetric::L2),
        ]);
        assert!(matches!(bad, Err(VecError::InvalidQuery(_))));
    }

    #[test]
    fn test_point_and_scan_plans() {
        let point = plan_of(&[Constraint::Rowid(7)]).unwrap();
        assert_eq!(point.strategy, Strategy::Point(7));
        assert_eq!(point.estimated_cost, 1.0);

        let alias = plan_of(&[Constraint::filter("id", FilterCondition::Eq(Value::Integer(9)))]).unwrap();
        assert_eq!(alias.strategy, Strategy::Point(9));

        let scan = plan_of(&[Constraint::filter(
            "user",
            FilterCondition::Eq(Value::from("alice")),
        )])
        .unwrap();
        assert_eq!(scan.strategy, Strategy::FullScan);
        assert_eq!(scan.partition, vec![(0, PartitionValue::Text("alice".into()))]);
        assert_eq!(scan.estimated_cost, 1e6 + 500.0);
    }

    #[test]
    fn test_text_key_plans() {
        let schema = TableSchema::parse("sku text primary key, v float[2]", 1024).unwrap();
        let by_key = |constraints: &[Constraint]| plan(&schema, constraints, 10);

        let lookup = by_key(&[Constraint::filter("SKU", FilterCondition::Eq(Value::from("a-1")))]).unwrap();
        assert_eq!(lookup.strategy, Strategy::Key("a-1".into()));
        assert_eq!(lookup.key.as_deref(), Some("a-1"));
        assert_eq!(lookup.estimated_cost, 1.0);

        let knn = by_key(&[
            Constraint::matches("v", "[0, 0]"),
            Constraint::k(3),
            Constraint::filter("sku", FilterCondition::Eq(Value::from("a-1"))),
        ])
        .unwrap();
        assert!(matches!(knn.strategy, Strategy::Knn { .. }));
        assert_eq!(knn.key.as_deref(), Some("a-1"));

        for constraints in [
            vec![Constraint::filter("sku", FilterCondition::Gt(Value::from("a")))],
            vec![Constraint::filter("sku", FilterCondition::Eq(Value::Integer(1)))],
            vec![
                Constraint::filter("sku", FilterCondition::Eq(Value::from("a"))),
                Constraint::filter("sku", FilterCondition::Eq(Value::from("b"))),
            ],
        ] {
            assert!(
                matches!(by_key(&constraints), Err(VecError::InvalidQuery(_))),
                "expected InvalidQuery for {:?}",
                constraints
            );
        }
    }

    #[test]
    fn test_match_vector_errors_propagate() {
        assert!(matches!(
            plan_of(&[Constraint::matches("v", "[1, 2]"), Constraint::k(1)]),
            Err(VecError::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }
}
