//! Vector tables
//!
//! A [`VecTable`] owns its storage exclusively. Every mutation validates all
//! incoming values before touching storage, so a failed statement leaves the
//! table exactly as it was.

use crate::error::{Result, VecError};
use crate::execution::{Constraint, Cursor, Interrupt, QueryPlan, ResultRow};
use crate::schema::{ColumnKind, TableSchema};
use crate::storage::{ChunkStore, OverflowKey, RowData};
use crate::types::{Config, CosineZeroNorm, PartitionValue, RowId, ScalarType, TableStats, Value};
use crate::vector::{codec, Vector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// New value for one column in an update
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Set(Value),
    Unchanged,
}

impl ColumnValue {
    pub fn set(value: impl Into<Value>) -> Self {
        ColumnValue::Set(value.into())
    }
}

/// Per-query options
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Output columns; all declared columns when `None`
    pub columns: Option<Vec<String>>,
    pub interrupt: Option<Interrupt>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VecTable {
    name: String,
    definition: String,
    store: ChunkStore,
    zero_norm: CosineZeroNorm,
    created_at: i64,
    updated_at: i64,
}

impl VecTable {
    /// Create an empty table from a column definition list
    pub fn create(name: &str, definition: &str, config: &Config) -> Result<Self> {
        let schema = TableSchema::parse(definition, config.chunk_size)?;
        let now = chrono::Utc::now().timestamp();
        info!(
            "Created table '{}' with {} columns, chunk size {}",
            name,
            schema.columns.len(),
            schema.chunk_size
        );
        Ok(Self {
            name: name.to_string(),
            definition: definition.to_string(),
            store: ChunkStore::new(schema, config.aux_inline_threshold, config.max_overflow_bytes),
            zero_norm: config.cosine_zero_norm,
            created_at: now,
            updated_at: now,
        })
    }

    /// Re-apply runtime settings, e.g. after loading from a snapshot
    pub fn configure(&mut self, config: &Config) {
        self.zero_norm = config.cosine_zero_norm;
        self.store
            .configure(config.aux_inline_threshold, config.max_overflow_bytes);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition(&self) -> &str {
        &self.definition
    }

    pub fn schema(&self) -> &TableSchema {
        self.store.schema()
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn len(&self) -> usize {
        self.store.row_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a row. `values` holds one value per declared column in
    /// declaration order. Without a rowid the next one after the current
    /// maximum is used.
    pub fn insert(&mut self, rowid: Option<RowId>, values: Vec<Value>) -> Result<RowId> {
        let row = self.prepare_row(&values)?;
        if let Some(key) = row.key.as_deref() {
            if self.store.find_key(key).is_some() {
                return Err(VecError::DuplicateKey(key.to_string()));
            }
        }
        let rowid = match rowid {
            Some(rowid) if self.store.locate(rowid).is_some() => {
                return Err(VecError::DuplicateRowid(rowid))
            }
            Some(rowid) => rowid,
            None => match self.store.index().max_rowid() {
                Some(max) => max.checked_add(1).ok_or_else(|| {
                    VecError::ResourceExhausted("rowid space exhausted".into())
                })?,
                None => 1,
            },
        };
        self.store
            .check_overflow_capacity(row.aux.iter().map(|v| (v, None)))?;

        let location = self.store.allocate_slot(&row.partition)?;
        self.store.write_row(location, rowid, &row)?;
        self.touch();
        debug!(
            "Inserted row {} into '{}' at chunk {} slot {}",
            rowid, self.name, location.chunk_id, location.slot
        );
        Ok(rowid)
    }

    /// Update a row in place. `values` holds one entry per declared column.
    pub fn update(&mut self, rowid: RowId, values: Vec<ColumnValue>) -> Result<()> {
        let expected = self.schema().columns.len();
        if values.len() != expected {
            return Err(VecError::ColumnCountMismatch {
                expected,
                actual: values.len(),
            });
        }
        let location = self.store.locate(rowid).ok_or(VecError::RowNotFound(rowid))?;

        let mut vectors = Vec::new();
        let mut metadata = Vec::new();
        let mut aux = Vec::new();
        for (column, value) in self.schema().columns.iter().zip(&values) {
            let ColumnValue::Set(value) = value else {
                continue;
            };
            match column.kind {
                ColumnKind::Vector {
                    element, dimensions, ..
                } => vectors.push((column.slot, codec::parse(value, element, dimensions)?)),
                ColumnKind::Metadata(ty) => metadata.push((column.slot, ty.coerce(value, false)?)),
                ColumnKind::Auxiliary(ty) => aux.push((column.slot, ty.coerce(value, true)?)),
                ColumnKind::PartitionKey(_) => {
                    return Err(VecError::Unsupported(format!(
                        "cannot update partition key column '{}'",
                        column.name
                    )))
                }
                ColumnKind::PrimaryKey => {
                    if self.store.keys().key_of(rowid).map(Value::from).as_ref() != Some(value) {
                        return Err(VecError::Unsupported(format!(
                            "cannot change primary key column '{}'",
                            column.name
                        )));
                    }
                }
            }
        }
        self.store.check_overflow_capacity(
            aux.iter()
                .map(|(slot, v)| (v, Some(OverflowKey::new(location, *slot)))),
        )?;

        for (slot, vector) in &vectors {
            self.store.update_vector(location, *slot, vector)?;
        }
        for (slot, value) in &metadata {
            self.store.update_metadata(location, *slot, value)?;
        }
        for (slot, value) in &aux {
            self.store.update_aux(location, *slot, value)?;
        }
        self.touch();
        Ok(())
    }

    /// Delete a row, releasing its slot and overflow records
    pub fn delete(&mut self, rowid: RowId) -> Result<()> {
        let location = self.store.locate(rowid).ok_or(VecError::RowNotFound(rowid))?;
        self.store.mark_deleted(location)?;
        self.touch();
        Ok(())
    }

    /// Validate a full row of values against the schema
    fn prepare_row(&self, values: &[Value]) -> Result<RowData> {
        let schema = self.schema();
        if values.len() != schema.columns.len() {
            return Err(VecError::ColumnCountMismatch {
                expected: schema.columns.len(),
                actual: values.len(),
            });
        }

        let mut row = RowData {
            vectors: Vec::new(),
            metadata: Vec::new(),
            aux: Vec::new(),
            partition: Vec::new(),
            key: None,
        };
        for (column, value) in schema.columns.iter().zip(values) {
            match column.kind {
                ColumnKind::Vector {
                    element, dimensions, ..
                } => row.vectors.push(codec::parse(value, element, dimensions)?),
                ColumnKind::Metadata(ty) => row.metadata.push(ty.coerce(value, false)?),
                ColumnKind::Auxiliary(ty) => row.aux.push(ty.coerce(value, true)?),
                ColumnKind::PartitionKey(ty) => row.partition.push(partition_value(ty, value)?),
                ColumnKind::PrimaryKey => match value {
                    Value::Text(key) => row.key = Some(key.clone()),
                    other => {
                        return Err(VecError::TypeMismatch(format!(
                            "primary key '{}' expects a non-null text value, got {}",
                            column.name,
                            other.type_name()
                        )))
                    }
                },
            }
        }
        Ok(row)
    }

    /// Open a cursor over this table
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor::new(&self.store, self.zero_norm)
    }

    pub fn plan(&self, constraints: &[Constraint]) -> Result<QueryPlan> {
        crate::execution::planner::plan(self.schema(), constraints, self.len())
    }

    /// Run a query to completion
    pub fn query(&self, constraints: &[Constraint], options: &QueryOptions) -> Result<Vec<ResultRow>> {
        let mut cursor = self.cursor();
        if let Some(columns) = &options.columns {
            cursor = cursor.with_projection(columns.as_slice())?;
        }
        if let Some(interrupt) = &options.interrupt {
            cursor = cursor.with_interrupt(interrupt.clone());
        }
        cursor.begin(constraints)?;
        cursor.collect()
    }

    /// Fetch one row by rowid with every declared column
    pub fn get(&self, rowid: RowId) -> Result<ResultRow> {
        self.query(&[Constraint::Rowid(rowid)], &QueryOptions::default())?
            .into_iter()
            .next()
            .ok_or(VecError::RowNotFound(rowid))
    }

    /// Fetch the stored vector of one column
    pub fn vector(&self, rowid: RowId, column: &str) -> Result<Vector> {
        match self.get(rowid)?.get(column) {
            Some(Value::Vector(v)) => Ok(v.clone()),
            _ => Err(VecError::InvalidQuery(format!(
                "'{}' is not a vector column",
                column
            ))),
        }
    }

    /// Rewrite live rows densely and reclaim overflow space
    pub fn vacuum(&mut self) -> Result<()> {
        self.store.vacuum()?;
        self.touch();
        Ok(())
    }

    /// Check internal consistency of the table's storage
    pub fn verify(&self) -> Result<()> {
        self.store.verify()
    }

    pub fn stats(&self) -> TableStats {
        let overflow = self.store.overflow();
        TableStats {
            name: self.name.clone(),
            row_count: self.len(),
            chunk_count: self.store.chunks().len(),
            chunk_size: self.schema().chunk_size,
            vector_columns: self.schema().vector_columns().count(),
            vector_bytes: self.store.chunks().iter().map(|c| c.vector_bytes()).sum(),
            overflow_records: overflow.record_count(),
            overflow_live_bytes: overflow.live_bytes(),
            overflow_dead_bytes: overflow.dead_bytes(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp();
    }
}

fn partition_value(ty: ScalarType, value: &Value) -> Result<PartitionValue> {
    match (ty, value) {
        (ScalarType::Integer, Value::Integer(i)) => Ok(PartitionValue::Integer(*i)),
        (ScalarType::Text, Value::Text(s)) => Ok(PartitionValue::Text(s.clone())),
        _ => Err(VecError::TypeMismatch(format!(
            "expected {} partition key, got {}",
            ty.name(),
            value.type_name()
        ))),
    }
}
