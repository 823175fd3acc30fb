//! KeraVec - chunked vector tables with exact KNN search
//!
//! A table declares vector columns alongside metadata, auxiliary and
//! partition key columns. Rows live in fixed-capacity chunks; a KNN query
//! scans the chunks that survive metadata and partition filtering and keeps
//! the k nearest rows in a bounded heap.
//!
//! # Example
//!
//! ```ignore
//! use keravec::{Constraint, Database, QueryOptions};
//!
//! let db = Database::create("vectors.kvec")?;
//! db.create_table("docs", "embedding float[4], category integer, +body text")?;
//! db.insert("docs", None, vec!["[1, 2, 3, 4]".into(), 7.into(), "hello".into()])?;
//!
//! let rows = db.query(
//!     "docs",
//!     &[Constraint::matches("embedding", "[1, 2, 3, 4]"), Constraint::k(10)],
//!     &QueryOptions::default(),
//! )?;
//! ```

pub mod error;
pub mod types;
pub mod schema;
pub mod vector;
pub mod storage;
pub mod execution;
pub mod table;
pub mod vtab;
pub mod cli;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

pub use error::{Result, VecError};
pub use execution::{Constraint, Cursor, CursorState, FilterCondition, Interrupt, QueryPlan, ResultRow, Strategy};
pub use schema::{ColumnDef, ColumnKind, TableSchema};
pub use table::{ColumnValue, QueryOptions, VecTable};
pub use types::{Config, CosineZeroNorm, RowId, ScalarType, TableStats, Value};
pub use vector::{vec_bit, vec_f32, vec_int8, vec_quantize_binary, vec_quantize_int8, DistanceMetric, ElementType, Vector};
pub use vtab::{IndexInfo, VirtualCursor, VirtualTable};

/// Snapshot payload, written borrowed and read back owned
#[derive(Serialize)]
struct ImageRef<'a> {
    tables: Vec<&'a VecTable>,
}

#[derive(Deserialize)]
struct Image {
    tables: Vec<VecTable>,
}

/// Main database handle
pub struct Database {
    tables: RwLock<HashMap<String, VecTable>>,
    path: Option<PathBuf>,
    config: Config,
}

impl Database {
    /// Create a new database file
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::create_with_config(path, Config::default())
    }

    /// Create a new database with custom configuration
    pub fn create_with_config<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        let db = Self {
            tables: RwLock::new(HashMap::new()),
            path: Some(path.as_ref().to_path_buf()),
            config,
        };
        db.sync()?;
        Ok(db)
    }

    /// Open an existing database file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Open an existing database with custom configuration. Runtime settings
    /// of `config` apply to every loaded table.
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        let path = path.as_ref();
        let image: Image = storage::snapshot::load(path)?;
        let mut tables = HashMap::new();
        for mut table in image.tables {
            table.configure(&config);
            tables.insert(table.name().to_string(), table);
        }
        info!("Opened {} with {} tables", path.display(), tables.len());
        Ok(Self {
            tables: RwLock::new(tables),
            path: Some(path.to_path_buf()),
            config,
        })
    }

    /// A database that lives only in memory; `sync` is a no-op
    pub fn in_memory() -> Self {
        Self::in_memory_with_config(Config::default())
    }

    pub fn in_memory_with_config(config: Config) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            path: None,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Create a table from its column definition list
    ///
    /// # Example
    /// ```ignore
    /// db.create_table("items", "v float[3] distance_metric=cosine, +label text, chunk_size=64")?;
    /// ```
    pub fn create_table(&self, name: &str, definition: &str) -> Result<()> {
        {
            let mut tables = self.tables.write();
            if tables.contains_key(name) {
                return Err(VecError::TableExists(name.to_string()));
            }
            let table = VecTable::create(name, definition, &self.config)?;
            tables.insert(name.to_string(), table);
        }
        self.checkpoint()
    }

    pub fn drop_table(&self, name: &str) -> Result<()> {
        self.tables
            .write()
            .remove(name)
            .ok_or_else(|| VecError::TableNotFound(name.to_string()))?;
        info!("Dropped table '{}'", name);
        self.checkpoint()
    }

    /// Insert a row, returning its rowid
    ///
    /// # Example
    /// ```ignore
    /// let id = db.insert("items", None, vec!["[0.1, 0.2, 0.3]".into(), "first".into()])?;
    /// ```
    pub fn insert(&self, table: &str, rowid: Option<RowId>, values: Vec<Value>) -> Result<RowId> {
        let rowid = self.write_table(table, |t| t.insert(rowid, values))?;
        self.checkpoint()?;
        Ok(rowid)
    }

    pub fn update(&self, table: &str, rowid: RowId, values: Vec<ColumnValue>) -> Result<()> {
        self.write_table(table, |t| t.update(rowid, values))?;
        self.checkpoint()
    }

    pub fn delete(&self, table: &str, rowid: RowId) -> Result<()> {
        self.write_table(table, |t| t.delete(rowid))?;
        self.checkpoint()
    }

    /// Run a query to completion
    pub fn query(&self, table: &str, constraints: &[Constraint], options: &QueryOptions) -> Result<Vec<ResultRow>> {
        self.read_table(table, |t| t.query(constraints, options))
    }

    /// Nearest neighbours of `vector` in `column`
    ///
    /// # Example
    /// ```ignore
    /// let hits = db.knn("items", "v", "[0.1, 0.2, 0.3]", 5)?;
    /// for hit in hits {
    ///     println!("{} at {:?}", hit.rowid, hit.distance);
    /// }
    /// ```
    pub fn knn(&self, table: &str, column: &str, vector: impl Into<Value>, k: i64) -> Result<Vec<ResultRow>> {
        self.query(
            table,
            &[Constraint::matches(column, vector), Constraint::k(k)],
            &QueryOptions::default(),
        )
    }

    pub fn get(&self, table: &str, rowid: RowId) -> Result<ResultRow> {
        self.read_table(table, |t| t.get(rowid))
    }

    /// Borrow a table for host-style access through [`VirtualTable`]
    pub fn with_table<R>(&self, name: &str, f: impl FnOnce(&VecTable) -> R) -> Result<R> {
        let tables = self.tables.read();
        let table = tables
            .get(name)
            .ok_or_else(|| VecError::TableNotFound(name.to_string()))?;
        Ok(f(table))
    }

    /// List all tables with their row counts
    pub fn list_tables(&self) -> Vec<(String, usize)> {
        let mut list: Vec<_> = self
            .tables
            .read()
            .values()
            .map(|t| (t.name().to_string(), t.len()))
            .collect();
        list.sort();
        list
    }

    pub fn stats(&self, table: &str) -> Result<TableStats> {
        self.read_table(table, |t| Ok(t.stats()))
    }

    /// Compact a table's chunks and overflow area
    pub fn vacuum(&self, table: &str) -> Result<()> {
        self.write_table(table, |t| t.vacuum())?;
        self.checkpoint()
    }

    /// Check every table's internal consistency
    pub fn verify(&self) -> Result<()> {
        self.tables.read().values().try_for_each(|t| t.verify())
    }

    /// Write all tables to the database file
    pub fn sync(&self) -> Result<()> {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(()),
        };
        let tables = self.tables.read();
        let mut image = ImageRef {
            tables: tables.values().collect(),
        };
        image.tables.sort_by(|a, b| a.name().cmp(b.name()));
        storage::snapshot::save(path, &image)
    }

    fn checkpoint(&self) -> Result<()> {
        if self.config.auto_checkpoint {
            self.sync()?;
        }
        Ok(())
    }

    fn read_table<R>(&self, name: &str, f: impl FnOnce(&VecTable) -> Result<R>) -> Result<R> {
        let tables = self.tables.read();
        let table = tables
            .get(name)
            .ok_or_else(|| VecError::TableNotFound(name.to_string()))?;
        f(table)
    }

    fn write_table<R>(&self, name: &str, f: impl FnOnce(&mut VecTable) -> Result<R>) -> Result<R> {
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(name)
            .ok_or_else(|| VecError::TableNotFound(name.to_string()))?;
        f(table)
    }
}
