use thiserror::Error;

#[derive(Error, Debug)]
pub enum VecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Malformed vector literal: {0}")]
    MalformedLiteral(String),

    #[error("Incompatible vectors: {0}")]
    IncompatibleVectors(String),

    #[error("A KNN query on column '{0}' requires a k constraint")]
    MissingKConstraint(String),

    #[error("A k constraint requires a MATCH on a vector column")]
    MissingMatchVector,

    #[error("Duplicate rowid: {0}")]
    DuplicateRowid(i64),

    #[error("Duplicate primary key: {0}")]
    DuplicateKey(String),

    #[error("Column count mismatch: expected {expected}, got {actual}")]
    ColumnCountMismatch { expected: usize, actual: usize },

    #[error("Storage corruption at chunk {chunk_id}, slot {slot}: {detail}")]
    StorageCorruption {
        chunk_id: u64,
        slot: usize,
        detail: String,
    },

    #[error("Invalid table definition: {0}")]
    InvalidDefinition(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Row not found: {0}")]
    RowNotFound(i64),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table already exists: {0}")]
    TableExists(String),

    #[error("Not supported: {0}")]
    Unsupported(String),

    #[error("Query interrupted")]
    Interrupted,

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Invalid snapshot format: {0}")]
    InvalidFormat(String),

    #[error("Snapshot version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("Checksum mismatch: data may be corrupted")]
    ChecksumMismatch,
}

impl VecError {
    /// Whether the failed operation may succeed if retried unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VecError::ResourceExhausted(_) | VecError::Io(_))
    }

    pub(crate) fn corruption(chunk_id: u64, slot: usize, detail: impl Into<String>) -> Self {
        VecError::StorageCorruption {
            chunk_id,
            slot,
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, VecError>;

impl From<bincode::Error> for VecError {
    fn from(err: bincode::Error) -> Self {
        VecError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for VecError {
    fn from(err: serde_json::Error) -> Self {
        VecError::Serialization(err.to_string())
    }
}
