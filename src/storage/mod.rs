pub mod chunk;
pub mod index;
pub mod overflow;
pub mod snapshot;
pub mod store;

pub use chunk::{AuxCell, Chunk, ChunkId, NumericRange, RowLocation};
pub use index::{KeyIndex, RowidIndex};
pub use overflow::{OverflowArea, OverflowKey};
pub use store::{ChunkStore, RowData, RowView};
