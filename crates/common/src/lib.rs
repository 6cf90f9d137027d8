#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::{fmt, io, path::PathBuf};
use thiserror::Error;

/// Logical identifier of an on-disk page.
///
/// Logical ids are dense per extent and mapped to physical file offsets by
/// the disk manager. `INVALID` is the universal "no page" sentinel used in
/// page links and empty tree roots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub i32);

impl PageId {
    pub const INVALID: PageId = PageId(-1);

    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a frame inside the buffer pool array.
pub type FrameId = usize;

/// Stable address of a stored tuple: the page it lives on plus its slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowId {
    pub page_id: PageId,
    pub slot: u32,
}

impl RowId {
    pub const INVALID: RowId = RowId {
        page_id: PageId::INVALID,
        slot: 0,
    };

    pub fn new(page_id: PageId, slot: u32) -> RowId {
        RowId { page_id, slot }
    }

    pub fn is_valid(self) -> bool {
        self.page_id.is_valid()
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot)
    }
}

/// Identifier of a table registered in the catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(pub u32);

/// Identifier of an index registered in the catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexId(pub u32);

/// Opaque transaction handle.
///
/// The storage core accepts and forwards it without interpreting it;
/// transactional behavior lives above this layer.
#[derive(Clone, Copy, Debug, Default)]
pub struct Transaction;

/// Canonical error type shared across the storage subsystems.
#[derive(Error, Debug)]
pub enum DbError {
    // disk
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("no free pages left on disk")]
    OutOfSpace,
    #[error("corrupt magic while decoding {0}")]
    CorruptMagic(&'static str),

    // buffer
    #[error("all buffer frames are pinned")]
    AllPinned,
    #[error("page {0} is not resident in the buffer pool")]
    PageNotResident(PageId),
    #[error("page {0} unpinned more times than it was pinned")]
    DoubleUnpin(PageId),

    // record / heap
    #[error("row of {size} bytes exceeds the per-page maximum of {max}")]
    RowTooLarge { size: usize, max: usize },
    #[error("slot {slot} does not exist on page {page_id}")]
    SlotNotFound { page_id: PageId, slot: u32 },
    #[error("tuple at {0} is deleted")]
    Tombstoned(RowId),

    // index
    #[error("duplicate key")]
    DuplicateKey,
    #[error("key not found")]
    KeyNotFound,
    #[error("index key of {size} bytes exceeds the maximum of {max}")]
    KeyTooLarge { size: usize, max: usize },

    // catalog
    #[error("table '{0}' already exists")]
    TableAlreadyExists(String),
    #[error("table '{0}' does not exist")]
    TableNotExists(String),
    #[error("index '{0}' already exists")]
    IndexAlreadyExists(String),
    #[error("index '{0}' not found")]
    IndexNotFound(String),
    #[error("column '{0}' does not exist")]
    ColumnNotExists(String),

    #[error("storage: {0}")]
    Storage(String),
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Victim-selection policy for the buffer pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplacerPolicy {
    #[default]
    Lru,
    Clock,
}

/// Runtime configuration for a database instance.
///
/// # Example
/// ```
/// use common::{Config, ReplacerPolicy};
/// use std::path::PathBuf;
///
/// let config = Config::builder()
///     .data_dir(PathBuf::from("./my_db"))
///     .buffer_pool_pages(512)
///     .replacer(ReplacerPolicy::Clock)
///     .build();
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct Config {
    /// Directory where database files and the name sidecar live.
    #[builder(default = PathBuf::from("./db_data"))]
    pub data_dir: PathBuf,
    /// Number of pages the buffer pool keeps resident.
    #[builder(default = 256)]
    pub buffer_pool_pages: usize,
    /// Which replacement policy evicts cold pages.
    #[builder(default)]
    pub replacer: ReplacerPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./db_data"),
            buffer_pool_pages: 256,
            replacer: ReplacerPolicy::Lru,
        }
    }
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{
        Config, DbError, DbResult, FrameId, IndexId, PageId, ReplacerPolicy, RowId, TableId,
        Transaction,
    };
}
