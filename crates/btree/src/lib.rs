//! Clustered B+tree index over buffer-pool pages.
//!
//! Keys are fixed-size byte buffers compared through an injected
//! [`KeyComparator`]; leaf values are row ids. The root page id of every
//! tree is persisted in the roots directory on logical page 1.

pub mod key;
pub mod node;
pub mod roots;
mod tree;

pub use key::{key_size_for, IndexKey, KeyComparator, KEY_SIZE_BUCKETS};
pub use roots::INDEX_ROOTS_PAGE_ID;
pub use tree::{BPlusTree, IndexIterator};
