//! Shared fixtures and setup macros for the storage crates' tests.

use buffer::BufferPoolManager;
use common::PageId;
use record::{Column, Row, Schema};
use std::sync::Arc;
use types::{Field, TypeId};

#[doc(hidden)]
pub mod reexports {
    pub use buffer;
    pub use common;
    pub use disk;
    pub use tempfile;
}

/// Bind `$pool` to an `Arc<BufferPoolManager>` over a fresh temp-dir
/// database file.
///
/// ```ignore
/// test_pool!(pool);
/// test_pool!(pool, pages: 4);
/// ```
#[macro_export]
macro_rules! test_pool {
    ($pool:ident) => {
        $crate::test_pool!($pool, pages: 64);
    };
    ($pool:ident, pages: $n:expr) => {
        let _dir = $crate::reexports::tempfile::tempdir().unwrap();
        let _disk = ::std::sync::Arc::new(
            $crate::reexports::disk::DiskManager::open(&_dir.path().join("test.db")).unwrap(),
        );
        let $pool = ::std::sync::Arc::new($crate::reexports::buffer::BufferPoolManager::new(
            _disk,
            $n,
            $crate::reexports::common::ReplacerPolicy::Lru,
        ));
    };
}

/// Claim logical pages 0 and 1 (catalog meta and index roots) so test data
/// never lands on the reserved directory pages.
pub fn reserve_meta_pages(pool: &BufferPoolManager) {
    let meta = pool.new_page().unwrap();
    assert_eq!(meta.page_id(), PageId(0));
    let roots = pool.new_page().unwrap();
    assert_eq!(roots.page_id(), PageId(1));
}

/// `people(id INT UNIQUE, name CHAR(16) NULL, score FLOAT NULL)`
pub fn people_columns() -> Vec<Column> {
    vec![
        Column::new("id", TypeId::Int32, false, true),
        Column::char("name", 16, true, false),
        Column::new("score", TypeId::Float32, true, false),
    ]
}

pub fn people_schema() -> Arc<Schema> {
    Arc::new(Schema::new(people_columns()))
}

pub fn person(id: i32, name: &str, score: f32) -> Row {
    Row::new(vec![
        Field::Int32(Some(id)),
        Field::Char(Some(name.into())),
        Field::Float32(Some(score)),
    ])
}

pub mod prelude {
    pub use crate::{people_columns, people_schema, person, reserve_meta_pages, test_pool};
}
