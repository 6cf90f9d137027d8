//! Catalog manager: table and index metadata persisted through the buffer
//! pool.
//!
//! Logical page 0 is the catalog meta page mapping ids to metadata pages;
//! each table and index gets a dedicated metadata page of its own. On open
//! the whole catalog is rebuilt from those pages.

mod meta;
#[cfg(test)]
mod tests;

pub use meta::{CatalogMeta, IndexMetadata, TableMetadata};

use ahash::RandomState;
use btree::{key_size_for, roots, BPlusTree, IndexKey, KeyComparator};
use buffer::BufferPoolManager;
use common::{DbError, DbResult, IndexId, PageId, TableId};
use disk::PAGE_SIZE;
use hashbrown::HashMap;
use record::{Column, Row, Schema};
use std::sync::Arc;
use storage::{TableHeap, TablePageMut};
use tracing::warn;

type Map<K, V> = HashMap<K, V, RandomState>;

/// Logical page holding the catalog meta record.
pub const CATALOG_META_PAGE_ID: PageId = PageId(0);

/// A live table: its durable metadata plus the attached heap.
pub struct TableInfo {
    meta: TableMetadata,
    heap: TableHeap,
}

impl TableInfo {
    pub fn table_id(&self) -> TableId {
        self.meta.table_id()
    }

    pub fn name(&self) -> &str {
        self.meta.name()
    }

    pub fn schema(&self) -> &Arc<Schema> {
        self.meta.schema()
    }

    pub fn first_page_id(&self) -> PageId {
        self.meta.first_page_id()
    }

    pub fn heap(&self) -> &TableHeap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut TableHeap {
        &mut self.heap
    }
}

/// A live index: durable metadata, the projected key schema, and the tree.
pub struct IndexInfo {
    meta: IndexMetadata,
    key_schema: Arc<Schema>,
    key_size: usize,
    tree: BPlusTree,
}

impl IndexInfo {
    pub fn index_id(&self) -> IndexId {
        self.meta.index_id()
    }

    pub fn name(&self) -> &str {
        self.meta.name()
    }

    pub fn table_id(&self) -> TableId {
        self.meta.table_id()
    }

    pub fn key_ordinals(&self) -> &[u32] {
        self.meta.key_ordinals()
    }

    pub fn key_schema(&self) -> &Arc<Schema> {
        &self.key_schema
    }

    pub fn tree(&self) -> &BPlusTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut BPlusTree {
        &mut self.tree
    }

    /// Project a row onto this index's key columns.
    pub fn key_from_row(&self, row: &Row) -> DbResult<IndexKey> {
        let fields: Vec<_> = self
            .meta
            .key_ordinals()
            .iter()
            .map(|&ord| row.field(ord as usize).clone())
            .collect();
        IndexKey::encode(&fields, self.key_size)
    }
}

/// In-memory catalog over the persistent metadata pages.
pub struct CatalogManager {
    pool: Arc<BufferPoolManager>,
    meta: CatalogMeta,
    table_names: Map<String, TableId>,
    tables: Map<TableId, TableInfo>,
    index_names: Map<String, Map<String, IndexId>>,
    indexes: Map<IndexId, IndexInfo>,
    next_table_id: u32,
    next_index_id: u32,
}

impl CatalogManager {
    /// Initialize the catalog of a freshly created database file, claiming
    /// the two reserved directory pages.
    pub fn bootstrap(pool: Arc<BufferPoolManager>) -> DbResult<CatalogManager> {
        {
            let meta_page = pool.new_page()?;
            if meta_page.page_id() != CATALOG_META_PAGE_ID {
                return Err(DbError::Storage(
                    "catalog bootstrap needs a fresh database file".into(),
                ));
            }
            let roots_page = pool.new_page()?;
            debug_assert_eq!(roots_page.page_id(), btree::INDEX_ROOTS_PAGE_ID);
            roots::init(&mut roots_page.write());
        }
        let catalog = CatalogManager {
            pool,
            meta: CatalogMeta::default(),
            table_names: Map::default(),
            tables: Map::default(),
            index_names: Map::default(),
            indexes: Map::default(),
            next_table_id: 1,
            next_index_id: 1,
        };
        catalog.write_catalog_meta()?;
        Ok(catalog)
    }

    /// Rebuild the catalog of an existing database from its meta pages.
    pub fn open(pool: Arc<BufferPoolManager>) -> DbResult<CatalogManager> {
        let meta = {
            let guard = pool.fetch_page(CATALOG_META_PAGE_ID)?;
            let data = guard.read();
            CatalogMeta::deserialize_from(&mut &data[..])?
        };
        let mut catalog = CatalogManager {
            next_table_id: meta.next_table_id(),
            next_index_id: meta.next_index_id(),
            pool,
            meta,
            table_names: Map::default(),
            tables: Map::default(),
            index_names: Map::default(),
            indexes: Map::default(),
        };

        let table_pages: Vec<_> = catalog
            .meta
            .table_meta_pages
            .iter()
            .map(|(id, page)| (*id, *page))
            .collect();
        for (table_id, page_id) in table_pages {
            catalog.load_table(table_id, page_id)?;
        }
        let index_pages: Vec<_> = catalog
            .meta
            .index_meta_pages
            .iter()
            .map(|(id, page)| (*id, *page))
            .collect();
        for (index_id, page_id) in index_pages {
            catalog.load_index(index_id, page_id)?;
        }
        Ok(catalog)
    }

    /// Register a table, allocate its metadata page and first heap page,
    /// and implicitly build a unique index for every UNIQUE column.
    pub fn create_table(&mut self, name: &str, columns: Vec<Column>) -> DbResult<TableId> {
        if self.table_names.contains_key(name) {
            return Err(DbError::TableAlreadyExists(name.into()));
        }
        if columns.is_empty() {
            return Err(DbError::Storage("table needs at least one column".into()));
        }
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name() == column.name()) {
                return Err(DbError::Storage(format!(
                    "duplicate column '{}' in table '{name}'",
                    column.name()
                )));
            }
        }

        let schema = Arc::new(Schema::new(columns));
        let table_id = TableId(self.next_table_id);
        self.next_table_id += 1;

        let meta_page = self.pool.new_page()?;
        let meta_page_id = meta_page.page_id();
        let first_page = self.pool.new_page()?;
        let first_page_id = first_page.page_id();
        TablePageMut::new(&mut first_page.write()).init(first_page_id, PageId::INVALID);
        drop(first_page);

        let table_meta = TableMetadata::new(table_id, name.into(), first_page_id, Arc::clone(&schema));
        if table_meta.serialized_size() > PAGE_SIZE {
            return Err(DbError::Storage(format!(
                "metadata for table '{name}' does not fit a page"
            )));
        }
        {
            let mut data = meta_page.write();
            data.fill(0);
            let mut cur = &mut data[..];
            table_meta.serialize_to(&mut cur);
        }
        drop(meta_page);

        let heap = TableHeap::open(Arc::clone(&self.pool), first_page_id, Arc::clone(&schema))?;
        self.meta.table_meta_pages.insert(table_id, meta_page_id);
        self.table_names.insert(name.into(), table_id);
        self.index_names.insert(name.into(), Map::default());
        self.tables.insert(
            table_id,
            TableInfo {
                meta: table_meta,
                heap,
            },
        );
        self.write_catalog_meta()?;

        let unique_columns: Vec<String> = schema
            .columns()
            .iter()
            .filter(|c| c.is_unique())
            .map(|c| c.name().to_string())
            .collect();
        for column in unique_columns {
            let index_name = format!("unique_index_{name}_{column}");
            self.create_index(name, &index_name, &[column.as_str()])?;
        }
        Ok(table_id)
    }

    /// Build an index over the named key columns of a table.
    pub fn create_index(
        &mut self,
        table_name: &str,
        index_name: &str,
        key_columns: &[&str],
    ) -> DbResult<IndexId> {
        let table_id = self.table_id(table_name)?;
        if self
            .index_names
            .get(table_name)
            .is_some_and(|m| m.contains_key(index_name))
        {
            return Err(DbError::IndexAlreadyExists(index_name.into()));
        }
        if key_columns.is_empty() {
            return Err(DbError::Storage(
                "index needs at least one key column".into(),
            ));
        }

        let schema = Arc::clone(self.tables[&table_id].schema());
        let mut ordinals = Vec::with_capacity(key_columns.len());
        for column in key_columns {
            let ordinal = schema
                .column_index(column)
                .ok_or_else(|| DbError::ColumnNotExists((*column).into()))?;
            ordinals.push(ordinal as u32);
        }
        let key_schema = Arc::new(schema.project(&ordinals)?);
        let key_size = key_size_for(&key_schema)?;

        let index_id = IndexId(self.next_index_id);
        self.next_index_id += 1;

        let index_meta =
            IndexMetadata::new(index_id, index_name.into(), table_id, ordinals);
        let meta_page = self.pool.new_page()?;
        let meta_page_id = meta_page.page_id();
        {
            let mut data = meta_page.write();
            data.fill(0);
            let mut cur = &mut data[..];
            index_meta.serialize_to(&mut cur);
        }
        drop(meta_page);

        let tree = BPlusTree::new(
            index_id,
            Arc::clone(&self.pool),
            KeyComparator::new(Arc::clone(&key_schema)),
            key_size,
            0,
            0,
        )?;
        self.meta.index_meta_pages.insert(index_id, meta_page_id);
        self.index_names
            .entry(table_name.into())
            .or_default()
            .insert(index_name.into(), index_id);
        self.indexes.insert(
            index_id,
            IndexInfo {
                meta: index_meta,
                key_schema,
                key_size,
                tree,
            },
        );
        self.write_catalog_meta()?;
        Ok(index_id)
    }

    /// Drop a table, its indexes, its heap pages and its metadata page.
    pub fn drop_table(&mut self, name: &str) -> DbResult<()> {
        let table_id = self.table_id(name)?;
        let index_names: Vec<String> = self
            .index_names
            .get(name)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        for index_name in index_names {
            self.drop_index(name, &index_name)?;
        }

        let mut info = self
            .tables
            .remove(&table_id)
            .expect("table map out of sync with name map");
        info.heap_mut().free_heap()?;

        let meta_page_id = self.meta.table_meta_pages.remove(&table_id).unwrap();
        if !self.pool.delete_page(meta_page_id)? {
            return Err(DbError::Storage(format!(
                "table metadata page {meta_page_id} is pinned during drop"
            )));
        }
        self.table_names.remove(name);
        self.index_names.remove(name);
        self.write_catalog_meta()
    }

    /// Drop an index, destroying its tree pages and metadata page.
    pub fn drop_index(&mut self, table_name: &str, index_name: &str) -> DbResult<()> {
        self.table_id(table_name)?;
        let index_id = self
            .index_names
            .get_mut(table_name)
            .and_then(|m| m.remove(index_name))
            .ok_or_else(|| DbError::IndexNotFound(index_name.into()))?;

        let mut info = self
            .indexes
            .remove(&index_id)
            .expect("index map out of sync with name map");
        info.tree_mut().destroy()?;

        let meta_page_id = self.meta.index_meta_pages.remove(&index_id).unwrap();
        if !self.pool.delete_page(meta_page_id)? {
            return Err(DbError::Storage(format!(
                "index metadata page {meta_page_id} is pinned during drop"
            )));
        }
        self.write_catalog_meta()
    }

    pub fn table(&self, name: &str) -> DbResult<&TableInfo> {
        let table_id = self.table_id(name)?;
        Ok(&self.tables[&table_id])
    }

    pub fn table_mut(&mut self, name: &str) -> DbResult<&mut TableInfo> {
        let table_id = self.table_id(name)?;
        Ok(self.tables.get_mut(&table_id).unwrap())
    }

    pub fn table_by_id(&self, table_id: TableId) -> DbResult<&TableInfo> {
        self.tables
            .get(&table_id)
            .ok_or_else(|| DbError::TableNotExists(format!("#{}", table_id.0)))
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableInfo> {
        self.tables.values()
    }

    pub fn index(&self, table_name: &str, index_name: &str) -> DbResult<&IndexInfo> {
        let index_id = self.index_id(table_name, index_name)?;
        Ok(&self.indexes[&index_id])
    }

    pub fn index_mut(&mut self, table_name: &str, index_name: &str) -> DbResult<&mut IndexInfo> {
        let index_id = self.index_id(table_name, index_name)?;
        Ok(self.indexes.get_mut(&index_id).unwrap())
    }

    /// Every index defined on a table.
    pub fn table_indexes(&self, table_name: &str) -> DbResult<Vec<&IndexInfo>> {
        self.table_id(table_name)?;
        let mut infos: Vec<&IndexInfo> = self
            .index_names
            .get(table_name)
            .map(|m| m.values().map(|id| &self.indexes[id]).collect())
            .unwrap_or_default();
        infos.sort_by_key(|info| info.index_id());
        Ok(infos)
    }

    fn table_id(&self, name: &str) -> DbResult<TableId> {
        self.table_names
            .get(name)
            .copied()
            .ok_or_else(|| DbError::TableNotExists(name.into()))
    }

    fn index_id(&self, table_name: &str, index_name: &str) -> DbResult<IndexId> {
        self.table_id(table_name)?;
        self.index_names
            .get(table_name)
            .and_then(|m| m.get(index_name))
            .copied()
            .ok_or_else(|| DbError::IndexNotFound(index_name.into()))
    }

    fn load_table(&mut self, table_id: TableId, page_id: PageId) -> DbResult<()> {
        let table_meta = {
            let guard = self.pool.fetch_page(page_id)?;
            let data = guard.read();
            TableMetadata::deserialize_from(&mut &data[..])?
        };
        if table_meta.table_id() != table_id {
            warn!(expected = table_id.0, found = table_meta.table_id().0,
                  "table metadata page id mismatch");
        }
        let heap = TableHeap::open(
            Arc::clone(&self.pool),
            table_meta.first_page_id(),
            Arc::clone(table_meta.schema()),
        )?;
        self.table_names.insert(table_meta.name().into(), table_id);
        self.index_names
            .entry(table_meta.name().into())
            .or_default();
        self.tables.insert(
            table_id,
            TableInfo {
                meta: table_meta,
                heap,
            },
        );
        Ok(())
    }

    fn load_index(&mut self, index_id: IndexId, page_id: PageId) -> DbResult<()> {
        let index_meta = {
            let guard = self.pool.fetch_page(page_id)?;
            let data = guard.read();
            IndexMetadata::deserialize_from(&mut &data[..])?
        };
        let table = self.table_by_id(index_meta.table_id())?;
        let table_name = table.name().to_string();
        let key_schema = Arc::new(table.schema().project(index_meta.key_ordinals())?);
        let key_size = key_size_for(&key_schema)?;
        let tree = BPlusTree::new(
            index_id,
            Arc::clone(&self.pool),
            KeyComparator::new(Arc::clone(&key_schema)),
            key_size,
            0,
            0,
        )?;
        self.index_names
            .entry(table_name)
            .or_default()
            .insert(index_meta.name().into(), index_id);
        self.indexes.insert(
            index_id,
            IndexInfo {
                meta: index_meta,
                key_schema,
                key_size,
                tree,
            },
        );
        Ok(())
    }

    /// Rewrite logical page 0 after any DDL.
    fn write_catalog_meta(&self) -> DbResult<()> {
        let guard = self.pool.fetch_page_mut(CATALOG_META_PAGE_ID)?;
        let mut data = guard.write();
        data.fill(0);
        let mut cur = &mut data[..];
        self.meta.serialize_to(&mut cur);
        Ok(())
    }
}
