//! On-disk formats for catalog metadata pages.

use bytes::{Buf, BufMut};
use common::{DbError, DbResult, IndexId, PageId, TableId};
use record::Schema;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const CATALOG_META_MAGIC: u32 = 0x4341_5447;
pub const TABLE_META_MAGIC: u32 = 0x5442_4C45;
pub const INDEX_META_MAGIC: u32 = 0x494E_4458;

/// Contents of the catalog meta page: which page holds each table's and
/// index's metadata record.
#[derive(Debug, Default, Clone)]
pub struct CatalogMeta {
    pub table_meta_pages: BTreeMap<TableId, PageId>,
    pub index_meta_pages: BTreeMap<IndexId, PageId>,
}

impl CatalogMeta {
    pub fn serialize_to(&self, buf: &mut impl BufMut) {
        buf.put_u32_ne(CATALOG_META_MAGIC);
        buf.put_u32_ne(self.table_meta_pages.len() as u32);
        for (table_id, page_id) in &self.table_meta_pages {
            buf.put_u32_ne(table_id.0);
            buf.put_i32_ne(page_id.0);
        }
        buf.put_u32_ne(self.index_meta_pages.len() as u32);
        for (index_id, page_id) in &self.index_meta_pages {
            buf.put_u32_ne(index_id.0);
            buf.put_i32_ne(page_id.0);
        }
    }

    pub fn deserialize_from(buf: &mut impl Buf) -> DbResult<CatalogMeta> {
        if buf.get_u32_ne() != CATALOG_META_MAGIC {
            return Err(DbError::CorruptMagic("catalog meta page"));
        }
        let mut meta = CatalogMeta::default();
        let num_tables = buf.get_u32_ne();
        for _ in 0..num_tables {
            let table_id = TableId(buf.get_u32_ne());
            meta.table_meta_pages.insert(table_id, PageId(buf.get_i32_ne()));
        }
        let num_indexes = buf.get_u32_ne();
        for _ in 0..num_indexes {
            let index_id = IndexId(buf.get_u32_ne());
            meta.index_meta_pages.insert(index_id, PageId(buf.get_i32_ne()));
        }
        Ok(meta)
    }

    /// One past the highest id in use.
    pub fn next_table_id(&self) -> u32 {
        self.table_meta_pages
            .keys()
            .next_back()
            .map_or(1, |id| id.0 + 1)
    }

    pub fn next_index_id(&self) -> u32 {
        self.index_meta_pages
            .keys()
            .next_back()
            .map_or(1, |id| id.0 + 1)
    }
}

/// Durable description of one table.
#[derive(Debug, Clone)]
pub struct TableMetadata {
    table_id: TableId,
    name: String,
    first_page_id: PageId,
    schema: Arc<Schema>,
}

impl TableMetadata {
    pub fn new(
        table_id: TableId,
        name: String,
        first_page_id: PageId,
        schema: Arc<Schema>,
    ) -> TableMetadata {
        TableMetadata {
            table_id,
            name,
            first_page_id,
            schema,
        }
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn serialized_size(&self) -> usize {
        4 + 4 + 4 + self.name.len() + 4 + self.schema.serialized_size()
    }

    pub fn serialize_to(&self, buf: &mut impl BufMut) {
        buf.put_u32_ne(TABLE_META_MAGIC);
        buf.put_u32_ne(self.table_id.0);
        buf.put_u32_ne(self.name.len() as u32);
        buf.put_slice(self.name.as_bytes());
        buf.put_i32_ne(self.first_page_id.0);
        self.schema.serialize_to(buf);
    }

    pub fn deserialize_from(buf: &mut impl Buf) -> DbResult<TableMetadata> {
        if buf.get_u32_ne() != TABLE_META_MAGIC {
            return Err(DbError::CorruptMagic("table metadata page"));
        }
        let table_id = TableId(buf.get_u32_ne());
        let name_len = buf.get_u32_ne() as usize;
        let mut name = vec![0u8; name_len];
        buf.copy_to_slice(&mut name);
        let first_page_id = PageId(buf.get_i32_ne());
        let schema = Schema::deserialize_from(buf)?;
        Ok(TableMetadata {
            table_id,
            name: String::from_utf8_lossy(&name).into_owned(),
            first_page_id,
            schema: Arc::new(schema),
        })
    }
}

/// Durable description of one index.
#[derive(Debug, Clone)]
pub struct IndexMetadata {
    index_id: IndexId,
    name: String,
    table_id: TableId,
    key_ordinals: Vec<u32>,
}

impl IndexMetadata {
    pub fn new(
        index_id: IndexId,
        name: String,
        table_id: TableId,
        key_ordinals: Vec<u32>,
    ) -> IndexMetadata {
        IndexMetadata {
            index_id,
            name,
            table_id,
            key_ordinals,
        }
    }

    pub fn index_id(&self) -> IndexId {
        self.index_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn key_ordinals(&self) -> &[u32] {
        &self.key_ordinals
    }

    pub fn serialize_to(&self, buf: &mut impl BufMut) {
        buf.put_u32_ne(INDEX_META_MAGIC);
        buf.put_u32_ne(self.index_id.0);
        buf.put_u32_ne(self.name.len() as u32);
        buf.put_slice(self.name.as_bytes());
        buf.put_u32_ne(self.table_id.0);
        buf.put_u32_ne(self.key_ordinals.len() as u32);
        for ordinal in &self.key_ordinals {
            buf.put_u32_ne(*ordinal);
        }
    }

    pub fn deserialize_from(buf: &mut impl Buf) -> DbResult<IndexMetadata> {
        if buf.get_u32_ne() != INDEX_META_MAGIC {
            return Err(DbError::CorruptMagic("index metadata page"));
        }
        let index_id = IndexId(buf.get_u32_ne());
        let name_len = buf.get_u32_ne() as usize;
        let mut name = vec![0u8; name_len];
        buf.copy_to_slice(&mut name);
        let table_id = TableId(buf.get_u32_ne());
        let key_count = buf.get_u32_ne() as usize;
        let mut key_ordinals = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            key_ordinals.push(buf.get_u32_ne());
        }
        Ok(IndexMetadata {
            index_id,
            name: String::from_utf8_lossy(&name).into_owned(),
            table_id,
            key_ordinals,
        })
    }
}
