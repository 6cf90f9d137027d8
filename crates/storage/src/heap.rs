//! Table heap: a singly linked chain of slotted pages.

use crate::table_page::{TablePageMut, TablePageRef, SIZE_MAX_ROW, UpdateOutcome};
use buffer::BufferPoolManager;
use common::{DbError, DbResult, PageId, RowId, Transaction};
use record::{Row, Schema};
use std::sync::Arc;

/// Variable-length tuple storage for one table.
///
/// Inserts append to the last page of the chain; the first page is
/// allocated lazily by the first insert.
pub struct TableHeap {
    pool: Arc<BufferPoolManager>,
    schema: Arc<Schema>,
    first_page_id: PageId,
    last_page_id: PageId,
}

impl TableHeap {
    /// A heap with no pages yet.
    pub fn create(pool: Arc<BufferPoolManager>, schema: Arc<Schema>) -> TableHeap {
        TableHeap {
            pool,
            schema,
            first_page_id: PageId::INVALID,
            last_page_id: PageId::INVALID,
        }
    }

    /// Attach to an existing chain rooted at `first_page_id`.
    pub fn open(
        pool: Arc<BufferPoolManager>,
        first_page_id: PageId,
        schema: Arc<Schema>,
    ) -> DbResult<TableHeap> {
        let mut last = first_page_id;
        while last.is_valid() {
            let guard = pool.fetch_page(last)?;
            let next = TablePageRef::new(&guard.read()).next_page_id();
            if !next.is_valid() {
                break;
            }
            last = next;
        }
        Ok(TableHeap {
            pool,
            schema,
            first_page_id,
            last_page_id: last,
        })
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Store a row, assigning its row id. Fails with `RowTooLarge` when the
    /// serialized form cannot fit any page.
    pub fn insert_tuple(&mut self, row: &mut Row, _txn: &Transaction) -> DbResult<RowId> {
        let size = row.serialized_size();
        if size > SIZE_MAX_ROW {
            return Err(DbError::RowTooLarge {
                size,
                max: SIZE_MAX_ROW,
            });
        }

        if !self.first_page_id.is_valid() {
            let guard = self.pool.new_page()?;
            let page_id = guard.page_id();
            TablePageMut::new(&mut guard.write()).init(page_id, PageId::INVALID);
            self.first_page_id = page_id;
            self.last_page_id = page_id;
        }

        {
            let guard = self.pool.fetch_page_mut(self.last_page_id)?;
            let mut data = guard.write();
            let mut page = TablePageMut::new(&mut data);
            let slot = page.as_ref().lowest_free_slot();
            row.set_row_id(RowId::new(self.last_page_id, slot));
            let mut bytes = Vec::with_capacity(size);
            row.serialize_to(&mut bytes);
            if let Some(taken) = page.insert_tuple(&bytes)? {
                debug_assert_eq!(taken, slot);
                return Ok(row.row_id());
            }
        }

        // The last page is full: chain a fresh one and insert there.
        let guard = self.pool.new_page()?;
        let page_id = guard.page_id();
        {
            let mut data = guard.write();
            let mut page = TablePageMut::new(&mut data);
            page.init(page_id, self.last_page_id);
            row.set_row_id(RowId::new(page_id, 0));
            let mut bytes = Vec::with_capacity(size);
            row.serialize_to(&mut bytes);
            let taken = page.insert_tuple(&bytes)?;
            debug_assert_eq!(taken, Some(0));
        }
        let prev = self.pool.fetch_page_mut(self.last_page_id)?;
        TablePageMut::new(&mut prev.write()).set_next_page_id(page_id);
        self.last_page_id = page_id;
        Ok(row.row_id())
    }

    /// Fetch the live row stored at `rid`.
    pub fn get_tuple(&self, rid: RowId, _txn: &Transaction) -> DbResult<Row> {
        if !rid.is_valid() || self.pool.is_page_free(rid.page_id)? {
            return Err(DbError::SlotNotFound {
                page_id: rid.page_id,
                slot: rid.slot,
            });
        }
        let guard = self.pool.fetch_page(rid.page_id)?;
        let data = guard.read();
        let bytes = TablePageRef::new(&data).tuple(rid.slot)?;
        let mut row = Row::deserialize_from(&mut &bytes[..], &self.schema)?;
        row.set_row_id(rid);
        Ok(row)
    }

    /// First phase of a delete: flag the tuple, keep its bytes.
    pub fn mark_delete(&self, rid: RowId, _txn: &Transaction) -> DbResult<()> {
        let guard = self.pool.fetch_page_mut(rid.page_id)?;
        TablePageMut::new(&mut guard.write()).mark_delete(rid.slot)
    }

    /// Undo `mark_delete`.
    pub fn rollback_delete(&self, rid: RowId, _txn: &Transaction) -> DbResult<()> {
        let guard = self.pool.fetch_page_mut(rid.page_id)?;
        TablePageMut::new(&mut guard.write()).rollback_delete(rid.slot)
    }

    /// Second phase of a delete: compact the tuple out for good.
    pub fn apply_delete(&self, rid: RowId, _txn: &Transaction) -> DbResult<()> {
        let guard = self.pool.fetch_page_mut(rid.page_id)?;
        TablePageMut::new(&mut guard.write()).apply_delete(rid.slot)
    }

    /// Replace the row at `rid`, in place when it fits. When it does not,
    /// the old row is mark-deleted and the new one inserted elsewhere; the
    /// returned row id is the new location and the caller must repair any
    /// indexes pointing at the old one.
    pub fn update_tuple(
        &mut self,
        row: &mut Row,
        rid: RowId,
        txn: &Transaction,
    ) -> DbResult<RowId> {
        let size = row.serialized_size();
        if size > SIZE_MAX_ROW {
            return Err(DbError::RowTooLarge {
                size,
                max: SIZE_MAX_ROW,
            });
        }

        let guard = self.pool.fetch_page_mut(rid.page_id)?;
        row.set_row_id(rid);
        let mut bytes = Vec::with_capacity(size);
        row.serialize_to(&mut bytes);

        let outcome = {
            let mut data = guard.write();
            TablePageMut::new(&mut data).update_tuple(rid.slot, &bytes)
        };
        match outcome {
            UpdateOutcome::Updated => Ok(rid),
            UpdateOutcome::NotFound => Err(DbError::SlotNotFound {
                page_id: rid.page_id,
                slot: rid.slot,
            }),
            UpdateOutcome::NeedsRelocate => {
                TablePageMut::new(&mut guard.write()).mark_delete(rid.slot)?;
                drop(guard);
                self.insert_tuple(row, txn)
            }
        }
    }

    /// Release every page of the chain back to the disk manager.
    pub fn free_heap(&mut self) -> DbResult<()> {
        let mut current = self.first_page_id;
        while current.is_valid() {
            let next = {
                let guard = self.pool.fetch_page(current)?;
                TablePageRef::new(&guard.read()).next_page_id()
            };
            if !self.pool.delete_page(current)? {
                return Err(DbError::Storage(format!(
                    "heap page {current} is pinned during free"
                )));
            }
            current = next;
        }
        self.first_page_id = PageId::INVALID;
        self.last_page_id = PageId::INVALID;
        Ok(())
    }

    /// Forward cursor over every live tuple.
    pub fn iter(&self, _txn: &Transaction) -> TableIterator<'_> {
        TableIterator {
            heap: self,
            page_id: self.first_page_id,
            prev_slot: None,
        }
    }
}

/// Walks the page chain front to back, skipping tombstones. Holds no pin
/// between calls; position is the `(page, slot)` of the last row yielded.
pub struct TableIterator<'a> {
    heap: &'a TableHeap,
    page_id: PageId,
    prev_slot: Option<u32>,
}

impl Iterator for TableIterator<'_> {
    type Item = DbResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.page_id.is_valid() {
            let guard = match self.heap.pool.fetch_page(self.page_id) {
                Ok(guard) => guard,
                Err(err) => {
                    self.page_id = PageId::INVALID;
                    return Some(Err(err));
                }
            };
            let data = guard.read();
            let view = TablePageRef::new(&data);
            let slot = match self.prev_slot {
                None => view.first_live_slot(),
                Some(prev) => view.next_live_slot(prev),
            };
            match slot {
                Some(slot) => {
                    self.prev_slot = Some(slot);
                    let rid = RowId::new(self.page_id, slot);
                    let item = view.tuple(slot).and_then(|bytes| {
                        let mut row = Row::deserialize_from(&mut &bytes[..], &self.heap.schema)?;
                        row.set_row_id(rid);
                        Ok(row)
                    });
                    return Some(item);
                }
                None => {
                    self.page_id = view.next_page_id();
                    self.prev_slot = None;
                }
            }
        }
        None
    }
}
