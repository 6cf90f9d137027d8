//! Slotted page layout for heap tuples.
//!
//! Header, then a slot directory growing up; tuple bytes grow down from the
//! end of the page. Each slot is `(offset, size)`; the top bit of `size`
//! marks a tuple deleted-but-retained, and `size == 0` is an empty
//! tombstone whose slot number stays reserved.

use bytes::BufMut;
use common::{DbError, DbResult, PageId, RowId};
use disk::PAGE_SIZE;

pub const TABLE_PAGE_HEADER: usize = 20;
pub const SLOT_SIZE: usize = 8;

/// Largest serialized row a page can hold: everything but the header and
/// the row's own slot.
pub const SIZE_MAX_ROW: usize = PAGE_SIZE - TABLE_PAGE_HEADER - SLOT_SIZE;

const DELETED_FLAG: u32 = 1 << 31;

const OFS_PAGE_ID: usize = 0;
const OFS_PREV: usize = 4;
const OFS_NEXT: usize = 8;
const OFS_FREE_SPACE_PTR: usize = 12;
const OFS_TUPLE_COUNT: usize = 16;

/// Result of an in-place tuple update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The tuple was rewritten in place; its row id is unchanged.
    Updated,
    /// No live tuple in that slot.
    NotFound,
    /// The new version does not fit; the caller must relocate it.
    NeedsRelocate,
}

/// Read-only view of a table page's bytes.
#[derive(Clone, Copy)]
pub struct TablePageRef<'a> {
    data: &'a [u8],
}

impl<'a> TablePageRef<'a> {
    pub fn new(data: &'a [u8]) -> TablePageRef<'a> {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        TablePageRef { data }
    }

    fn read_u32(&self, offset: usize) -> u32 {
        u32::from_ne_bytes(self.data[offset..offset + 4].try_into().unwrap())
    }

    fn read_i32(&self, offset: usize) -> i32 {
        i32::from_ne_bytes(self.data[offset..offset + 4].try_into().unwrap())
    }

    pub fn page_id(&self) -> PageId {
        PageId(self.read_i32(OFS_PAGE_ID))
    }

    pub fn prev_page_id(&self) -> PageId {
        PageId(self.read_i32(OFS_PREV))
    }

    pub fn next_page_id(&self) -> PageId {
        PageId(self.read_i32(OFS_NEXT))
    }

    pub fn free_space_pointer(&self) -> u32 {
        self.read_u32(OFS_FREE_SPACE_PTR)
    }

    pub fn tuple_count(&self) -> u32 {
        self.read_u32(OFS_TUPLE_COUNT)
    }

    /// Raw `(offset, size)` slot contents; `size` keeps its deleted bit.
    fn slot_raw(&self, slot: u32) -> (u32, u32) {
        let base = TABLE_PAGE_HEADER + slot as usize * SLOT_SIZE;
        (self.read_u32(base), self.read_u32(base + 4))
    }

    /// Bytes usable for a new tuple (directory growth included).
    pub fn free_space(&self) -> usize {
        let directory_end = TABLE_PAGE_HEADER + self.tuple_count() as usize * SLOT_SIZE;
        self.free_space_pointer() as usize - directory_end
    }

    /// The slot number the next insert will take.
    pub fn lowest_free_slot(&self) -> u32 {
        let count = self.tuple_count();
        (0..count)
            .find(|&i| self.slot_raw(i).1 == 0)
            .unwrap_or(count)
    }

    /// Bytes of the live tuple in `slot`.
    pub fn tuple(&self, slot: u32) -> DbResult<&'a [u8]> {
        if slot >= self.tuple_count() {
            return Err(DbError::SlotNotFound {
                page_id: self.page_id(),
                slot,
            });
        }
        let (offset, raw_size) = self.slot_raw(slot);
        if raw_size == 0 {
            return Err(DbError::SlotNotFound {
                page_id: self.page_id(),
                slot,
            });
        }
        if raw_size & DELETED_FLAG != 0 {
            return Err(DbError::Tombstoned(RowId::new(self.page_id(), slot)));
        }
        let start = offset as usize;
        Ok(&self.data[start..start + raw_size as usize])
    }

    pub fn first_live_slot(&self) -> Option<u32> {
        self.live_slot_from(0)
    }

    pub fn next_live_slot(&self, slot: u32) -> Option<u32> {
        self.live_slot_from(slot + 1)
    }

    fn live_slot_from(&self, start: u32) -> Option<u32> {
        (start..self.tuple_count()).find(|&i| {
            let (_, raw) = self.slot_raw(i);
            raw != 0 && raw & DELETED_FLAG == 0
        })
    }
}

/// Mutable view of a table page's bytes.
pub struct TablePageMut<'a> {
    data: &'a mut [u8],
}

impl<'a> TablePageMut<'a> {
    pub fn new(data: &'a mut [u8]) -> TablePageMut<'a> {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        TablePageMut { data }
    }

    pub fn as_ref(&self) -> TablePageRef<'_> {
        TablePageRef { data: self.data }
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        (&mut self.data[offset..offset + 4]).put_u32_ne(value);
    }

    fn write_i32(&mut self, offset: usize, value: i32) {
        (&mut self.data[offset..offset + 4]).put_i32_ne(value);
    }

    fn set_slot(&mut self, slot: u32, offset: u32, raw_size: u32) {
        let base = TABLE_PAGE_HEADER + slot as usize * SLOT_SIZE;
        self.write_u32(base, offset);
        self.write_u32(base + 4, raw_size);
    }

    pub fn init(&mut self, page_id: PageId, prev: PageId) {
        self.data.fill(0);
        self.write_i32(OFS_PAGE_ID, page_id.0);
        self.write_i32(OFS_PREV, prev.0);
        self.write_i32(OFS_NEXT, PageId::INVALID.0);
        self.write_u32(OFS_FREE_SPACE_PTR, PAGE_SIZE as u32);
        self.write_u32(OFS_TUPLE_COUNT, 0);
    }

    pub fn set_prev_page_id(&mut self, prev: PageId) {
        self.write_i32(OFS_PREV, prev.0);
    }

    pub fn set_next_page_id(&mut self, next: PageId) {
        self.write_i32(OFS_NEXT, next.0);
    }

    /// Place a tuple, reusing the lowest empty tombstone slot before
    /// growing the directory. `Ok(None)` means the page is full.
    pub fn insert_tuple(&mut self, tuple: &[u8]) -> DbResult<Option<u32>> {
        if tuple.len() > SIZE_MAX_ROW {
            return Err(DbError::RowTooLarge {
                size: tuple.len(),
                max: SIZE_MAX_ROW,
            });
        }
        let view = self.as_ref();
        let count = view.tuple_count();
        let slot = view.lowest_free_slot();
        let grows_directory = slot == count;
        let needed = tuple.len() + if grows_directory { SLOT_SIZE } else { 0 };
        if needed > view.free_space() {
            return Ok(None);
        }

        let fsp = view.free_space_pointer() as usize - tuple.len();
        self.data[fsp..fsp + tuple.len()].copy_from_slice(tuple);
        self.set_slot(slot, fsp as u32, tuple.len() as u32);
        self.write_u32(OFS_FREE_SPACE_PTR, fsp as u32);
        if grows_directory {
            self.write_u32(OFS_TUPLE_COUNT, count + 1);
        }
        Ok(Some(slot))
    }

    /// Flag a tuple deleted while retaining its bytes.
    pub fn mark_delete(&mut self, slot: u32) -> DbResult<()> {
        let (offset, raw) = self.checked_slot(slot)?;
        self.set_slot(slot, offset, raw | DELETED_FLAG);
        Ok(())
    }

    /// Undo `mark_delete`.
    pub fn rollback_delete(&mut self, slot: u32) -> DbResult<()> {
        let (offset, raw) = self.checked_slot(slot)?;
        self.set_slot(slot, offset, raw & !DELETED_FLAG);
        Ok(())
    }

    /// Compact the tuple out of the page, leaving an empty tombstone so the
    /// slot number stays reserved.
    pub fn apply_delete(&mut self, slot: u32) -> DbResult<()> {
        let (offset, raw) = self.checked_slot(slot)?;
        let size = (raw & !DELETED_FLAG) as usize;
        let offset = offset as usize;
        let fsp = self.as_ref().free_space_pointer() as usize;

        // Tuples stored below the victim shift up over it.
        self.data.copy_within(fsp..offset, fsp + size);
        let count = self.as_ref().tuple_count();
        for i in 0..count {
            let (o, s) = self.as_ref().slot_raw(i);
            if s != 0 && (o as usize) < offset {
                self.set_slot(i, o + size as u32, s);
            }
        }
        self.set_slot(slot, 0, 0);
        self.write_u32(OFS_FREE_SPACE_PTR, (fsp + size) as u32);
        Ok(())
    }

    /// Rewrite a live tuple in place, shifting its neighbors when the sizes
    /// differ.
    pub fn update_tuple(&mut self, slot: u32, tuple: &[u8]) -> UpdateOutcome {
        let view = self.as_ref();
        if slot >= view.tuple_count() {
            return UpdateOutcome::NotFound;
        }
        let (old_offset, raw) = view.slot_raw(slot);
        if raw == 0 || raw & DELETED_FLAG != 0 {
            return UpdateOutcome::NotFound;
        }
        let old_size = raw as usize;
        if tuple.len() > old_size + view.free_space() {
            return UpdateOutcome::NeedsRelocate;
        }

        let old_offset = old_offset as usize;
        let fsp = view.free_space_pointer() as usize;
        let delta = tuple.len() as isize - old_size as isize;
        let new_fsp = (fsp as isize - delta) as usize;
        let new_offset = (old_offset as isize - delta) as usize;

        self.data.copy_within(fsp..old_offset, new_fsp);
        self.data[new_offset..new_offset + tuple.len()].copy_from_slice(tuple);

        let count = self.as_ref().tuple_count();
        for i in 0..count {
            if i == slot {
                continue;
            }
            let (o, s) = self.as_ref().slot_raw(i);
            if s != 0 && (o as usize) < old_offset {
                self.set_slot(i, (o as isize - delta) as u32, s);
            }
        }
        self.set_slot(slot, new_offset as u32, tuple.len() as u32);
        self.write_u32(OFS_FREE_SPACE_PTR, new_fsp as u32);
        UpdateOutcome::Updated
    }

    /// A slot that exists and is not an empty tombstone.
    fn checked_slot(&self, slot: u32) -> DbResult<(u32, u32)> {
        let view = self.as_ref();
        if slot >= view.tuple_count() {
            return Err(DbError::SlotNotFound {
                page_id: view.page_id(),
                slot,
            });
        }
        let (offset, raw) = view.slot_raw(slot);
        if raw == 0 {
            return Err(DbError::SlotNotFound {
                page_id: view.page_id(),
                slot,
            });
        }
        Ok((offset, raw))
    }
}
