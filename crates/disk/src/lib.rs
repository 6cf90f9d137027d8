//! Disk manager: a single database file divided into fixed-size pages.
//!
//! The file is laid out as one meta page followed by repeating extents of
//! `1 bitmap page + BITMAP_CAPACITY data pages`. Logical page ids are dense
//! per extent; every access goes through the logical→physical mapping so
//! callers never see bitmap or meta pages.


use bytes::{Buf, BufMut};
use common::{DbError, DbResult, PageId};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::warn;

/// Fixed on-disk page size in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Data pages governed by one extent bitmap: one bit per page.
pub const BITMAP_CAPACITY: u32 = (PAGE_SIZE * 8) as u32;

/// Hard cap on logical page ids; allocation past it fails with `OutOfSpace`.
pub const MAX_VALID_PAGE_ID: u32 = BITMAP_CAPACITY * 64;

const DISK_META_MAGIC: u32 = 0x4D45_5441;

/// In-memory copy of the meta page (physical page 0).
#[derive(Debug, Clone, Default)]
struct DiskMeta {
    num_allocated: u32,
    extent_used: Vec<u32>,
}

impl DiskMeta {
    fn num_extents(&self) -> u32 {
        self.extent_used.len() as u32
    }

    fn encode(&self, page: &mut [u8]) {
        let mut cur = &mut page[..];
        cur.put_u32_ne(DISK_META_MAGIC);
        cur.put_u32_ne(self.num_allocated);
        cur.put_u32_ne(self.num_extents());
        for used in &self.extent_used {
            cur.put_u32_ne(*used);
        }
    }

    fn decode(page: &[u8]) -> DbResult<DiskMeta> {
        let mut cur = &page[..];
        let magic = cur.get_u32_ne();
        if magic != DISK_META_MAGIC {
            return Err(DbError::CorruptMagic("disk meta page"));
        }
        let num_allocated = cur.get_u32_ne();
        let num_extents = cur.get_u32_ne();
        let mut extent_used = Vec::with_capacity(num_extents as usize);
        for _ in 0..num_extents {
            extent_used.push(cur.get_u32_ne());
        }
        Ok(DiskMeta {
            num_allocated,
            extent_used,
        })
    }
}

struct DiskInner {
    file: File,
    meta: DiskMeta,
}

/// Owns the database file and the extent allocation bitmaps.
///
/// All file I/O is serialized behind a single mutex so a multi-threaded
/// caller can safely share one manager.
pub struct DiskManager {
    inner: Mutex<DiskInner>,
}

impl DiskManager {
    /// Open a database file, creating it if absent. A zeroed or empty file
    /// yields fresh meta; anything else must carry the meta magic.
    pub fn open(path: &Path) -> DbResult<DiskManager> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut page = [0u8; PAGE_SIZE];
        read_physical(&mut file, 0, &mut page)?;
        let meta = if page.iter().all(|b| *b == 0) {
            let meta = DiskMeta::default();
            let mut fresh = [0u8; PAGE_SIZE];
            meta.encode(&mut fresh);
            write_physical(&mut file, 0, &fresh)?;
            meta
        } else {
            DiskMeta::decode(&page)?
        };

        Ok(DiskManager {
            inner: Mutex::new(DiskInner { file, meta }),
        })
    }

    /// Allocate the lowest free logical page, growing into a new extent
    /// when every existing one is full.
    pub fn allocate_page(&self) -> DbResult<PageId> {
        let mut inner = self.inner.lock();
        for extent in 0u32.. {
            if (extent + 1) * BITMAP_CAPACITY > MAX_VALID_PAGE_ID {
                warn!(num_allocated = inner.meta.num_allocated, "disk is full");
                return Err(DbError::OutOfSpace);
            }
            // The meta page knows which extents are full; skip their bitmaps.
            if inner
                .meta
                .extent_used
                .get(extent as usize)
                .is_some_and(|used| *used >= BITMAP_CAPACITY)
            {
                continue;
            }

            let mut bitmap = [0u8; PAGE_SIZE];
            read_physical(&mut inner.file, bitmap_physical_index(extent), &mut bitmap)?;
            let Some(offset) = first_clear_bit(&bitmap) else {
                continue;
            };
            set_bit(&mut bitmap, offset);
            write_physical(&mut inner.file, bitmap_physical_index(extent), &bitmap)?;

            if extent >= inner.meta.num_extents() {
                inner.meta.extent_used.resize(extent as usize + 1, 0);
            }
            inner.meta.extent_used[extent as usize] += 1;
            inner.meta.num_allocated += 1;
            write_meta(&mut inner)?;
            return Ok(PageId((extent * BITMAP_CAPACITY + offset) as i32));
        }
        unreachable!("extent scan always terminates via OutOfSpace")
    }

    /// Clear a page's allocation bit. Deallocating a page that is already
    /// free is reported but leaves the counters untouched.
    pub fn deallocate_page(&self, page_id: PageId) -> DbResult<()> {
        let logical = checked_logical(page_id)?;
        let mut inner = self.inner.lock();
        let extent = logical / BITMAP_CAPACITY;
        let offset = logical % BITMAP_CAPACITY;

        let mut bitmap = [0u8; PAGE_SIZE];
        read_physical(&mut inner.file, bitmap_physical_index(extent), &mut bitmap)?;
        if !test_bit(&bitmap, offset) {
            warn!(%page_id, "deallocate of a page that is not allocated");
            return Ok(());
        }
        clear_bit(&mut bitmap, offset);
        write_physical(&mut inner.file, bitmap_physical_index(extent), &bitmap)?;

        inner.meta.extent_used[extent as usize] -= 1;
        inner.meta.num_allocated -= 1;
        write_meta(&mut inner)
    }

    /// Whether the page's allocation bit is clear.
    pub fn is_page_free(&self, page_id: PageId) -> DbResult<bool> {
        let logical = checked_logical(page_id)?;
        let mut inner = self.inner.lock();
        let extent = logical / BITMAP_CAPACITY;
        let mut bitmap = [0u8; PAGE_SIZE];
        read_physical(&mut inner.file, bitmap_physical_index(extent), &mut bitmap)?;
        Ok(!test_bit(&bitmap, logical % BITMAP_CAPACITY))
    }

    /// Read a logical page. Bytes past the end of the file read as zero.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> DbResult<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let logical = checked_logical(page_id)?;
        let mut inner = self.inner.lock();
        read_physical(&mut inner.file, data_physical_index(logical), buf)
    }

    /// Write a logical page; the write reaches the file before returning.
    pub fn write_page(&self, page_id: PageId, buf: &[u8]) -> DbResult<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let logical = checked_logical(page_id)?;
        let mut inner = self.inner.lock();
        write_physical(&mut inner.file, data_physical_index(logical), buf)
    }

    /// Pages currently allocated, per the meta page.
    pub fn num_allocated(&self) -> u32 {
        self.inner.lock().meta.num_allocated
    }

    /// Extents the file has grown to.
    pub fn num_extents(&self) -> u32 {
        self.inner.lock().meta.num_extents()
    }
}

fn checked_logical(page_id: PageId) -> DbResult<u32> {
    if !page_id.is_valid() || page_id.0 as u32 >= MAX_VALID_PAGE_ID {
        return Err(DbError::Storage(format!("invalid page id {page_id}")));
    }
    Ok(page_id.0 as u32)
}

/// Physical index of the bitmap page governing `extent`.
fn bitmap_physical_index(extent: u32) -> u64 {
    1 + extent as u64 * (BITMAP_CAPACITY as u64 + 1)
}

/// Physical index of a logical data page.
fn data_physical_index(logical: u32) -> u64 {
    let extent = logical as u64 / BITMAP_CAPACITY as u64;
    let offset = logical as u64 % BITMAP_CAPACITY as u64;
    extent * (BITMAP_CAPACITY as u64 + 1) + offset + 2
}

fn write_meta(inner: &mut DiskInner) -> DbResult<()> {
    let mut page = [0u8; PAGE_SIZE];
    inner.meta.encode(&mut page);
    write_physical(&mut inner.file, 0, &page)
}

fn read_physical(file: &mut File, physical: u64, buf: &mut [u8]) -> DbResult<()> {
    let offset = physical * PAGE_SIZE as u64;
    let len = file.metadata()?.len();
    if offset >= len {
        buf.fill(0);
        return Ok(());
    }
    file.seek(SeekFrom::Start(offset))?;
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    // A short tail read past EOF zero-fills the rest.
    buf[filled..].fill(0);
    Ok(())
}

fn write_physical(file: &mut File, physical: u64, buf: &[u8]) -> DbResult<()> {
    file.seek(SeekFrom::Start(physical * PAGE_SIZE as u64))?;
    file.write_all(buf)?;
    file.flush()?;
    Ok(())
}

fn first_clear_bit(bitmap: &[u8]) -> Option<u32> {
    for (i, byte) in bitmap.iter().enumerate() {
        if *byte != 0xFF {
            let bit = byte.trailing_ones();
            return Some(i as u32 * 8 + bit);
        }
    }
    None
}

fn test_bit(bitmap: &[u8], offset: u32) -> bool {
    bitmap[offset as usize / 8] & (1 << (offset % 8)) != 0
}

fn set_bit(bitmap: &mut [u8], offset: u32) {
    bitmap[offset as usize / 8] |= 1 << (offset % 8);
}

fn clear_bit(bitmap: &mut [u8], offset: u32) {
    bitmap[offset as usize / 8] &= !(1 << (offset % 8));
}
