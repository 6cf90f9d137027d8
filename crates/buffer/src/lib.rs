//! Buffer pool manager: a fixed array of frames caching logical pages.
//!
//! All persistent state flows through here: callers fetch a page, mutate
//! it through a guard, and the guard's drop releases the pin. Dirtiness is
//! recorded by the write guard, so the pin/unpin discipline is a property
//! of scope rather than something callers have to audit.
//!
//! # Example
//!
//! ```no_run
//! use buffer::BufferPoolManager;
//! use common::ReplacerPolicy;
//! use disk::DiskManager;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let disk = Arc::new(DiskManager::open(Path::new("/tmp/example.db")).unwrap());
//! let pool = BufferPoolManager::new(disk, 64, ReplacerPolicy::Lru);
//!
//! let page_id = {
//!     let page = pool.new_page().unwrap();
//!     page.write()[0] = 42;
//!     page.page_id()
//! }; // pin released here
//!
//! let page = pool.fetch_page(page_id).unwrap();
//! assert_eq!(page.read()[0], 42);
//! ```

mod replacer;
#[cfg(test)]
mod tests;

pub use replacer::{ClockReplacer, LruReplacer, Replacer};

use common::{DbError, DbResult, FrameId, PageId, ReplacerPolicy};
use disk::{DiskManager, PAGE_SIZE};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::warn;

struct Frame {
    page_id: PageId,
    pin_count: u32,
    dirty: bool,
    data: Box<[u8]>,
}

impl Frame {
    fn empty() -> Frame {
        Frame {
            page_id: PageId::INVALID,
            pin_count: 0,
            dirty: false,
            data: vec![0u8; PAGE_SIZE].into_boxed_slice(),
        }
    }

    fn reset(&mut self) {
        self.page_id = PageId::INVALID;
        self.pin_count = 0;
        self.dirty = false;
        self.data.fill(0);
    }
}

/// Caches up to `pool_size` logical pages and mediates all page access.
pub struct BufferPoolManager {
    disk: Arc<DiskManager>,
    frames: Vec<RwLock<Frame>>,
    page_table: RwLock<HashMap<PageId, FrameId>>,
    free_list: Mutex<Vec<FrameId>>,
    replacer: Mutex<Box<dyn Replacer>>,
}

impl BufferPoolManager {
    pub fn new(disk: Arc<DiskManager>, pool_size: usize, policy: ReplacerPolicy) -> Self {
        assert!(pool_size > 0, "pool_size must be > 0");
        let replacer: Box<dyn Replacer> = match policy {
            ReplacerPolicy::Lru => Box::new(LruReplacer::new(pool_size)),
            ReplacerPolicy::Clock => Box::new(ClockReplacer::new(pool_size)),
        };
        BufferPoolManager {
            disk,
            frames: (0..pool_size).map(|_| RwLock::new(Frame::empty())).collect(),
            page_table: RwLock::new(HashMap::new()),
            free_list: Mutex::new((0..pool_size).rev().collect()),
            replacer: Mutex::new(replacer),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    /// Whether the page is unallocated on disk.
    pub fn is_page_free(&self, page_id: PageId) -> DbResult<bool> {
        self.disk.is_page_free(page_id)
    }

    /// Fetch a page for reading. The returned guard keeps the page pinned.
    pub fn fetch_page(&self, page_id: PageId) -> DbResult<PageGuard<'_>> {
        let frame_id = self.pin_resident_or_load(page_id)?;
        Ok(PageGuard {
            pool: self,
            frame: &self.frames[frame_id],
            frame_id,
            page_id,
            mark_dirty: false,
        })
    }

    /// Fetch a page for mutation; the frame is marked dirty when the guard
    /// drops.
    pub fn fetch_page_mut(&self, page_id: PageId) -> DbResult<PageWriteGuard<'_>> {
        let frame_id = self.pin_resident_or_load(page_id)?;
        Ok(PageWriteGuard(PageGuard {
            pool: self,
            frame: &self.frames[frame_id],
            frame_id,
            page_id,
            mark_dirty: true,
        }))
    }

    /// Allocate a fresh page on disk and return it zeroed, pinned and dirty.
    pub fn new_page(&self) -> DbResult<PageWriteGuard<'_>> {
        let frame_id = self.take_frame()?;
        let page_id = match self.disk.allocate_page() {
            Ok(id) => id,
            Err(err) => {
                self.free_list.lock().push(frame_id);
                return Err(err);
            }
        };
        {
            let mut frame = self.frames[frame_id].write();
            frame.data.fill(0);
            frame.page_id = page_id;
            frame.pin_count = 1;
            frame.dirty = true;
        }
        self.page_table.write().insert(page_id, frame_id);
        Ok(PageWriteGuard(PageGuard {
            pool: self,
            frame: &self.frames[frame_id],
            frame_id,
            page_id,
            mark_dirty: true,
        }))
    }

    /// Drop a page from the pool and free it on disk.
    ///
    /// Returns `Ok(false)` when the page is pinned. A page that is not
    /// resident is still deallocated on disk so eviction cannot leak pages.
    pub fn delete_page(&self, page_id: PageId) -> DbResult<bool> {
        let resident = self.page_table.read().get(&page_id).copied();
        let Some(frame_id) = resident else {
            self.disk.deallocate_page(page_id)?;
            return Ok(true);
        };

        let mut frame = self.frames[frame_id].write();
        if frame.pin_count > 0 {
            return Ok(false);
        }
        self.disk.deallocate_page(page_id)?;
        frame.reset();
        drop(frame);

        self.page_table.write().remove(&page_id);
        self.replacer.lock().pin(frame_id);
        self.free_list.lock().push(frame_id);
        Ok(true)
    }

    /// Write a resident page back to disk regardless of its pin count.
    /// Returns `Ok(false)` when the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> DbResult<bool> {
        let Some(frame_id) = self.page_table.read().get(&page_id).copied() else {
            return Ok(false);
        };
        let mut frame = self.frames[frame_id].write();
        self.disk.write_page(page_id, &frame.data)?;
        frame.dirty = false;
        Ok(true)
    }

    /// Write back every resident page.
    pub fn flush_all(&self) -> DbResult<()> {
        let resident: Vec<PageId> = self.page_table.read().keys().copied().collect();
        for page_id in resident {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    fn pin_resident_or_load(&self, page_id: PageId) -> DbResult<FrameId> {
        if let Some(&frame_id) = self.page_table.read().get(&page_id) {
            let mut frame = self.frames[frame_id].write();
            frame.pin_count += 1;
            if frame.pin_count == 1 {
                self.replacer.lock().pin(frame_id);
            }
            return Ok(frame_id);
        }

        let frame_id = self.take_frame()?;
        {
            let mut frame = self.frames[frame_id].write();
            if let Err(err) = self.disk.read_page(page_id, &mut frame.data) {
                frame.reset();
                drop(frame);
                self.free_list.lock().push(frame_id);
                return Err(err);
            }
            frame.page_id = page_id;
            frame.pin_count = 1;
            frame.dirty = false;
        }
        self.page_table.write().insert(page_id, frame_id);
        Ok(frame_id)
    }

    /// Grab a usable frame: the free list first, then a replacer victim
    /// (written back if dirty). The frame is left off both structures.
    fn take_frame(&self) -> DbResult<FrameId> {
        if let Some(frame_id) = self.free_list.lock().pop() {
            return Ok(frame_id);
        }
        let Some(frame_id) = self.replacer.lock().victim() else {
            return Err(DbError::AllPinned);
        };
        let mut frame = self.frames[frame_id].write();
        debug_assert_eq!(frame.pin_count, 0, "victim frame must be unpinned");
        if frame.dirty {
            self.disk.write_page(frame.page_id, &frame.data)?;
        }
        let evicted = frame.page_id;
        frame.reset();
        drop(frame);
        self.page_table.write().remove(&evicted);
        Ok(frame_id)
    }

    fn unpin(&self, frame_id: FrameId, page_id: PageId, dirty: bool) {
        let mut frame = self.frames[frame_id].write();
        if frame.pin_count == 0 {
            warn!(%page_id, "unpin without a matching pin");
            return;
        }
        frame.pin_count -= 1;
        frame.dirty |= dirty;
        if frame.pin_count == 0 {
            self.replacer.lock().unpin(frame_id);
        }
    }
}

impl Drop for BufferPoolManager {
    fn drop(&mut self) {
        if let Err(err) = self.flush_all() {
            warn!(%err, "flush on shutdown failed");
        }
    }
}

/// Pinned read access to one page. Unpins on drop.
pub struct PageGuard<'a> {
    pool: &'a BufferPoolManager,
    frame: &'a RwLock<Frame>,
    frame_id: FrameId,
    page_id: PageId,
    mark_dirty: bool,
}

impl PageGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Borrow the page bytes.
    pub fn read(&self) -> PageRef<'_> {
        PageRef {
            guard: self.frame.read(),
        }
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin(self.frame_id, self.page_id, self.mark_dirty);
    }
}

/// Pinned exclusive access to one page; the frame is marked dirty when this
/// guard drops.
pub struct PageWriteGuard<'a>(PageGuard<'a>);

impl std::fmt::Debug for PageWriteGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageWriteGuard")
            .field("page_id", &self.0.page_id)
            .finish()
    }
}

impl PageWriteGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.0.page_id
    }

    pub fn read(&self) -> PageRef<'_> {
        self.0.read()
    }

    /// Borrow the page bytes mutably.
    pub fn write(&self) -> PageMut<'_> {
        PageMut {
            guard: self.0.frame.write(),
        }
    }
}

/// Shared view of a frame's bytes.
pub struct PageRef<'a> {
    guard: RwLockReadGuard<'a, Frame>,
}

impl Deref for PageRef<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.guard.data
    }
}

/// Exclusive view of a frame's bytes.
pub struct PageMut<'a> {
    guard: RwLockWriteGuard<'a, Frame>,
}

impl Deref for PageMut<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.guard.data
    }
}

impl DerefMut for PageMut<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.guard.data
    }
}
