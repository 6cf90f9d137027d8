//! Persistent directory of index roots, living on logical page 1.
//!
//! Layout: `[MAGIC | count | (index_id, root_page_id)*]`. Every tree
//! creation, root change and destroy goes through here so an index can be
//! reopened from its id alone.

use bytes::BufMut;
use common::{DbError, DbResult, IndexId, PageId};
use disk::PAGE_SIZE;

/// Logical page reserved for the roots directory.
pub const INDEX_ROOTS_PAGE_ID: PageId = PageId(1);

const ROOTS_MAGIC: u32 = 0x524F_4F54;
const HEADER: usize = 8;
const ENTRY: usize = 8;

/// Directory slots available on the page.
pub const MAX_ENTRIES: usize = (PAGE_SIZE - HEADER) / ENTRY;

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_ne_bytes(data[offset..offset + 4].try_into().unwrap())
}

fn read_i32(data: &[u8], offset: usize) -> i32 {
    i32::from_ne_bytes(data[offset..offset + 4].try_into().unwrap())
}

/// Format an empty directory.
pub fn init(data: &mut [u8]) {
    data.fill(0);
    let mut cur = &mut data[..];
    cur.put_u32_ne(ROOTS_MAGIC);
    cur.put_u32_ne(0);
}

/// A zeroed page counts as an empty directory; anything else must carry
/// the magic.
fn checked_count(data: &[u8]) -> DbResult<usize> {
    if read_u32(data, 0) != ROOTS_MAGIC {
        if data.iter().all(|b| *b == 0) {
            return Ok(0);
        }
        return Err(DbError::CorruptMagic("index roots page"));
    }
    Ok(read_u32(data, 4) as usize)
}

fn find(data: &[u8], index_id: IndexId) -> DbResult<Option<usize>> {
    let count = checked_count(data)?;
    Ok((0..count).find(|i| read_u32(data, HEADER + i * ENTRY) == index_id.0))
}

fn write_entry(data: &mut [u8], slot: usize, index_id: IndexId, root: PageId) {
    let mut cur = &mut data[HEADER + slot * ENTRY..];
    cur.put_u32_ne(index_id.0);
    cur.put_i32_ne(root.0);
}

pub fn get_root_id(data: &[u8], index_id: IndexId) -> DbResult<Option<PageId>> {
    Ok(find(data, index_id)?
        .map(|slot| PageId(read_i32(data, HEADER + slot * ENTRY + 4))))
}

/// Register a new index root. The id must not be present yet.
pub fn insert(data: &mut [u8], index_id: IndexId, root: PageId) -> DbResult<()> {
    if find(data, index_id)?.is_some() {
        return Err(DbError::Storage(format!(
            "index {} already has a registered root",
            index_id.0
        )));
    }
    let count = checked_count(data)?;
    if count >= MAX_ENTRIES {
        return Err(DbError::Storage("index roots page is full".into()));
    }
    if read_u32(data, 0) != ROOTS_MAGIC {
        init(data);
    }
    write_entry(data, count, index_id, root);
    let mut cur = &mut data[4..];
    cur.put_u32_ne(count as u32 + 1);
    Ok(())
}

/// Point an existing entry at a new root.
pub fn update(data: &mut [u8], index_id: IndexId, root: PageId) -> DbResult<()> {
    let slot = find(data, index_id)?.ok_or(DbError::KeyNotFound)?;
    write_entry(data, slot, index_id, root);
    Ok(())
}

/// Drop an entry; removing an absent id is a no-op.
pub fn delete(data: &mut [u8], index_id: IndexId) -> DbResult<()> {
    let Some(slot) = find(data, index_id)? else {
        return Ok(());
    };
    let count = checked_count(data)?;
    data.copy_within(
        HEADER + (slot + 1) * ENTRY..HEADER + count * ENTRY,
        HEADER + slot * ENTRY,
    );
    let mut cur = &mut data[4..];
    cur.put_u32_ne(count as u32 - 1);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_page_acts_as_empty_directory() {
        let data = vec![0u8; PAGE_SIZE];
        assert_eq!(get_root_id(&data, IndexId(1)).unwrap(), None);
    }

    #[test]
    fn insert_update_delete_round_trip() {
        let mut data = vec![0u8; PAGE_SIZE];
        init(&mut data);

        insert(&mut data, IndexId(1), PageId(10)).unwrap();
        insert(&mut data, IndexId(2), PageId(20)).unwrap();
        assert_eq!(get_root_id(&data, IndexId(1)).unwrap(), Some(PageId(10)));
        assert_eq!(get_root_id(&data, IndexId(2)).unwrap(), Some(PageId(20)));

        update(&mut data, IndexId(1), PageId(11)).unwrap();
        assert_eq!(get_root_id(&data, IndexId(1)).unwrap(), Some(PageId(11)));

        delete(&mut data, IndexId(1)).unwrap();
        assert_eq!(get_root_id(&data, IndexId(1)).unwrap(), None);
        assert_eq!(get_root_id(&data, IndexId(2)).unwrap(), Some(PageId(20)));

        // Absent ids delete as a no-op, double insert is refused.
        delete(&mut data, IndexId(9)).unwrap();
        assert!(insert(&mut data, IndexId(2), PageId(21)).is_err());
    }

    #[test]
    fn update_of_unknown_index_fails() {
        let mut data = vec![0u8; PAGE_SIZE];
        init(&mut data);
        assert!(matches!(
            update(&mut data, IndexId(3), PageId(1)),
            Err(DbError::KeyNotFound)
        ));
    }

    #[test]
    fn corrupt_magic_is_rejected() {
        let mut data = vec![0u8; PAGE_SIZE];
        data[0] = 0xAA;
        assert!(matches!(
            get_root_id(&data, IndexId(1)),
            Err(DbError::CorruptMagic(_))
        ));
    }
}
