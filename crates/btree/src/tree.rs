//! The B+tree proper: descent, split propagation, merge/redistribute.

use crate::key::{IndexKey, KeyComparator};
use crate::node::{self, InternalMut, InternalRef, LeafMut, LeafRef};
use crate::roots::{self, INDEX_ROOTS_PAGE_ID};
use buffer::{BufferPoolManager, PageWriteGuard};
use common::{DbError, DbResult, IndexId, PageId, RowId};
use std::sync::Arc;

/// What a recursive insert reports back to its parent frame.
struct Descent {
    /// Minimum key of the visited subtree after the insert.
    min_key: IndexKey,
    /// A new right sibling (its minimum key and page) when the child split.
    split: Option<(IndexKey, PageId)>,
}

enum RootChange {
    Insert,
    Update,
    Delete,
}

/// A clustered index over fixed-size keys with `RowId` values.
///
/// All node storage goes through the buffer pool; the root page id is
/// persisted in the roots directory on every change.
pub struct BPlusTree {
    index_id: IndexId,
    pool: Arc<BufferPoolManager>,
    comparator: KeyComparator,
    key_size: usize,
    leaf_max_size: u32,
    internal_max_size: u32,
    root_page_id: PageId,
}

impl BPlusTree {
    /// Attach to the index `index_id`, reading its root from the roots
    /// directory. Passing 0 for either fan-out derives it from the page
    /// capacity.
    pub fn new(
        index_id: IndexId,
        pool: Arc<BufferPoolManager>,
        comparator: KeyComparator,
        key_size: usize,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> DbResult<BPlusTree> {
        let leaf_max_size = if leaf_max_size == 0 {
            node::leaf_capacity(key_size)
        } else {
            leaf_max_size
        };
        let internal_max_size = if internal_max_size == 0 {
            node::internal_capacity(key_size)
        } else {
            internal_max_size
        };
        debug_assert!(leaf_max_size >= 2 && internal_max_size >= 3);

        let root_page_id = {
            let guard = pool.fetch_page(INDEX_ROOTS_PAGE_ID)?;
            let data = guard.read();
            roots::get_root_id(&data, index_id)?.unwrap_or(PageId::INVALID)
        };
        Ok(BPlusTree {
            index_id,
            pool,
            comparator,
            key_size,
            leaf_max_size,
            internal_max_size,
            root_page_id,
        })
    }

    pub fn index_id(&self) -> IndexId {
        self.index_id
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    pub fn is_empty(&self) -> bool {
        !self.root_page_id.is_valid()
    }

    pub fn comparator(&self) -> &KeyComparator {
        &self.comparator
    }

    /// Point lookup.
    pub fn get(&self, key: &IndexKey) -> DbResult<Option<RowId>> {
        let Some(leaf_id) = self.find_leaf(key)? else {
            return Ok(None);
        };
        let guard = self.pool.fetch_page(leaf_id)?;
        let data = guard.read();
        let leaf = LeafRef::new(&data);
        Ok(leaf
            .lookup(key.as_bytes(), &self.comparator)
            .ok()
            .map(|pos| leaf.rid_at(pos)))
    }

    /// Insert a unique key. An existing key fails with `DuplicateKey` and
    /// leaves the tree untouched.
    pub fn insert(&mut self, key: &IndexKey, rid: RowId) -> DbResult<()> {
        debug_assert_eq!(key.as_bytes().len(), self.key_size);
        if !self.root_page_id.is_valid() {
            return self.start_new_tree(key, rid);
        }

        let old_root = self.root_page_id;
        let descent = self.insert_down(old_root, key, rid)?;
        if let Some((split_key, split_page)) = descent.split {
            // The old root split: put both halves under a fresh root.
            let guard = self.pool.new_page()?;
            let new_root_id = guard.page_id();
            {
                let mut data = guard.write();
                let mut root = InternalMut::init(
                    &mut data,
                    new_root_id,
                    PageId::INVALID,
                    self.key_size,
                    self.internal_max_size,
                );
                root.write_entries(&[(descent.min_key, old_root), (split_key, split_page)]);
            }
            for child in [old_root, split_page] {
                let child_guard = self.pool.fetch_page_mut(child)?;
                node::set_parent(&mut child_guard.write(), new_root_id);
            }
            self.root_page_id = new_root_id;
            self.update_root(RootChange::Update)?;
        }
        Ok(())
    }

    /// Remove a key; `KeyNotFound` when it is absent.
    pub fn remove(&mut self, key: &IndexKey) -> DbResult<()> {
        if !self.root_page_id.is_valid() {
            return Err(DbError::KeyNotFound);
        }
        let root_id = self.root_page_id;
        let (_, found) = self.remove_down(root_id, key)?;
        if !found {
            return Err(DbError::KeyNotFound);
        }

        let (root_is_leaf, root_size, only_child) = {
            let guard = self.pool.fetch_page(root_id)?;
            let data = guard.read();
            if node::is_leaf(&data) {
                (true, node::node_size(&data), PageId::INVALID)
            } else {
                let root = InternalRef::new(&data);
                (false, root.size(), root.child_at(0))
            }
        };
        if !root_is_leaf && root_size == 1 {
            // An internal root with a single child: promote the child.
            self.delete_node_page(root_id)?;
            let child = self.pool.fetch_page_mut(only_child)?;
            node::set_parent(&mut child.write(), PageId::INVALID);
            drop(child);
            self.root_page_id = only_child;
            self.update_root(RootChange::Update)?;
        } else if root_is_leaf && root_size == 0 {
            self.delete_node_page(root_id)?;
            self.root_page_id = PageId::INVALID;
            self.update_root(RootChange::Delete)?;
        }
        Ok(())
    }

    /// Free every node page and drop the roots entry.
    pub fn destroy(&mut self) -> DbResult<()> {
        if self.root_page_id.is_valid() {
            self.destroy_down(self.root_page_id)?;
            self.root_page_id = PageId::INVALID;
        }
        self.update_root(RootChange::Delete)
    }

    /// Levels from root to leaf; 0 for an empty tree.
    pub fn height(&self) -> DbResult<u32> {
        let mut height = 0;
        let mut current = self.root_page_id;
        while current.is_valid() {
            height += 1;
            let guard = self.pool.fetch_page(current)?;
            let data = guard.read();
            if node::is_leaf(&data) {
                break;
            }
            current = InternalRef::new(&data).child_at(0);
        }
        Ok(height)
    }

    /// Cursor at the smallest key.
    pub fn iter(&self) -> DbResult<IndexIterator<'_>> {
        let mut current = self.root_page_id;
        while current.is_valid() {
            let guard = self.pool.fetch_page(current)?;
            let data = guard.read();
            if node::is_leaf(&data) {
                break;
            }
            current = InternalRef::new(&data).child_at(0);
        }
        Ok(IndexIterator {
            tree: self,
            leaf: current,
            index: 0,
        })
    }

    /// Cursor positioned at an exact key; a miss yields the end cursor.
    pub fn iter_from(&self, key: &IndexKey) -> DbResult<IndexIterator<'_>> {
        let Some(leaf_id) = self.find_leaf(key)? else {
            return Ok(self.end());
        };
        let pos = {
            let guard = self.pool.fetch_page(leaf_id)?;
            let data = guard.read();
            LeafRef::new(&data).lookup(key.as_bytes(), &self.comparator)
        };
        match pos {
            Ok(index) => Ok(IndexIterator {
                tree: self,
                leaf: leaf_id,
                index: index as u32,
            }),
            Err(_) => Ok(self.end()),
        }
    }

    fn end(&self) -> IndexIterator<'_> {
        IndexIterator {
            tree: self,
            leaf: PageId::INVALID,
            index: 0,
        }
    }

    fn find_leaf(&self, key: &IndexKey) -> DbResult<Option<PageId>> {
        if !self.root_page_id.is_valid() {
            return Ok(None);
        }
        let mut current = self.root_page_id;
        loop {
            let guard = self.pool.fetch_page(current)?;
            let data = guard.read();
            if node::is_leaf(&data) {
                return Ok(Some(current));
            }
            let internal = InternalRef::new(&data);
            current = internal.child_at(internal.lookup_child(key.as_bytes(), &self.comparator));
        }
    }

    fn start_new_tree(&mut self, key: &IndexKey, rid: RowId) -> DbResult<()> {
        let guard = self.pool.new_page()?;
        let page_id = guard.page_id();
        {
            let mut data = guard.write();
            let mut leaf = LeafMut::init(
                &mut data,
                page_id,
                PageId::INVALID,
                self.key_size,
                self.leaf_max_size,
            );
            leaf.insert_at(0, key.as_bytes(), rid);
        }
        self.root_page_id = page_id;
        self.update_root(RootChange::Insert)
    }

    fn insert_down(&self, page_id: PageId, key: &IndexKey, rid: RowId) -> DbResult<Descent> {
        let guard = self.pool.fetch_page_mut(page_id)?;
        if node::is_leaf(&guard.read()) {
            return self.insert_into_leaf(&guard, key, rid);
        }

        let (child_idx, child_id) = {
            let data = guard.read();
            let internal = InternalRef::new(&data);
            let idx = internal.lookup_child(key.as_bytes(), &self.comparator);
            (idx, internal.child_at(idx))
        };
        let descent = self.insert_down(child_id, key, rid)?;

        let mut data = guard.write();
        let mut internal = InternalMut::new(&mut data);
        internal.set_key_at(child_idx, descent.min_key.as_bytes());

        let Some((split_key, split_page)) = descent.split else {
            let min_key = IndexKey::from_bytes(internal.as_ref().key_at(0));
            return Ok(Descent {
                min_key,
                split: None,
            });
        };

        if internal.as_ref().size() < internal.as_ref().max_size() {
            internal.insert_at(child_idx + 1, split_key.as_bytes(), split_page);
            let min_key = IndexKey::from_bytes(internal.as_ref().key_at(0));
            return Ok(Descent {
                min_key,
                split: None,
            });
        }

        // Full internal node: stage all entries plus the new child, keep
        // the lower half, move the rest to a fresh right sibling.
        let mut entries = internal.as_ref().entries();
        entries.insert(child_idx + 1, (split_key, split_page));
        let parent = internal.as_ref().parent();
        let max = internal.as_ref().max_size();
        drop(data);

        let left_len = (max / 2) as usize;
        let sibling = self.pool.new_page()?;
        let sibling_id = sibling.page_id();
        {
            let mut sibling_data = sibling.write();
            let mut right = InternalMut::init(
                &mut sibling_data,
                sibling_id,
                parent,
                self.key_size,
                max,
            );
            right.write_entries(&entries[left_len..]);
        }
        {
            let mut data = guard.write();
            InternalMut::new(&mut data).write_entries(&entries[..left_len]);
        }
        for (_, child) in &entries[left_len..] {
            let child_guard = self.pool.fetch_page_mut(*child)?;
            node::set_parent(&mut child_guard.write(), sibling_id);
        }

        Ok(Descent {
            min_key: entries[0].0.clone(),
            split: Some((entries[left_len].0.clone(), sibling_id)),
        })
    }

    fn insert_into_leaf(
        &self,
        guard: &PageWriteGuard<'_>,
        key: &IndexKey,
        rid: RowId,
    ) -> DbResult<Descent> {
        let mut data = guard.write();
        let mut leaf = LeafMut::new(&mut data);
        let pos = match leaf.as_ref().lookup(key.as_bytes(), &self.comparator) {
            Ok(_) => return Err(DbError::DuplicateKey),
            Err(pos) => pos,
        };

        if leaf.as_ref().size() < leaf.as_ref().max_size() {
            leaf.insert_at(pos, key.as_bytes(), rid);
            let min_key = IndexKey::from_bytes(leaf.as_ref().key_at(0));
            return Ok(Descent {
                min_key,
                split: None,
            });
        }

        // Full leaf: stage entries with the new one in order, split, and
        // link the sibling into the leaf chain.
        let mut entries = leaf.as_ref().entries();
        entries.insert(pos, (key.clone(), rid));
        let next = leaf.as_ref().next_leaf();
        let parent = leaf.as_ref().parent();
        let max = leaf.as_ref().max_size();
        drop(data);

        let left_len = (max / 2) as usize;
        let sibling = self.pool.new_page()?;
        let sibling_id = sibling.page_id();
        {
            let mut sibling_data = sibling.write();
            let mut right = LeafMut::init(&mut sibling_data, sibling_id, parent, self.key_size, max);
            right.write_entries(&entries[left_len..]);
            right.set_next_leaf(next);
        }
        {
            let mut data = guard.write();
            let mut left = LeafMut::new(&mut data);
            left.write_entries(&entries[..left_len]);
            left.set_next_leaf(sibling_id);
        }

        Ok(Descent {
            min_key: entries[0].0.clone(),
            split: Some((entries[left_len].0.clone(), sibling_id)),
        })
    }

    /// Remove `key` under `page_id`, rebalancing children on the way back
    /// up. Returns the subtree's new minimum key and whether the key was
    /// found.
    fn remove_down(&self, page_id: PageId, key: &IndexKey) -> DbResult<(IndexKey, bool)> {
        let guard = self.pool.fetch_page_mut(page_id)?;
        if node::is_leaf(&guard.read()) {
            let mut data = guard.write();
            let mut leaf = LeafMut::new(&mut data);
            let found = match leaf.as_ref().lookup(key.as_bytes(), &self.comparator) {
                Ok(pos) => {
                    leaf.remove_at(pos);
                    true
                }
                Err(_) => false,
            };
            let view = leaf.as_ref();
            let min_key = if view.size() > 0 {
                IndexKey::from_bytes(view.key_at(0))
            } else {
                // An emptied leaf is merged away (or the tree cleared) by
                // the caller; the stale separator is dropped with it.
                key.clone()
            };
            return Ok((min_key, found));
        }

        let (child_idx, child_id) = {
            let data = guard.read();
            let internal = InternalRef::new(&data);
            let idx = internal.lookup_child(key.as_bytes(), &self.comparator);
            (idx, internal.child_at(idx))
        };
        let (child_min, found) = self.remove_down(child_id, key)?;
        {
            let mut data = guard.write();
            InternalMut::new(&mut data).set_key_at(child_idx, child_min.as_bytes());
        }
        if !found {
            let data = guard.read();
            return Ok((
                IndexKey::from_bytes(InternalRef::new(&data).key_at(0)),
                false,
            ));
        }

        let (child_size, child_min_size, child_max_size) = {
            let child = self.pool.fetch_page(child_id)?;
            let data = child.read();
            (
                node::node_size(&data),
                node::node_min_size(&data),
                node::node_max_size(&data),
            )
        };
        if child_size < child_min_size {
            self.rebalance_child(&guard, child_idx, child_id, child_size, child_max_size)?;
        }

        let data = guard.read();
        Ok((
            IndexKey::from_bytes(InternalRef::new(&data).key_at(0)),
            true,
        ))
    }

    /// Bring a deficient child back within bounds: merge with a sibling
    /// when their combined size fits (left neighbor preferred), otherwise
    /// move one entry over from a neighbor.
    fn rebalance_child(
        &self,
        parent: &PageWriteGuard<'_>,
        child_idx: usize,
        child_id: PageId,
        child_size: u32,
        child_max_size: u32,
    ) -> DbResult<()> {
        let parent_size = {
            let data = parent.read();
            InternalRef::new(&data).size() as usize
        };
        let sibling_id = |idx: usize| {
            let data = parent.read();
            InternalRef::new(&data).child_at(idx)
        };
        let sibling_size = |id: PageId| -> DbResult<u32> {
            let guard = self.pool.fetch_page(id)?;
            let data = guard.read();
            Ok(node::node_size(&data))
        };

        let spare = child_max_size - child_size;
        if child_idx > 0 {
            let left_id = sibling_id(child_idx - 1);
            if sibling_size(left_id)? <= spare {
                return self.merge(parent, child_idx - 1, left_id, child_id);
            }
        }
        if child_idx + 1 < parent_size {
            let right_id = sibling_id(child_idx + 1);
            if sibling_size(right_id)? <= spare {
                return self.merge(parent, child_idx, child_id, right_id);
            }
        }
        if child_idx > 0 {
            self.steal_from_left(parent, child_idx)
        } else {
            self.steal_from_right(parent, child_idx)
        }
    }

    /// Fold the right sibling into the left and drop its parent entry.
    fn merge(
        &self,
        parent: &PageWriteGuard<'_>,
        left_index: usize,
        left_id: PageId,
        right_id: PageId,
    ) -> DbResult<()> {
        let left = self.pool.fetch_page_mut(left_id)?;
        let right = self.pool.fetch_page_mut(right_id)?;

        if node::is_leaf(&left.read()) {
            let (entries, next) = {
                let data = right.read();
                let view = LeafRef::new(&data);
                (view.entries(), view.next_leaf())
            };
            let mut data = left.write();
            let mut leaf = LeafMut::new(&mut data);
            for (key, rid) in &entries {
                leaf.push(key.as_bytes(), *rid);
            }
            leaf.set_next_leaf(next);
        } else {
            let entries = {
                let data = right.read();
                InternalRef::new(&data).entries()
            };
            {
                let mut data = left.write();
                let mut internal = InternalMut::new(&mut data);
                for (key, child) in &entries {
                    internal.push(key.as_bytes(), *child);
                }
            }
            for (_, child) in &entries {
                let child_guard = self.pool.fetch_page_mut(*child)?;
                node::set_parent(&mut child_guard.write(), left_id);
            }
        }

        drop(right);
        drop(left);
        self.delete_node_page(right_id)?;

        let mut data = parent.write();
        InternalMut::new(&mut data).remove_at(left_index + 1);
        Ok(())
    }

    /// Move the left neighbor's last entry to the front of the child.
    fn steal_from_left(&self, parent: &PageWriteGuard<'_>, child_idx: usize) -> DbResult<()> {
        let (left_id, child_id) = {
            let data = parent.read();
            let view = InternalRef::new(&data);
            (view.child_at(child_idx - 1), view.child_at(child_idx))
        };
        let left = self.pool.fetch_page_mut(left_id)?;
        let child = self.pool.fetch_page_mut(child_id)?;

        let moved_key;
        if node::is_leaf(&left.read()) {
            let (last, key, rid) = {
                let data = left.read();
                let view = LeafRef::new(&data);
                let last = view.size() as usize - 1;
                (last, IndexKey::from_bytes(view.key_at(last)), view.rid_at(last))
            };
            LeafMut::new(&mut left.write()).remove_at(last);
            LeafMut::new(&mut child.write()).insert_at(0, key.as_bytes(), rid);
            moved_key = key;
        } else {
            let (last, key, grandchild) = {
                let data = left.read();
                let view = InternalRef::new(&data);
                let last = view.size() as usize - 1;
                (last, IndexKey::from_bytes(view.key_at(last)), view.child_at(last))
            };
            InternalMut::new(&mut left.write()).remove_at(last);
            InternalMut::new(&mut child.write()).insert_at(0, key.as_bytes(), grandchild);
            let grandchild_guard = self.pool.fetch_page_mut(grandchild)?;
            node::set_parent(&mut grandchild_guard.write(), child_id);
            moved_key = key;
        }

        let mut data = parent.write();
        InternalMut::new(&mut data).set_key_at(child_idx, moved_key.as_bytes());
        Ok(())
    }

    /// Move the right neighbor's first entry to the back of the child.
    fn steal_from_right(&self, parent: &PageWriteGuard<'_>, child_idx: usize) -> DbResult<()> {
        let (child_id, right_id) = {
            let data = parent.read();
            let view = InternalRef::new(&data);
            (view.child_at(child_idx), view.child_at(child_idx + 1))
        };
        let child = self.pool.fetch_page_mut(child_id)?;
        let right = self.pool.fetch_page_mut(right_id)?;

        let new_right_min;
        if node::is_leaf(&child.read()) {
            let (key, rid) = {
                let data = right.read();
                let view = LeafRef::new(&data);
                (IndexKey::from_bytes(view.key_at(0)), view.rid_at(0))
            };
            LeafMut::new(&mut right.write()).remove_at(0);
            LeafMut::new(&mut child.write()).push(key.as_bytes(), rid);
            let data = right.read();
            new_right_min = IndexKey::from_bytes(LeafRef::new(&data).key_at(0));
        } else {
            let (key, grandchild) = {
                let data = right.read();
                let view = InternalRef::new(&data);
                (IndexKey::from_bytes(view.key_at(0)), view.child_at(0))
            };
            InternalMut::new(&mut right.write()).remove_at(0);
            InternalMut::new(&mut child.write()).push(key.as_bytes(), grandchild);
            let grandchild_guard = self.pool.fetch_page_mut(grandchild)?;
            node::set_parent(&mut grandchild_guard.write(), child_id);
            let data = right.read();
            new_right_min = IndexKey::from_bytes(InternalRef::new(&data).key_at(0));
        }

        let mut data = parent.write();
        InternalMut::new(&mut data).set_key_at(child_idx + 1, new_right_min.as_bytes());
        Ok(())
    }

    fn destroy_down(&self, page_id: PageId) -> DbResult<()> {
        let children: Vec<PageId> = {
            let guard = self.pool.fetch_page(page_id)?;
            let data = guard.read();
            if node::is_leaf(&data) {
                Vec::new()
            } else {
                InternalRef::new(&data)
                    .entries()
                    .into_iter()
                    .map(|(_, child)| child)
                    .collect()
            }
        };
        for child in children {
            self.destroy_down(child)?;
        }
        self.delete_node_page(page_id)
    }

    fn delete_node_page(&self, page_id: PageId) -> DbResult<()> {
        if !self.pool.delete_page(page_id)? {
            return Err(DbError::Storage(format!(
                "tree page {page_id} is pinned during delete"
            )));
        }
        Ok(())
    }

    fn update_root(&self, change: RootChange) -> DbResult<()> {
        let guard = self.pool.fetch_page_mut(INDEX_ROOTS_PAGE_ID)?;
        let mut data = guard.write();
        match change {
            RootChange::Insert => roots::insert(&mut data, self.index_id, self.root_page_id),
            RootChange::Update => roots::update(&mut data, self.index_id, self.root_page_id),
            RootChange::Delete => roots::delete(&mut data, self.index_id),
        }
    }
}

/// Forward cursor over the leaf chain. Pins at most one leaf per advance.
pub struct IndexIterator<'a> {
    tree: &'a BPlusTree,
    leaf: PageId,
    index: u32,
}

impl Iterator for IndexIterator<'_> {
    type Item = DbResult<(IndexKey, RowId)>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.leaf.is_valid() {
            let guard = match self.tree.pool.fetch_page(self.leaf) {
                Ok(guard) => guard,
                Err(err) => {
                    self.leaf = PageId::INVALID;
                    return Some(Err(err));
                }
            };
            let data = guard.read();
            let view = LeafRef::new(&data);
            if self.index < view.size() {
                let i = self.index as usize;
                let item = (IndexKey::from_bytes(view.key_at(i)), view.rid_at(i));
                self.index += 1;
                return Some(Ok(item));
            }
            self.leaf = view.next_leaf();
            self.index = 0;
        }
        None
    }
}
