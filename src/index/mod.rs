//! Index management module
//!
//! One B+ tree per indexed field, stored in Index pages. In this variant:
//! - `keys[i]` of an internal node is the maximum key under `children[i]`
//! - duplicate keys are kept in insertion order
//! - leaves are doubly linked for ordered scans
//! - the root page never moves, so collection pages can point at it
//!
//! Deletes leave ancestor keys as they are (an upper bound is still an upper
//! bound) and only remove nodes that become empty.

mod cursor;
mod key;

pub use cursor::{IndexCursor, IndexEntry, IndexQuery};
pub use key::{IndexKey, MAX_INDEX_KEY_LENGTH};

use crate::error::{EngineError, EngineResult};
use crate::file::{NO_PAGE, PageId};
use crate::page::{
    CollectionPage, DocumentRef, IndexNode, IndexSlot, InternalNode, LeafNode,
    MAX_FIELD_NAME_LENGTH, MAX_INDEXES, PageType,
};
use crate::pager::Pager;

/// Where an entry landed: leaf page and slot inside it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexPosition {
    pub page_id: PageId,
    pub slot: usize,
}

/// Path from the root to a node: (internal page, child index taken)
type Path = Vec<(PageId, usize)>;

/// Index operations over the pages of one datafile
pub struct IndexService<'a> {
    pager: &'a mut Pager,
}

impl<'a> IndexService<'a> {
    pub fn new(pager: &'a mut Pager) -> Self {
        Self { pager }
    }

    /// Add an empty index on `field` to the collection
    pub fn create_index(
        &mut self,
        collection: &mut CollectionPage,
        field: &str,
        unique: bool,
    ) -> EngineResult<PageId> {
        if field.is_empty() || field.len() > MAX_FIELD_NAME_LENGTH {
            return Err(EngineError::InvalidName(format!(
                "index field must be 1 to {} bytes: '{}'",
                MAX_FIELD_NAME_LENGTH, field
            )));
        }
        if collection.index(field).is_some() {
            return Err(EngineError::InvalidArgument(format!(
                "index '{}' already exists on '{}'",
                field, collection.name
            )));
        }
        if collection.indexes.len() >= MAX_INDEXES {
            return Err(EngineError::IndexLimitReached(collection.name.clone()));
        }

        let root_page = self.pager.allocate(PageType::Index)?;
        self.pager.store(&IndexNode::Leaf(LeafNode::new(root_page)))?;

        collection.indexes.push(IndexSlot {
            field: field.to_string(),
            root_page,
            unique,
        });
        self.pager.store(collection)?;
        Ok(root_page)
    }

    /// Remove the index on `field` and free all of its pages
    pub fn drop_index(
        &mut self,
        collection: &mut CollectionPage,
        field: &str,
    ) -> EngineResult<bool> {
        let Some(pos) = collection.indexes.iter().position(|slot| slot.field == field) else {
            return Ok(false);
        };

        let slot = collection.indexes.remove(pos);
        self.free_tree(slot.root_page)?;
        self.pager.store(collection)?;
        Ok(true)
    }

    /// Free every page of the tree rooted at `root`
    pub(crate) fn free_tree(&mut self, root: PageId) -> EngineResult<()> {
        let mut stack = vec![root];
        while let Some(page_id) = stack.pop() {
            if let IndexNode::Internal(node) = self.pager.load::<IndexNode>(page_id)? {
                stack.extend(node.children);
            }
            self.pager.free(page_id)?;
        }
        Ok(())
    }

    /// Insert `key -> document` into the index on `field`
    pub fn insert(
        &mut self,
        collection: &CollectionPage,
        field: &str,
        key: IndexKey,
        document: DocumentRef,
    ) -> EngineResult<IndexPosition> {
        let slot = collection.require_index(field)?;
        key.check_size()?;

        if slot.unique && self.contains_key(slot.root_page, &key)? {
            return Err(EngineError::DuplicateKey {
                field: field.to_string(),
                key: key.to_string(),
            });
        }

        self.insert_entry(slot.root_page, key, document)
    }

    /// Remove the exact `key -> document` entry. Absent entries are a no-op.
    pub fn delete(
        &mut self,
        collection: &CollectionPage,
        field: &str,
        key: &IndexKey,
        document: DocumentRef,
    ) -> EngineResult<bool> {
        let slot = collection.require_index(field)?;
        let root = slot.root_page;

        let found = self.remove_entry(root, key, document)?;
        if found {
            // An internal root left without children goes back to an empty leaf
            if let IndexNode::Internal(node) = self.pager.load::<IndexNode>(root)? {
                if node.is_empty() {
                    self.pager.store(&IndexNode::Leaf(LeafNode::new(root)))?;
                }
            }
        }
        Ok(found)
    }

    /// Lazy cursor over the entries of `field` matching `query`, in key order
    pub fn find(
        self,
        collection: &CollectionPage,
        field: &str,
        query: IndexQuery,
    ) -> EngineResult<IndexCursor<'a>> {
        let root = collection.require_index(field)?.root_page;
        Ok(IndexCursor::new(self.pager, root, query))
    }

    /// Whether any entry of the tree equals `key`
    pub fn contains_key(&mut self, root: PageId, key: &IndexKey) -> EngineResult<bool> {
        let mut cursor = IndexCursor::new(self.pager, root, IndexQuery::Eq(key.clone()));
        match cursor.next() {
            Some(entry) => entry.map(|_| true),
            None => Ok(false),
        }
    }

    /// Number of tree levels, 1 for a lone root leaf
    pub fn height(&mut self, root: PageId) -> EngineResult<usize> {
        let mut height = 1;
        let mut current = root;
        while let IndexNode::Internal(node) = self.pager.load::<IndexNode>(current)? {
            current = *node
                .children
                .first()
                .ok_or_else(|| EngineError::corruption(current, "internal node without children"))?;
            height += 1;
        }
        Ok(height)
    }

    // ========== Insert ==========

    fn find_leaf_with_path(
        &mut self,
        root: PageId,
        key: &IndexKey,
    ) -> EngineResult<(LeafNode, Path)> {
        let mut current = root;
        let mut path = Vec::new();

        loop {
            match self.pager.load::<IndexNode>(current)? {
                IndexNode::Leaf(leaf) => return Ok((leaf, path)),
                IndexNode::Internal(node) => {
                    if node.is_empty() {
                        return Err(EngineError::corruption(
                            current,
                            "internal node without children",
                        ));
                    }
                    let child_idx = node.insert_child_index(key);
                    path.push((current, child_idx));
                    current = node.children[child_idx];
                }
            }
        }
    }

    fn insert_entry(
        &mut self,
        root: PageId,
        key: IndexKey,
        document: DocumentRef,
    ) -> EngineResult<IndexPosition> {
        let (mut leaf, path) = self.find_leaf_with_path(root, &key)?;
        let slot = leaf.insert(key, document);

        if !leaf.fits() {
            return self.split_leaf(leaf, path, slot);
        }

        let page_id = leaf.page_id;
        let max_key = max_of(&leaf.keys, page_id)?;
        self.pager.store(&IndexNode::Leaf(leaf))?;
        self.update_ancestor_keys(max_key, path)?;
        Ok(IndexPosition { page_id, slot })
    }

    /// Split an overflowing leaf; returns the new home of the entry at `slot`
    fn split_leaf(
        &mut self,
        mut leaf: LeafNode,
        path: Path,
        slot: usize,
    ) -> EngineResult<IndexPosition> {
        let mid = split_point(leaf.keys.iter().map(|k| k.encoded_len() + DocumentRef::ENCODED_LEN));
        let right_keys = leaf.keys.split_off(mid);
        let right_values = leaf.values.split_off(mid);

        if path.is_empty() {
            // Root leaf: move both halves out so the root page keeps its id
            let root = leaf.page_id;
            let left_id = self.pager.allocate(PageType::Index)?;
            let right_id = self.pager.allocate(PageType::Index)?;

            let left = LeafNode {
                page_id: left_id,
                keys: leaf.keys,
                values: leaf.values,
                prev: NO_PAGE,
                next: right_id,
            };
            let right = LeafNode {
                page_id: right_id,
                keys: right_keys,
                values: right_values,
                prev: left_id,
                next: NO_PAGE,
            };

            let new_root = InternalNode::new(
                root,
                vec![max_of(&left.keys, left_id)?, max_of(&right.keys, right_id)?],
                vec![left_id, right_id],
            );
            self.pager.store(&IndexNode::Leaf(left))?;
            self.pager.store(&IndexNode::Leaf(right))?;
            self.pager.store(&IndexNode::Internal(new_root))?;

            return Ok(position_after_split(slot, mid, left_id, right_id));
        }

        let right_id = self.pager.allocate(PageType::Index)?;
        let right = LeafNode {
            page_id: right_id,
            keys: right_keys,
            values: right_values,
            prev: leaf.page_id,
            next: leaf.next,
        };

        if leaf.next != NO_PAGE {
            if let IndexNode::Leaf(mut next) = self.pager.load::<IndexNode>(leaf.next)? {
                next.prev = right_id;
                self.pager.store(&IndexNode::Leaf(next))?;
            }
        }
        leaf.next = right_id;

        let left_id = leaf.page_id;
        let left_key = max_of(&leaf.keys, left_id)?;
        let right_key = max_of(&right.keys, right_id)?;
        self.pager.store(&IndexNode::Leaf(leaf))?;
        self.pager.store(&IndexNode::Leaf(right))?;

        self.insert_into_parent(path, left_id, left_key, right_id, right_key)?;
        Ok(position_after_split(slot, mid, left_id, right_id))
    }

    /// Insert a new child into the parent after a split
    fn insert_into_parent(
        &mut self,
        mut path: Path,
        left_id: PageId,
        left_key: IndexKey,
        right_id: PageId,
        right_key: IndexKey,
    ) -> EngineResult<()> {
        let Some((parent_id, child_idx)) = path.pop() else {
            return Err(EngineError::corruption(left_id, "split below a missing parent"));
        };

        let mut parent = self.load_internal(parent_id)?;
        parent.keys[child_idx] = left_key;
        parent.keys.insert(child_idx + 1, right_key);
        parent.children.insert(child_idx + 1, right_id);

        self.store_internal(parent, path)
    }

    /// Store an internal node, splitting it first if it no longer fits a page
    fn store_internal(&mut self, node: InternalNode, path: Path) -> EngineResult<()> {
        if !node.fits() {
            return self.split_internal(node, path);
        }

        let max_key = max_of(&node.keys, node.page_id)?;
        self.pager.store(&IndexNode::Internal(node))?;
        self.update_ancestor_keys(max_key, path)
    }

    /// Split an overflowing internal node
    fn split_internal(&mut self, mut node: InternalNode, path: Path) -> EngineResult<()> {
        let mid = split_point(node.keys.iter().map(|k| k.encoded_len() + 4));
        let right_keys = node.keys.split_off(mid);
        let right_children = node.children.split_off(mid);

        if path.is_empty() {
            let root = node.page_id;
            let left_id = self.pager.allocate(PageType::Index)?;
            let right_id = self.pager.allocate(PageType::Index)?;

            let left = InternalNode::new(left_id, node.keys, node.children);
            let right = InternalNode::new(right_id, right_keys, right_children);
            let new_root = InternalNode::new(
                root,
                vec![max_of(&left.keys, left_id)?, max_of(&right.keys, right_id)?],
                vec![left_id, right_id],
            );

            self.pager.store(&IndexNode::Internal(left))?;
            self.pager.store(&IndexNode::Internal(right))?;
            return self.pager.store(&IndexNode::Internal(new_root));
        }

        let right_id = self.pager.allocate(PageType::Index)?;
        let right = InternalNode::new(right_id, right_keys, right_children);

        let left_id = node.page_id;
        let left_key = max_of(&node.keys, left_id)?;
        let right_key = max_of(&right.keys, right_id)?;
        self.pager.store(&IndexNode::Internal(node))?;
        self.pager.store(&IndexNode::Internal(right))?;

        self.insert_into_parent(path, left_id, left_key, right_id, right_key)
    }

    /// Propagate a node's new maximum key up the path
    fn update_ancestor_keys(&mut self, mut max_key: IndexKey, mut path: Path) -> EngineResult<()> {
        while let Some((parent_id, child_idx)) = path.pop() {
            let mut parent = self.load_internal(parent_id)?;

            // Only update if the key actually changed
            if parent.keys[child_idx] == max_key {
                break;
            }
            parent.keys[child_idx] = max_key;

            if !parent.fits() {
                return self.split_internal(parent, path);
            }

            max_key = max_of(&parent.keys, parent_id)?;
            self.pager.store(&IndexNode::Internal(parent))?;
        }
        Ok(())
    }

    // ========== Delete ==========

    /// Remove `key -> document` from the subtree at `page_id`.
    /// Empty non-root children are unlinked and freed on the way back up.
    fn remove_entry(
        &mut self,
        page_id: PageId,
        key: &IndexKey,
        document: DocumentRef,
    ) -> EngineResult<bool> {
        match self.pager.load::<IndexNode>(page_id)? {
            IndexNode::Leaf(mut leaf) => {
                if !leaf.delete_entry(key, document) {
                    return Ok(false);
                }
                self.pager.store(&IndexNode::Leaf(leaf))?;
                Ok(true)
            }
            IndexNode::Internal(mut node) => {
                if node.is_empty() {
                    return Ok(false);
                }

                // Equal keys may span several children
                let start = node.find_child_index(key);
                let mut i = start;
                while i < node.len() && (i == start || node.keys[i - 1] <= *key) {
                    let child = node.children[i];
                    if self.remove_entry(child, key, document)? {
                        if self.pager.load::<IndexNode>(child)?.is_empty() {
                            self.remove_node(child)?;
                            node.keys.remove(i);
                            node.children.remove(i);
                            self.pager.store(&IndexNode::Internal(node))?;
                        }
                        return Ok(true);
                    }
                    i += 1;
                }
                Ok(false)
            }
        }
    }

    /// Free an empty node, unlinking it from the leaf chain when it is a leaf
    fn remove_node(&mut self, page_id: PageId) -> EngineResult<()> {
        if let IndexNode::Leaf(leaf) = self.pager.load::<IndexNode>(page_id)? {
            if leaf.prev != NO_PAGE {
                if let IndexNode::Leaf(mut prev) = self.pager.load::<IndexNode>(leaf.prev)? {
                    prev.next = leaf.next;
                    self.pager.store(&IndexNode::Leaf(prev))?;
                }
            }
            if leaf.next != NO_PAGE {
                if let IndexNode::Leaf(mut next) = self.pager.load::<IndexNode>(leaf.next)? {
                    next.prev = leaf.prev;
                    self.pager.store(&IndexNode::Leaf(next))?;
                }
            }
        }
        self.pager.free(page_id)
    }

    fn load_internal(&mut self, page_id: PageId) -> EngineResult<InternalNode> {
        match self.pager.load::<IndexNode>(page_id)? {
            IndexNode::Internal(node) => Ok(node),
            IndexNode::Leaf(_) => Err(EngineError::corruption(
                page_id,
                "expected an internal index node",
            )),
        }
    }
}

/// Index splitting entries at the byte midpoint, keeping both halves non-empty
fn split_point(sizes: impl Iterator<Item = usize>) -> usize {
    let sizes: Vec<usize> = sizes.collect();
    let half = sizes.iter().sum::<usize>() / 2;

    let mut acc = 0;
    let mut mid = 0;
    for size in &sizes {
        if acc >= half {
            break;
        }
        acc += size;
        mid += 1;
    }
    mid.clamp(1, sizes.len().saturating_sub(1).max(1))
}

fn position_after_split(
    slot: usize,
    mid: usize,
    left_id: PageId,
    right_id: PageId,
) -> IndexPosition {
    if slot < mid {
        IndexPosition {
            page_id: left_id,
            slot,
        }
    } else {
        IndexPosition {
            page_id: right_id,
            slot: slot - mid,
        }
    }
}

fn max_of(keys: &[IndexKey], page_id: PageId) -> EngineResult<IndexKey> {
    keys.last()
        .cloned()
        .ok_or_else(|| EngineError::corruption(page_id, "split produced an empty node"))
}
