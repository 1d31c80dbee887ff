use std::ops::Bound;

use super::IndexKey;
use crate::error::{EngineError, EngineResult};
use crate::file::{NO_PAGE, PageId};
use crate::page::{DocumentRef, IndexNode, LeafNode};
use crate::pager::Pager;

/// Which entries of an index a cursor visits
#[derive(Debug, Clone, PartialEq)]
pub enum IndexQuery {
    /// Every entry in key order
    All,
    /// Entries whose key equals the given key
    Eq(IndexKey),
    /// Entries whose key lies between the two bounds
    Range {
        start: Bound<IndexKey>,
        end: Bound<IndexKey>,
    },
    /// String keys beginning with the given prefix
    StartsWith(String),
}

impl IndexQuery {
    /// Smallest key the query can match, used to position the cursor
    fn seek_key(&self) -> Option<IndexKey> {
        match self {
            IndexQuery::All => None,
            IndexQuery::Eq(key) => Some(key.clone()),
            IndexQuery::Range { start, .. } => match start {
                Bound::Included(key) | Bound::Excluded(key) => Some(key.clone()),
                Bound::Unbounded => None,
            },
            IndexQuery::StartsWith(prefix) => Some(IndexKey::String(prefix.clone())),
        }
    }

    /// Entries before the query's range that the seek may still land on
    fn is_before(&self, key: &IndexKey) -> bool {
        match self {
            IndexQuery::All => false,
            IndexQuery::Eq(target) => key < target,
            IndexQuery::Range { start, .. } => match start {
                Bound::Included(start) => key < start,
                Bound::Excluded(start) => key <= start,
                Bound::Unbounded => false,
            },
            IndexQuery::StartsWith(prefix) => key < &IndexKey::String(prefix.clone()),
        }
    }

    /// Whether `key` satisfies the query
    pub fn matches(&self, key: &IndexKey) -> bool {
        !self.is_before(key) && !self.is_after(key)
    }

    /// Entries past the query's range; the scan stops at the first one
    fn is_after(&self, key: &IndexKey) -> bool {
        match self {
            IndexQuery::All => false,
            IndexQuery::Eq(target) => key > target,
            IndexQuery::Range { end, .. } => match end {
                Bound::Included(end) => key > end,
                Bound::Excluded(end) => key >= end,
                Bound::Unbounded => false,
            },
            IndexQuery::StartsWith(prefix) => !key.starts_with(prefix),
        }
    }
}

/// One index entry: a key and the document holding it
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub key: IndexKey,
    pub document: DocumentRef,
}

/// Lazy, restartable scan over an index in key order.
///
/// Holds a copy of the current leaf and follows the leaf chain; each step
/// yields `EngineResult<IndexEntry>`, stopping after the first error.
pub struct IndexCursor<'p> {
    pager: &'p mut Pager,
    root: PageId,
    query: IndexQuery,
    leaf: Option<LeafNode>,
    slot: usize,
    done: bool,
}

impl<'p> IndexCursor<'p> {
    pub fn new(pager: &'p mut Pager, root: PageId, query: IndexQuery) -> Self {
        Self {
            pager,
            root,
            query,
            leaf: None,
            slot: 0,
            done: false,
        }
    }

    pub fn query(&self) -> &IndexQuery {
        &self.query
    }

    /// Start over from the beginning of the query
    pub fn restart(&mut self) {
        self.leaf = None;
        self.slot = 0;
        self.done = false;
    }

    fn load_leaf(&mut self, page_id: PageId) -> EngineResult<LeafNode> {
        match self.pager.load::<IndexNode>(page_id)? {
            IndexNode::Leaf(leaf) => Ok(leaf),
            IndexNode::Internal(_) => Err(EngineError::corruption(
                page_id,
                "leaf chain points at an internal node",
            )),
        }
    }

    /// Descend to the first leaf that may hold the seek key
    fn seek(&mut self) -> EngineResult<()> {
        let seek_key = self.query.seek_key();
        let mut current = self.root;

        loop {
            match self.pager.load::<IndexNode>(current)? {
                IndexNode::Leaf(leaf) => {
                    self.slot = match &seek_key {
                        Some(key) => leaf.lower_bound(key),
                        None => 0,
                    };
                    self.leaf = Some(leaf);
                    return Ok(());
                }
                IndexNode::Internal(node) => {
                    if node.is_empty() {
                        return Err(EngineError::corruption(
                            current,
                            "internal node without children",
                        ));
                    }
                    let child_idx = match &seek_key {
                        Some(key) => node.find_child_index(key),
                        None => 0,
                    };
                    current = node.children[child_idx];
                }
            }
        }
    }

    fn advance(&mut self) -> EngineResult<Option<IndexEntry>> {
        if self.leaf.is_none() {
            self.seek()?;
        }

        loop {
            let next_page = match &self.leaf {
                Some(leaf) if self.slot < leaf.len() => {
                    let key = &leaf.keys[self.slot];
                    let document = leaf.values[self.slot];
                    self.slot += 1;

                    if self.query.is_before(key) {
                        continue;
                    }
                    if self.query.is_after(key) {
                        return Ok(None);
                    }
                    return Ok(Some(IndexEntry {
                        key: key.clone(),
                        document,
                    }));
                }
                Some(leaf) => leaf.next,
                None => NO_PAGE,
            };

            if next_page == NO_PAGE {
                return Ok(None);
            }
            self.leaf = Some(self.load_leaf(next_page)?);
            self.slot = 0;
        }
    }
}

impl Iterator for IndexCursor<'_> {
    type Item = EngineResult<IndexEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.advance() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
