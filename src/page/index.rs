use super::{ByteReader, ByteWriter, DocumentRef, PAGE_PAYLOAD, PageCodec, PageHeader, PageType};
use crate::error::{EngineError, EngineResult};
use crate::file::{NO_PAGE, PAGE_SIZE, PageId};
use crate::index::IndexKey;

const KIND_LEAF: u8 = 0;
const KIND_INTERNAL: u8 = 1;

// kind(1) + entry count(2)
const NODE_HEADER_SIZE: usize = 3;

/// Internal node: `keys[i]` is the maximum key in the subtree of `children[i]`
#[derive(Debug, Clone, PartialEq)]
pub struct InternalNode {
    pub page_id: PageId,
    pub keys: Vec<IndexKey>,
    pub children: Vec<PageId>,
}

impl InternalNode {
    pub fn new(page_id: PageId, keys: Vec<IndexKey>, children: Vec<PageId>) -> Self {
        debug_assert_eq!(keys.len(), children.len());
        Self {
            page_id,
            keys,
            children,
        }
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Child to descend into when looking for the first entry >= `key`
    pub fn find_child_index(&self, key: &IndexKey) -> usize {
        self.keys
            .iter()
            .position(|k| k >= key)
            .unwrap_or(self.keys.len().saturating_sub(1))
    }

    /// Child that receives a new `key`, placed after existing equal keys
    pub fn insert_child_index(&self, key: &IndexKey) -> usize {
        self.keys
            .iter()
            .position(|k| k > key)
            .unwrap_or(self.keys.len().saturating_sub(1))
    }

    pub fn max_key(&self) -> Option<&IndexKey> {
        self.keys.last()
    }

    pub fn encoded_len(&self) -> usize {
        NODE_HEADER_SIZE + self.keys.iter().map(|k| k.encoded_len() + 4).sum::<usize>()
    }

    pub fn fits(&self) -> bool {
        self.encoded_len() <= PAGE_PAYLOAD
    }
}

/// Leaf node: ordered `(key, document)` entries, doubly linked to its siblings
#[derive(Debug, Clone, PartialEq)]
pub struct LeafNode {
    pub page_id: PageId,
    pub keys: Vec<IndexKey>,
    pub values: Vec<DocumentRef>,
    pub prev: PageId,
    pub next: PageId,
}

impl LeafNode {
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            keys: Vec::new(),
            values: Vec::new(),
            prev: NO_PAGE,
            next: NO_PAGE,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Insert after existing equal keys so duplicates keep insertion order.
    /// Returns the slot of the new entry.
    pub fn insert(&mut self, key: IndexKey, value: DocumentRef) -> usize {
        let pos = self.keys.partition_point(|k| k <= &key);
        self.keys.insert(pos, key);
        self.values.insert(pos, value);
        pos
    }

    /// Slot of the first entry >= `key`
    pub fn lower_bound(&self, key: &IndexKey) -> usize {
        self.keys.partition_point(|k| k < key)
    }

    /// Delete a specific key/document pair
    pub fn delete_entry(&mut self, key: &IndexKey, value: DocumentRef) -> bool {
        let start = self.lower_bound(key);
        for i in start..self.keys.len() {
            if &self.keys[i] != key {
                break;
            }
            if self.values[i] == value {
                self.keys.remove(i);
                self.values.remove(i);
                return true;
            }
        }
        false
    }

    pub fn max_key(&self) -> Option<&IndexKey> {
        self.keys.last()
    }

    pub fn encoded_len(&self) -> usize {
        NODE_HEADER_SIZE
            + self
                .keys
                .iter()
                .map(|k| k.encoded_len() + DocumentRef::ENCODED_LEN)
                .sum::<usize>()
    }

    pub fn fits(&self) -> bool {
        self.encoded_len() <= PAGE_PAYLOAD
    }
}

/// B+ tree node stored in one index page
#[derive(Debug, Clone, PartialEq)]
pub enum IndexNode {
    Internal(InternalNode),
    Leaf(LeafNode),
}

impl IndexNode {
    pub fn is_leaf(&self) -> bool {
        matches!(self, IndexNode::Leaf(_))
    }

    pub fn max_key(&self) -> Option<&IndexKey> {
        match self {
            IndexNode::Internal(node) => node.max_key(),
            IndexNode::Leaf(node) => node.max_key(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            IndexNode::Internal(node) => node.len(),
            IndexNode::Leaf(node) => node.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the node payload once encoded
    pub fn encoded_len(&self) -> usize {
        match self {
            IndexNode::Internal(node) => node.encoded_len(),
            IndexNode::Leaf(node) => node.encoded_len(),
        }
    }

    pub fn fits(&self) -> bool {
        self.encoded_len() <= PAGE_PAYLOAD
    }
}

impl PageCodec for IndexNode {
    const PAGE_TYPE: PageType = PageType::Index;

    fn page_id(&self) -> PageId {
        match self {
            IndexNode::Internal(node) => node.page_id,
            IndexNode::Leaf(node) => node.page_id,
        }
    }

    fn decode(header: &PageHeader, buffer: &[u8]) -> EngineResult<Self> {
        let page_id = header.page_id;
        let mut reader = ByteReader::new(buffer, PageHeader::SIZE, page_id);

        let kind = reader.get_u8()?;
        let count = reader.get_u16()? as usize;
        let mut keys = Vec::with_capacity(count);

        match kind {
            KIND_LEAF => {
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    keys.push(IndexKey::read(&mut reader, page_id)?);
                    values.push(DocumentRef::read(&mut reader)?);
                }
                Ok(IndexNode::Leaf(LeafNode {
                    page_id,
                    keys,
                    values,
                    prev: header.prev_page_id,
                    next: header.next_page_id,
                }))
            }
            KIND_INTERNAL => {
                let mut children = Vec::with_capacity(count);
                for _ in 0..count {
                    keys.push(IndexKey::read(&mut reader, page_id)?);
                    children.push(reader.get_u32()?);
                }
                Ok(IndexNode::Internal(InternalNode::new(page_id, keys, children)))
            }
            other => Err(EngineError::corruption(
                page_id,
                format!("unknown index node kind {}", other),
            )),
        }
    }

    fn encode(&self, buffer: &mut [u8]) -> EngineResult<()> {
        let len = self.encoded_len();
        if len > PAGE_PAYLOAD {
            return Err(EngineError::corruption(
                self.page_id(),
                format!("index node of {} bytes does not fit a page", len),
            ));
        }

        buffer[..PAGE_SIZE].fill(0);
        let mut header = PageHeader::new(self.page_id(), PageType::Index);
        header.item_count = self.len() as u16;
        header.free_bytes = (PAGE_PAYLOAD - len) as u16;
        if let IndexNode::Leaf(leaf) = self {
            header.prev_page_id = leaf.prev;
            header.next_page_id = leaf.next;
        }
        header.write_to(buffer);

        let mut writer = ByteWriter::new(buffer, PageHeader::SIZE, self.page_id());
        match self {
            IndexNode::Leaf(leaf) => {
                writer.put_u8(KIND_LEAF)?;
                writer.put_u16(leaf.len() as u16)?;
                for (key, value) in leaf.keys.iter().zip(&leaf.values) {
                    key.write(&mut writer)?;
                    value.write(&mut writer)?;
                }
            }
            IndexNode::Internal(node) => {
                writer.put_u8(KIND_INTERNAL)?;
                writer.put_u16(node.len() as u16)?;
                for (key, child) in node.keys.iter().zip(&node.children) {
                    key.write(&mut writer)?;
                    writer.put_u32(*child)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(page_id: PageId) -> DocumentRef {
        DocumentRef::new(page_id, 0)
    }

    #[test]
    fn test_leaf_insert_keeps_duplicates_in_order() {
        let mut leaf = LeafNode::new(1);
        leaf.insert(IndexKey::Int(5), doc(10));
        leaf.insert(IndexKey::Int(3), doc(11));
        leaf.insert(IndexKey::Int(5), doc(12));
        let slot = leaf.insert(IndexKey::Int(5), doc(13));

        assert_eq!(slot, 3);
        assert_eq!(leaf.values, vec![doc(11), doc(10), doc(12), doc(13)]);
    }

    #[test]
    fn test_leaf_delete_entry() {
        let mut leaf = LeafNode::new(1);
        for page in 0..3 {
            leaf.insert(IndexKey::Int(5), doc(page));
        }

        assert!(leaf.delete_entry(&IndexKey::Int(5), doc(1)));
        assert!(!leaf.delete_entry(&IndexKey::Int(5), doc(1)));
        assert!(!leaf.delete_entry(&IndexKey::Int(6), doc(0)));
        assert_eq!(leaf.values, vec![doc(0), doc(2)]);
    }

    #[test]
    fn test_internal_find_child() {
        let node = InternalNode::new(
            1,
            vec![IndexKey::Int(3), IndexKey::Int(7), IndexKey::Int(12)],
            vec![10, 11, 12],
        );

        assert_eq!(node.find_child_index(&IndexKey::Int(1)), 0);
        assert_eq!(node.find_child_index(&IndexKey::Int(3)), 0);
        assert_eq!(node.find_child_index(&IndexKey::Int(5)), 1);
        assert_eq!(node.find_child_index(&IndexKey::Int(15)), 2);

        // equal keys go after existing ones
        assert_eq!(node.insert_child_index(&IndexKey::Int(3)), 1);
        assert_eq!(node.insert_child_index(&IndexKey::Int(12)), 2);
    }

    #[test]
    fn test_leaf_page_roundtrip() {
        let mut leaf = LeafNode::new(4);
        leaf.insert(IndexKey::from("b"), DocumentRef::new(20, 48));
        leaf.insert(IndexKey::from("a"), DocumentRef::new(21, 48));
        leaf.prev = 3;
        leaf.next = 5;
        let node = IndexNode::Leaf(leaf);

        let mut buffer = vec![0u8; PAGE_SIZE];
        node.encode(&mut buffer).unwrap();
        let header = PageHeader::expect(4, &buffer, PageType::Index).unwrap();
        assert_eq!(header.next_page_id, 5);
        assert_eq!(IndexNode::decode(&header, &buffer).unwrap(), node);
    }

    #[test]
    fn test_internal_page_roundtrip() {
        let node = IndexNode::Internal(InternalNode::new(
            7,
            vec![IndexKey::Int(10), IndexKey::Null],
            vec![8, 9],
        ));

        let mut buffer = vec![0u8; PAGE_SIZE];
        node.encode(&mut buffer).unwrap();
        let header = PageHeader::expect(7, &buffer, PageType::Index).unwrap();
        assert_eq!(IndexNode::decode(&header, &buffer).unwrap(), node);
    }

    #[test]
    fn test_oversized_node_is_rejected() {
        let mut leaf = LeafNode::new(1);
        for i in 0..400 {
            leaf.insert(IndexKey::Int(i), doc(i as PageId));
        }
        let node = IndexNode::Leaf(leaf);
        assert!(!node.fits());

        let mut buffer = vec![0u8; PAGE_SIZE];
        assert!(node.encode(&mut buffer).is_err());
    }
}
