//! Document storage in chained Data/Extend pages
//!
//! A document starts on a Data page, which also carries the collection's
//! doubly linked document list, and continues on Extend pages linked through
//! the page header. Pages are never shared between documents.

use crate::error::{EngineError, EngineResult};
use crate::file::{NO_PAGE, PageId};
use crate::page::{
    CollectionPage, DATA_CAPACITY, DATA_PAYLOAD_OFFSET, DataBlock, DocumentRef, EXTEND_CAPACITY,
    PageType,
};
use crate::pager::Pager;

/// Largest document the engine stores
pub const MAX_DOCUMENT_SIZE: usize = 16 * 1024 * 1024;

/// Pages needed for a document of `len` bytes
fn pages_for(len: usize) -> usize {
    if len <= DATA_CAPACITY {
        1
    } else {
        1 + (len - DATA_CAPACITY).div_ceil(EXTEND_CAPACITY)
    }
}

/// Split document bytes into per-page segments
fn segments(bytes: &[u8]) -> impl Iterator<Item = &[u8]> {
    let (head, rest) = bytes.split_at(bytes.len().min(DATA_CAPACITY));
    std::iter::once(head).chain(rest.chunks(EXTEND_CAPACITY))
}

fn check_size(len: usize) -> EngineResult<()> {
    if len > MAX_DOCUMENT_SIZE {
        return Err(EngineError::DocumentTooLarge {
            size: len,
            limit: MAX_DOCUMENT_SIZE,
        });
    }
    Ok(())
}

/// Reads and writes document bytes
pub struct DataService<'a> {
    pager: &'a mut Pager,
}

impl<'a> DataService<'a> {
    pub fn new(pager: &'a mut Pager) -> Self {
        Self { pager }
    }

    /// Store a new document and append it to the collection's document list
    pub fn insert(
        &mut self,
        collection: &mut CollectionPage,
        bytes: &[u8],
    ) -> EngineResult<DocumentRef> {
        check_size(bytes.len())?;

        let head = self.write_chain(bytes)?;
        {
            let mut block = DataBlock::open(head, self.pager.get_mut(head)?)?;
            block.set_owner(collection.page_id);
            block.set_prev_document(collection.last_data_page);
            block.set_next_document(NO_PAGE);
        }

        if collection.last_data_page != NO_PAGE {
            let last = collection.last_data_page;
            DataBlock::open(last, self.pager.get_mut(last)?)?.set_next_document(head);
        } else {
            collection.first_data_page = head;
        }
        collection.last_data_page = head;
        collection.document_count += 1;
        self.pager.store(collection)?;

        Ok(DocumentRef::new(head, DATA_PAYLOAD_OFFSET as u16))
    }

    /// Allocate and fill a fresh chain; returns its head page
    fn write_chain(&mut self, bytes: &[u8]) -> EngineResult<PageId> {
        let mut head = NO_PAGE;
        let mut prev = NO_PAGE;

        for segment in segments(bytes) {
            let page_type = if head == NO_PAGE {
                PageType::Data
            } else {
                PageType::Extend
            };
            let page_id = self.pager.allocate(page_type)?;

            let mut block = DataBlock::init(page_id, page_type, self.pager.get_mut(page_id)?)?;
            block.set_segment(segment)?;
            if page_type == PageType::Data {
                block.set_document_length(bytes.len());
                head = page_id;
            } else {
                DataBlock::open(prev, self.pager.get_mut(prev)?)?.set_next_page(page_id);
            }
            prev = page_id;
        }
        Ok(head)
    }

    /// Read back the full document
    pub fn read(&mut self, document: DocumentRef) -> EngineResult<Vec<u8>> {
        let chain = self.chain(document)?;

        let (length, mut bytes) = {
            let head = DataBlock::open(document.page_id, self.pager.get(document.page_id)?)?;
            let mut bytes = Vec::with_capacity(head.document_length().min(MAX_DOCUMENT_SIZE));
            bytes.extend_from_slice(head.segment()?);
            (head.document_length(), bytes)
        };

        for page_id in chain.iter().skip(1) {
            let block = DataBlock::open(*page_id, self.pager.get(*page_id)?)?;
            bytes.extend_from_slice(block.segment()?);
        }

        if bytes.len() != length {
            return Err(EngineError::corruption(
                document.page_id,
                format!("document declares {} bytes but its chain holds {}", length, bytes.len()),
            ));
        }
        Ok(bytes)
    }

    /// Pages of the document chain, head first
    pub fn chain(&mut self, document: DocumentRef) -> EngineResult<Vec<PageId>> {
        if document.offset as usize != DATA_PAYLOAD_OFFSET {
            return Err(EngineError::InvalidArgument(format!(
                "invalid document reference {}",
                document
            )));
        }

        let (length, mut next) = {
            let head = DataBlock::open(document.page_id, self.pager.get(document.page_id)?)?;
            if !head.is_head() {
                return Err(EngineError::corruption(
                    document.page_id,
                    "document does not start on a data page",
                ));
            }
            (head.document_length(), head.next_page())
        };

        let limit = pages_for(length);
        let mut chain = vec![document.page_id];
        while next != NO_PAGE {
            if chain.len() >= limit {
                return Err(EngineError::corruption(
                    document.page_id,
                    format!("chain is longer than {} pages", limit),
                ));
            }

            let block = DataBlock::open(next, self.pager.get(next)?)?;
            if block.is_head() {
                return Err(EngineError::corruption(next, "chain runs into another document"));
            }
            chain.push(next);
            next = block.next_page();
        }
        Ok(chain)
    }

    /// Replace a document's bytes. Rewrites in place when the current chain is
    /// large enough, otherwise moves the document to a new chain.
    pub fn update(
        &mut self,
        collection: &mut CollectionPage,
        document: DocumentRef,
        bytes: &[u8],
    ) -> EngineResult<DocumentRef> {
        check_size(bytes.len())?;

        let chain = self.chain(document)?;
        let needed = pages_for(bytes.len());
        if needed > chain.len() {
            self.delete(collection, document)?;
            return self.insert(collection, bytes);
        }

        for (segment, page_id) in segments(bytes).zip(&chain) {
            let mut block = DataBlock::open(*page_id, self.pager.get_mut(*page_id)?)?;
            block.set_segment(segment)?;
        }

        let last = chain[needed - 1];
        DataBlock::open(last, self.pager.get_mut(last)?)?.set_next_page(NO_PAGE);
        DataBlock::open(document.page_id, self.pager.get_mut(document.page_id)?)?
            .set_document_length(bytes.len());

        for page_id in &chain[needed..] {
            self.pager.free(*page_id)?;
        }
        Ok(document)
    }

    /// Unlink a document from its collection and free its pages
    pub fn delete(
        &mut self,
        collection: &mut CollectionPage,
        document: DocumentRef,
    ) -> EngineResult<()> {
        let chain = self.chain(document)?;

        let (owner, prev, next) = {
            let head = DataBlock::open(document.page_id, self.pager.get(document.page_id)?)?;
            (head.owner(), head.prev_document(), head.next_document())
        };
        if owner != collection.page_id {
            return Err(EngineError::InvalidArgument(format!(
                "document {} does not belong to collection '{}'",
                document, collection.name
            )));
        }

        if prev != NO_PAGE {
            DataBlock::open(prev, self.pager.get_mut(prev)?)?.set_next_document(next);
        } else {
            collection.first_data_page = next;
        }
        if next != NO_PAGE {
            DataBlock::open(next, self.pager.get_mut(next)?)?.set_prev_document(prev);
        } else {
            collection.last_data_page = prev;
        }
        collection.document_count = collection.document_count.saturating_sub(1);

        for page_id in chain {
            self.pager.free(page_id)?;
        }
        self.pager.store(collection)
    }

    /// References of every document in the collection, in insertion order
    pub fn scan(&mut self, collection: &CollectionPage) -> EngineResult<Vec<DocumentRef>> {
        let mut documents = Vec::new();
        let mut current = collection.first_data_page;

        while current != NO_PAGE {
            if documents.len() as u64 >= collection.document_count {
                return Err(EngineError::corruption(
                    collection.page_id,
                    "document list is longer than the document count",
                ));
            }

            let head = DataBlock::open(current, self.pager.get(current)?)?;
            if !head.is_head() {
                return Err(EngineError::corruption(
                    current,
                    "document list points at an extend page",
                ));
            }
            documents.push(DocumentRef::new(current, DATA_PAYLOAD_OFFSET as u16));
            current = head.next_document();
        }
        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{DiskService, MemoryDiskService, PAGE_SIZE};
    use crate::logger::Logger;
    use crate::page::HeaderPage;

    fn setup() -> (Pager, CollectionPage) {
        let mut disk = MemoryDiskService::with_journal(false);
        disk.open().unwrap();

        let mut pager = Pager::new(Box::new(disk), 1000, Logger::default());
        pager.store(&HeaderPage::new()).unwrap();
        let page_id = pager.allocate(PageType::Collection).unwrap();
        let collection = CollectionPage::new(page_id, "docs");
        pager.store(&collection).unwrap();
        (pager, collection)
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_small_document_roundtrip() {
        let (mut pager, mut collection) = setup();
        let mut data = DataService::new(&mut pager);

        let document = data.insert(&mut collection, b"{\"id\":1}").unwrap();
        assert_eq!(document.offset as usize, DATA_PAYLOAD_OFFSET);
        assert_eq!(data.read(document).unwrap(), b"{\"id\":1}");
        assert_eq!(data.chain(document).unwrap().len(), 1);
    }

    #[test]
    fn test_multi_page_roundtrip() {
        let (mut pager, mut collection) = setup();
        let mut data = DataService::new(&mut pager);

        for len in [0, DATA_CAPACITY, DATA_CAPACITY + 1, 3 * PAGE_SIZE + 17] {
            let bytes = payload(len);
            let document = data.insert(&mut collection, &bytes).unwrap();
            assert_eq!(data.read(document).unwrap(), bytes);
            assert_eq!(data.chain(document).unwrap().len(), pages_for(len));
        }
        assert_eq!(collection.document_count, 4);
    }

    #[test]
    fn test_document_too_large() {
        let (mut pager, mut collection) = setup();
        let mut data = DataService::new(&mut pager);

        let result = data.insert(&mut collection, &vec![0u8; MAX_DOCUMENT_SIZE + 1]);
        assert!(matches!(result, Err(EngineError::DocumentTooLarge { .. })));
    }

    #[test]
    fn test_update_in_place_frees_surplus_pages() {
        let (mut pager, mut collection) = setup();
        let mut data = DataService::new(&mut pager);

        let document = data.insert(&mut collection, &payload(3 * PAGE_SIZE)).unwrap();
        let chain = data.chain(document).unwrap();
        assert_eq!(chain.len(), 4);

        let updated = data.update(&mut collection, document, b"short").unwrap();
        assert_eq!(updated, document);
        assert_eq!(data.read(updated).unwrap(), b"short");
        assert_eq!(data.chain(updated).unwrap(), vec![document.page_id]);

        // surplus pages are at the head of the free list
        assert_eq!(pager.header().unwrap().free_empty_page_id, chain[3]);
    }

    #[test]
    fn test_update_growing_moves_document() {
        let (mut pager, mut collection) = setup();
        let mut data = DataService::new(&mut pager);

        let document = data.insert(&mut collection, b"small").unwrap();
        let bigger = payload(2 * PAGE_SIZE);
        let moved = data.update(&mut collection, document, &bigger).unwrap();

        assert_eq!(data.read(moved).unwrap(), bigger);
        assert_eq!(data.scan(&collection).unwrap(), vec![moved]);
        assert_eq!(collection.document_count, 1);
    }

    #[test]
    fn test_delete_unlinks_and_frees() {
        let (mut pager, mut collection) = setup();
        let mut data = DataService::new(&mut pager);

        let a = data.insert(&mut collection, b"a").unwrap();
        let b = data.insert(&mut collection, &payload(PAGE_SIZE * 2)).unwrap();
        let c = data.insert(&mut collection, b"c").unwrap();
        assert_eq!(data.scan(&collection).unwrap(), vec![a, b, c]);

        data.delete(&mut collection, b).unwrap();
        assert_eq!(data.scan(&collection).unwrap(), vec![a, c]);

        data.delete(&mut collection, a).unwrap();
        data.delete(&mut collection, c).unwrap();
        assert!(data.scan(&collection).unwrap().is_empty());
        assert_eq!(collection.first_data_page, NO_PAGE);
        assert_eq!(collection.last_data_page, NO_PAGE);

        // freed pages are reused before the file grows
        let last_page = pager.header().unwrap().last_page_id;
        let mut data = DataService::new(&mut pager);
        data.insert(&mut collection, &payload(PAGE_SIZE * 2)).unwrap();
        assert_eq!(pager.header().unwrap().last_page_id, last_page);

        let stored = pager.load::<CollectionPage>(collection.page_id).unwrap();
        assert_eq!(stored, collection);
    }

    #[test]
    fn test_read_rejects_non_data_pages() {
        let (mut pager, mut collection) = setup();
        let mut data = DataService::new(&mut pager);
        let document = data.insert(&mut collection, &payload(PAGE_SIZE)).unwrap();
        let chain = data.chain(document).unwrap();

        // an extend page is not a document head
        let extend = DocumentRef::new(chain[1], DATA_PAYLOAD_OFFSET as u16);
        assert!(matches!(data.read(extend), Err(EngineError::Corruption { .. })));

        // a chain pointer into an index page
        let index_page = pager.allocate(PageType::Index).unwrap();
        let mut data = DataService::new(&mut pager);
        DataBlock::open(document.page_id, data.pager.get_mut(document.page_id).unwrap())
            .unwrap()
            .set_next_page(index_page);
        assert!(matches!(data.read(document), Err(EngineError::Corruption { .. })));
    }

    #[test]
    fn test_delete_checks_owner() {
        let (mut pager, mut collection) = setup();
        let mut data = DataService::new(&mut pager);
        let document = data.insert(&mut collection, b"x").unwrap();

        let mut other = CollectionPage::new(999, "other");
        assert!(matches!(
            data.delete(&mut other, document),
            Err(EngineError::InvalidArgument(_))
        ));
    }
}
