use std::fmt;

use super::{ByteReader, ByteWriter, PAGE_PAYLOAD, PageHeader, PageType};
use crate::error::{EngineError, EngineResult};
use crate::file::{PAGE_SIZE, PageId};

// owner(4) + prev document(4) + next document(4) + total length(4)
const DATA_HEAD_SIZE: usize = 16;

/// Offset of the document bytes inside its first (Data) page
pub const DATA_PAYLOAD_OFFSET: usize = PageHeader::SIZE + DATA_HEAD_SIZE;
/// Document bytes held by a Data page
pub const DATA_CAPACITY: usize = PAGE_SIZE - DATA_PAYLOAD_OFFSET;
/// Document bytes held by an Extend page
pub const EXTEND_CAPACITY: usize = PAGE_PAYLOAD;

/// Location of a stored document: its first page and the payload offset there
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentRef {
    pub page_id: PageId,
    pub offset: u16,
}

impl DocumentRef {
    pub const ENCODED_LEN: usize = 6;

    pub fn new(page_id: PageId, offset: u16) -> Self {
        Self { page_id, offset }
    }

    pub fn write(&self, writer: &mut ByteWriter<'_>) -> EngineResult<()> {
        writer.put_u32(self.page_id)?;
        writer.put_u16(self.offset)
    }

    pub fn read(reader: &mut ByteReader<'_>) -> EngineResult<Self> {
        Ok(Self {
            page_id: reader.get_u32()?,
            offset: reader.get_u16()?,
        })
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page_id, self.offset)
    }
}

/// View over one page of a document chain (a Data head or an Extend page)
///
/// The segment stored in a page is `capacity - free_bytes` long; pages are
/// chained through the header's `next_page_id`.
pub struct DataBlock<B> {
    header: PageHeader,
    buffer: B,
}

impl<B: AsRef<[u8]>> DataBlock<B> {
    /// Open an existing Data or Extend page
    pub fn open(page_id: PageId, buffer: B) -> EngineResult<Self> {
        let header = PageHeader::deserialize(page_id, buffer.as_ref())?;
        match header.page_type {
            PageType::Data | PageType::Extend => Ok(Self { header, buffer }),
            other => Err(EngineError::corruption(
                page_id,
                format!("document chain points at a {:?} page", other),
            )),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.header.page_id
    }

    pub fn page_type(&self) -> PageType {
        self.header.page_type
    }

    pub fn is_head(&self) -> bool {
        self.header.page_type == PageType::Data
    }

    pub fn next_page(&self) -> PageId {
        self.header.next_page_id
    }

    pub fn payload_offset(&self) -> usize {
        if self.is_head() {
            DATA_PAYLOAD_OFFSET
        } else {
            PageHeader::SIZE
        }
    }

    pub fn capacity(&self) -> usize {
        PAGE_SIZE - self.payload_offset()
    }

    pub fn segment_len(&self) -> EngineResult<usize> {
        let free = self.header.free_bytes as usize;
        self.capacity().checked_sub(free).ok_or_else(|| {
            EngineError::corruption(
                self.page_id(),
                format!("free bytes {} exceed block capacity", free),
            )
        })
    }

    /// Document bytes stored in this page
    pub fn segment(&self) -> EngineResult<&[u8]> {
        let start = self.payload_offset();
        let len = self.segment_len()?;
        Ok(&self.buffer.as_ref()[start..start + len])
    }

    fn head_u32(&self, at: usize) -> u32 {
        let offset = PageHeader::SIZE + at;
        let bytes = &self.buffer.as_ref()[offset..offset + 4];
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    /// Collection page owning this document (head pages only)
    pub fn owner(&self) -> PageId {
        self.head_u32(0)
    }

    pub fn prev_document(&self) -> PageId {
        self.head_u32(4)
    }

    pub fn next_document(&self) -> PageId {
        self.head_u32(8)
    }

    /// Total document length across the chain (head pages only)
    pub fn document_length(&self) -> usize {
        self.head_u32(12) as usize
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> DataBlock<B> {
    /// Format `buffer` as an empty Data or Extend page
    pub fn init(page_id: PageId, page_type: PageType, mut buffer: B) -> EngineResult<Self> {
        if !matches!(page_type, PageType::Data | PageType::Extend) {
            return Err(EngineError::InvalidArgument(format!(
                "{:?} is not a document page type",
                page_type
            )));
        }
        buffer.as_mut()[..PAGE_SIZE].fill(0);

        let mut block = Self {
            header: PageHeader::new(page_id, page_type),
            buffer,
        };
        block.header.free_bytes = block.capacity() as u16;
        block.sync_header();
        Ok(block)
    }

    fn sync_header(&mut self) {
        self.header.write_to(self.buffer.as_mut());
    }

    pub fn set_next_page(&mut self, page_id: PageId) {
        self.header.next_page_id = page_id;
        self.sync_header();
    }

    /// Replace the segment stored in this page
    pub fn set_segment(&mut self, bytes: &[u8]) -> EngineResult<()> {
        let capacity = self.capacity();
        if bytes.len() > capacity {
            return Err(EngineError::corruption(
                self.page_id(),
                format!("segment of {} bytes exceeds capacity {}", bytes.len(), capacity),
            ));
        }

        let start = self.payload_offset();
        let page = self.buffer.as_mut();
        page[start..start + bytes.len()].copy_from_slice(bytes);
        page[start + bytes.len()..PAGE_SIZE].fill(0);

        self.header.item_count = 1;
        self.header.free_bytes = (capacity - bytes.len()) as u16;
        self.sync_header();
        Ok(())
    }

    fn set_head_u32(&mut self, at: usize, value: u32) {
        let offset = PageHeader::SIZE + at;
        self.buffer.as_mut()[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn set_owner(&mut self, page_id: PageId) {
        self.set_head_u32(0, page_id);
    }

    pub fn set_prev_document(&mut self, page_id: PageId) {
        self.set_head_u32(4, page_id);
    }

    pub fn set_next_document(&mut self, page_id: PageId) {
        self.set_head_u32(8, page_id);
    }

    pub fn set_document_length(&mut self, length: usize) {
        self.set_head_u32(12, length as u32);
    }
}
