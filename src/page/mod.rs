//! Page layouts.
//!
//! Every page starts with the same 32-byte [`PageHeader`]; the rest of the
//! page is interpreted according to its [`PageType`].

mod codec;
mod collection;
mod data;
mod header;
mod index;

pub use codec::{ByteReader, ByteWriter};
pub use collection::{CollectionPage, IndexSlot, MAX_FIELD_NAME_LENGTH, MAX_INDEXES};
pub use data::{
    DATA_CAPACITY, DATA_PAYLOAD_OFFSET, DataBlock, DocumentRef, EXTEND_CAPACITY,
};
pub use header::{FILE_VERSION, HEADER_INFO, HeaderPage, MAX_COLLECTION_NAME_LENGTH};
pub use index::{IndexNode, InternalNode, LeafNode};

use crate::error::{EngineError, EngineResult};
use crate::file::{NO_PAGE, PAGE_SIZE, PageId};

/// Bytes available after the common page header
pub const PAGE_PAYLOAD: usize = PAGE_SIZE - PageHeader::SIZE;

/// Page type tag stored in every page header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PageType {
    Header = 0,
    Collection = 1,
    Index = 2,
    Data = 3,
    Extend = 4,
    Empty = 5,
}

impl PageType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(PageType::Header),
            1 => Some(PageType::Collection),
            2 => Some(PageType::Index),
            3 => Some(PageType::Data),
            4 => Some(PageType::Extend),
            5 => Some(PageType::Empty),
            _ => None,
        }
    }
}

/// Header stored at the beginning of each page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub page_id: PageId,      // 4 bytes
    pub page_type: PageType,  // 1 byte
    pub prev_page_id: PageId, // 4 bytes
    pub next_page_id: PageId, // 4 bytes - chain link, or next free page when Empty
    pub item_count: u16,      // 2 bytes
    pub free_bytes: u16,      // 2 bytes
                              // 15 bytes reserved
}

impl PageHeader {
    pub const SIZE: usize = 32;

    pub fn new(page_id: PageId, page_type: PageType) -> Self {
        Self {
            page_id,
            page_type,
            prev_page_id: NO_PAGE,
            next_page_id: NO_PAGE,
            item_count: 0,
            free_bytes: PAGE_PAYLOAD as u16,
        }
    }

    pub fn serialize(&self) -> [u8; Self::SIZE] {
        let mut result = [0u8; Self::SIZE];
        result[0..4].copy_from_slice(&self.page_id.to_le_bytes());
        result[4] = self.page_type as u8;
        result[5..9].copy_from_slice(&self.prev_page_id.to_le_bytes());
        result[9..13].copy_from_slice(&self.next_page_id.to_le_bytes());
        result[13..15].copy_from_slice(&self.item_count.to_le_bytes());
        result[15..17].copy_from_slice(&self.free_bytes.to_le_bytes());
        result
    }

    /// Decode the header of the page expected to live at `page_id`
    pub fn deserialize(page_id: PageId, data: &[u8]) -> EngineResult<Self> {
        if data.len() < Self::SIZE {
            return Err(EngineError::corruption(
                page_id,
                format!("not enough data for page header: {} bytes", data.len()),
            ));
        }

        let stored_id = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let page_type = PageType::from_u8(data[4]).ok_or_else(|| {
            EngineError::corruption(page_id, format!("unknown page type {}", data[4]))
        })?;

        if stored_id != page_id {
            return Err(EngineError::corruption(
                page_id,
                format!("page header claims id {}", stored_id),
            ));
        }

        Ok(Self {
            page_id,
            page_type,
            prev_page_id: u32::from_le_bytes([data[5], data[6], data[7], data[8]]),
            next_page_id: u32::from_le_bytes([data[9], data[10], data[11], data[12]]),
            item_count: u16::from_le_bytes([data[13], data[14]]),
            free_bytes: u16::from_le_bytes([data[15], data[16]]),
        })
    }

    /// Overwrite the header bytes of `buffer`, leaving the payload untouched
    pub fn write_to(&self, buffer: &mut [u8]) {
        buffer[..Self::SIZE].copy_from_slice(&self.serialize());
    }

    /// Decode and check the page type in one go
    pub fn expect(page_id: PageId, data: &[u8], page_type: PageType) -> EngineResult<Self> {
        let header = Self::deserialize(page_id, data)?;
        if header.page_type != page_type {
            return Err(EngineError::corruption(
                page_id,
                format!("expected {:?} page, found {:?}", page_type, header.page_type),
            ));
        }
        Ok(header)
    }
}

/// Typed page contents that can be decoded from and encoded into a page buffer
pub trait PageCodec: Sized {
    const PAGE_TYPE: PageType;

    fn page_id(&self) -> PageId;

    /// Decode from a full page buffer whose header has already been checked
    fn decode(header: &PageHeader, buffer: &[u8]) -> EngineResult<Self>;

    /// Encode into a full page buffer, header included
    fn encode(&self, buffer: &mut [u8]) -> EngineResult<()>;
}
