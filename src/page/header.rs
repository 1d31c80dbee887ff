use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use super::{ByteReader, ByteWriter, PAGE_PAYLOAD, PageCodec, PageHeader, PageType};
use crate::error::{EngineError, EngineResult};
use crate::file::{NO_PAGE, PAGE_SIZE, PageId};

/// Magic string at the start of the header payload
pub const HEADER_INFO: &[u8; 20] = b"** docdb datafile **";
pub const FILE_VERSION: u8 = 1;
pub const MAX_COLLECTION_NAME_LENGTH: usize = 60;

// info(20) + version(1) + free list(4) + last page(4) + change id(2)
// + creation time(8) + directory count(2)
const FIXED_SIZE: usize = 41;

/// Page 0: file metadata, free list head and collection directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderPage {
    pub free_empty_page_id: PageId,
    pub last_page_id: PageId,
    pub change_id: u16,
    pub creation_time: u64,
    pub collections: BTreeMap<String, PageId>,
}

impl HeaderPage {
    pub fn new() -> Self {
        let creation_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Self {
            free_empty_page_id: NO_PAGE,
            last_page_id: 0,
            change_id: 0,
            creation_time,
            collections: BTreeMap::new(),
        }
    }

    fn entry_len(name: &str) -> usize {
        1 + name.len() + 4
    }

    pub fn encoded_len(&self) -> usize {
        FIXED_SIZE
            + self
                .collections
                .keys()
                .map(|name| Self::entry_len(name))
                .sum::<usize>()
    }

    /// Whether the directory can take one more entry named `name`
    pub fn has_room_for(&self, name: &str) -> bool {
        self.encoded_len() + Self::entry_len(name) <= PAGE_PAYLOAD
    }
}

impl Default for HeaderPage {
    fn default() -> Self {
        Self::new()
    }
}

impl PageCodec for HeaderPage {
    const PAGE_TYPE: PageType = PageType::Header;

    fn page_id(&self) -> PageId {
        0
    }

    fn decode(header: &PageHeader, buffer: &[u8]) -> EngineResult<Self> {
        let mut reader = ByteReader::new(buffer, PageHeader::SIZE, header.page_id);

        if reader.get_bytes(HEADER_INFO.len())? != HEADER_INFO {
            return Err(EngineError::corruption(0, "not a docdb datafile"));
        }
        let version = reader.get_u8()?;
        if version != FILE_VERSION {
            return Err(EngineError::corruption(
                0,
                format!("unsupported file version {}", version),
            ));
        }

        let free_empty_page_id = reader.get_u32()?;
        let last_page_id = reader.get_u32()?;
        let change_id = reader.get_u16()?;
        let creation_time = reader.get_u64()?;

        let count = reader.get_u16()?;
        let mut collections = BTreeMap::new();
        for _ in 0..count {
            let name = reader.get_short_str()?;
            let page_id = reader.get_u32()?;
            collections.insert(name, page_id);
        }

        Ok(Self {
            free_empty_page_id,
            last_page_id,
            change_id,
            creation_time,
            collections,
        })
    }

    fn encode(&self, buffer: &mut [u8]) -> EngineResult<()> {
        if self.encoded_len() > PAGE_PAYLOAD {
            return Err(EngineError::DirectoryFull);
        }

        buffer[..PAGE_SIZE].fill(0);
        let mut header = PageHeader::new(0, PageType::Header);
        header.item_count = self.collections.len() as u16;
        header.free_bytes = (PAGE_PAYLOAD - self.encoded_len()) as u16;
        header.write_to(buffer);

        let mut writer = ByteWriter::new(buffer, PageHeader::SIZE, 0);
        writer.put_bytes(HEADER_INFO)?;
        writer.put_u8(FILE_VERSION)?;
        writer.put_u32(self.free_empty_page_id)?;
        writer.put_u32(self.last_page_id)?;
        writer.put_u16(self.change_id)?;
        writer.put_u64(self.creation_time)?;
        writer.put_u16(self.collections.len() as u16)?;
        for (name, page_id) in &self.collections {
            writer.put_short_str(name)?;
            writer.put_u32(*page_id)?;
        }
        Ok(())
    }
}
