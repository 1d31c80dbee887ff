use super::{ByteReader, ByteWriter, PAGE_PAYLOAD, PageCodec, PageHeader, PageType};
use crate::error::{EngineError, EngineResult};
use crate::file::{NO_PAGE, PAGE_SIZE, PageId};

pub const MAX_INDEXES: usize = 16;
pub const MAX_FIELD_NAME_LENGTH: usize = 64;

/// Root of one index tree owned by a collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSlot {
    pub field: String,
    pub root_page: PageId,
    pub unique: bool,
}

/// Per-collection metadata page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionPage {
    pub page_id: PageId,
    pub name: String,
    pub document_count: u64,
    /// Last value handed out for an automatic `_id`
    pub sequence: i64,
    pub first_data_page: PageId,
    pub last_data_page: PageId,
    pub indexes: Vec<IndexSlot>,
}

impl CollectionPage {
    pub fn new(page_id: PageId, name: &str) -> Self {
        Self {
            page_id,
            name: name.to_string(),
            document_count: 0,
            sequence: 0,
            first_data_page: NO_PAGE,
            last_data_page: NO_PAGE,
            indexes: Vec::new(),
        }
    }

    pub fn index(&self, field: &str) -> Option<&IndexSlot> {
        self.indexes.iter().find(|slot| slot.field == field)
    }

    pub fn index_mut(&mut self, field: &str) -> Option<&mut IndexSlot> {
        self.indexes.iter_mut().find(|slot| slot.field == field)
    }

    /// Like [`CollectionPage::index`] but a missing index is an error
    pub fn require_index(&self, field: &str) -> EngineResult<&IndexSlot> {
        self.index(field).ok_or_else(|| {
            EngineError::NotFound(format!("index '{}' on collection '{}'", field, self.name))
        })
    }
}

impl PageCodec for CollectionPage {
    const PAGE_TYPE: PageType = PageType::Collection;

    fn page_id(&self) -> PageId {
        self.page_id
    }

    fn decode(header: &PageHeader, buffer: &[u8]) -> EngineResult<Self> {
        let mut reader = ByteReader::new(buffer, PageHeader::SIZE, header.page_id);

        let name = reader.get_short_str()?;
        let document_count = reader.get_u64()?;
        let sequence = reader.get_i64()?;
        let first_data_page = reader.get_u32()?;
        let last_data_page = reader.get_u32()?;

        let count = reader.get_u8()? as usize;
        if count > MAX_INDEXES {
            return Err(EngineError::corruption(
                header.page_id,
                format!("collection declares {} indexes", count),
            ));
        }

        let mut indexes = Vec::with_capacity(count);
        for _ in 0..count {
            let field = reader.get_short_str()?;
            let root_page = reader.get_u32()?;
            let unique = reader.get_u8()? != 0;
            indexes.push(IndexSlot {
                field,
                root_page,
                unique,
            });
        }

        Ok(Self {
            page_id: header.page_id,
            name,
            document_count,
            sequence,
            first_data_page,
            last_data_page,
            indexes,
        })
    }

    fn encode(&self, buffer: &mut [u8]) -> EngineResult<()> {
        buffer[..PAGE_SIZE].fill(0);

        let used = {
            let mut writer = ByteWriter::new(buffer, PageHeader::SIZE, self.page_id);
            writer.put_short_str(&self.name)?;
            writer.put_u64(self.document_count)?;
            writer.put_i64(self.sequence)?;
            writer.put_u32(self.first_data_page)?;
            writer.put_u32(self.last_data_page)?;
            writer.put_u8(self.indexes.len() as u8)?;
            for slot in &self.indexes {
                writer.put_short_str(&slot.field)?;
                writer.put_u32(slot.root_page)?;
                writer.put_u8(slot.unique as u8)?;
            }
            writer.position() - PageHeader::SIZE
        };

        let mut header = PageHeader::new(self.page_id, PageType::Collection);
        header.item_count = self.indexes.len() as u16;
        header.free_bytes = (PAGE_PAYLOAD - used) as u16;
        header.write_to(buffer);
        Ok(())
    }
}
