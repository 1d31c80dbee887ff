//! Rollback journal encoding
//!
//! ## Layout
//!
//! ```text
//! [magic: 8 bytes][version: u32][page_count: u32]
//! [page_id: u32][crc32: u32][image: PAGE_SIZE bytes]   (repeated)
//! ```
//!
//! - **page_count**: datafile length in pages when the transaction began.
//!   Recovery truncates back to it so pages allocated by the interrupted
//!   commit disappear.
//! - **crc32**: checksum over `[page_id][image]`. An entry that fails the
//!   check, or is cut short, ends the journal: it can only be a torn append,
//!   and appends always complete before the first in-place write.

use crc32fast::Hasher;

use super::error::{FileError, FileResult};
use super::{PAGE_SIZE, PageId};

pub const JOURNAL_MAGIC: [u8; 8] = *b"DOCDBJNL";
pub const JOURNAL_VERSION: u32 = 1;
pub const JOURNAL_HEADER_SIZE: usize = 16;
pub const JOURNAL_ENTRY_SIZE: usize = 8 + PAGE_SIZE;

/// One journaled page pre-image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub page_id: PageId,
    pub image: Vec<u8>,
}

/// A decoded journal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Journal {
    pub page_count: u32,
    pub entries: Vec<JournalEntry>,
}

impl Journal {
    /// Decode a journal. Returns `None` when even the header is incomplete.
    pub fn decode(buf: &[u8]) -> FileResult<Option<Self>> {
        if buf.len() < JOURNAL_HEADER_SIZE {
            return Ok(None);
        }

        if buf[0..8] != JOURNAL_MAGIC {
            return Err(FileError::JournalCorrupted("bad magic".to_string()));
        }

        let version = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        if version != JOURNAL_VERSION {
            return Err(FileError::JournalCorrupted(format!(
                "unsupported version {}",
                version
            )));
        }

        let page_count = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);

        let mut entries = Vec::new();
        let mut offset = JOURNAL_HEADER_SIZE;

        while offset + JOURNAL_ENTRY_SIZE <= buf.len() {
            let raw = &buf[offset..offset + JOURNAL_ENTRY_SIZE];
            let page_id = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
            let crc = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
            let image = &raw[8..];

            if entry_checksum(page_id, image) != crc {
                break;
            }

            entries.push(JournalEntry {
                page_id,
                image: image.to_vec(),
            });
            offset += JOURNAL_ENTRY_SIZE;
        }

        Ok(Some(Self {
            page_count,
            entries,
        }))
    }
}

/// Encode the journal header
pub fn encode_header(page_count: u32) -> [u8; JOURNAL_HEADER_SIZE] {
    let mut buf = [0u8; JOURNAL_HEADER_SIZE];
    buf[0..8].copy_from_slice(&JOURNAL_MAGIC);
    buf[8..12].copy_from_slice(&JOURNAL_VERSION.to_le_bytes());
    buf[12..16].copy_from_slice(&page_count.to_le_bytes());
    buf
}

/// Encode one pre-image entry
pub fn encode_entry(page_id: PageId, image: &[u8]) -> FileResult<Vec<u8>> {
    super::disk::check_page_size(image.len())?;

    let mut buf = Vec::with_capacity(JOURNAL_ENTRY_SIZE);
    buf.extend_from_slice(&page_id.to_le_bytes());
    buf.extend_from_slice(&entry_checksum(page_id, image).to_le_bytes());
    buf.extend_from_slice(image);
    Ok(buf)
}

fn entry_checksum(page_id: PageId, image: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&page_id.to_le_bytes());
    hasher.update(image);
    hasher.finalize()
}
