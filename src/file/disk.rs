use super::error::FileResult;
use super::journal::Journal;
use super::{PAGE_SIZE, PageId};

/// Page-granular access to a datafile plus its rollback journal.
///
/// The engine owns exactly one gateway. All calls are made while holding the
/// engine lock, so implementations don't need interior synchronization.
pub trait DiskService: Send {
    /// Open (or create) the datafile.
    fn open(&mut self) -> FileResult<()>;

    /// Whether pre-images are journaled before in-place writes.
    fn is_journal_enabled(&self) -> bool;

    /// Whether a journal from an interrupted commit is present.
    fn journal_exists(&self) -> FileResult<bool>;

    /// Read a page into `buffer`. Pages past the end of file read as zeros.
    fn read_page(&mut self, page_id: PageId, buffer: &mut [u8]) -> FileResult<()>;

    /// Write a page in place, extending the file when needed.
    fn write_page(&mut self, page_id: PageId, buffer: &[u8]) -> FileResult<()>;

    /// Number of pages currently stored in the datafile.
    fn page_count(&mut self) -> FileResult<u32>;

    /// Truncate or extend the datafile to `count` pages.
    fn set_page_count(&mut self, count: u32) -> FileResult<()>;

    /// Make every in-place write durable.
    fn flush(&mut self) -> FileResult<()>;

    /// Create an empty journal recording the datafile length at transaction start.
    fn start_journal(&mut self, page_count: u32) -> FileResult<()>;

    /// Append the pre-image of one page to the journal.
    fn append_journal(&mut self, page_id: PageId, image: &[u8]) -> FileResult<()>;

    /// Make every journal append durable.
    fn sync_journal(&mut self) -> FileResult<()>;

    /// Read back the raw journal bytes, if a journal exists.
    fn read_journal(&mut self) -> FileResult<Option<Vec<u8>>>;

    /// Remove the journal. This is the commit point.
    fn delete_journal(&mut self) -> FileResult<()>;

    /// Release the datafile.
    fn dispose(&mut self) -> FileResult<()>;

    /// Undo an interrupted commit by replaying journal pre-images onto the
    /// datafile, then discard the journal. Returns the number of restored pages.
    fn recovery(&mut self) -> FileResult<usize> {
        let Some(bytes) = self.read_journal()? else {
            return Ok(0);
        };

        let restored = match Journal::decode(&bytes)? {
            Some(journal) => {
                for entry in &journal.entries {
                    self.write_page(entry.page_id, &entry.image)?;
                }
                self.set_page_count(journal.page_count)?;
                self.flush()?;
                journal.entries.len()
            }
            // Torn header: nothing reached the datafile yet
            None => 0,
        };

        self.delete_journal()?;
        Ok(restored)
    }
}

pub(super) fn check_page_size(len: usize) -> FileResult<()> {
    if len != PAGE_SIZE {
        return Err(super::FileError::InvalidPageSize {
            expected: PAGE_SIZE,
            actual: len,
        });
    }
    Ok(())
}
