use std::sync::Arc;

use parking_lot::Mutex;

use super::disk::{DiskService, check_page_size};
use super::error::{FileError, FileResult};
use super::journal;
use super::{PAGE_SIZE, PageId};

#[derive(Default)]
struct MemoryStore {
    pages: Vec<Vec<u8>>,
    journal: Option<Vec<u8>>,
}

/// In-memory datafile.
///
/// Clones share the same storage, so dropping an engine and opening a new
/// one on a clone behaves like restarting the process on the same file.
#[derive(Clone)]
pub struct MemoryDiskService {
    store: Arc<Mutex<MemoryStore>>,
    journal_enabled: bool,
    open: bool,
}

impl MemoryDiskService {
    /// New empty datafile with journaling enabled
    pub fn new() -> Self {
        Self::with_journal(true)
    }

    /// New empty datafile, choosing whether commits are journaled
    pub fn with_journal(journal_enabled: bool) -> Self {
        Self {
            store: Arc::new(Mutex::new(MemoryStore::default())),
            journal_enabled,
            open: false,
        }
    }

    /// Copy of the whole datafile, page after page
    pub fn snapshot(&self) -> Vec<u8> {
        self.store.lock().pages.concat()
    }

    /// Datafile length in bytes
    pub fn file_length(&self) -> usize {
        self.store.lock().pages.len() * PAGE_SIZE
    }

    fn check_open(&self) -> FileResult<()> {
        if self.open { Ok(()) } else { Err(FileError::NotOpen) }
    }
}

impl Default for MemoryDiskService {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskService for MemoryDiskService {
    fn open(&mut self) -> FileResult<()> {
        self.open = true;
        Ok(())
    }

    fn is_journal_enabled(&self) -> bool {
        self.journal_enabled
    }

    fn journal_exists(&self) -> FileResult<bool> {
        Ok(self.store.lock().journal.is_some())
    }

    fn read_page(&mut self, page_id: PageId, buffer: &mut [u8]) -> FileResult<()> {
        check_page_size(buffer.len())?;
        self.check_open()?;

        match self.store.lock().pages.get(page_id as usize) {
            Some(page) => buffer.copy_from_slice(page),
            None => buffer.fill(0),
        }
        Ok(())
    }

    fn write_page(&mut self, page_id: PageId, buffer: &[u8]) -> FileResult<()> {
        check_page_size(buffer.len())?;
        self.check_open()?;

        let mut store = self.store.lock();
        let index = page_id as usize;
        if store.pages.len() <= index {
            store.pages.resize(index + 1, vec![0u8; PAGE_SIZE]);
        }
        store.pages[index].copy_from_slice(buffer);
        Ok(())
    }

    fn page_count(&mut self) -> FileResult<u32> {
        self.check_open()?;
        Ok(self.store.lock().pages.len() as u32)
    }

    fn set_page_count(&mut self, count: u32) -> FileResult<()> {
        self.check_open()?;
        self.store
            .lock()
            .pages
            .resize(count as usize, vec![0u8; PAGE_SIZE]);
        Ok(())
    }

    fn flush(&mut self) -> FileResult<()> {
        self.check_open()
    }

    fn start_journal(&mut self, page_count: u32) -> FileResult<()> {
        self.store.lock().journal = Some(journal::encode_header(page_count).to_vec());
        Ok(())
    }

    fn append_journal(&mut self, page_id: PageId, image: &[u8]) -> FileResult<()> {
        let entry = journal::encode_entry(page_id, image)?;
        let mut store = self.store.lock();
        let journal = store.journal.as_mut().ok_or(FileError::JournalNotStarted)?;
        journal.extend_from_slice(&entry);
        Ok(())
    }

    fn sync_journal(&mut self) -> FileResult<()> {
        if self.store.lock().journal.is_none() {
            return Err(FileError::JournalNotStarted);
        }
        Ok(())
    }

    fn read_journal(&mut self) -> FileResult<Option<Vec<u8>>> {
        Ok(self.store.lock().journal.clone())
    }

    fn delete_journal(&mut self) -> FileResult<()> {
        self.store.lock().journal = None;
        Ok(())
    }

    fn dispose(&mut self) -> FileResult<()> {
        self.open = false;
        Ok(())
    }
}
