#![allow(dead_code)]

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use docdb::{DiskService, FileError, FileResult, MemoryDiskService, PAGE_SIZE, PageId};

/// Disk that stops working after a fixed number of mutating calls, as if the
/// process died at that point. Reads keep working.
///
/// Built with [`FaultyDisk::failing_write`] it instead fails a single page
/// write and keeps working afterwards, like a transient I/O error.
pub struct FaultyDisk {
    inner: MemoryDiskService,
    budget: usize,
    calls: Arc<AtomicUsize>,
    failing_write: Option<usize>,
    writes: Arc<AtomicUsize>,
}

impl FaultyDisk {
    pub fn new(inner: MemoryDiskService, budget: usize) -> Self {
        Self {
            inner,
            budget,
            calls: Arc::new(AtomicUsize::new(0)),
            failing_write: None,
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail only the `nth` page write (counting from zero)
    pub fn failing_write(inner: MemoryDiskService, nth: usize) -> Self {
        Self {
            failing_write: Some(nth),
            ..Self::new(inner, usize::MAX)
        }
    }

    /// Counter of page writes made so far, including the failed one
    pub fn writes(&self) -> Arc<AtomicUsize> {
        self.writes.clone()
    }

    /// Counter of mutating calls made so far, including the failed ones
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    fn step(&self) -> FileResult<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call >= self.budget {
            return Err(FileError::Io(io::Error::other("simulated crash")));
        }
        Ok(())
    }
}

impl DiskService for FaultyDisk {
    fn open(&mut self) -> FileResult<()> {
        self.inner.open()
    }

    fn is_journal_enabled(&self) -> bool {
        self.inner.is_journal_enabled()
    }

    fn journal_exists(&self) -> FileResult<bool> {
        self.inner.journal_exists()
    }

    fn read_page(&mut self, page_id: PageId, buffer: &mut [u8]) -> FileResult<()> {
        self.inner.read_page(page_id, buffer)
    }

    fn write_page(&mut self, page_id: PageId, buffer: &[u8]) -> FileResult<()> {
        self.step()?;
        let write = self.writes.fetch_add(1, Ordering::SeqCst);
        if self.failing_write == Some(write) {
            return Err(FileError::Io(io::Error::other("simulated write error")));
        }
        self.inner.write_page(page_id, buffer)
    }

    fn page_count(&mut self) -> FileResult<u32> {
        self.inner.page_count()
    }

    fn set_page_count(&mut self, count: u32) -> FileResult<()> {
        self.step()?;
        self.inner.set_page_count(count)
    }

    fn flush(&mut self) -> FileResult<()> {
        self.step()?;
        self.inner.flush()
    }

    fn start_journal(&mut self, page_count: u32) -> FileResult<()> {
        self.step()?;
        self.inner.start_journal(page_count)
    }

    fn append_journal(&mut self, page_id: PageId, image: &[u8]) -> FileResult<()> {
        self.step()?;
        self.inner.append_journal(page_id, image)
    }

    fn sync_journal(&mut self) -> FileResult<()> {
        self.step()?;
        self.inner.sync_journal()
    }

    fn read_journal(&mut self) -> FileResult<Option<Vec<u8>>> {
        self.inner.read_journal()
    }

    fn delete_journal(&mut self) -> FileResult<()> {
        self.step()?;
        self.inner.delete_journal()
    }

    fn dispose(&mut self) -> FileResult<()> {
        self.inner.dispose()
    }
}

/// Independent copy of a memory datafile (clones would share storage)
pub fn copy_of(disk: &MemoryDiskService) -> MemoryDiskService {
    let mut copy = MemoryDiskService::new();
    copy.open().unwrap();
    for (page_id, page) in disk.snapshot().chunks(PAGE_SIZE).enumerate() {
        copy.write_page(page_id as PageId, page).unwrap();
    }
    copy
}
