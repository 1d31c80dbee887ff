//! Page manager: page cache, allocation and the free list

use ahash::RandomState;
use lru::LruCache;

use crate::error::{EngineError, EngineResult};
use crate::file::{DiskService, NO_PAGE, PAGE_SIZE, PageId};
use crate::logger::{LogLevel, Logger};
use crate::page::{HeaderPage, PageCodec, PageHeader, PageType};
use crate::transaction::{PreImage, WorkingSet};

/// Entry in the page cache
struct CachedPage {
    /// The actual page data
    data: Vec<u8>,
    /// Whether this page has been modified since it was last written
    dirty: bool,
}

/// Caches pages of one datafile and hands out typed or raw access to them.
///
/// Dirty pages are never evicted: the cache may grow past its capacity while a
/// transaction holds more dirty pages than that, and shrinks back once they are
/// written. While a transaction is active, the first mutable access to a page
/// records its pre-image in the working set and appends it to the journal.
pub struct Pager {
    disk: Box<dyn DiskService>,
    cache: LruCache<PageId, CachedPage, RandomState>,
    capacity: usize,
    /// Reusable buffer for page loads, recycled from evicted entries
    load_buffer: Vec<u8>,
    working_set: WorkingSet,
    log: Logger,
}

impl Pager {
    pub fn new(disk: Box<dyn DiskService>, capacity: usize, log: Logger) -> Self {
        Self {
            disk,
            cache: LruCache::unbounded_with_hasher(RandomState::new()),
            capacity: capacity.max(1),
            load_buffer: vec![0u8; PAGE_SIZE],
            working_set: WorkingSet::default(),
            log,
        }
    }

    /// Get a page, loading it from disk if necessary
    pub fn get(&mut self, page_id: PageId) -> EngineResult<&[u8]> {
        self.ensure_cached(page_id)?;
        self.cache
            .get(&page_id)
            .map(|page| page.data.as_slice())
            .ok_or_else(|| EngineError::corruption(page_id, "page missing from cache"))
    }

    /// Get a page for modification. The page is marked dirty.
    pub fn get_mut(&mut self, page_id: PageId) -> EngineResult<&mut [u8]> {
        self.ensure_cached(page_id)?;

        if self.working_set.is_active() && !self.working_set.contains(page_id) {
            self.track(page_id)?;
        }

        let page = self
            .cache
            .get_mut(&page_id)
            .ok_or_else(|| EngineError::corruption(page_id, "page missing from cache"))?;
        page.dirty = true;
        Ok(&mut page.data)
    }

    /// Record that `page_id` must be written at commit
    pub fn mark_dirty(&mut self, page_id: PageId) -> EngineResult<()> {
        self.get_mut(page_id).map(|_| ())
    }

    /// Decode a typed page, checking its page type
    pub fn load<P: PageCodec>(&mut self, page_id: PageId) -> EngineResult<P> {
        let buffer = self.get(page_id)?;
        let header = PageHeader::expect(page_id, buffer, P::PAGE_TYPE)?;
        P::decode(&header, buffer)
    }

    /// Encode a typed page back into its cached buffer
    pub fn store<P: PageCodec>(&mut self, page: &P) -> EngineResult<()> {
        let buffer = self.get_mut(page.page_id())?;
        page.encode(buffer)
    }

    pub fn header(&mut self) -> EngineResult<HeaderPage> {
        self.load(0)
    }

    /// Allocate a page of `page_type`, reusing the head of the free list when
    /// there is one. The returned page is zeroed apart from its header.
    pub fn allocate(&mut self, page_type: PageType) -> EngineResult<PageId> {
        let mut header = self.header()?;

        let page_id = if header.free_empty_page_id != NO_PAGE {
            let page_id = header.free_empty_page_id;
            let free = PageHeader::expect(page_id, self.get(page_id)?, PageType::Empty)?;
            header.free_empty_page_id = free.next_page_id;
            page_id
        } else {
            let page_id = header
                .last_page_id
                .checked_add(1)
                .filter(|id| *id != NO_PAGE)
                .ok_or(EngineError::FileFull)?;
            header.last_page_id = page_id;
            page_id
        };
        self.store(&header)?;

        let buffer = self.get_mut(page_id)?;
        buffer.fill(0);
        PageHeader::new(page_id, page_type).write_to(buffer);
        Ok(page_id)
    }

    /// Turn a page into an Empty page at the head of the free list.
    /// Only the page header is rewritten.
    pub fn free(&mut self, page_id: PageId) -> EngineResult<()> {
        if page_id == 0 {
            return Err(EngineError::InvalidArgument(
                "the header page cannot be freed".to_string(),
            ));
        }

        let mut header = self.header()?;
        let buffer = self.get_mut(page_id)?;
        let current = PageHeader::deserialize(page_id, buffer)?;
        if current.page_type == PageType::Empty {
            return Err(EngineError::corruption(page_id, "page is already free"));
        }

        let mut empty = PageHeader::new(page_id, PageType::Empty);
        empty.next_page_id = header.free_empty_page_id;
        empty.write_to(buffer);

        header.free_empty_page_id = page_id;
        self.store(&header)
    }

    /// Number of pages stored in the datafile
    pub fn page_count(&mut self) -> EngineResult<u32> {
        Ok(self.disk.page_count()?)
    }

    /// Number of pages currently in the cache
    pub fn cached_pages(&self) -> usize {
        self.cache.len()
    }

    /// Ids of the dirty pages, ascending
    pub fn dirty_pages(&self) -> Vec<PageId> {
        let mut dirty: Vec<PageId> = self
            .cache
            .iter()
            .filter(|(_, page)| page.dirty)
            .map(|(page_id, _)| *page_id)
            .collect();
        dirty.sort_unstable();
        dirty
    }

    pub fn is_dirty(&self, page_id: PageId) -> bool {
        self.cache.peek(&page_id).is_some_and(|page| page.dirty)
    }

    /// Drop every clean page from the cache
    pub fn clear_cache(&mut self) {
        let clean: Vec<PageId> = self
            .cache
            .iter()
            .filter(|(_, page)| !page.dirty)
            .map(|(page_id, _)| *page_id)
            .collect();
        for page_id in clean {
            self.cache.pop(&page_id);
        }
        self.log.write(LogLevel::CACHE, "page cache cleared");
    }

    /// Release the datafile. Pages are written in place only by a commit, so
    /// dirty pages left here belong to an unfinished transaction and are dropped.
    pub fn dispose(&mut self) -> EngineResult<()> {
        let dirty = self.dirty_pages();
        if !dirty.is_empty() {
            self.log.write(
                LogLevel::CACHE,
                format_args!("dispose drops {} uncommitted pages", dirty.len()),
            );
        }
        self.working_set = WorkingSet::default();
        self.cache.clear();
        self.disk.flush()?;
        self.disk.dispose()?;
        Ok(())
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }

    pub(crate) fn disk_mut(&mut self) -> &mut dyn DiskService {
        self.disk.as_mut()
    }

    pub(crate) fn working_set(&self) -> &WorkingSet {
        &self.working_set
    }

    pub(crate) fn working_set_mut(&mut self) -> &mut WorkingSet {
        &mut self.working_set
    }

    /// Write one cached page to disk and mark it clean
    pub(crate) fn write_page(&mut self, page_id: PageId) -> EngineResult<()> {
        if let Some(page) = self.cache.peek_mut(&page_id) {
            self.disk.write_page(page_id, &page.data)?;
            page.dirty = false;
        }
        Ok(())
    }

    /// Put a pre-image back in the cache as a clean page
    pub(crate) fn restore_page(&mut self, page_id: PageId, data: Vec<u8>) {
        self.cache.put(page_id, CachedPage { data, dirty: false });
    }

    pub(crate) fn discard_page(&mut self, page_id: PageId) {
        if let Some(page) = self.cache.pop(&page_id) {
            self.load_buffer = page.data;
        }
    }

    /// Drop dirty pages that no working set entry covers
    pub(crate) fn discard_dirty(&mut self) {
        for page_id in self.dirty_pages() {
            self.discard_page(page_id);
        }
    }

    fn ensure_cached(&mut self, page_id: PageId) -> EngineResult<()> {
        if page_id == NO_PAGE {
            return Err(EngineError::InvalidArgument(
                "attempt to read the null page reference".to_string(),
            ));
        }
        if self.cache.contains(&page_id) {
            return Ok(());
        }

        self.evict_clean();

        if self.load_buffer.len() != PAGE_SIZE {
            self.load_buffer = vec![0u8; PAGE_SIZE];
        }
        self.disk.read_page(page_id, &mut self.load_buffer)?;

        let data = std::mem::take(&mut self.load_buffer);
        self.cache.put(page_id, CachedPage { data, dirty: false });
        Ok(())
    }

    /// Evict least recently used clean pages until there is room for one more
    fn evict_clean(&mut self) {
        while self.cache.len() >= self.capacity {
            let victim = self
                .cache
                .iter()
                .rev()
                .find(|(_, page)| !page.dirty)
                .map(|(page_id, _)| *page_id);

            let Some(page_id) = victim else {
                break;
            };
            if let Some(page) = self.cache.pop(&page_id) {
                self.load_buffer = page.data;
            }
            self.log
                .write(LogLevel::CACHE, format_args!("evict page {}", page_id));
        }
    }

    /// First touch of a page inside the active transaction
    fn track(&mut self, page_id: PageId) -> EngineResult<()> {
        let original_page_count = self.working_set.original_page_count();
        let pre_image = if page_id < original_page_count {
            let data = self
                .cache
                .peek(&page_id)
                .map(|page| page.data.clone())
                .ok_or_else(|| EngineError::corruption(page_id, "page missing from cache"))?;
            PreImage::Stored(data)
        } else {
            PreImage::Unallocated
        };

        if self.disk.is_journal_enabled() {
            if !self.working_set.journal_started() {
                self.disk.start_journal(original_page_count)?;
                self.working_set.set_journal_started();
                self.log.write(
                    LogLevel::JOURNAL,
                    format_args!("start journal ({} pages)", original_page_count),
                );
            }
            if let PreImage::Stored(data) = &pre_image {
                self.disk.append_journal(page_id, data)?;
                self.log
                    .write(LogLevel::JOURNAL, format_args!("journal page {}", page_id));
            }
        }

        self.working_set.record(page_id, pre_image);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::MemoryDiskService;

    /// Pager over a fresh in-memory file holding only a header page
    fn setup(capacity: usize) -> (Pager, MemoryDiskService) {
        let disk = MemoryDiskService::with_journal(false);
        let mut handle = disk.clone();
        handle.open().unwrap();

        let mut pager = Pager::new(Box::new(handle), capacity, Logger::default());
        pager.store(&HeaderPage::new()).unwrap();
        pager.write_page(0).unwrap();
        (pager, disk)
    }

    #[test]
    fn test_get_returns_same_buffer() {
        let (mut pager, _) = setup(10);
        let page_id = pager.allocate(PageType::Data).unwrap();

        pager.get_mut(page_id).unwrap()[100] = 42;
        assert_eq!(pager.get(page_id).unwrap()[100], 42);
        assert!(pager.is_dirty(page_id));
    }

    #[test]
    fn test_allocate_extends_file() {
        let (mut pager, _) = setup(10);

        let first = pager.allocate(PageType::Data).unwrap();
        let second = pager.allocate(PageType::Index).unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(pager.header().unwrap().last_page_id, 2);

        let header = PageHeader::deserialize(second, pager.get(second).unwrap()).unwrap();
        assert_eq!(header.page_type, PageType::Index);
    }

    #[test]
    fn test_free_list_is_lifo() {
        let (mut pager, _) = setup(10);
        let a = pager.allocate(PageType::Data).unwrap();
        let b = pager.allocate(PageType::Data).unwrap();

        pager.free(a).unwrap();
        pager.free(b).unwrap();
        assert_eq!(pager.header().unwrap().free_empty_page_id, b);

        assert_eq!(pager.allocate(PageType::Extend).unwrap(), b);
        assert_eq!(pager.allocate(PageType::Extend).unwrap(), a);
        assert_eq!(pager.header().unwrap().free_empty_page_id, NO_PAGE);
        assert_eq!(pager.allocate(PageType::Extend).unwrap(), 3);
    }

    #[test]
    fn test_reused_page_is_zeroed() {
        let (mut pager, _) = setup(10);
        let page_id = pager.allocate(PageType::Data).unwrap();
        pager.get_mut(page_id).unwrap()[PAGE_SIZE - 1] = 0xFF;
        pager.free(page_id).unwrap();

        // free keeps the payload
        assert_eq!(pager.get(page_id).unwrap()[PAGE_SIZE - 1], 0xFF);

        let reused = pager.allocate(PageType::Data).unwrap();
        assert_eq!(reused, page_id);
        assert_eq!(pager.get(reused).unwrap()[PAGE_SIZE - 1], 0);
    }

    #[test]
    fn test_double_free_and_header_free() {
        let (mut pager, _) = setup(10);
        let page_id = pager.allocate(PageType::Data).unwrap();
        pager.free(page_id).unwrap();

        assert!(matches!(pager.free(page_id), Err(EngineError::Corruption { .. })));
        assert!(matches!(pager.free(0), Err(EngineError::InvalidArgument(_))));
    }

    #[test]
    fn test_load_checks_page_type() {
        let (mut pager, _) = setup(10);
        let page_id = pager.allocate(PageType::Data).unwrap();

        let result = pager.load::<HeaderPage>(page_id);
        assert!(matches!(result, Err(EngineError::Corruption { .. })));
    }

    #[test]
    fn test_eviction_keeps_dirty_pages() {
        let (mut pager, disk) = setup(4);
        let mut pages = Vec::new();
        for _ in 0..8 {
            pages.push(pager.allocate(PageType::Data).unwrap());
        }

        // everything is dirty, so nothing could be evicted
        assert_eq!(pager.cached_pages(), 9);

        for page_id in pager.dirty_pages() {
            pager.write_page(page_id).unwrap();
        }
        assert!(pager.dirty_pages().is_empty());
        assert_eq!(disk.file_length(), 9 * PAGE_SIZE);

        // loading another page now evicts clean pages down to capacity
        pager.get(pages[0]).unwrap();
        pager.get(pages[1]).unwrap();
        assert!(pager.cached_pages() <= 9);
        pager.clear_cache();
        assert_eq!(pager.cached_pages(), 0);
        pager.get(pages[2]).unwrap();
        assert_eq!(pager.cached_pages(), 1);
    }

    #[test]
    fn test_eviction_under_capacity() {
        let (mut pager, _) = setup(3);
        for _ in 0..6 {
            pager.allocate(PageType::Data).unwrap();
        }
        for page_id in pager.dirty_pages() {
            pager.write_page(page_id).unwrap();
        }
        pager.clear_cache();

        for page_id in 0..7 {
            pager.get(page_id).unwrap();
            assert!(pager.cached_pages() <= 3);
        }
    }

    #[test]
    fn test_dispose_drops_dirty_pages() {
        let (mut pager, disk) = setup(10);
        let before = disk.snapshot();

        let page_id = pager.allocate(PageType::Data).unwrap();
        pager.get_mut(page_id).unwrap()[64] = 1;
        pager.dispose().unwrap();

        assert_eq!(disk.snapshot(), before);
    }

    #[test]
    fn test_pages_past_end_read_as_zeros() {
        let (mut pager, _) = setup(10);
        assert!(pager.get(50).unwrap().iter().all(|b| *b == 0));
        assert!(pager.get(NO_PAGE).is_err());
    }
}
