//! Transaction coordinator: working set, commit, rollback and crash recovery

use std::collections::BTreeMap;
use std::mem;

use crate::error::{EngineError, EngineResult};
use crate::file::{DiskService, PageId};
use crate::logger::{LogLevel, Logger};
use crate::pager::Pager;

/// Content of a page before the current transaction first touched it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreImage {
    /// The page existed in the datafile with these bytes
    Stored(Vec<u8>),
    /// The page lay past the end of the datafile
    Unallocated,
}

/// Pages touched by the active transaction, in ascending page id order
#[derive(Debug, Default)]
pub struct WorkingSet {
    active: bool,
    journal_started: bool,
    /// Set once commit starts writing pages in place
    disk_touched: bool,
    original_page_count: u32,
    pages: BTreeMap<PageId, PreImage>,
}

impl WorkingSet {
    pub(crate) fn begin(&mut self, original_page_count: u32) {
        *self = Self {
            active: true,
            original_page_count,
            ..Self::default()
        };
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn contains(&self, page_id: PageId) -> bool {
        self.pages.contains_key(&page_id)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn original_page_count(&self) -> u32 {
        self.original_page_count
    }

    pub fn journal_started(&self) -> bool {
        self.journal_started
    }

    pub(crate) fn set_journal_started(&mut self) {
        self.journal_started = true;
    }

    pub(crate) fn record(&mut self, page_id: PageId, pre_image: PreImage) {
        self.pages.entry(page_id).or_insert(pre_image);
    }

    pub fn pre_image(&self, page_id: PageId) -> Option<&PreImage> {
        self.pages.get(&page_id)
    }
}

/// Transaction lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Active,
    Committing,
    Committed,
    RollingBack,
    RolledBack,
}

/// Drives one unit of work at a time over a [`Pager`]
#[derive(Debug)]
pub struct TransactionService {
    state: TransactionState,
    log: Logger,
}

impl TransactionService {
    pub fn new(log: Logger) -> Self {
        Self {
            state: TransactionState::Idle,
            log,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn begin(&mut self, pager: &mut Pager) -> EngineResult<()> {
        match self.state {
            TransactionState::Idle
            | TransactionState::Committed
            | TransactionState::RolledBack => {}
            state => {
                return Err(EngineError::InvalidState(format!(
                    "cannot begin a transaction while {:?}",
                    state
                )));
            }
        }

        let page_count = pager.page_count()?;
        pager.working_set_mut().begin(page_count);
        self.state = TransactionState::Active;
        Ok(())
    }

    /// Write every dirty page in ascending page id order, then drop the journal.
    ///
    /// On failure the state stays `Committing` and the caller is expected to
    /// call [`TransactionService::rollback`].
    pub fn commit(&mut self, pager: &mut Pager) -> EngineResult<()> {
        if self.state != TransactionState::Active {
            return Err(EngineError::InvalidState(format!(
                "cannot commit while {:?}",
                self.state
            )));
        }
        self.state = TransactionState::Committing;

        let written = Self::flush(pager)?;

        *pager.working_set_mut() = WorkingSet::default();
        self.state = TransactionState::Committed;
        if written > 0 {
            self.log.write(
                LogLevel::JOURNAL,
                format_args!("commit wrote {} pages", written),
            );
        }
        Ok(())
    }

    fn flush(pager: &mut Pager) -> EngineResult<usize> {
        let journal_started = pager.working_set().journal_started();

        if pager.dirty_pages().is_empty() {
            if journal_started {
                pager.disk_mut().delete_journal()?;
            }
            return Ok(0);
        }

        let mut header = pager.header()?;
        header.change_id = header.change_id.wrapping_add(1);
        pager.store(&header)?;

        if journal_started {
            pager.disk_mut().sync_journal()?;
        }

        pager.working_set_mut().disk_touched = true;
        let dirty = pager.dirty_pages();
        for page_id in &dirty {
            pager.write_page(*page_id)?;
        }
        pager.disk_mut().flush()?;

        // Commit point
        if journal_started {
            pager.disk_mut().delete_journal()?;
        }
        Ok(dirty.len())
    }

    /// Restore every page touched by the transaction to its pre-image
    pub fn rollback(&mut self, pager: &mut Pager) -> EngineResult<()> {
        match self.state {
            TransactionState::Active | TransactionState::Committing => {}
            state => {
                return Err(EngineError::InvalidState(format!(
                    "cannot roll back while {:?}",
                    state
                )));
            }
        }
        self.state = TransactionState::RollingBack;

        let working_set = mem::take(pager.working_set_mut());
        let restored = working_set.len();

        for (page_id, pre_image) in &working_set.pages {
            match pre_image {
                PreImage::Stored(data) => pager.restore_page(*page_id, data.clone()),
                PreImage::Unallocated => pager.discard_page(*page_id),
            }
        }
        pager.discard_dirty();

        if working_set.disk_touched {
            let disk = pager.disk_mut();
            for (page_id, pre_image) in &working_set.pages {
                if let PreImage::Stored(data) = pre_image {
                    disk.write_page(*page_id, data)?;
                }
            }
            disk.set_page_count(working_set.original_page_count)?;
            disk.flush()?;
        }

        if working_set.journal_started {
            pager.disk_mut().delete_journal()?;
        }

        self.state = TransactionState::RolledBack;
        self.log.write(
            LogLevel::JOURNAL,
            format_args!("rollback restored {} pages", restored),
        );
        Ok(())
    }
}

/// Replay the journal left by an interrupted commit, if any.
/// Returns the number of pages restored.
pub fn recover(disk: &mut dyn DiskService, log: &Logger) -> EngineResult<usize> {
    if !disk.is_journal_enabled() || !disk.journal_exists()? {
        return Ok(0);
    }

    log.write(LogLevel::RECOVERY, "journal found, recovering datafile");
    let restored = disk.recovery()?;
    log.write(
        LogLevel::RECOVERY,
        format_args!("recovery restored {} pages", restored),
    );
    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{MemoryDiskService, PAGE_SIZE};
    use crate::page::{HeaderPage, PageType};

    /// Committed file with a header page and one data page
    fn setup() -> (Pager, TransactionService, MemoryDiskService) {
        let disk = MemoryDiskService::new();
        let mut handle = disk.clone();
        handle.open().unwrap();

        let mut pager = Pager::new(Box::new(handle), 100, Logger::default());
        let mut trans = TransactionService::new(Logger::default());
        trans.begin(&mut pager).unwrap();
        pager.store(&HeaderPage::new()).unwrap();
        pager.allocate(PageType::Data).unwrap();
        trans.commit(&mut pager).unwrap();
        (pager, trans, disk)
    }

    #[test]
    fn test_state_machine() {
        let (mut pager, mut trans, _) = setup();
        assert_eq!(trans.state(), TransactionState::Committed);

        trans.begin(&mut pager).unwrap();
        assert_eq!(trans.state(), TransactionState::Active);
        assert!(matches!(
            trans.begin(&mut pager),
            Err(EngineError::InvalidState(_))
        ));

        trans.rollback(&mut pager).unwrap();
        assert_eq!(trans.state(), TransactionState::RolledBack);
        assert!(trans.commit(&mut pager).is_err());
        assert!(trans.rollback(&mut pager).is_err());
    }

    #[test]
    fn test_commit_writes_pages_and_deletes_journal() {
        let (mut pager, mut trans, disk) = setup();
        let before = pager.header().unwrap().change_id;

        trans.begin(&mut pager).unwrap();
        pager.get_mut(1).unwrap()[200] = 7;
        assert!(disk.journal_exists().unwrap());
        trans.commit(&mut pager).unwrap();

        assert!(!disk.journal_exists().unwrap());
        assert!(pager.dirty_pages().is_empty());
        assert_eq!(disk.snapshot()[PAGE_SIZE + 200], 7);
        assert_eq!(pager.header().unwrap().change_id, before.wrapping_add(1));
    }

    #[test]
    fn test_rollback_restores_pre_images() {
        let (mut pager, mut trans, disk) = setup();
        let original = disk.snapshot();

        trans.begin(&mut pager).unwrap();
        pager.get_mut(1).unwrap()[300] = 9;
        let new_page = pager.allocate(PageType::Index).unwrap();
        assert_eq!(new_page, 2);
        trans.rollback(&mut pager).unwrap();

        assert_eq!(pager.get(1).unwrap()[300], 0);
        assert_eq!(pager.header().unwrap().last_page_id, 1);
        assert!(pager.dirty_pages().is_empty());
        assert!(!disk.journal_exists().unwrap());
        assert_eq!(disk.snapshot(), original);
    }

    #[test]
    fn test_empty_commit_writes_nothing() {
        let (mut pager, mut trans, disk) = setup();
        let before = disk.snapshot();

        trans.begin(&mut pager).unwrap();
        pager.get(1).unwrap();
        trans.commit(&mut pager).unwrap();

        assert_eq!(disk.snapshot(), before);
    }

    #[test]
    fn test_recover_without_journal() {
        let mut disk = MemoryDiskService::new();
        disk.open().unwrap();
        assert_eq!(recover(&mut disk, &Logger::default()).unwrap(), 0);
    }
}
