use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::disk::{DiskService, check_page_size};
use super::error::{FileError, FileResult};
use super::journal;
use super::{PAGE_SIZE, PageId};

/// Datafile on the local filesystem, journaled to a `<name>-journal` sibling
pub struct FileDiskService {
    path: PathBuf,
    journal_path: PathBuf,
    journal_enabled: bool,
    file: Option<File>,
    journal: Option<File>,
}

impl FileDiskService {
    /// Create a gateway for `path` with journaling enabled
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self::with_journal(path, true)
    }

    /// Create a gateway for `path`, choosing whether commits are journaled
    pub fn with_journal<P: AsRef<Path>>(path: P, journal_enabled: bool) -> Self {
        let path = path.as_ref().to_path_buf();
        let journal_path = Self::journal_path_for(&path);

        Self {
            path,
            journal_path,
            journal_enabled,
            file: None,
            journal: None,
        }
    }

    /// Path of the datafile
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the journal file
    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    fn journal_path_for(path: &Path) -> PathBuf {
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push("-journal");
        path.with_file_name(name)
    }

    fn file_mut(&mut self) -> FileResult<&mut File> {
        self.file.as_mut().ok_or(FileError::NotOpen)
    }
}

impl DiskService for FileDiskService {
    fn open(&mut self) -> FileResult<()> {
        if self.file.is_some() {
            return Ok(());
        }

        // Create parent directories if they don't exist
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        self.file = Some(file);
        Ok(())
    }

    fn is_journal_enabled(&self) -> bool {
        self.journal_enabled
    }

    fn journal_exists(&self) -> FileResult<bool> {
        Ok(self.journal_path.exists())
    }

    fn read_page(&mut self, page_id: PageId, buffer: &mut [u8]) -> FileResult<()> {
        check_page_size(buffer.len())?;

        let file = self.file_mut()?;
        let offset = page_id as u64 * PAGE_SIZE as u64;
        file.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < PAGE_SIZE {
            let read = file.read(&mut buffer[filled..])?;
            if read == 0 {
                break;
            }
            filled += read;
        }

        // If we read less than PAGE_SIZE, fill the rest with zeros
        if filled < PAGE_SIZE {
            buffer[filled..].fill(0);
        }

        Ok(())
    }

    fn write_page(&mut self, page_id: PageId, buffer: &[u8]) -> FileResult<()> {
        check_page_size(buffer.len())?;

        let file = self.file_mut()?;
        let offset = page_id as u64 * PAGE_SIZE as u64;
        let required_size = offset + PAGE_SIZE as u64;

        // Extend file if necessary to ensure we can write at this offset
        let current_size = file.metadata()?.len();
        if current_size < required_size {
            file.set_len(required_size)?;
        }

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buffer)?;
        // Durability comes from flush() at commit, not from every write

        Ok(())
    }

    fn page_count(&mut self) -> FileResult<u32> {
        let file_size = self.file_mut()?.metadata()?.len();
        Ok(file_size.div_ceil(PAGE_SIZE as u64) as u32)
    }

    fn set_page_count(&mut self, count: u32) -> FileResult<()> {
        let file = self.file_mut()?;
        file.set_len(count as u64 * PAGE_SIZE as u64)?;
        Ok(())
    }

    fn flush(&mut self) -> FileResult<()> {
        self.file_mut()?.sync_data()?;
        Ok(())
    }

    fn start_journal(&mut self, page_count: u32) -> FileResult<()> {
        let mut journal = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.journal_path)?;

        journal.write_all(&journal::encode_header(page_count))?;
        self.journal = Some(journal);
        Ok(())
    }

    fn append_journal(&mut self, page_id: PageId, image: &[u8]) -> FileResult<()> {
        let entry = journal::encode_entry(page_id, image)?;
        let journal = self.journal.as_mut().ok_or(FileError::JournalNotStarted)?;
        journal.write_all(&entry)?;
        Ok(())
    }

    fn sync_journal(&mut self) -> FileResult<()> {
        let journal = self.journal.as_mut().ok_or(FileError::JournalNotStarted)?;
        journal.sync_all()?;
        Ok(())
    }

    fn read_journal(&mut self) -> FileResult<Option<Vec<u8>>> {
        if !self.journal_path.exists() {
            return Ok(None);
        }

        let mut bytes = Vec::new();
        File::open(&self.journal_path)?.read_to_end(&mut bytes)?;
        Ok(Some(bytes))
    }

    fn delete_journal(&mut self) -> FileResult<()> {
        self.journal = None;
        if self.journal_path.exists() {
            std::fs::remove_file(&self.journal_path)?;
        }
        Ok(())
    }

    fn dispose(&mut self) -> FileResult<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }
        self.journal = None;
        Ok(())
    }
}
