use std::io;
use thiserror::Error;

use super::PageId;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Datafile is not open")]
    NotOpen,

    #[error("Invalid page size: expected {expected}, got {actual}")]
    InvalidPageSize { expected: usize, actual: usize },

    #[error("Page out of range: page_id={0}")]
    PageOutOfRange(PageId),

    #[error("Journal corrupted: {0}")]
    JournalCorrupted(String),

    #[error("Journal is not started")]
    JournalNotStarted,
}

pub type FileResult<T> = Result<T, FileError>;
