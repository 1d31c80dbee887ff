use thiserror::Error;

use crate::file::{FileError, PageId};

/// Errors surfaced by the storage engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Collection already exists: {0}")]
    DuplicateCollection(String),

    #[error("Duplicate key in unique index '{field}': {key}")]
    DuplicateKey { field: String, key: String },

    #[error("Datafile corrupted at page {page_id}: {reason}")]
    Corruption { page_id: PageId, reason: String },

    #[error("IO failure: {0}")]
    Io(#[from] FileError),

    #[error("Transaction aborted: {source} (rollback failed: {rollback})")]
    TransactionAborted {
        source: Box<EngineError>,
        rollback: Box<EngineError>,
    },

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid transaction state: {0}")]
    InvalidState(String),

    #[error("Document size {size} exceeds the limit of {limit} bytes")]
    DocumentTooLarge { size: usize, limit: usize },

    #[error("Index key size {size} exceeds the limit of {limit} bytes")]
    KeyTooLarge { size: usize, limit: usize },

    #[error("Collection '{0}' already has the maximum number of indexes")]
    IndexLimitReached(String),

    #[error("Collection directory in the header page is full")]
    DirectoryFull,

    #[error("Datafile is full")]
    FileFull,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub(crate) fn corruption(page_id: PageId, reason: impl Into<String>) -> Self {
        Self::Corruption {
            page_id,
            reason: reason.into(),
        }
    }

    /// Whether this error only says that something is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
