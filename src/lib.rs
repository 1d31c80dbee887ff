pub mod collection;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod file;
pub mod index;
pub mod logger;
pub mod page;
pub mod pager;
pub mod transaction;

pub use collection::{CollectionService, ID_FIELD};
pub use config::{DEFAULT_CACHE_SIZE, EngineConfig};
pub use data::{DataService, MAX_DOCUMENT_SIZE};
pub use engine::{Engine, Session};
pub use error::{EngineError, EngineResult};
pub use file::{
    DiskService, FileDiskService, FileError, FileResult, MemoryDiskService, NO_PAGE, PAGE_SIZE,
    PageId,
};
pub use index::{IndexCursor, IndexEntry, IndexKey, IndexQuery, IndexService};
pub use logger::{LogLevel, Logger};
pub use page::{CollectionPage, DocumentRef, HeaderPage, PageType};
pub use pager::Pager;
pub use transaction::{TransactionService, TransactionState};
