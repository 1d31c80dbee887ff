//! Disk gateway: page-granular access to the datafile and its journal

mod disk;
mod error;
mod file_disk;
pub mod journal;
mod memory_disk;

pub use disk::DiskService;
pub use error::{FileError, FileResult};
pub use file_disk::FileDiskService;
pub use memory_disk::MemoryDiskService;

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type
pub type PageId = u32;

/// Marker for "no page" in on-disk pointers
pub const NO_PAGE: PageId = u32::MAX;
