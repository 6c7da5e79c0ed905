mod db_files;
mod file;
mod page;
mod storage_manager;

pub use db_files::DBFiles;
pub use file::{File, FileMode, MemoryFile, PosixFile};
pub use page::{Page, PageFormat, PAGE_HEADER_SIZE};
pub use storage_manager::StorageManager;
