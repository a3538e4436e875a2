//! Recording storage: where session output files go

mod allocator;

pub use allocator::{OutputPathAllocator, StorageError, FILE_PREFIX, TIMESTAMP_FORMAT};
