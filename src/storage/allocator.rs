use chrono::{DateTime, Local};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::session::events::{EventSink, EventTag, LifecycleEvent};

/// Recording filename prefix
pub const FILE_PREFIX: &str = "REC_";

/// Timestamp pattern embedded in recording filenames (second granularity)
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Error)]
pub enum StorageError {
    /// No storage directory could be resolved at all
    #[error("application storage directory is not available")]
    Unresolved,

    #[error("failed to create storage directory {path}: {source}")]
    CreateFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("storage path {0} exists but is not a directory")]
    NotADirectory(PathBuf),
}

/// Hands out one output path per session inside the application storage directory
#[derive(Debug, Clone)]
pub struct OutputPathAllocator {
    storage_dir: Option<PathBuf>,
    extension: String,
}

impl OutputPathAllocator {
    pub fn new(storage_dir: Option<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            storage_dir,
            extension: extension.into(),
        }
    }

    pub fn storage_dir(&self) -> Option<&Path> {
        self.storage_dir.as_deref()
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Allocate a path stamped with the current local time
    pub fn allocate(&self, sink: &dyn EventSink) -> Result<PathBuf, StorageError> {
        self.allocate_at(Local::now(), sink)
    }

    /// Allocate a path stamped with `now`
    ///
    /// Produces `<dir>/REC_<YYYYMMDD_HHMMSS>.<ext>`. If that file already exists a
    /// numeric suffix is appended (`REC_<ts>_1.<ext>`, `_2`, ...).
    pub fn allocate_at(
        &self,
        now: DateTime<Local>,
        sink: &dyn EventSink,
    ) -> Result<PathBuf, StorageError> {
        let dir = match &self.storage_dir {
            Some(dir) => dir,
            None => {
                sink.emit(LifecycleEvent::new(
                    EventTag::Error,
                    "Application storage directory is not accessible",
                ));
                return Err(StorageError::Unresolved);
            }
        };

        self.ensure_dir(dir, sink)?;

        let stem = format!("{}{}", FILE_PREFIX, now.format(TIMESTAMP_FORMAT));
        let mut candidate = dir.join(format!("{}.{}", stem, self.extension));
        let mut suffix = 1u32;
        while candidate.exists() {
            candidate = dir.join(format!("{}_{}.{}", stem, suffix, self.extension));
            suffix += 1;
        }

        Ok(candidate)
    }

    fn ensure_dir(&self, dir: &Path, sink: &dyn EventSink) -> Result<(), StorageError> {
        if dir.is_dir() {
            return Ok(());
        }
        if dir.exists() {
            sink.emit(LifecycleEvent::new(
                EventTag::Error,
                format!("Storage path is not a directory: {}", dir.display()),
            ));
            return Err(StorageError::NotADirectory(dir.to_path_buf()));
        }

        sink.emit(LifecycleEvent::new(
            EventTag::FileIo,
            format!("Storage directory does not exist, creating {}", dir.display()),
        ));

        match fs::create_dir_all(dir) {
            Ok(()) => {
                sink.emit(LifecycleEvent::new(
                    EventTag::FileIo,
                    "Storage directory created",
                ));
                Ok(())
            }
            Err(source) => {
                sink.emit(LifecycleEvent::new(
                    EventTag::Error,
                    format!("Failed to create storage directory: {}", source),
                ));
                Err(StorageError::CreateFailed {
                    path: dir.to_path_buf(),
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::events::MemorySink;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 6, 21, h, m, s).unwrap()
    }

    #[test]
    fn test_filename_embeds_timestamp() {
        let temp = TempDir::new().unwrap();
        let allocator = OutputPathAllocator::new(Some(temp.path().to_path_buf()), "mp3");
        let sink = MemorySink::new();

        let path = allocator.allocate_at(at(18, 30, 0), &sink).unwrap();

        assert_eq!(path, temp.path().join("REC_20250621_183000.mp3"));
        assert!(sink.is_empty(), "existing directory needs no events");
    }

    #[test]
    fn test_missing_directory_is_created() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("recordings").join("nested");
        let allocator = OutputPathAllocator::new(Some(dir.clone()), "mp3");
        let sink = MemorySink::new();

        let path = allocator.allocate_at(at(9, 5, 7), &sink).unwrap();

        assert!(dir.is_dir());
        assert_eq!(path.parent(), Some(dir.as_path()));
        let lines = sink.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.starts_with("FILE_IO:")));
    }

    #[test]
    fn test_unresolved_directory_fails() {
        let allocator = OutputPathAllocator::new(None, "mp3");
        let sink = MemorySink::new();

        let err = allocator.allocate_at(at(0, 0, 0), &sink).unwrap_err();

        assert!(matches!(err, StorageError::Unresolved));
        assert!(sink.lines()[0].starts_with("ERROR:"));
    }

    #[test]
    fn test_file_in_place_of_directory_fails() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("not-a-dir");
        fs::write(&blocker, b"x").unwrap();
        let allocator = OutputPathAllocator::new(Some(blocker), "mp3");

        let err = allocator.allocate_at(at(0, 0, 0), &MemorySink::new()).unwrap_err();
        assert!(matches!(err, StorageError::NotADirectory(_)));
    }

    #[test]
    fn test_same_second_collision_gets_suffix() {
        let temp = TempDir::new().unwrap();
        let allocator = OutputPathAllocator::new(Some(temp.path().to_path_buf()), "mp3");
        let sink = MemorySink::new();

        let first = allocator.allocate_at(at(12, 0, 0), &sink).unwrap();
        fs::write(&first, b"taken").unwrap();
        let second = allocator.allocate_at(at(12, 0, 0), &sink).unwrap();
        fs::write(&second, b"taken").unwrap();
        let third = allocator.allocate_at(at(12, 0, 0), &sink).unwrap();

        assert_eq!(second.file_name().unwrap(), "REC_20250621_120000_1.mp3");
        assert_eq!(third.file_name().unwrap(), "REC_20250621_120000_2.mp3");
    }
}
