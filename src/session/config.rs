use std::path::PathBuf;

use crate::audio::EncodingProfile;
use crate::storage::OutputPathAllocator;

/// Finished sessions kept for status and history queries
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Configuration for the recording session state machine
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Fixed encoding profile every session records with
    pub profile: EncodingProfile,

    /// Application-private directory for recordings.
    /// `None` means no storage could be resolved; every start then fails with
    /// `StorageUnavailable`.
    pub storage_dir: Option<PathBuf>,

    /// Finished sessions kept in memory; older records are dropped first
    pub history_capacity: usize,
}

impl SessionConfig {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            profile: EncodingProfile::default(),
            storage_dir: Some(storage_dir.into()),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }

    pub fn allocator(&self) -> OutputPathAllocator {
        OutputPathAllocator::new(self.storage_dir.clone(), self.profile.extension())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            profile: EncodingProfile::default(),
            storage_dir: default_storage_dir(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// `~/.loqa/recordings`, if a home directory is known
pub fn default_storage_dir() -> Option<PathBuf> {
    let expanded = shellexpand::tilde("~/.loqa/recordings");
    if expanded.starts_with('~') {
        None
    } else {
        Some(PathBuf::from(expanded.as_ref()))
    }
}
