use crate::definition::StorageMode;
use std::path::PathBuf;

pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 1000;
pub const DEFAULT_STORAGE_MODE: StorageMode = StorageMode::Table;

/// Name of the shared physical table used by document-mode collections.
pub const SHARED_TABLE_NAME: &str = "_records";
/// Name of the append-only migration log table.
pub const MIGRATION_LOG_TABLE: &str = "_migrations";

/// Runtime configuration for a dyndb instance.
#[derive(Debug, Clone)]
pub struct DyndbConfig {
    /// Path of the backing database file. `None` keeps everything in memory.
    pub db_path: Option<PathBuf>,
    pub default_page_size: u64,
    pub max_page_size: u64,
    pub default_storage_mode: StorageMode,
    pub busy_timeout_ms: u64,
}

impl Default for DyndbConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            default_storage_mode: DEFAULT_STORAGE_MODE,
            busy_timeout_ms: 5_000,
        }
    }
}

impl DyndbConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn with_default_storage_mode(mut self, mode: StorageMode) -> Self {
        self.default_storage_mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{DyndbConfig, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
    use crate::definition::StorageMode;

    #[test]
    fn defaults_match_documented_constants() {
        let config = DyndbConfig::default();
        assert_eq!(config.default_page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.max_page_size, MAX_PAGE_SIZE);
        assert_eq!(config.default_storage_mode, StorageMode::Table);
        assert!(config.db_path.is_none());
    }
}
