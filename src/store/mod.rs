//! Cache store abstraction
//!
//! A key/value store of captured responses, partitioned into named
//! generations. Two backends are provided:
//! - [`MemoryStorage`]: in-process maps, nothing survives a restart
//! - [`DiskStorage`]: memory front (L1) over one file per entry (L2)
//!
//! Both follow the same contract: reading never creates a generation,
//! writing creates it lazily, and a write for an existing key replaces the
//! previous entry wholesale.

pub mod disk;
pub mod memory;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

use crate::config::StorageConfig;
use crate::error::{EngineError, Result};
use crate::models::{CachedResponse, RequestKey};
use async_trait::async_trait;
use std::sync::Arc;

/// Platform cache primitive: named partitions of request-keyed responses
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create the generation if it does not exist yet
    async fn open(&self, generation: &str) -> Result<()>;

    /// Look up an entry; a missing generation is a miss, not an error
    async fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

    /// Store an entry, creating the generation on first write
    async fn put(&self, generation: &str, key: &RequestKey, response: CachedResponse) -> Result<()>;

    /// Delete a whole generation
    ///
    /// Returns `true` if the generation existed.
    async fn delete(&self, generation: &str) -> Result<bool>;

    /// Names of every existing generation, in creation order where known
    async fn keys(&self) -> Result<Vec<String>>;

    /// Number of entries held by a generation (0 if it does not exist)
    async fn entry_count(&self, generation: &str) -> Result<usize>;
}

/// Build the storage backend selected by configuration
pub async fn open_storage(config: &StorageConfig) -> Result<Arc<dyn CacheStorage>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryStorage::new())),
        "disk" => Ok(Arc::new(
            DiskStorage::with_l1_limit(&config.cache_dir, config.l1_max_size_bytes).await?,
        )),
        other => Err(EngineError::Config(format!(
            "Invalid storage backend '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_memory_storage() {
        let storage = open_storage(&StorageConfig::default()).await.unwrap();
        assert!(storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_disk_storage() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = StorageConfig {
            backend: "disk".to_string(),
            cache_dir: temp_dir.path().to_string_lossy().to_string(),
            ..Default::default()
        };
        let storage = open_storage(&config).await.unwrap();
        storage.open("app-static-v1").await.unwrap();
        assert_eq!(storage.keys().await.unwrap(), vec!["app-static-v1".to_string()]);
    }

    #[tokio::test]
    async fn test_open_unknown_backend() {
        let config = StorageConfig {
            backend: "tape".to_string(),
            ..Default::default()
        };
        assert!(open_storage(&config).await.is_err());
    }
}
