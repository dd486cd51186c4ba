//! Disk-backed cache storage with an in-memory front
//!
//! - L1: entries read or written in this process, bounded by a byte budget
//!   with least-recently-used eviction
//! - L2: one file per entry, surviving restarts
//!
//! Layout: `{base}/{generation}/{xx}/{yy}/{hash:016x}.entry`, where `hash` is
//! the xxh3 of the request key. Each file holds a CRC32 of the payload
//! followed by the bincode encoding of the key and response. Files that fail
//! the checksum or do not decode are removed and reported as misses.

use super::CacheStorage;
use crate::error::{EngineError, Result};
use crate::models::{CachedResponse, RequestKey};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const ENTRY_EXTENSION: &str = "entry";
const CHECKSUM_LEN: usize = 4;

/// L1 budget used by [`DiskStorage::new`]
pub const DEFAULT_L1_MAX_SIZE_BYTES: usize = 64 * 1024 * 1024;

#[derive(Serialize, Deserialize)]
struct DiskEntry {
    key: RequestKey,
    response: CachedResponse,
}

/// Disk storage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskStorageStats {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
    pub disk_writes: u64,
    pub corrupt_entries: u64,
    pub l1_evictions: u64,
    pub l1_entries: u64,
    pub l1_size_bytes: u64,
}

struct L1Entry {
    response: CachedResponse,
    size: usize,
    last_accessed: u64,
}

/// In-memory front keyed by generation, then request key
struct L1Front {
    generations: HashMap<String, HashMap<RequestKey, L1Entry>>,
    current_size: usize,
    max_size: usize,
    clock: u64,
}

impl L1Front {
    fn new(max_size: usize) -> Self {
        L1Front {
            generations: HashMap::new(),
            current_size: 0,
            max_size,
            clock: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn len(&self) -> usize {
        self.generations.values().map(HashMap::len).sum()
    }

    fn get(&mut self, generation: &str, key: &RequestKey) -> Option<CachedResponse> {
        let now = self.tick();
        let entry = self.generations.get_mut(generation)?.get_mut(key)?;
        entry.last_accessed = now;
        Some(entry.response.clone())
    }

    /// Store an entry, evicting least recently used entries to make room
    ///
    /// Returns the number of evicted entries. Entries larger than the whole
    /// budget stay on disk only.
    fn store(&mut self, generation: &str, key: &RequestKey, response: CachedResponse) -> usize {
        let size = entry_size(&response);
        self.remove(generation, key);

        if size > self.max_size {
            debug!("Entry too large for L1 ({} bytes): {}", size, key);
            return 0;
        }

        let mut evicted = 0;
        while self.current_size + size > self.max_size {
            let lru = self
                .generations
                .iter()
                .flat_map(|(name, entries)| {
                    entries
                        .iter()
                        .map(move |(k, entry)| (name, k, entry.last_accessed))
                })
                .min_by_key(|(_, _, last_accessed)| *last_accessed)
                .map(|(name, k, _)| (name.clone(), k.clone()));

            match lru {
                Some((lru_generation, lru_key)) => {
                    self.remove(&lru_generation, &lru_key);
                    evicted += 1;
                    debug!("Evicted LRU entry from L1: {} in {}", lru_key, lru_generation);
                }
                None => break,
            }
        }

        let last_accessed = self.tick();
        self.generations
            .entry(generation.to_string())
            .or_default()
            .insert(
                key.clone(),
                L1Entry {
                    response,
                    size,
                    last_accessed,
                },
            );
        self.current_size += size;
        evicted
    }

    fn remove(&mut self, generation: &str, key: &RequestKey) {
        if let Some(entries) = self.generations.get_mut(generation) {
            if let Some(old) = entries.remove(key) {
                self.current_size = self.current_size.saturating_sub(old.size);
            }
            if entries.is_empty() {
                self.generations.remove(generation);
            }
        }
    }

    fn remove_generation(&mut self, generation: &str) -> bool {
        match self.generations.remove(generation) {
            Some(entries) => {
                let freed: usize = entries.values().map(|entry| entry.size).sum();
                self.current_size = self.current_size.saturating_sub(freed);
                true
            }
            None => false,
        }
    }
}

/// Bytes an entry accounts for in L1
fn entry_size(response: &CachedResponse) -> usize {
    let headers: usize = response
        .headers
        .iter()
        .map(|(name, value)| name.len() + value.len())
        .sum();
    response.body.len() + headers
}

/// Generations persisted under a base directory
pub struct DiskStorage {
    base_path: PathBuf,
    l1: Mutex<L1Front>,
    tmp_counter: AtomicU64,
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
    disk_writes: AtomicU64,
    corrupt_entries: AtomicU64,
    l1_evictions: AtomicU64,
    l1_entries: AtomicU64,
    l1_size_bytes: AtomicU64,
}

impl DiskStorage {
    /// Create storage rooted at `base_path` with the default L1 budget
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_l1_limit(base_path, DEFAULT_L1_MAX_SIZE_BYTES).await
    }

    /// Create storage rooted at `base_path`, creating the directory if needed
    ///
    /// At most `l1_max_size_bytes` of entries are kept in memory.
    pub async fn with_l1_limit(
        base_path: impl AsRef<Path>,
        l1_max_size_bytes: usize,
    ) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            EngineError::Cache(format!(
                "Failed to create cache directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        info!(
            "Initializing disk cache storage at {:?} (L1 budget {} bytes)",
            base_path, l1_max_size_bytes
        );

        Ok(DiskStorage {
            base_path,
            l1: Mutex::new(L1Front::new(l1_max_size_bytes)),
            tmp_counter: AtomicU64::new(0),
            l1_hits: AtomicU64::new(0),
            l2_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            disk_writes: AtomicU64::new(0),
            corrupt_entries: AtomicU64::new(0),
            l1_evictions: AtomicU64::new(0),
            l1_entries: AtomicU64::new(0),
            l1_size_bytes: AtomicU64::new(0),
        })
    }

    pub fn get_stats(&self) -> DiskStorageStats {
        DiskStorageStats {
            l1_hits: self.l1_hits.load(Ordering::Relaxed),
            l2_hits: self.l2_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            disk_writes: self.disk_writes.load(Ordering::Relaxed),
            corrupt_entries: self.corrupt_entries.load(Ordering::Relaxed),
            l1_evictions: self.l1_evictions.load(Ordering::Relaxed),
            l1_entries: self.l1_entries.load(Ordering::Relaxed),
            l1_size_bytes: self.l1_size_bytes.load(Ordering::Relaxed),
        }
    }

    async fn store_l1(&self, generation: &str, key: &RequestKey, response: CachedResponse) {
        let mut l1 = self.l1.lock().await;
        let evicted = l1.store(generation, key, response);
        self.l1_evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        self.record_l1_usage(&l1);
    }

    fn record_l1_usage(&self, l1: &L1Front) {
        self.l1_entries.store(l1.len() as u64, Ordering::Relaxed);
        self.l1_size_bytes
            .store(l1.current_size as u64, Ordering::Relaxed);
    }

    fn generation_path(&self, generation: &str) -> Result<PathBuf> {
        let valid = !generation.is_empty()
            && generation
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && generation != "."
            && generation != "..";
        if !valid {
            return Err(EngineError::Cache(format!(
                "generation name '{}' cannot be used as a directory",
                generation
            )));
        }
        Ok(self.base_path.join(generation))
    }

    /// Entry path: two levels of hash-derived directories keep fan-out low
    fn entry_path(generation_path: &Path, key: &RequestKey) -> PathBuf {
        let hash = xxhash_rust::xxh3::xxh3_64(key.as_str().as_bytes());
        let dir1 = format!("{:02x}", (hash >> 8) & 0xFF);
        let dir2 = format!("{:02x}", hash & 0xFF);

        generation_path
            .join(dir1)
            .join(dir2)
            .join(format!("{:016x}.{}", hash, ENTRY_EXTENSION))
    }

    fn encode(key: &RequestKey, response: &CachedResponse) -> Result<Vec<u8>> {
        let payload = bincode::serialize(&DiskEntry {
            key: key.clone(),
            response: response.clone(),
        })?;

        let checksum = crc32fast::hash(&payload);
        let mut data = Vec::with_capacity(CHECKSUM_LEN + payload.len());
        data.extend_from_slice(&checksum.to_le_bytes());
        data.extend_from_slice(&payload);
        Ok(data)
    }

    fn decode(data: &[u8]) -> Result<DiskEntry> {
        if data.len() < CHECKSUM_LEN {
            return Err(EngineError::Serialization("entry file truncated".to_string()));
        }

        let (header, payload) = data.split_at(CHECKSUM_LEN);
        let mut checksum_bytes = [0u8; CHECKSUM_LEN];
        checksum_bytes.copy_from_slice(header);
        let expected = u32::from_le_bytes(checksum_bytes);

        if crc32fast::hash(payload) != expected {
            return Err(EngineError::Serialization("entry checksum mismatch".to_string()));
        }

        Ok(bincode::deserialize(payload)?)
    }

    async fn read_entry(&self, path: &Path, key: &RequestKey) -> Result<Option<CachedResponse>> {
        let data = match fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(EngineError::Cache(format!(
                    "Failed to read cache file {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        match Self::decode(&data) {
            Ok(entry) if &entry.key == key => Ok(Some(entry.response)),
            Ok(entry) => {
                debug!("Hash collision on disk: wanted {}, found {}", key, entry.key);
                Ok(None)
            }
            Err(e) => {
                warn!("Discarding unreadable cache file {}: {}", path.display(), e);
                self.corrupt_entries.fetch_add(1, Ordering::Relaxed);
                let _ = fs::remove_file(path).await;
                Ok(None)
            }
        }
    }

    /// Write through a temporary file and rename, so readers never observe
    /// a partially written entry
    async fn write_entry(&self, path: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                EngineError::Cache(format!("Failed to create cache directory: {}", e))
            })?;
        }

        let seq = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp_path = path.with_extension(format!("{}.tmp{}", ENTRY_EXTENSION, seq));

        let mut file = fs::File::create(&tmp_path).await.map_err(|e| {
            EngineError::Cache(format!("Failed to create cache file: {}", e))
        })?;

        file.write_all(data)
            .await
            .map_err(|e| EngineError::Cache(format!("Failed to write cache file: {}", e)))?;

        file.sync_all()
            .await
            .map_err(|e| EngineError::Cache(format!("Failed to sync cache file: {}", e)))?;

        fs::rename(&tmp_path, path).await.map_err(|e| {
            EngineError::Cache(format!("Failed to commit cache file: {}", e))
        })?;

        Ok(())
    }

    async fn count_entries(path: &Path) -> Result<usize> {
        let mut count = 0;
        let mut stack = vec![path.to_path_buf()];

        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(entry.path());
                } else if entry.path().extension().and_then(|e| e.to_str()) == Some(ENTRY_EXTENSION) {
                    count += 1;
                }
            }
        }

        Ok(count)
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, generation: &str) -> Result<()> {
        let path = self.generation_path(generation)?;
        fs::create_dir_all(&path).await.map_err(|e| {
            EngineError::Cache(format!("Failed to open generation {}: {}", generation, e))
        })?;
        Ok(())
    }

    async fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
        let cached = self.l1.lock().await.get(generation, key);
        if let Some(response) = cached {
            self.l1_hits.fetch_add(1, Ordering::Relaxed);
            debug!("L1 cache hit: {} in {}", key, generation);
            return Ok(Some(response));
        }

        let path = Self::entry_path(&self.generation_path(generation)?, key);
        match self.read_entry(&path, key).await? {
            Some(response) => {
                self.store_l1(generation, key, response.clone()).await;
                self.l2_hits.fetch_add(1, Ordering::Relaxed);
                debug!("L2 cache hit (promoted to L1): {} in {}", key, generation);
                Ok(Some(response))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn put(&self, generation: &str, key: &RequestKey, response: CachedResponse) -> Result<()> {
        let path = Self::entry_path(&self.generation_path(generation)?, key);
        let data = Self::encode(key, &response)?;

        self.write_entry(&path, &data).await?;
        self.disk_writes.fetch_add(1, Ordering::Relaxed);
        debug!("Wrote to L2: {} in {} ({} bytes)", key, generation, data.len());

        self.store_l1(generation, key, response).await;
        Ok(())
    }

    async fn delete(&self, generation: &str) -> Result<bool> {
        let path = self.generation_path(generation)?;
        let in_memory = {
            let mut l1 = self.l1.lock().await;
            let removed = l1.remove_generation(generation);
            self.record_l1_usage(&l1);
            removed
        };

        let on_disk = match fs::remove_dir_all(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                return Err(EngineError::Cache(format!(
                    "Failed to delete generation {}: {}",
                    generation, e
                )))
            }
        };

        if on_disk {
            info!("Deleted generation from disk: {}", generation);
        }
        Ok(in_memory || on_disk)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.base_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }

        // Directory order is unspecified
        names.sort();
        Ok(names)
    }

    async fn entry_count(&self, generation: &str) -> Result<usize> {
        let path = self.generation_path(generation)?;
        Self::count_entries(&path).await
    }
}
