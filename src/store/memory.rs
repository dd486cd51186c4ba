//! In-memory cache storage

use super::CacheStorage;
use crate::error::Result;
use crate::models::{CachedResponse, RequestKey};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

struct Generation {
    name: String,
    entries: HashMap<RequestKey, CachedResponse>,
}

/// Generations kept in process memory
///
/// Generations are stored in creation order so that `keys()` enumerates
/// them the way they were opened.
#[derive(Default)]
pub struct MemoryStorage {
    generations: RwLock<Vec<Generation>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, generation: &str) -> Result<()> {
        let mut generations = self.generations.write().await;
        if !generations.iter().any(|g| g.name == generation) {
            debug!("Created generation: {}", generation);
            generations.push(Generation {
                name: generation.to_string(),
                entries: HashMap::new(),
            });
        }
        Ok(())
    }

    async fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
        let generations = self.generations.read().await;
        Ok(generations
            .iter()
            .find(|g| g.name == generation)
            .and_then(|g| g.entries.get(key).cloned()))
    }

    async fn put(&self, generation: &str, key: &RequestKey, response: CachedResponse) -> Result<()> {
        let mut generations = self.generations.write().await;
        let position = match generations.iter().position(|g| g.name == generation) {
            Some(position) => position,
            None => {
                debug!("Created generation on first write: {}", generation);
                generations.push(Generation {
                    name: generation.to_string(),
                    entries: HashMap::new(),
                });
                generations.len() - 1
            }
        };

        generations[position].entries.insert(key.clone(), response);
        Ok(())
    }

    async fn delete(&self, generation: &str) -> Result<bool> {
        let mut generations = self.generations.write().await;
        let before = generations.len();
        generations.retain(|g| g.name != generation);
        Ok(generations.len() != before)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let generations = self.generations.read().await;
        Ok(generations.iter().map(|g| g.name.clone()).collect())
    }

    async fn entry_count(&self, generation: &str) -> Result<usize> {
        let generations = self.generations.read().await;
        Ok(generations
            .iter()
            .find(|g| g.name == generation)
            .map(|g| g.entries.len())
            .unwrap_or(0))
    }
}
