use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use termbook_core::traits::GenerationStorage;
use termbook_core::types::{CacheState, GenerationTag, StoredResource};
use termbook_core::{Error, Result};

type Generation = HashMap<String, Arc<StoredResource>>;

/// Volatile storage; a `put` swaps the whole `Arc` so readers never see a
/// half-written entry.
#[derive(Default)]
pub struct MemoryStorage {
    generations: RwLock<HashMap<GenerationTag, Generation>>,
    state: RwLock<Option<CacheState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GenerationStorage for MemoryStorage {
    async fn list_generations(&self) -> Result<Vec<GenerationTag>> {
        let mut tags: Vec<GenerationTag> = self.generations.read().await.keys().cloned().collect();
        tags.sort();
        Ok(tags)
    }

    async fn create(&self, tag: &GenerationTag) -> Result<()> {
        self.generations.write().await.entry(tag.clone()).or_default();
        Ok(())
    }

    async fn put(&self, tag: &GenerationTag, resource: StoredResource) -> Result<()> {
        let mut generations = self.generations.write().await;
        let generation = generations
            .get_mut(tag)
            .ok_or_else(|| Error::NotFound(format!("generation '{tag}'")))?;
        generation.insert(resource.url.clone(), Arc::new(resource));
        Ok(())
    }

    async fn get(&self, tag: &GenerationTag, url: &str) -> Result<Option<StoredResource>> {
        let generations = self.generations.read().await;
        Ok(generations.get(tag).and_then(|g| g.get(url)).map(|r| StoredResource::clone(r)))
    }

    async fn urls(&self, tag: &GenerationTag) -> Result<Vec<String>> {
        let generations = self.generations.read().await;
        let mut urls: Vec<String> = generations.get(tag).map(|g| g.keys().cloned().collect()).unwrap_or_default();
        urls.sort();
        Ok(urls)
    }

    async fn delete_generation(&self, tag: &GenerationTag) -> Result<()> {
        self.generations.write().await.remove(tag);
        Ok(())
    }

    async fn load_state(&self) -> Result<Option<CacheState>> {
        Ok(self.state.read().await.clone())
    }

    async fn save_state(&self, state: &CacheState) -> Result<()> {
        *self.state.write().await = Some(state.clone());
        Ok(())
    }
}
