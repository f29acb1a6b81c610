use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    CacheState, GenerationTag, Record, RenderFrame, ResourceRequest, ResourceResponse, StoredResource,
};

/// Persistent ordered key-value collection backing the record store.
///
/// Backends must make `append` visible atomically: a concurrent `count` or
/// `read_range` sees either none or all of the appended rows.
#[async_trait]
pub trait RecordBackend: Send + Sync {
    async fn ensure_collection(&self, collection: &str) -> Result<()>;
    async fn count(&self, collection: &str) -> Result<usize>;
    async fn append(&self, collection: &str, records: &[Record]) -> Result<()>;
    /// Rows `[offset, offset + limit)` in insertion order.
    async fn read_range(&self, collection: &str, offset: usize, limit: usize) -> Result<Vec<Record>>;
    /// First `limit` rows whose lowercased term starts with `prefix_lower`, in insertion order.
    async fn prefix_scan(&self, collection: &str, prefix_lower: &str, limit: usize) -> Result<Vec<Record>>;
}

/// Where a collection's `(term, definition)` pairs come from on first population.
#[async_trait]
pub trait EntrySource: Send + Sync {
    async fn fetch_entries(&self, collection: &str) -> Result<Vec<(String, String)>>;
}

/// Byte-resource fetcher standing in for the network.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, request: &ResourceRequest) -> Result<ResourceResponse>;
}

/// One opaque blob per `(generation tag, url)`.
///
/// `put` must replace an existing key atomically.
#[async_trait]
pub trait GenerationStorage: Send + Sync {
    async fn list_generations(&self) -> Result<Vec<GenerationTag>>;
    async fn create(&self, tag: &GenerationTag) -> Result<()>;
    async fn put(&self, tag: &GenerationTag, resource: StoredResource) -> Result<()>;
    async fn get(&self, tag: &GenerationTag, url: &str) -> Result<Option<StoredResource>>;
    async fn urls(&self, tag: &GenerationTag) -> Result<Vec<String>>;
    async fn delete_generation(&self, tag: &GenerationTag) -> Result<()>;
    /// Active/staged pointers from the last run, if any were saved.
    async fn load_state(&self) -> Result<Option<CacheState>>;
    async fn save_state(&self, state: &CacheState) -> Result<()>;
}

pub trait RenderSink: Send + Sync {
    fn render(&self, frame: RenderFrame);
}
