use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use termbook_core::traits::{EntrySource, RecordBackend};
use termbook_core::types::{CollectionName, Record, RecordId, SearchHit};
use termbook_core::{Error, Result};

use crate::registry::{CollectionHandle, CollectionRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Collection was empty and received this many records.
    Loaded(usize),
    /// Collection was already populated; the source was not consulted.
    Skipped { existing: usize },
    /// The source yielded no entries; the collection stays unpopulated.
    Empty,
}

/// Per-collection result of [`RecordStore::populate`], in registration order.
#[derive(Debug)]
pub struct PopulationReport {
    pub outcomes: Vec<(CollectionName, Result<LoadOutcome>)>,
}

impl PopulationReport {
    pub fn failed(&self) -> impl Iterator<Item = (&CollectionName, &Error)> {
        self.outcomes.iter().filter_map(|(name, r)| r.as_ref().err().map(|e| (name, e)))
    }

    pub fn loaded_records(&self) -> usize {
        self.outcomes
            .iter()
            .map(|(_, r)| match r {
                Ok(LoadOutcome::Loaded(n)) => *n,
                _ => 0,
            })
            .sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failed().next().is_none()
    }
}

pub struct RecordStore {
    backend: Arc<dyn RecordBackend>,
    registry: CollectionRegistry,
    write_locks: HashMap<String, Mutex<()>>,
}

impl RecordStore {
    /// Validate the registry against the backend, creating missing collections.
    pub async fn open(backend: Arc<dyn RecordBackend>, registry: CollectionRegistry) -> Result<Self> {
        let mut write_locks = HashMap::new();
        for handle in registry.iter() {
            backend.ensure_collection(handle.name.as_str()).await?;
            write_locks.insert(handle.name.as_str().to_string(), Mutex::new(()));
        }
        debug!(collections = registry.len(), "record store opened");
        Ok(Self { backend, registry, write_locks })
    }

    pub fn registry(&self) -> &CollectionRegistry {
        &self.registry
    }

    pub fn collections(&self) -> impl Iterator<Item = &CollectionHandle> {
        self.registry.iter()
    }

    pub async fn count(&self, collection: &str) -> Result<usize> {
        let handle = self.registry.resolve(collection)?;
        self.backend.count(handle.name.as_str()).await
    }

    /// Populate `collection` from `source` unless it already holds records.
    ///
    /// The populated check is by cardinality only: a non-empty collection is
    /// never refreshed, even if the source has changed since.
    pub async fn load(&self, collection: &str, source: &dyn EntrySource) -> Result<LoadOutcome> {
        let handle = self.registry.resolve(collection)?;
        let name = handle.name.as_str();
        let _guard = self.write_lock(name)?.lock().await;

        let existing = self.backend.count(name).await?;
        if existing > 0 {
            debug!(collection = %name, existing, "already populated, skipping source");
            return Ok(LoadOutcome::Skipped { existing });
        }
        let entries = source.fetch_entries(name).await.map_err(|e| match e {
            Error::Population { .. } => e,
            other => Error::Population { collection: name.to_string(), reason: other.to_string() },
        })?;
        self.insert_locked(name, existing, entries).await
    }

    /// Insert an already-parsed sequence, in order, if the collection is empty.
    pub async fn load_entries(
        &self,
        collection: &str,
        entries: Vec<(String, String)>,
    ) -> Result<LoadOutcome> {
        let handle = self.registry.resolve(collection)?;
        let name = handle.name.as_str();
        let _guard = self.write_lock(name)?.lock().await;

        let existing = self.backend.count(name).await?;
        if existing > 0 {
            return Ok(LoadOutcome::Skipped { existing });
        }
        self.insert_locked(name, existing, entries).await
    }

    /// Load every registered collection concurrently. One collection failing
    /// never stops the others.
    pub async fn populate(&self, source: &dyn EntrySource) -> PopulationReport {
        let loads = self.registry.iter().map(|handle| async move {
            let outcome = self.load(handle.name.as_str(), source).await;
            match &outcome {
                Ok(LoadOutcome::Loaded(n)) => info!(collection = %handle.name, records = n, "collection populated"),
                Ok(_) => {}
                Err(e) => warn!(collection = %handle.name, error = %e, "population failed, collection skipped"),
            }
            (handle.name.clone(), outcome)
        });
        PopulationReport { outcomes: join_all(loads).await }
    }

    /// Records `[offset, offset + limit)` in collection order.
    pub async fn window_read(&self, collection: &str, offset: usize, limit: usize) -> Result<Vec<Record>> {
        let handle = self.registry.resolve(collection)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut records = self
            .backend
            .read_range(handle.name.as_str(), offset, limit)
            .await
            .map_err(|e| Error::WindowRead { collection: collection.to_string(), reason: e.to_string() })?;
        records.truncate(limit);
        Ok(records)
    }

    /// Case-insensitive starts-with search over every collection, at most
    /// `limit` hits each, concatenated in registration order.
    pub async fn prefix_search(&self, term: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let term = term.trim();
        if term.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let prefix = term.to_lowercase();
        let scans = self.registry.iter().map(|handle| {
            let prefix = prefix.as_str();
            async move {
                let result = self.backend.prefix_scan(handle.name.as_str(), prefix, limit).await;
                (handle, result)
            }
        });

        let mut hits = Vec::new();
        for (handle, result) in join_all(scans).await {
            match result {
                Ok(records) => hits.extend(
                    records
                        .into_iter()
                        .take(limit)
                        .map(|record| SearchHit { collection: handle.name.clone(), record }),
                ),
                Err(e) => warn!(collection = %handle.name, error = %e, "prefix scan failed, collection skipped"),
            }
        }
        Ok(hits)
    }

    async fn insert_locked(
        &self,
        name: &str,
        existing: usize,
        entries: Vec<(String, String)>,
    ) -> Result<LoadOutcome> {
        if entries.is_empty() {
            return Ok(LoadOutcome::Empty);
        }
        let first_id = existing as RecordId + 1;
        let records: Vec<Record> = entries
            .into_iter()
            .zip(first_id..)
            .map(|((term, definition), id)| Record { id, term, definition })
            .collect();
        self.backend.append(name, &records).await?;
        Ok(LoadOutcome::Loaded(records.len()))
    }

    fn write_lock(&self, name: &str) -> Result<&Mutex<()>> {
        self.write_locks
            .get(name)
            .ok_or_else(|| Error::UnknownCollection(name.to_string()))
    }
}
