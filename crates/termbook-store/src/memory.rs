use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use termbook_core::traits::RecordBackend;
use termbook_core::types::Record;
use termbook_core::{Error, Result};

type Table = Arc<RwLock<Vec<Record>>>;

/// Process-local backend. Each append takes the table's write lock once, so
/// readers see all of a batch or none of it.
#[derive(Default)]
pub struct MemoryBackend {
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    async fn table(&self, collection: &str) -> Result<Table> {
        self.tables
            .read()
            .await
            .get(collection)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("collection '{collection}'")))
    }
}

#[async_trait]
impl RecordBackend for MemoryBackend {
    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        self.tables.write().await.entry(collection.to_string()).or_default();
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        Ok(self.table(collection).await?.read().await.len())
    }

    async fn append(&self, collection: &str, records: &[Record]) -> Result<()> {
        let table = self.table(collection).await?;
        table.write().await.extend_from_slice(records);
        Ok(())
    }

    async fn read_range(&self, collection: &str, offset: usize, limit: usize) -> Result<Vec<Record>> {
        let table = self.table(collection).await?;
        let rows = table.read().await;
        if offset >= rows.len() {
            return Ok(Vec::new());
        }
        let end = offset.saturating_add(limit).min(rows.len());
        Ok(rows[offset..end].to_vec())
    }

    async fn prefix_scan(&self, collection: &str, prefix_lower: &str, limit: usize) -> Result<Vec<Record>> {
        let table = self.table(collection).await?;
        let rows = table.read().await;
        Ok(rows
            .iter()
            .filter(|r| r.term.to_lowercase().starts_with(prefix_lower))
            .take(limit)
            .cloned()
            .collect())
    }
}
