//! JSON dictionary files as an [`EntrySource`].
//!
//! Each collection is read from `<dir>/<collection>.json`, an object mapping
//! term to definition. Object order is kept, and becomes record order.
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};

use termbook_core::traits::EntrySource;
use termbook_core::{Error, Result};

use crate::registry::CollectionRegistry;

pub struct JsonDirSource {
    dir: PathBuf,
}

impl JsonDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}.json"))
    }

    /// `.json` files in the source directory that match no registered collection.
    pub fn unregistered_files(&self, registry: &CollectionRegistry) -> Vec<PathBuf> {
        let mut stray = Vec::new();
        for entry in walkdir::WalkDir::new(&self.dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            if registry.resolve(stem).is_err() {
                stray.push(path.to_path_buf());
            }
        }
        stray.sort();
        stray
    }
}

#[async_trait]
impl EntrySource for JsonDirSource {
    async fn fetch_entries(&self, collection: &str) -> Result<Vec<(String, String)>> {
        let path = self.path_for(collection);
        let raw = tokio::fs::read_to_string(&path).await.map_err(|e| Error::Population {
            collection: collection.to_string(),
            reason: format!("{} unreachable: {e}", path.display()),
        })?;
        parse_entries(collection, &raw)
    }
}

/// Parse a `{ "term": "definition", ... }` document.
pub fn parse_entries(collection: &str, raw: &str) -> Result<Vec<(String, String)>> {
    let malformed = |reason: String| Error::Population { collection: collection.to_string(), reason };
    let value: Value = serde_json::from_str(raw).map_err(|e| malformed(format!("malformed JSON: {e}")))?;
    let Value::Object(map) = value else {
        return Err(malformed("expected an object of term -> definition".into()));
    };
    map.into_iter()
        .map(|(term, definition)| match definition {
            Value::String(definition) => Ok((term, definition)),
            other => Err(malformed(format!("definition of '{term}' is not a string: {other}"))),
        })
        .collect()
}
