use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use walkdir::WalkDir;

use termbook_core::config::CacheSettings;
use termbook_core::types::GenerationTag;
use termbook_core::{Error, Result};

/// Ordered, duplicate-free list of resource URLs making up one generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    resources: Vec<String>,
}

/// A manifest together with the tag it should be installed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub tag: GenerationTag,
    pub manifest: Manifest,
}

impl Manifest {
    pub fn new<I, S>(resources: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for url in resources {
            let url = url.into();
            if url.trim().is_empty() {
                return Err(Error::InvalidConfig("manifest contains an empty url".into()));
            }
            if seen.insert(url.clone()) {
                out.push(url);
            }
        }
        if out.is_empty() {
            return Err(Error::InvalidConfig("manifest is empty".into()));
        }
        Ok(Self { resources: out })
    }

    pub fn from_settings(settings: &CacheSettings) -> Result<Self> {
        Self::new(settings.manifest.iter().cloned())
    }

    /// Read a `{"resources": [...]}` document.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidConfig(format!("cannot read manifest {}: {e}", path.display())))?;
        let parsed: Manifest = serde_json::from_str(&raw)
            .map_err(|e| Error::InvalidConfig(format!("malformed manifest {}: {e}", path.display())))?;
        Self::new(parsed.resources)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(Error::storage)
    }

    pub fn urls(&self) -> &[String] {
        &self.resources
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Tag derived from the URL list alone.
    pub fn tag(&self, prefix: &str) -> GenerationTag {
        GenerationTag::derive(prefix, &self.resources)
    }

    /// Build a release from every file under `dir`.
    ///
    /// URLs are `./<relative path>`; an `index.html` at the top also answers
    /// `./`. The tag hashes URLs and file contents, so editing any asset
    /// produces a new generation.
    pub fn from_release_dir(dir: &Path, prefix: &str) -> Result<Release> {
        if !dir.is_dir() {
            return Err(Error::InvalidConfig(format!("release dir {} does not exist", dir.display())));
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name().into_iter() {
            let entry = entry.map_err(Error::storage)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(dir).map_err(Error::storage)?;
            let url = format!(
                "./{}",
                rel.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/")
            );
            let bytes = std::fs::read(entry.path()).map_err(Error::storage)?;
            files.push((url, bytes));
        }
        if files.is_empty() {
            return Err(Error::InvalidConfig(format!("release dir {} is empty", dir.display())));
        }

        let tag = GenerationTag::from_contents(prefix, files.iter().map(|(u, b)| (u.as_str(), b.as_slice())));
        let mut urls: Vec<String> = Vec::with_capacity(files.len() + 1);
        if files.iter().any(|(u, _)| u == "./index.html") {
            urls.push("./".to_string());
        }
        urls.extend(files.into_iter().map(|(u, _)| u));
        Ok(Release { tag, manifest: Self::new(urls)? })
    }
}
