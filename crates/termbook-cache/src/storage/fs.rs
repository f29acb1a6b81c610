use async_trait::async_trait;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use termbook_core::traits::GenerationStorage;
use termbook_core::types::{CacheState, GenerationTag, StoredResource};
use termbook_core::{Error, Result};

const RESOURCE_EXT: &str = "res";
const STATE_FILE: &str = "state.json";

/// One directory per generation under `root`, one file per resource.
///
/// A resource file is a 4-byte big-endian header length, the JSON header
/// (url, status, headers, stored_at_ms) and then the raw body. Files are
/// written to a temp file in the same directory and renamed into place, so a
/// reader sees either the old or the new resource.
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_for(&self, tag: &GenerationTag) -> Result<PathBuf> {
        let name = tag.as_str();
        let safe = !name.is_empty()
            && !name.starts_with('.')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !safe {
            return Err(Error::InvalidConfig(format!("generation tag '{name}' is not a valid directory name")));
        }
        Ok(self.root.join(name))
    }

    fn resource_path(dir: &Path, url: &str) -> PathBuf {
        dir.join(format!("{}.{RESOURCE_EXT}", blake3::hash(url.as_bytes()).to_hex()))
    }
}

fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(dir).map_err(Error::storage)?;
    tmp.write_all(bytes).map_err(Error::storage)?;
    tmp.as_file().sync_all().map_err(Error::storage)?;
    tmp.persist(target).map_err(Error::storage)?;
    Ok(())
}

pub(crate) fn encode(resource: &StoredResource) -> Result<Vec<u8>> {
    let header = serde_json::to_vec(resource).map_err(Error::storage)?;
    let len = u32::try_from(header.len()).map_err(|_| Error::Storage("resource header too large".into()))?;
    let mut out = Vec::with_capacity(4 + header.len() + resource.body.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&header);
    out.extend_from_slice(&resource.body);
    Ok(out)
}

pub(crate) fn decode(bytes: &[u8]) -> Result<StoredResource> {
    if bytes.len() < 4 {
        return Err(Error::Storage("resource file truncated".into()));
    }
    let mut len = [0u8; 4];
    len.copy_from_slice(&bytes[..4]);
    let end = 4 + u32::from_be_bytes(len) as usize;
    let header = bytes.get(4..end).ok_or_else(|| Error::Storage("resource header truncated".into()))?;
    let mut resource: StoredResource = serde_json::from_slice(header).map_err(Error::storage)?;
    resource.body = bytes[end..].to_vec();
    Ok(resource)
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::storage(e)),
    }
}

#[async_trait]
impl GenerationStorage for FsStorage {
    async fn list_generations(&self) -> Result<Vec<GenerationTag>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::storage(e)),
        };
        let mut tags = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(Error::storage)? {
            if !entry.file_type().await.map_err(Error::storage)?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    tags.push(GenerationTag::new(name));
                }
            }
        }
        tags.sort();
        Ok(tags)
    }

    async fn create(&self, tag: &GenerationTag) -> Result<()> {
        let dir = self.dir_for(tag)?;
        tokio::fs::create_dir_all(&dir).await.map_err(Error::storage)?;
        debug!(tag = %tag, dir = %dir.display(), "generation created");
        Ok(())
    }

    async fn put(&self, tag: &GenerationTag, resource: StoredResource) -> Result<()> {
        let dir = self.dir_for(tag)?;
        let target = Self::resource_path(&dir, &resource.url);
        let bytes = encode(&resource)?;
        let tag = tag.clone();
        tokio::task::spawn_blocking(move || {
            if !dir.is_dir() {
                return Err(Error::NotFound(format!("generation '{tag}'")));
            }
            write_atomic(&dir, &target, &bytes)
        })
        .await
        .map_err(Error::storage)?
    }

    async fn get(&self, tag: &GenerationTag, url: &str) -> Result<Option<StoredResource>> {
        let path = Self::resource_path(&self.dir_for(tag)?, url);
        match read_optional(&path).await? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn urls(&self, tag: &GenerationTag) -> Result<Vec<String>> {
        let dir = self.dir_for(tag)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::storage(e)),
        };
        let mut urls = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(Error::storage)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RESOURCE_EXT) {
                continue;
            }
            let Some(bytes) = read_optional(&path).await? else { continue };
            match decode(&bytes) {
                Ok(resource) => urls.push(resource.url),
                // Reported as missing by `verify`.
                Err(e) => warn!(tag = %tag, path = %path.display(), error = %e, "unreadable resource skipped"),
            }
        }
        urls.sort();
        Ok(urls)
    }

    async fn delete_generation(&self, tag: &GenerationTag) -> Result<()> {
        let dir = self.dir_for(tag)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(tag = %tag, "generation deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage(e)),
        }
    }

    async fn load_state(&self) -> Result<Option<CacheState>> {
        match read_optional(&self.root.join(STATE_FILE)).await? {
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(Error::storage),
            None => Ok(None),
        }
    }

    async fn save_state(&self, state: &CacheState) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(state).map_err(Error::storage)?;
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&root).map_err(Error::storage)?;
            write_atomic(&root, &root.join(STATE_FILE), &bytes)
        })
        .await
        .map_err(Error::storage)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use termbook_core::types::Headers;

    fn resource(url: &str, body: &[u8]) -> StoredResource {
        let mut headers = Headers::new();
        headers.insert("content-type".into(), "text/css".into());
        StoredResource { url: url.into(), status: 200, headers, body: body.to_vec(), stored_at_ms: 1_700_000_000_000 }
    }

    #[test]
    fn file_layout_is_length_prefixed_header_then_body() {
        let bytes = encode(&resource("./css/styles.css", b"body{}")).unwrap();
        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let header: serde_json::Value = serde_json::from_slice(&bytes[4..4 + len]).unwrap();
        assert_eq!(header["url"], "./css/styles.css");
        assert!(header.get("body").is_none());
        assert_eq!(&bytes[4 + len..], b"body{}");
        assert_eq!(decode(&bytes).unwrap(), resource("./css/styles.css", b"body{}"));
        assert!(decode(&bytes[..2]).is_err());
    }

    #[test]
    fn tags_that_escape_the_root_are_rejected() {
        let storage = FsStorage::new("/tmp/termbook");
        assert!(storage.dir_for(&GenerationTag::new("../etc")).is_err());
        assert!(storage.dir_for(&GenerationTag::new("a/b")).is_err());
        assert!(storage.dir_for(&GenerationTag::new("terminology-dictionary-v3")).is_ok());
    }
}
