use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::RwLock;

use termbook_cache::{Manifest, Release};
use termbook_core::{Error, Result};

/// Where new asset releases are discovered.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// The newest release, or `None` if nothing is published.
    async fn latest(&self) -> Result<Option<Release>>;
}

/// A release directory on disk; its tag follows the file contents.
pub struct DirReleaseSource {
    dir: PathBuf,
    prefix: String,
}

impl DirReleaseSource {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self { dir: dir.into(), prefix: prefix.into() }
    }
}

#[async_trait]
impl ReleaseSource for DirReleaseSource {
    async fn latest(&self) -> Result<Option<Release>> {
        if !self.dir.is_dir() {
            return Ok(None);
        }
        let dir = self.dir.clone();
        let prefix = self.prefix.clone();
        let release = tokio::task::spawn_blocking(move || Manifest::from_release_dir(&dir, &prefix))
            .await
            .map_err(Error::storage)??;
        Ok(Some(release))
    }
}

/// Fixed release that can be swapped at runtime.
#[derive(Default)]
pub struct StaticReleaseSource {
    release: RwLock<Option<Release>>,
}

impl StaticReleaseSource {
    pub fn new(release: Option<Release>) -> Self {
        Self { release: RwLock::new(release) }
    }

    pub async fn publish(&self, release: Release) {
        *self.release.write().await = Some(release);
    }
}

#[async_trait]
impl ReleaseSource for StaticReleaseSource {
    async fn latest(&self) -> Result<Option<Release>> {
        Ok(self.release.read().await.clone())
    }
}
