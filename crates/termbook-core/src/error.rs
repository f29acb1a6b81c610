use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Failed to populate '{collection}': {reason}")]
    Population { collection: String, reason: String },

    #[error("Window read on '{collection}' failed: {reason}")]
    WindowRead { collection: String, reason: String },

    #[error("Generation '{tag}' is incomplete: {} of {total} resources missing", .missing.len())]
    CacheInstall { tag: String, missing: Vec<String>, total: usize },

    #[error("Fetch of {url} failed with no cached fallback: {reason}")]
    CacheFetch { url: String, reason: String },

    #[error("Generation '{superseded}' was replaced by '{current}' before activation")]
    PromotionConflict { superseded: String, current: String },

    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Wrap any backend error (lancedb, arrow, io, serde) as a storage failure.
    pub fn storage<E: std::fmt::Display>(err: E) -> Self {
        Self::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
