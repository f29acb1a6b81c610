//! Domain types shared by the record store, the window manager and the asset cache.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

pub type RecordId = u64;
pub type Headers = BTreeMap<String, String>;

/// One term/definition row of a collection.
///
/// Ids are assigned by the store as `1..=count` in insertion order, so the
/// record at window offset `i` always carries id `i + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub term: String,
    pub definition: String,
}

/// Stable, validated collection identifier.
///
/// Names double as table names in persistent backends, so only ASCII
/// alphanumerics, `_` and `-` are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CollectionName(Arc<str>);

impl CollectionName {
    pub fn new(name: impl AsRef<str>) -> Result<Self> {
        let name = name.as_ref();
        let valid = !name.is_empty()
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(Error::InvalidConfig(format!("invalid collection name '{name}'")));
        }
        Ok(Self(Arc::from(name)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl TryFrom<String> for CollectionName {
    type Error = Error;
    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<CollectionName> for String {
    fn from(value: CollectionName) -> Self {
        value.0.to_string()
    }
}

/// A prefix-search match labelled with the collection it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub collection: CollectionName,
    pub record: Record,
}

/// The contiguous slice of a collection that should be materialized.
///
/// `top_offset_px` positions the slice inside a scroll area of
/// `total_height_px`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Window {
    pub start: usize,
    pub count: usize,
    pub top_offset_px: u64,
    pub total_height_px: u64,
}

impl Window {
    pub fn end(&self) -> usize {
        self.start + self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// What a render sink receives for one committed window read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderFrame {
    pub stamp: u64,
    pub collection: Option<CollectionName>,
    pub window: Window,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    /// Only GET takes part in the stale-while-revalidate cache.
    pub fn is_cacheable(self) -> bool {
        matches!(self, Method::Get)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub method: Method,
    pub url: String,
}

impl ResourceRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self { method: Method::Get, url: url.into() }
    }

    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self { method, url: url.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl ResourceResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self { status: 200, headers: Headers::new(), body: body.into() }
    }

    pub fn with_status(status: u16) -> Self {
        Self { status, headers: Headers::new(), body: Vec::new() }
    }

    /// Partial (206), redirect and error responses are served but never stored.
    pub fn is_storable(&self) -> bool {
        self.status == 200
    }
}

/// Identifier of one cache generation, e.g. `terminology-dictionary-3f9a2c81d0b4`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationTag(String);

impl GenerationTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl GenerationTag {
    /// Tag for a manifest: `<prefix>-<first 12 hex of blake3(urls)>`.
    ///
    /// Any change to the resource list yields a new tag.
    pub fn derive<S: AsRef<str>>(prefix: &str, manifest: &[S]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for url in manifest {
            hasher.update(url.as_ref().as_bytes());
            hasher.update(&[0]);
        }
        Self::with_digest(prefix, hasher.finalize())
    }

    /// Tag over `(url, bytes)` pairs, so a content change alone also bumps it.
    pub fn from_contents<'a, I>(prefix: &str, items: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [u8])>,
    {
        let mut hasher = blake3::Hasher::new();
        for (url, bytes) in items {
            hasher.update(url.as_bytes());
            hasher.update(&[0]);
            hasher.update(&(bytes.len() as u64).to_be_bytes());
            hasher.update(bytes);
        }
        Self::with_digest(prefix, hasher.finalize())
    }

    fn with_digest(prefix: &str, digest: blake3::Hash) -> Self {
        let hex = digest.to_hex();
        Self(format!("{prefix}-{}", &hex.as_str()[..12]))
    }
}

impl fmt::Display for GenerationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

/// A response as persisted inside a generation, keyed by its URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResource {
    pub url: String,
    pub status: u16,
    pub headers: Headers,
    #[serde(skip)]
    pub body: Vec<u8>,
    pub stored_at_ms: i64,
}

impl StoredResource {
    pub fn into_response(self) -> ResourceResponse {
        ResourceResponse { status: self.status, headers: self.headers, body: self.body }
    }
}

/// A generation that finished installing but is not serving yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedGeneration {
    pub tag: GenerationTag,
    pub complete: bool,
    #[serde(default)]
    pub missing: Vec<String>,
}

/// Lifecycle pointers persisted next to the generations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheState {
    pub active: Option<GenerationTag>,
    pub staged: Option<StagedGeneration>,
}
