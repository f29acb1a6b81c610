//! termbook-cache
//!
//! Versioned generations of static assets with install/activate lifecycle
//! and stale-while-revalidate reads.
pub mod client;
pub mod events;
pub mod manager;
pub mod manifest;
pub mod origin;
pub mod storage;

pub use client::CacheClient;
pub use events::{CacheEvent, UpdateDirective};
pub use manager::{AssetCacheManager, CachePhase, InstallReport, Revalidation, RevalidationOutcome};
pub use manifest::{Manifest, Release};
pub use origin::DirOrigin;
pub use storage::{FsStorage, MemoryStorage};
