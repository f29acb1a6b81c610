//! termbook-client
//!
//! Wires the record store, window manager and asset cache into one offline
//! client, the way an application shell starts up.
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use termbook_cache::{AssetCacheManager, CacheClient, DirOrigin, FsStorage, UpdateDirective};
use termbook_core::config::Settings;
use termbook_core::traits::{EntrySource, GenerationStorage, RecordBackend, RenderSink, ResourceFetcher};
use termbook_core::types::{ResourceRequest, ResourceResponse, SearchHit};
use termbook_core::{Error, Result};
use termbook_store::{CollectionRegistry, JsonDirSource, LanceBackend, PopulationReport, RecordStore};
use termbook_update::{ReleaseSource, Reloader, UpdateNotifier, UpdatePrompt};
use termbook_window::{WindowGeometry, WindowManager};

const DIRECTIVE_CAPACITY: usize = 8;

/// Backends behind one client. `OfflineClient::start` builds the on-disk set
/// from settings; tests pass in-memory ones.
pub struct ClientBackends {
    pub records: Arc<dyn RecordBackend>,
    pub entries: Arc<dyn EntrySource>,
    pub generations: Arc<dyn GenerationStorage>,
    pub origin: Arc<dyn ResourceFetcher>,
}

pub struct OfflineClient {
    settings: Settings,
    store: Arc<RecordStore>,
    windows: Arc<WindowManager>,
    cache: AssetCacheManager,
    cache_client: CacheClient,
    directives: mpsc::Sender<UpdateDirective>,
    listener: JoinHandle<()>,
    population: PopulationReport,
}

impl OfflineClient {
    /// LanceDB records under `store.db_dir`, dictionaries from
    /// `store.source_dir`, generations under `cache.root_dir` and
    /// `cache.release_dir` standing in for the origin.
    pub async fn start(settings: Settings, sink: Arc<dyn RenderSink>, viewport_px: f64) -> Result<Self> {
        let db_dir = settings.db_dir();
        std::fs::create_dir_all(&db_dir).map_err(Error::storage)?;
        let records = LanceBackend::open(&db_dir.to_string_lossy()).await?;
        let entries = JsonDirSource::new(settings.source_dir());
        let backends = ClientBackends {
            records: Arc::new(records),
            entries: Arc::new(entries),
            generations: Arc::new(FsStorage::new(settings.cache_root())),
            origin: Arc::new(DirOrigin::new(settings.release_dir())),
        };
        Self::assemble(settings, backends, sink, viewport_px).await
    }

    /// Open the store, populate every collection (idempotent, failures are
    /// reported not fatal), build the window manager and connect to the cache.
    pub async fn assemble(
        settings: Settings,
        backends: ClientBackends,
        sink: Arc<dyn RenderSink>,
        viewport_px: f64,
    ) -> Result<Self> {
        settings.validate()?;
        let registry = CollectionRegistry::from_settings(&settings.store)?;
        let store = Arc::new(RecordStore::open(backends.records, registry).await?);

        let population = store.populate(backends.entries.as_ref()).await;
        if population.is_clean() {
            info!(loaded = population.loaded_records(), "record store ready");
        } else {
            warn!(
                failed = population.failed().count(),
                loaded = population.loaded_records(),
                "record store partially populated"
            );
        }

        let geometry = WindowGeometry::from_settings(&settings.window)?;
        let windows = Arc::new(WindowManager::new(store.clone(), geometry, viewport_px, sink));

        let cache = AssetCacheManager::open(backends.generations, backends.origin).await?;
        let (directives, rx) = mpsc::channel(DIRECTIVE_CAPACITY);
        let listener = cache.spawn_directive_listener(rx);
        let cache_client = cache.connect().await;

        Ok(Self { settings, store, windows, cache, cache_client, directives, listener, population })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn windows(&self) -> &Arc<WindowManager> {
        &self.windows
    }

    pub fn cache(&self) -> &AssetCacheManager {
        &self.cache
    }

    pub fn cache_client(&self) -> &CacheClient {
        &self.cache_client
    }

    pub fn population(&self) -> &PopulationReport {
        &self.population
    }

    /// Prefix search across all collections, capped per collection by
    /// `store.search_limit`.
    pub async fn search(&self, term: &str) -> Result<Vec<SearchHit>> {
        self.store.prefix_search(term, self.settings.store.search_limit).await
    }

    pub async fn fetch(&self, request: &ResourceRequest) -> Result<ResourceResponse> {
        self.cache.fetch(request).await
    }

    /// Update notifier sharing this client's directive channel, polling on
    /// `update.poll_interval_secs`.
    pub async fn update_notifier(
        &self,
        releases: Arc<dyn ReleaseSource>,
        prompt: Arc<dyn UpdatePrompt>,
        reloader: Arc<dyn Reloader>,
    ) -> UpdateNotifier {
        UpdateNotifier::connect(
            self.cache.clone(),
            self.directives.clone(),
            releases,
            prompt,
            reloader,
            Duration::from_secs(self.settings.update.poll_interval_secs),
        )
        .await
    }

    /// Stop the frame loop and the directive listener.
    pub async fn shutdown(self) {
        self.windows.close();
        let Self { directives, listener, .. } = self;
        drop(directives);
        // Notifiers may still hold directive senders.
        listener.abort();
        match listener.await {
            Err(e) if !e.is_cancelled() => warn!(error = %e, "directive listener ended abnormally"),
            _ => {}
        }
    }
}
