//! Generation lifecycle and stale-while-revalidate reads.
//!
//! At most one generation serves (`active`) and at most one waits
//! (`staged`). Installs are serialized; staging a new generation discards the
//! previously staged one. Activation deletes every other generation and
//! claims all open clients.
//!
//! Background revalidation writes take the lifecycle read lock and only land
//! while their generation is still active; activation holds the write lock
//! while it deletes, so a late write cannot resurrect a reclaimed generation.
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use termbook_core::traits::{GenerationStorage, ResourceFetcher};
use termbook_core::types::{
    CacheState, GenerationTag, ResourceRequest, ResourceResponse, StagedGeneration, StoredResource,
};
use termbook_core::{Error, Result};

use crate::client::CacheClient;
use crate::events::{CacheEvent, UpdateDirective};
use crate::manifest::Manifest;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachePhase {
    NoCache,
    Installing { tag: GenerationTag, active: Option<GenerationTag> },
    Installed { active: Option<GenerationTag>, staged: Option<StagedGeneration> },
    Activating { tag: GenerationTag },
}

/// Result of one `install` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub tag: GenerationTag,
    pub total: usize,
    pub stored: Vec<String>,
    /// `(url, reason)` for every resource that could not be stored.
    pub failed: Vec<(String, String)>,
    /// Previously staged generation discarded by this install.
    pub superseded: Option<GenerationTag>,
    /// Activated as part of the install (first complete install).
    pub activated: bool,
    /// The tag was already serving; nothing was fetched.
    pub already_active: bool,
}

impl InstallReport {
    fn already_active(tag: GenerationTag, total: usize) -> Self {
        Self {
            tag,
            total,
            stored: Vec::new(),
            failed: Vec::new(),
            superseded: None,
            activated: false,
            already_active: true,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn missing(&self) -> impl Iterator<Item = &str> {
        self.failed.iter().map(|(url, _)| url.as_str())
    }

    pub fn require_complete(self) -> Result<Self> {
        if self.is_complete() {
            return Ok(self);
        }
        Err(Error::CacheInstall {
            tag: self.tag.to_string(),
            missing: self.missing().map(str::to_string).collect(),
            total: self.total,
        })
    }
}

/// How the background refresh of one cached read ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevalidationOutcome {
    Refreshed,
    /// The network answered with a status that is never cached.
    NotStored { status: u16 },
    /// No active generation, or it changed while the fetch was in flight.
    Skipped,
    Failed(String),
}

type NetworkTask = JoinHandle<(Result<ResourceResponse>, RevalidationOutcome)>;

enum RevalidationState {
    Pending(NetworkTask),
    Ready(RevalidationOutcome),
}

/// Handle on the background refresh started by a cached read. Dropping it
/// leaves the refresh running.
pub struct Revalidation {
    state: RevalidationState,
}

impl Revalidation {
    fn pending(task: NetworkTask) -> Self {
        Self { state: RevalidationState::Pending(task) }
    }

    fn ready(outcome: RevalidationOutcome) -> Self {
        Self { state: RevalidationState::Ready(outcome) }
    }

    pub async fn settled(self) -> RevalidationOutcome {
        match self.state {
            RevalidationState::Ready(outcome) => outcome,
            RevalidationState::Pending(task) => match task.await {
                Ok((_, outcome)) => outcome,
                Err(e) => RevalidationOutcome::Failed(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Default)]
struct Lifecycle {
    state: CacheState,
    installing: Option<GenerationTag>,
}

pub(crate) struct Inner {
    storage: Arc<dyn GenerationStorage>,
    fetcher: Arc<dyn ResourceFetcher>,
    lifecycle: RwLock<Lifecycle>,
    activating: std::sync::Mutex<Option<GenerationTag>>,
    install_lock: Mutex<()>,
    clients: std::sync::Mutex<HashMap<u64, Option<GenerationTag>>>,
    next_client: AtomicU64,
    events: broadcast::Sender<CacheEvent>,
}

fn lock<T>(mutex: &std::sync::Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn stored_resource(url: &str, response: ResourceResponse) -> StoredResource {
    StoredResource {
        url: url.to_string(),
        status: response.status,
        headers: response.headers,
        body: response.body,
        stored_at_ms: chrono::Utc::now().timestamp_millis(),
    }
}

impl Inner {
    pub(crate) fn controller_of(&self, client: u64) -> Option<GenerationTag> {
        lock(&self.clients).get(&client).cloned().flatten()
    }

    pub(crate) fn deregister(&self, client: u64) {
        lock(&self.clients).remove(&client);
    }

    fn claim(&self, tag: &GenerationTag) -> usize {
        let mut clients = lock(&self.clients);
        for controller in clients.values_mut() {
            *controller = Some(tag.clone());
        }
        clients.len()
    }

    async fn store_from_network(&self, tag: &GenerationTag, url: &str) -> std::result::Result<(), String> {
        let response = self.fetcher.fetch(&ResourceRequest::get(url)).await.map_err(|e| e.to_string())?;
        if !response.is_storable() {
            return Err(format!("status {}", response.status));
        }
        self.storage.put(tag, stored_resource(url, response)).await.map_err(|e| e.to_string())
    }

    async fn reclaim_except(&self, keep: &GenerationTag, installing: Option<&GenerationTag>) -> Result<()> {
        for tag in self.storage.list_generations().await? {
            if &tag != keep && Some(&tag) != installing {
                self.storage.delete_generation(&tag).await?;
                info!(tag = %tag, "stale generation reclaimed");
            }
        }
        Ok(())
    }

    async fn activate_locked(&self, lc: &mut Lifecycle, tag: &GenerationTag) -> Result<()> {
        let is_staged = lc.state.staged.as_ref().is_some_and(|s| &s.tag == tag);
        let is_active = lc.state.active.as_ref() == Some(tag);
        if !is_staged && !is_active {
            return Err(Error::NotFound(format!("generation '{tag}' is neither staged nor active")));
        }

        *lock(&self.activating) = Some(tag.clone());
        let reclaimed = self.reclaim_except(tag, lc.installing.as_ref()).await;
        *lock(&self.activating) = None;
        reclaimed?;

        let previous = lc.state.active.replace(tag.clone());
        if is_staged {
            lc.state.staged = None;
        }
        self.storage.save_state(&lc.state).await?;
        let claimed = self.claim(tag);

        if previous.as_ref() != Some(tag) {
            info!(tag = %tag, previous = ?previous, claimed, "generation activated");
            let _ = self.events.send(CacheEvent::GenerationChanged { previous, current: tag.clone() });
        }
        Ok(())
    }

    async fn store_if_active(&self, tag: &GenerationTag, url: &str, response: &ResourceResponse) -> RevalidationOutcome {
        let lc = self.lifecycle.read().await;
        if lc.state.active.as_ref() != Some(tag) {
            debug!(url, tag = %tag, "generation changed during revalidation; result dropped");
            return RevalidationOutcome::Skipped;
        }
        match self.storage.put(tag, stored_resource(url, response.clone())).await {
            Ok(()) => RevalidationOutcome::Refreshed,
            Err(e) => {
                warn!(url, error = %e, "revalidation write failed");
                RevalidationOutcome::Failed(e.to_string())
            }
        }
    }

    async fn revalidate(
        self: Arc<Self>,
        tag: Option<GenerationTag>,
        request: ResourceRequest,
    ) -> (Result<ResourceResponse>, RevalidationOutcome) {
        let response = match self.fetcher.fetch(&request).await {
            Ok(response) => response,
            Err(e) => {
                let reason = e.to_string();
                debug!(url = %request.url, error = %reason, "network fetch failed");
                let err = match e {
                    Error::CacheFetch { .. } => e,
                    other => Error::CacheFetch { url: request.url.clone(), reason: other.to_string() },
                };
                return (Err(err), RevalidationOutcome::Failed(reason));
            }
        };
        let outcome = match tag {
            None => RevalidationOutcome::Skipped,
            Some(_) if !response.is_storable() => {
                debug!(url = %request.url, status = response.status, "not caching invalid network response");
                RevalidationOutcome::NotStored { status: response.status }
            }
            Some(tag) => self.store_if_active(&tag, &request.url, &response).await,
        };
        (Ok(response), outcome)
    }
}

/// Cheap to clone; all clones share one lifecycle.
#[derive(Clone)]
pub struct AssetCacheManager {
    inner: Arc<Inner>,
}

impl AssetCacheManager {
    /// Restore the lifecycle saved in `storage` and drop generations that
    /// are neither active nor staged (e.g. an install cut short).
    pub async fn open(storage: Arc<dyn GenerationStorage>, fetcher: Arc<dyn ResourceFetcher>) -> Result<Self> {
        let mut state = storage.load_state().await?.unwrap_or_default();
        let present: HashSet<GenerationTag> = storage.list_generations().await?.into_iter().collect();
        if let Some(active) = state.active.as_ref().filter(|t| !present.contains(*t)) {
            warn!(tag = %active, "active generation missing from storage");
            state.active = None;
        }
        if state.staged.as_ref().is_some_and(|s| !present.contains(&s.tag)) {
            state.staged = None;
        }
        for tag in &present {
            let keep = state.active.as_ref() == Some(tag) || state.staged.as_ref().is_some_and(|s| &s.tag == tag);
            if !keep {
                storage.delete_generation(tag).await?;
                info!(tag = %tag, "orphaned generation removed");
            }
        }
        storage.save_state(&state).await?;
        debug!(active = ?state.active, staged = ?state.staged.as_ref().map(|s| &s.tag), "cache opened");

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                storage,
                fetcher,
                lifecycle: RwLock::new(Lifecycle { state, installing: None }),
                activating: std::sync::Mutex::new(None),
                install_lock: Mutex::new(()),
                clients: std::sync::Mutex::new(HashMap::new()),
                next_client: AtomicU64::new(1),
                events,
            }),
        })
    }

    pub async fn active(&self) -> Option<GenerationTag> {
        self.inner.lifecycle.read().await.state.active.clone()
    }

    pub async fn staged(&self) -> Option<StagedGeneration> {
        self.inner.lifecycle.read().await.state.staged.clone()
    }

    pub async fn phase(&self) -> CachePhase {
        if let Some(tag) = lock(&self.inner.activating).clone() {
            return CachePhase::Activating { tag };
        }
        let lc = self.inner.lifecycle.read().await;
        match (&lc.installing, &lc.state.active, &lc.state.staged) {
            (Some(tag), active, _) => CachePhase::Installing { tag: tag.clone(), active: active.clone() },
            (None, None, None) => CachePhase::NoCache,
            (None, active, staged) => CachePhase::Installed { active: active.clone(), staged: staged.clone() },
        }
    }

    /// Fetch every manifest URL into a new generation under `tag`.
    ///
    /// Failures are collected, not fatal; the generation is staged with
    /// whatever succeeded. With no active generation a complete install is
    /// activated straight away.
    pub async fn install(&self, tag: &GenerationTag, manifest: &Manifest) -> Result<InstallReport> {
        self.install_with_progress(tag, manifest, &|_, _| {}).await
    }

    /// `install`, calling `progress(url, stored)` as each resource settles.
    pub async fn install_with_progress(
        &self,
        tag: &GenerationTag,
        manifest: &Manifest,
        progress: &(dyn Fn(&str, bool) + Send + Sync),
    ) -> Result<InstallReport> {
        let inner = &self.inner;
        let _serial = inner.install_lock.lock().await;

        let previous_staged = {
            let mut lc = inner.lifecycle.write().await;
            if lc.state.active.as_ref() == Some(tag) {
                debug!(tag = %tag, "generation already active; install skipped");
                return Ok(InstallReport::already_active(tag.clone(), manifest.len()));
            }
            lc.installing = Some(tag.clone());
            lc.state.staged.take()
        };
        info!(tag = %tag, resources = manifest.len(), "installing generation");

        let staged = self.stage(tag, manifest, previous_staged.clone(), progress).await;

        let mut lc = inner.lifecycle.write().await;
        lc.installing = None;
        let (stored, failed, superseded) = match staged {
            Ok(parts) => parts,
            Err(e) => {
                warn!(tag = %tag, error = %e, "install aborted");
                if let Err(cleanup) = inner.storage.delete_generation(tag).await {
                    warn!(tag = %tag, error = %cleanup, "aborted install left its generation behind");
                }
                // The earlier staged generation stays staged if its storage survived.
                if let Some(previous) = previous_staged.filter(|p| &p.tag != tag) {
                    let present = inner.storage.list_generations().await.is_ok_and(|tags| tags.contains(&previous.tag));
                    if present {
                        lc.state.staged = Some(previous);
                    }
                }
                inner.storage.save_state(&lc.state).await?;
                return Err(e);
            }
        };
        let complete = failed.is_empty();
        lc.state.staged = Some(StagedGeneration {
            tag: tag.clone(),
            complete,
            missing: failed.iter().map(|(url, _)| url.clone()).collect(),
        });
        if complete {
            info!(tag = %tag, stored = stored.len(), "generation staged");
        } else {
            warn!(tag = %tag, stored = stored.len(), failed = failed.len(), "generation staged incomplete");
        }
        let _ = inner.events.send(CacheEvent::Staged { tag: tag.clone(), complete });

        let activated = complete && lc.state.active.is_none();
        if activated {
            inner.activate_locked(&mut lc, tag).await?;
        } else {
            inner.storage.save_state(&lc.state).await?;
        }

        Ok(InstallReport {
            tag: tag.clone(),
            total: manifest.len(),
            stored,
            failed,
            superseded,
            activated,
            already_active: false,
        })
    }

    async fn stage(
        &self,
        tag: &GenerationTag,
        manifest: &Manifest,
        previous: Option<StagedGeneration>,
        progress: &(dyn Fn(&str, bool) + Send + Sync),
    ) -> Result<(Vec<String>, Vec<(String, String)>, Option<GenerationTag>)> {
        let inner = &self.inner;
        let superseded = match previous {
            Some(old) => {
                inner.storage.delete_generation(&old.tag).await?;
                if &old.tag == tag {
                    None
                } else {
                    let conflict = Error::PromotionConflict { superseded: old.tag.to_string(), current: tag.to_string() };
                    warn!(error = %conflict, "staged generation discarded");
                    Some(old.tag)
                }
            }
            None => None,
        };

        // Leftovers of an earlier partial install under the same tag.
        inner.storage.delete_generation(tag).await?;
        inner.storage.create(tag).await?;

        let fetches = manifest.urls().iter().map(|url| async move {
            let result = inner.store_from_network(tag, url).await;
            progress(url, result.is_ok());
            (url.clone(), result)
        });
        let mut stored = Vec::new();
        let mut failed = Vec::new();
        for (url, result) in join_all(fetches).await {
            match result {
                Ok(()) => stored.push(url),
                Err(reason) => {
                    warn!(tag = %tag, url = %url, reason = %reason, "resource not cached");
                    failed.push((url, reason));
                }
            }
        }
        Ok((stored, failed, superseded))
    }

    /// Serve `tag` to every open client and delete all other generations.
    pub async fn activate(&self, tag: &GenerationTag) -> Result<()> {
        let mut lc = self.inner.lifecycle.write().await;
        self.inner.activate_locked(&mut lc, tag).await
    }

    /// Activate the staged generation if it is complete.
    pub async fn promote_staged(&self) -> Result<Option<GenerationTag>> {
        let mut lc = self.inner.lifecycle.write().await;
        let Some(staged) = lc.state.staged.clone() else {
            return Ok(None);
        };
        if !staged.complete {
            warn!(tag = %staged.tag, missing = staged.missing.len(), "incomplete generation is not promoted");
            return Ok(None);
        }
        self.inner.activate_locked(&mut lc, &staged.tag).await?;
        Ok(Some(staged.tag))
    }

    /// URLs of `manifest` that `tag` does not hold.
    pub async fn verify(&self, tag: &GenerationTag, manifest: &Manifest) -> Result<Vec<String>> {
        let present: HashSet<String> = self.inner.storage.urls(tag).await?.into_iter().collect();
        Ok(manifest.urls().iter().filter(|u| !present.contains(*u)).cloned().collect())
    }

    pub async fn fetch(&self, request: &ResourceRequest) -> Result<ResourceResponse> {
        let (response, _revalidation) = self.fetch_with_revalidation(request).await?;
        Ok(response)
    }

    /// Stale-while-revalidate read.
    ///
    /// A hit in the active generation is returned at once while the network
    /// refresh continues in the background. A miss waits for the network;
    /// only then do network errors surface. Non-GET requests bypass the
    /// cache entirely.
    pub async fn fetch_with_revalidation(&self, request: &ResourceRequest) -> Result<(ResourceResponse, Revalidation)> {
        if !request.method.is_cacheable() {
            let response = self.inner.fetcher.fetch(request).await?;
            return Ok((response, Revalidation::ready(RevalidationOutcome::Skipped)));
        }

        let active = self.active().await;
        let cached = match &active {
            Some(tag) => match self.inner.storage.get(tag, &request.url).await {
                Ok(hit) => hit,
                Err(e) => {
                    warn!(url = %request.url, error = %e, "cache lookup failed; falling back to network");
                    None
                }
            },
            None => None,
        };

        let network = tokio::spawn(self.inner.clone().revalidate(active, request.clone()));
        match cached {
            Some(hit) => {
                debug!(url = %request.url, "served from cache");
                Ok((hit.into_response(), Revalidation::pending(network)))
            }
            None => {
                let (response, outcome) = network
                    .await
                    .map_err(|e| Error::CacheFetch { url: request.url.clone(), reason: e.to_string() })?;
                Ok((response?, Revalidation::ready(outcome)))
            }
        }
    }

    /// Register a client. It is controlled by the active generation, if any.
    pub async fn connect(&self) -> CacheClient {
        let events = self.inner.events.subscribe();
        let lc = self.inner.lifecycle.read().await;
        let id = self.inner.next_client.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.clients).insert(id, lc.state.active.clone());
        drop(lc);
        debug!(client = id, "client connected");
        CacheClient::new(id, self.inner.clone(), events)
    }

    pub fn controlled_clients(&self, tag: &GenerationTag) -> usize {
        lock(&self.inner.clients).values().filter(|c| c.as_ref() == Some(tag)).count()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    /// Handle directives until every sender is dropped.
    pub fn spawn_directive_listener(&self, mut directives: mpsc::Receiver<UpdateDirective>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(directive) = directives.recv().await {
                match directive {
                    UpdateDirective::PromoteNow => match manager.promote_staged().await {
                        Ok(Some(tag)) => info!(tag = %tag, "staged generation promoted on request"),
                        Ok(None) => debug!("promotion requested with nothing to promote"),
                        Err(e) => error!(error = %e, "promotion failed"),
                    },
                }
            }
            debug!("directive channel closed");
        })
    }
}
