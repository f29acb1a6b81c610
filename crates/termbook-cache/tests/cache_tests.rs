use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use termbook_cache::{
    AssetCacheManager, CacheEvent, CachePhase, Manifest, MemoryStorage, RevalidationOutcome, UpdateDirective,
};
use termbook_core::traits::{GenerationStorage, ResourceFetcher};
use termbook_core::types::{
    CacheState, GenerationTag, Method, ResourceRequest, ResourceResponse, StoredResource,
};
use termbook_core::{Error, Result};

/// Network double: per-URL scripted answers, a call counter and an optional
/// gate that holds the next fetch until released.
#[derive(Default)]
struct ScriptedFetcher {
    answers: Mutex<HashMap<String, std::result::Result<ResourceResponse, String>>>,
    calls: AtomicUsize,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl ScriptedFetcher {
    fn serve(&self, url: &str, body: &str) {
        self.answers.lock().unwrap().insert(url.into(), Ok(ResourceResponse::ok(body)));
    }

    fn status(&self, url: &str, status: u16) {
        self.answers.lock().unwrap().insert(url.into(), Ok(ResourceResponse::with_status(status)));
    }

    fn offline(&self, url: &str) {
        self.answers.lock().unwrap().insert(url.into(), Err("connection refused".into()));
    }

    fn hold_next(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.gate.lock().unwrap() = Some(rx);
        tx
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceFetcher for ScriptedFetcher {
    async fn fetch(&self, request: &ResourceRequest) -> Result<ResourceResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        let answer = self.answers.lock().unwrap().get(&request.url).cloned();
        match answer {
            Some(Ok(response)) => Ok(response),
            Some(Err(reason)) => Err(Error::CacheFetch { url: request.url.clone(), reason }),
            None => Ok(ResourceResponse::with_status(404)),
        }
    }
}

/// Memory storage whose lookups can be made to fail.
#[derive(Default)]
struct FlakyStorage {
    inner: MemoryStorage,
    broken_reads: std::sync::atomic::AtomicBool,
    broken_deletes: std::sync::atomic::AtomicBool,
    /// Creates the generation, then reports failure.
    broken_creates: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl GenerationStorage for FlakyStorage {
    async fn list_generations(&self) -> Result<Vec<GenerationTag>> {
        self.inner.list_generations().await
    }
    async fn create(&self, tag: &GenerationTag) -> Result<()> {
        self.inner.create(tag).await?;
        if self.broken_creates.load(Ordering::SeqCst) {
            return Err(Error::Storage("disk full".into()));
        }
        Ok(())
    }
    async fn put(&self, tag: &GenerationTag, resource: StoredResource) -> Result<()> {
        self.inner.put(tag, resource).await
    }
    async fn get(&self, tag: &GenerationTag, url: &str) -> Result<Option<StoredResource>> {
        if self.broken_reads.load(Ordering::SeqCst) {
            return Err(Error::Storage("quota exceeded".into()));
        }
        self.inner.get(tag, url).await
    }
    async fn urls(&self, tag: &GenerationTag) -> Result<Vec<String>> {
        self.inner.urls(tag).await
    }
    async fn delete_generation(&self, tag: &GenerationTag) -> Result<()> {
        if self.broken_deletes.load(Ordering::SeqCst) {
            return Err(Error::Storage("permission denied".into()));
        }
        self.inner.delete_generation(tag).await
    }
    async fn load_state(&self) -> Result<Option<CacheState>> {
        self.inner.load_state().await
    }
    async fn save_state(&self, state: &CacheState) -> Result<()> {
        self.inner.save_state(state).await
    }
}

fn shell() -> Manifest {
    Manifest::new(["./", "./index.html", "./app.js"]).unwrap()
}

fn tag(name: &str) -> GenerationTag {
    GenerationTag::new(name)
}

async fn setup() -> (AssetCacheManager, Arc<ScriptedFetcher>, Arc<FlakyStorage>) {
    let fetcher = Arc::new(ScriptedFetcher::default());
    for url in shell().urls() {
        fetcher.serve(url, &format!("v1 {url}"));
    }
    let storage = Arc::new(FlakyStorage::default());
    let cache = AssetCacheManager::open(storage.clone(), fetcher.clone()).await.unwrap();
    (cache, fetcher, storage)
}

fn body(response: &ResourceResponse) -> &str {
    std::str::from_utf8(&response.body).unwrap()
}

#[tokio::test]
async fn first_complete_install_activates_and_claims_open_clients() {
    let (cache, _, _) = setup().await;
    assert_eq!(cache.phase().await, CachePhase::NoCache);
    let mut client = cache.connect().await;
    assert_eq!(client.controller(), None);

    let report = cache.install(&tag("v1"), &shell()).await.unwrap();
    assert!(report.is_complete());
    assert!(report.activated);
    assert_eq!(report.stored.len(), 3);

    assert_eq!(cache.active().await, Some(tag("v1")));
    assert_eq!(client.controller(), Some(tag("v1")));
    assert_eq!(cache.controlled_clients(&tag("v1")), 1);
    assert_eq!(client.next_event().await, Some(CacheEvent::Staged { tag: tag("v1"), complete: true }));
    assert_eq!(
        client.next_event().await,
        Some(CacheEvent::GenerationChanged { previous: None, current: tag("v1") })
    );

    drop(client);
    assert_eq!(cache.controlled_clients(&tag("v1")), 0);
}

#[tokio::test]
async fn cached_payload_is_served_then_refreshed() {
    let (cache, fetcher, _) = setup().await;
    cache.install(&tag("v1"), &shell()).await.unwrap();
    fetcher.serve("./app.js", "v2 ./app.js");

    let (first, revalidation) = cache.fetch_with_revalidation(&ResourceRequest::get("./app.js")).await.unwrap();
    assert_eq!(body(&first), "v1 ./app.js", "stale copy comes back first");
    assert_eq!(revalidation.settled().await, RevalidationOutcome::Refreshed);

    let second = cache.fetch(&ResourceRequest::get("./app.js")).await.unwrap();
    assert_eq!(body(&second), "v2 ./app.js");
}

#[tokio::test]
async fn activation_reclaims_the_old_generation() {
    let (cache, fetcher, storage) = setup().await;
    cache.install(&tag("v1"), &shell()).await.unwrap();
    let client = cache.connect().await;

    for url in shell().urls() {
        fetcher.serve(url, &format!("v2 {url}"));
    }
    let report = cache.install(&tag("v2"), &shell()).await.unwrap();
    assert!(!report.activated, "an active generation keeps serving until promotion");
    assert_eq!(cache.staged().await.map(|s| s.tag), Some(tag("v2")));
    assert_eq!(client.controller(), Some(tag("v1")));
    assert!(matches!(cache.phase().await, CachePhase::Installed { active: Some(_), staged: Some(_) }));

    // A refresh of v1 that is still in flight when v2 takes over.
    let release = fetcher.hold_next();
    let (_, late) = cache.fetch_with_revalidation(&ResourceRequest::get("./index.html")).await.unwrap();
    cache.activate(&tag("v2")).await.unwrap();
    release.send(()).unwrap();
    assert_eq!(late.settled().await, RevalidationOutcome::Skipped);

    assert_eq!(storage.list_generations().await.unwrap(), [tag("v2")]);
    assert_eq!(storage.get(&tag("v1"), "./index.html").await.unwrap(), None);
    assert_eq!(client.controller(), Some(tag("v2")));
    let served = cache.fetch(&ResourceRequest::get("./index.html")).await.unwrap();
    assert_eq!(body(&served), "v2 ./index.html");
}

#[tokio::test]
async fn partial_install_is_staged_but_never_promoted() {
    let (cache, fetcher, _) = setup().await;
    fetcher.offline("./app.js");

    let report = cache.install(&tag("v1"), &shell()).await.unwrap();
    assert!(!report.activated);
    assert_eq!(report.missing().collect::<Vec<_>>(), ["./app.js"]);
    let staged = cache.staged().await.unwrap();
    assert!(!staged.complete);
    assert_eq!(staged.missing, ["./app.js"]);

    assert_eq!(cache.promote_staged().await.unwrap(), None);
    assert_eq!(cache.active().await, None);
    assert_eq!(cache.verify(&tag("v1"), &shell()).await.unwrap(), ["./app.js"]);
    match report.require_complete() {
        Err(Error::CacheInstall { missing, total, .. }) => {
            assert_eq!(missing, ["./app.js"]);
            assert_eq!(total, 3);
        }
        other => panic!("expected CacheInstall, got {other:?}"),
    }
}

#[tokio::test]
async fn newer_staging_replaces_the_waiting_one() {
    let (cache, _, storage) = setup().await;
    cache.install(&tag("v1"), &shell()).await.unwrap();
    cache.install(&tag("v2"), &shell()).await.unwrap();

    let report = cache.install(&tag("v3"), &shell()).await.unwrap();
    assert_eq!(report.superseded, Some(tag("v2")));
    assert_eq!(storage.list_generations().await.unwrap(), [tag("v1"), tag("v3")]);
    assert_eq!(cache.staged().await.map(|s| s.tag), Some(tag("v3")));

    let again = cache.install(&tag("v1"), &shell()).await.unwrap();
    assert!(again.already_active);
    assert_eq!(cache.staged().await.map(|s| s.tag), Some(tag("v3")), "no-op install leaves staging alone");
}

#[tokio::test]
async fn non_get_requests_bypass_the_cache() {
    let (cache, fetcher, storage) = setup().await;
    cache.install(&tag("v1"), &shell()).await.unwrap();
    let before = fetcher.calls();

    let post = ResourceRequest::new(Method::Post, "./app.js");
    let response = cache.fetch(&post).await.unwrap();
    assert_eq!(body(&response), "v1 ./app.js");
    assert_eq!(fetcher.calls(), before + 1);
    assert_eq!(storage.urls(&tag("v1")).await.unwrap().len(), 3);
}

#[tokio::test]
async fn network_failure_only_surfaces_without_a_cached_copy() {
    let (cache, fetcher, _) = setup().await;
    cache.install(&tag("v1"), &shell()).await.unwrap();
    fetcher.offline("./app.js");
    fetcher.offline("./extra.js");

    let (cached, revalidation) = cache.fetch_with_revalidation(&ResourceRequest::get("./app.js")).await.unwrap();
    assert_eq!(body(&cached), "v1 ./app.js");
    assert!(matches!(revalidation.settled().await, RevalidationOutcome::Failed(_)));

    let err = cache.fetch(&ResourceRequest::get("./extra.js")).await.unwrap_err();
    assert!(matches!(err, Error::CacheFetch { .. }));
}

#[tokio::test]
async fn non_200_responses_are_returned_but_not_stored() {
    let (cache, fetcher, storage) = setup().await;
    cache.install(&tag("v1"), &shell()).await.unwrap();
    fetcher.status("./app.js", 206);

    let (cached, revalidation) = cache.fetch_with_revalidation(&ResourceRequest::get("./app.js")).await.unwrap();
    assert_eq!(cached.status, 200);
    assert_eq!(revalidation.settled().await, RevalidationOutcome::NotStored { status: 206 });
    let kept = storage.get(&tag("v1"), "./app.js").await.unwrap().unwrap();
    assert_eq!(kept.body, b"v1 ./app.js");

    let missing = cache.fetch(&ResourceRequest::get("./nope.css")).await.unwrap();
    assert_eq!(missing.status, 404);
}

#[tokio::test]
async fn broken_cache_lookup_falls_back_to_network() {
    let (cache, fetcher, storage) = setup().await;
    cache.install(&tag("v1"), &shell()).await.unwrap();
    fetcher.serve("./app.js", "fresh");
    storage.broken_reads.store(true, Ordering::SeqCst);

    let response = cache.fetch(&ResourceRequest::get("./app.js")).await.unwrap();
    assert_eq!(body(&response), "fresh");
}

#[tokio::test]
async fn promote_now_directive_activates_the_staged_generation() {
    let (cache, _, _) = setup().await;
    cache.install(&tag("v1"), &shell()).await.unwrap();
    cache.install(&tag("v2"), &shell()).await.unwrap();
    let mut events = cache.subscribe();

    let (tx, rx) = mpsc::channel(4);
    let listener = cache.spawn_directive_listener(rx);
    tx.send(UpdateDirective::PromoteNow).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap();
    assert_eq!(event, CacheEvent::GenerationChanged { previous: Some(tag("v1")), current: tag("v2") });
    assert_eq!(cache.active().await, Some(tag("v2")));
    assert_eq!(cache.staged().await, None);

    drop(tx);
    listener.await.unwrap();
}

#[tokio::test]
async fn aborted_install_keeps_the_staged_generation_and_leaves_no_orphan() {
    let (cache, _, storage) = setup().await;
    cache.install(&tag("v1"), &shell()).await.unwrap();
    cache.install(&tag("v2"), &shell()).await.unwrap();
    assert_eq!(cache.staged().await.map(|s| s.tag), Some(tag("v2")));

    // Discarding v2 fails, so v2 is still intact and stays staged.
    storage.broken_deletes.store(true, Ordering::SeqCst);
    assert!(cache.install(&tag("v3"), &shell()).await.is_err());
    storage.broken_deletes.store(false, Ordering::SeqCst);
    assert_eq!(cache.staged().await.map(|s| s.tag), Some(tag("v2")));
    assert_eq!(cache.active().await, Some(tag("v1")));

    // v2 is discarded this time, then creating v4 fails: nothing is left staged or orphaned.
    storage.broken_creates.store(true, Ordering::SeqCst);
    assert!(cache.install(&tag("v4"), &shell()).await.is_err());
    storage.broken_creates.store(false, Ordering::SeqCst);
    assert_eq!(cache.staged().await, None);
    assert_eq!(storage.list_generations().await.unwrap(), [tag("v1")]);
    assert_eq!(cache.promote_staged().await.unwrap(), None);
}

#[tokio::test]
async fn install_reports_progress_for_every_resource() {
    let (cache, fetcher, _) = setup().await;
    fetcher.offline("./app.js");
    let seen = Mutex::new(Vec::new());
    let report = cache
        .install_with_progress(&tag("v1"), &shell(), &|url, stored| seen.lock().unwrap().push((url.to_string(), stored)))
        .await
        .unwrap();

    let mut seen = seen.into_inner().unwrap();
    seen.sort();
    assert_eq!(
        seen,
        [("./".to_string(), true), ("./app.js".to_string(), false), ("./index.html".to_string(), true)]
    );
    assert_eq!(report.missing().collect::<Vec<_>>(), ["./app.js"]);
}
