use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

use termbook_cache::{AssetCacheManager, DirOrigin, FsStorage, Manifest};
use termbook_core::traits::GenerationStorage;
use termbook_core::types::{GenerationTag, Headers, ResourceRequest, StoredResource};

fn resource(url: &str, body: &str) -> StoredResource {
    StoredResource { url: url.into(), status: 200, headers: Headers::new(), body: body.into(), stored_at_ms: 0 }
}

#[tokio::test]
async fn fs_storage_replaces_entries_and_reclaims_generations() -> anyhow::Result<()> {
    let root = TempDir::new()?;
    let storage = FsStorage::new(root.path());
    let tag = GenerationTag::new("terminology-dictionary-v3");

    assert!(storage.put(&tag, resource("./app.js", "x")).await.is_err(), "put needs a created generation");
    storage.create(&tag).await?;
    storage.put(&tag, resource("./app.js", "one")).await?;
    storage.put(&tag, resource("./app.js", "two")).await?;
    storage.put(&tag, resource("./", "<html>")).await?;

    let hit = storage.get(&tag, "./app.js").await?.expect("stored");
    assert_eq!(hit.body, b"two");
    assert_eq!(storage.urls(&tag).await?, ["./", "./app.js"]);
    assert_eq!(storage.get(&tag, "./missing.css").await?, None);
    assert_eq!(storage.list_generations().await?, [tag.clone()]);

    storage.delete_generation(&tag).await?;
    assert!(storage.list_generations().await?.is_empty());
    assert_eq!(storage.get(&tag, "./app.js").await?, None);
    storage.delete_generation(&tag).await?;
    Ok(())
}

#[tokio::test]
async fn release_dir_installs_and_survives_restart() -> anyhow::Result<()> {
    let public = TempDir::new()?;
    fs::write(public.path().join("index.html"), "<h1>Qaamuus</h1>")?;
    fs::write(public.path().join("app.js"), "console.log(1)")?;
    let assets = TempDir::new()?;

    let release = Manifest::from_release_dir(public.path(), "terminology-dictionary")?;
    let origin = Arc::new(DirOrigin::new(public.path()));
    let cache = AssetCacheManager::open(Arc::new(FsStorage::new(assets.path())), origin.clone()).await?;
    let report = cache.install(&release.tag, &release.manifest).await?.require_complete()?;
    assert!(report.activated);
    assert_eq!(report.stored.len(), 3);

    let page = cache.fetch(&ResourceRequest::get("./")).await?;
    assert_eq!(page.body, b"<h1>Qaamuus</h1>");
    assert_eq!(page.headers["content-type"], "text/html; charset=utf-8");

    // A crashed install leaves an unreferenced generation behind.
    let storage = FsStorage::new(assets.path());
    storage.create(&GenerationTag::new("terminology-dictionary-orphan")).await?;
    drop(cache);

    let reopened = AssetCacheManager::open(Arc::new(FsStorage::new(assets.path())), origin).await?;
    assert_eq!(reopened.active().await, Some(release.tag.clone()));
    assert_eq!(storage.list_generations().await?, [release.tag.clone()]);

    // The origin disappears: cached resources still load.
    drop(public);
    let offline = reopened.fetch(&ResourceRequest::get("./app.js")).await?;
    assert_eq!(offline.body, b"console.log(1)");
    assert!(reopened.fetch(&ResourceRequest::get("./never-cached.js")).await.is_err());
    Ok(())
}

#[tokio::test]
async fn corrupt_resource_file_is_reported_missing_by_verify() -> anyhow::Result<()> {
    let public = TempDir::new()?;
    fs::write(public.path().join("index.html"), "<h1>v1</h1>")?;
    fs::write(public.path().join("app.js"), "console.log(1)")?;
    let assets = TempDir::new()?;
    let release = Manifest::from_release_dir(public.path(), "terminology-dictionary")?;
    let cache = AssetCacheManager::open(
        Arc::new(FsStorage::new(assets.path())),
        Arc::new(DirOrigin::new(public.path())),
    )
    .await?;
    cache.install(&release.tag, &release.manifest).await?.require_complete()?;
    assert!(cache.verify(&release.tag, &release.manifest).await?.is_empty());

    // Truncate one stored resource on disk.
    let dir = assets.path().join(release.tag.as_str());
    let victim = fs::read_dir(&dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .find(|p| p.extension().is_some_and(|x| x == "res"))
        .expect("a stored resource");
    fs::write(&victim, [0u8, 0, 1])?;

    let storage = FsStorage::new(assets.path());
    assert_eq!(storage.urls(&release.tag).await?.len(), release.manifest.len() - 1);
    assert_eq!(cache.verify(&release.tag, &release.manifest).await?.len(), 1);
    Ok(())
}
