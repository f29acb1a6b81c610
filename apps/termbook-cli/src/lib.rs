//! Helpers shared by the `termbook` and `termbook-assets` binaries.
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use termbook_cache::{AssetCacheManager, DirOrigin, FsStorage};
use termbook_core::config::{Config, Settings};
use termbook_core::traits::RenderSink;
use termbook_core::types::RenderFrame;
use termbook_store::{CollectionRegistry, LanceBackend, RecordStore};

/// `RUST_LOG` wins; otherwise info for everything.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();
}

pub fn load_settings() -> anyhow::Result<Settings> {
    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {}", e);
        e
    })?;
    Ok(config.settings()?)
}

pub async fn open_store(settings: &Settings) -> anyhow::Result<RecordStore> {
    let db_dir = settings.db_dir();
    std::fs::create_dir_all(&db_dir)?;
    let backend = LanceBackend::open(&db_dir.to_string_lossy()).await?;
    let registry = CollectionRegistry::from_settings(&settings.store)?;
    Ok(RecordStore::open(Arc::new(backend), registry).await?)
}

pub async fn open_cache(settings: &Settings) -> anyhow::Result<AssetCacheManager> {
    let storage = FsStorage::new(settings.cache_root());
    let origin = DirOrigin::new(settings.release_dir());
    Ok(AssetCacheManager::open(Arc::new(storage), Arc::new(origin)).await?)
}

pub fn progress_bar(len: u64, unit: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    let template = format!("{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {unit} {{msg}}");
    let style = ProgressStyle::default_bar()
        .template(&template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}

/// Prints each frame as a numbered table.
pub struct PrintSink;

impl RenderSink for PrintSink {
    fn render(&self, frame: RenderFrame) {
        let Some(collection) = frame.collection else {
            println!("(no collection selected)");
            return;
        };
        let w = frame.window;
        println!(
            "📖 {} rows {}..{} (top {}px of {}px)",
            collection,
            w.start,
            w.end(),
            w.top_offset_px,
            w.total_height_px
        );
        for record in &frame.records {
            println!("  {:>6}  {:<28} {}", record.id, record.term, record.definition);
        }
    }
}
