use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

use termbook_core::traits::{RecordBackend, RenderSink};
use termbook_core::types::{Record, RenderFrame};
use termbook_core::{Error, Result};
use termbook_store::{CollectionRegistry, MemoryBackend, RecordStore};
use termbook_window::{FrameOutcome, WindowGeometry, WindowManager};

#[derive(Default)]
struct RecordingSink {
    frames: Mutex<Vec<RenderFrame>>,
}

impl RecordingSink {
    fn frames(&self) -> Vec<RenderFrame> {
        self.frames.lock().unwrap().clone()
    }

    fn last(&self) -> Option<RenderFrame> {
        self.frames.lock().unwrap().last().cloned()
    }
}

impl RenderSink for RecordingSink {
    fn render(&self, frame: RenderFrame) {
        self.frames.lock().unwrap().push(frame);
    }
}

/// Memory backend whose window reads can be held back and failed on demand.
#[derive(Default)]
struct GatedBackend {
    inner: MemoryBackend,
    gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
    reads: AtomicUsize,
    fail_reads: AtomicBool,
}

impl GatedBackend {
    fn gate(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().unwrap().push_back(rx);
        tx
    }
}

#[async_trait]
impl RecordBackend for GatedBackend {
    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        self.inner.ensure_collection(collection).await
    }
    async fn count(&self, collection: &str) -> Result<usize> {
        self.inner.count(collection).await
    }
    async fn append(&self, collection: &str, records: &[Record]) -> Result<()> {
        self.inner.append(collection, records).await
    }
    async fn read_range(&self, collection: &str, offset: usize, limit: usize) -> Result<Vec<Record>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let gate = self.gates.lock().unwrap().pop_front();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Storage("disk went away".into()));
        }
        self.inner.read_range(collection, offset, limit).await
    }
    async fn prefix_scan(&self, collection: &str, prefix: &str, limit: usize) -> Result<Vec<Record>> {
        self.inner.prefix_scan(collection, prefix, limit).await
    }
}

struct Fixture {
    backend: Arc<GatedBackend>,
    sink: Arc<RecordingSink>,
    manager: Arc<WindowManager>,
}

async fn fixture(sizes: &[(&str, usize)]) -> Fixture {
    let backend = Arc::new(GatedBackend::default());
    let registry = CollectionRegistry::new(sizes.iter().map(|(n, _)| *n)).unwrap();
    let store = RecordStore::open(backend.clone(), registry).await.unwrap();
    for (name, size) in sizes {
        let entries = (0..*size).map(|i| (format!("{name}-{i}"), format!("def {i}"))).collect();
        store.load_entries(name, entries).await.unwrap();
    }
    let sink = Arc::new(RecordingSink::default());
    let manager = WindowManager::new(
        Arc::new(store),
        WindowGeometry::new(45, 2).unwrap(),
        450.0,
        sink.clone(),
    );
    Fixture { backend, sink, manager: Arc::new(manager) }
}

#[tokio::test]
async fn selecting_a_collection_renders_the_first_viewport() {
    let fx = fixture(&[("bio", 1000)]).await;
    let outcome = fx.manager.select_collection(Some("bio")).await.unwrap();
    assert_eq!(outcome, FrameOutcome::Rendered { stamp: 1 });

    let frame = fx.sink.last().unwrap();
    assert_eq!(frame.collection.as_ref().map(|c| c.as_str()), Some("bio"));
    assert_eq!((frame.window.start, frame.window.count), (0, 12));
    assert_eq!(frame.window.total_height_px, 45_000);
    let ids: Vec<u64> = frame.records.iter().map(|r| r.id).collect();
    assert_eq!(ids, (1..=12).collect::<Vec<_>>());
}

#[tokio::test]
async fn scrolled_window_is_offset_by_whole_rows() {
    let fx = fixture(&[("bio", 1000)]).await;
    fx.manager.select_collection(Some("bio")).await.unwrap();
    fx.manager.scroll_to(4500.0).await.unwrap();

    let frame = fx.sink.last().unwrap();
    assert_eq!(frame.window.start, 100);
    assert_eq!(frame.window.top_offset_px, 4500);
    assert_eq!(frame.records.first().map(|r| r.term.as_str()), Some("bio-100"));
}

#[tokio::test]
async fn last_issued_read_wins_even_when_an_older_one_finishes_later() {
    let fx = fixture(&[("bio", 1000)]).await;
    fx.manager.select_collection(Some("bio")).await.unwrap();

    let gate_a = fx.backend.gate();
    let gate_b = fx.backend.gate();
    let gate_c = fx.backend.gate();
    let release = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        gate_a.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        gate_c.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        gate_b.send(()).unwrap();
    };
    let (a, b, c, ()) = tokio::join!(
        fx.manager.scroll_to(450.0),
        fx.manager.scroll_to(900.0),
        fx.manager.scroll_to(1350.0),
        release
    );

    assert_eq!(a.unwrap(), FrameOutcome::Rendered { stamp: 2 });
    assert_eq!(c.unwrap(), FrameOutcome::Rendered { stamp: 4 });
    assert_eq!(b.unwrap(), FrameOutcome::Superseded { stamp: 3 });

    let starts: Vec<usize> = fx.sink.frames().iter().map(|f| f.window.start).collect();
    assert_eq!(starts, [0, 10, 30], "the stale read for row 20 never renders");
    assert_eq!(fx.manager.last_rendered_stamp(), 4);
}

#[tokio::test]
async fn switching_collections_discards_reads_for_the_old_one() {
    let fx = fixture(&[("bio", 100), ("phys", 5)]).await;
    fx.manager.select_collection(Some("bio")).await.unwrap();

    let slow = fx.backend.gate();
    let (old, new, ()) = tokio::join!(fx.manager.scroll_to(900.0), fx.manager.select_collection(Some("phys")), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        slow.send(()).unwrap();
    });
    assert!(matches!(old.unwrap(), FrameOutcome::Superseded { .. }));
    assert!(matches!(new.unwrap(), FrameOutcome::Rendered { .. }));

    let last = fx.sink.last().unwrap();
    assert_eq!(last.collection.as_ref().map(|c| c.as_str()), Some("phys"));
    assert_eq!(last.records.len(), 5);
    assert_eq!(fx.manager.session().await.scroll_px, 0.0);
}

#[tokio::test]
async fn selecting_nothing_renders_an_empty_view_without_reading() {
    let fx = fixture(&[("bio", 10)]).await;
    fx.manager.select_collection(Some("bio")).await.unwrap();
    let reads = fx.backend.reads.load(Ordering::SeqCst);

    fx.manager.select_collection(None).await.unwrap();
    fx.manager.select_collection(Some("  ")).await.unwrap();
    let frame = fx.sink.last().unwrap();
    assert!(frame.collection.is_none());
    assert!(frame.records.is_empty());
    assert_eq!(frame.window.total_height_px, 0);
    assert_eq!(fx.backend.reads.load(Ordering::SeqCst), reads);
}

#[tokio::test]
async fn unknown_collection_leaves_the_view_alone() {
    let fx = fixture(&[("bio", 10)]).await;
    fx.manager.select_collection(Some("bio")).await.unwrap();
    let before = fx.sink.frames().len();

    let err = fx.manager.select_collection(Some("chem")).await.unwrap_err();
    assert!(matches!(err, Error::UnknownCollection(_)));
    assert_eq!(fx.sink.frames().len(), before);
    assert_eq!(fx.manager.session().await.collection.map(|c| c.as_str().to_string()), Some("bio".into()));
}

#[tokio::test]
async fn burst_of_scrolls_costs_one_read() {
    let fx = fixture(&[("bio", 1000)]).await;
    fx.manager.select_collection(Some("bio")).await.unwrap();
    let reads = fx.backend.reads.load(Ordering::SeqCst);

    for px in [100.0, 200.0, 1500.0, 3000.0] {
        fx.manager.on_scroll(px);
    }
    fx.manager.on_resize(900.0);
    assert!(matches!(fx.manager.next_frame().await.unwrap(), FrameOutcome::Rendered { .. }));
    assert_eq!(fx.backend.reads.load(Ordering::SeqCst), reads + 1);

    let frame = fx.sink.last().unwrap();
    assert_eq!(frame.window.start, 66);
    assert_eq!(frame.window.count, 22);
    assert_eq!(fx.manager.next_frame().await.unwrap(), FrameOutcome::Idle);
}

#[tokio::test]
async fn repeated_inputs_do_not_read_again() {
    let fx = fixture(&[("bio", 1000)]).await;
    fx.manager.select_collection(Some("bio")).await.unwrap();
    fx.manager.on_scroll(450.0);
    fx.manager.next_frame().await.unwrap();
    let reads = fx.backend.reads.load(Ordering::SeqCst);

    fx.manager.on_scroll(450.0);
    assert_eq!(fx.manager.next_frame().await.unwrap(), FrameOutcome::Unchanged);
    assert_eq!(fx.backend.reads.load(Ordering::SeqCst), reads);
}

#[tokio::test]
async fn failed_read_keeps_the_previous_frame() {
    let fx = fixture(&[("bio", 1000)]).await;
    fx.manager.select_collection(Some("bio")).await.unwrap();
    let before = fx.sink.last().unwrap();

    fx.backend.fail_reads.store(true, Ordering::SeqCst);
    let err = fx.manager.scroll_to(900.0).await.unwrap_err();
    assert!(matches!(err, Error::WindowRead { .. }));
    assert_eq!(fx.sink.last().unwrap(), before);

    fx.backend.fail_reads.store(false, Ordering::SeqCst);
    assert!(matches!(fx.manager.scroll_to(900.0).await.unwrap(), FrameOutcome::Rendered { .. }));
    assert_eq!(fx.sink.last().unwrap().window.start, 20);
}

#[tokio::test]
async fn refresh_picks_up_a_late_population() {
    let backend = Arc::new(GatedBackend::default());
    let registry = CollectionRegistry::new(["bio"]).unwrap();
    let store = Arc::new(RecordStore::open(backend, registry).await.unwrap());
    let sink = Arc::new(RecordingSink::default());
    let manager = WindowManager::new(store.clone(), WindowGeometry::new(45, 2).unwrap(), 450.0, sink.clone());

    manager.select_collection(Some("bio")).await.unwrap();
    assert!(sink.last().unwrap().records.is_empty());

    store.load_entries("bio", vec![("cell".into(), "unit of life".into())]).await.unwrap();
    manager.refresh().await.unwrap();
    let frame = sink.last().unwrap();
    assert_eq!(frame.records.len(), 1);
    assert_eq!(frame.window.total_height_px, 45);
}

#[tokio::test]
async fn frame_loop_renders_until_closed() {
    let fx = fixture(&[("bio", 1000)]).await;
    fx.manager.select_collection(Some("bio")).await.unwrap();

    let runner = {
        let manager = fx.manager.clone();
        tokio::spawn(async move { manager.run_frames().await })
    };
    fx.manager.on_scroll(2250.0);
    for _ in 0..100 {
        if fx.sink.last().map(|f| f.window.start) == Some(50) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(fx.sink.last().unwrap().window.start, 50);

    fx.manager.close();
    tokio::time::timeout(Duration::from_secs(1), runner).await.unwrap().unwrap();
}
