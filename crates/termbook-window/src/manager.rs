use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use termbook_core::traits::RenderSink;
use termbook_core::types::{CollectionName, RenderFrame, Window};
use termbook_core::Result;
use termbook_store::RecordStore;

use crate::geometry::WindowGeometry;
use crate::scheduler::{LatestSlot, StampSequencer};
use crate::session::ViewSession;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct PendingInput {
    scroll_px: Option<f64>,
    viewport_px: Option<f64>,
}

/// What became of one frame request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The read completed and reached the sink.
    Rendered { stamp: u64 },
    /// The read completed after a newer one had already rendered; dropped.
    Superseded { stamp: u64 },
    /// Inputs matched the previous read, nothing was fetched.
    Unchanged,
    /// No scroll or resize was pending.
    Idle,
}

struct Issued {
    stamp: u64,
    collection: Option<CollectionName>,
    window: Window,
}

/// Turns scroll and resize events into stamped window reads.
///
/// Events land in a depth-1 slot and are drained by [`next_frame`], so a
/// burst of scrolls costs at most one read per frame. Reads may complete out
/// of order; a result only reaches the sink if no newer stamp has rendered.
///
/// [`next_frame`]: WindowManager::next_frame
pub struct WindowManager {
    store: Arc<RecordStore>,
    geometry: WindowGeometry,
    session: Mutex<ViewSession>,
    sequencer: StampSequencer,
    pending: LatestSlot<PendingInput>,
    sink: Arc<dyn RenderSink>,
}

impl WindowManager {
    pub fn new(
        store: Arc<RecordStore>,
        geometry: WindowGeometry,
        viewport_px: f64,
        sink: Arc<dyn RenderSink>,
    ) -> Self {
        Self {
            store,
            geometry,
            session: Mutex::new(ViewSession::new(viewport_px)),
            sequencer: StampSequencer::new(),
            pending: LatestSlot::new(),
            sink,
        }
    }

    pub fn geometry(&self) -> WindowGeometry {
        self.geometry
    }

    pub async fn session(&self) -> ViewSession {
        self.session.lock().await.clone()
    }

    pub fn last_rendered_stamp(&self) -> u64 {
        self.sequencer.last_committed()
    }

    /// Select a collection, or clear the view with `None` / an empty name.
    ///
    /// Unknown names fail without touching the current view. Otherwise the
    /// scroll position resets, pending events are discarded and the first
    /// viewport is read. Any read still in flight for the old collection
    /// carries an older stamp and will not render.
    pub async fn select_collection(&self, name: Option<&str>) -> Result<FrameOutcome> {
        let selected = match name.map(str::trim).filter(|n| !n.is_empty()) {
            None => None,
            Some(name) => {
                let total = self.store.count(name).await?;
                let handle = self.store.registry().resolve(name)?;
                Some((handle.name.clone(), total))
            }
        };
        self.pending.take();
        let issued = {
            let mut session = self.session.lock().await;
            match selected {
                Some((collection, total)) => session.select(Some(collection), total),
                None => session.select(None, 0),
            }
            session.mark_issued();
            self.issue(&session)
        };
        debug!(stamp = issued.stamp, collection = ?issued.collection, "collection selected");
        self.complete(issued).await
    }

    pub fn on_scroll(&self, scroll_px: f64) {
        self.pending.merge(|p| PendingInput { scroll_px: Some(scroll_px), ..p.unwrap_or_default() });
    }

    pub fn on_resize(&self, viewport_px: f64) {
        self.pending.merge(|p| PendingInput { viewport_px: Some(viewport_px), ..p.unwrap_or_default() });
    }

    /// Drain pending events and issue at most one read for them.
    pub async fn next_frame(&self) -> Result<FrameOutcome> {
        let Some(input) = self.pending.take() else {
            return Ok(FrameOutcome::Idle);
        };
        let issued = {
            let mut session = self.session.lock().await;
            if let Some(px) = input.scroll_px {
                session.scroll_px = px;
            }
            if let Some(px) = input.viewport_px {
                session.viewport_px = px;
            }
            if !session.mark_issued() {
                return Ok(FrameOutcome::Unchanged);
            }
            self.issue(&session)
        };
        self.complete(issued).await
    }

    /// Read the window at `scroll_px` right away, bypassing the event slot.
    pub async fn scroll_to(&self, scroll_px: f64) -> Result<FrameOutcome> {
        let issued = {
            let mut session = self.session.lock().await;
            session.scroll_px = scroll_px;
            if !session.mark_issued() {
                return Ok(FrameOutcome::Unchanged);
            }
            self.issue(&session)
        };
        self.complete(issued).await
    }

    /// Re-count the selected collection and re-read the current window.
    pub async fn refresh(&self) -> Result<FrameOutcome> {
        let collection = self.session.lock().await.collection.clone();
        let total = match &collection {
            Some(name) => self.store.count(name.as_str()).await?,
            None => 0,
        };
        let issued = {
            let mut session = self.session.lock().await;
            if session.collection != collection {
                // Selection changed underneath us; that selection already read.
                return Ok(FrameOutcome::Unchanged);
            }
            session.total_count = total;
            session.forget_issued();
            session.mark_issued();
            self.issue(&session)
        };
        self.complete(issued).await
    }

    /// Drive frames until [`close`](Self::close) is called. Read failures are
    /// logged; the sink keeps showing the previous frame.
    pub async fn run_frames(&self) {
        while self.pending.ready().await {
            if let Err(e) = self.next_frame().await {
                warn!(error = %e, "window read failed; keeping previous frame");
            }
        }
        debug!("frame loop stopped");
    }

    pub fn close(&self) {
        self.pending.close();
    }

    fn issue(&self, session: &ViewSession) -> Issued {
        let window = match session.collection {
            Some(_) => self.geometry.compute(session.total_count, session.scroll_px, session.viewport_px),
            None => Window::default(),
        };
        Issued { stamp: self.sequencer.issue(), collection: session.collection.clone(), window }
    }

    async fn complete(&self, issued: Issued) -> Result<FrameOutcome> {
        let Issued { stamp, collection, window } = issued;
        let records = match &collection {
            Some(name) if !window.is_empty() => {
                match self.store.window_read(name.as_str(), window.start, window.count).await {
                    Ok(records) => records,
                    Err(e) => {
                        // Same inputs must be allowed to retry.
                        self.session.lock().await.forget_issued();
                        return Err(e);
                    }
                }
            }
            _ => Vec::new(),
        };
        let frame = RenderFrame { stamp, collection, window, records };
        if self.sequencer.commit_with(stamp, || self.sink.render(frame)) {
            Ok(FrameOutcome::Rendered { stamp })
        } else {
            debug!(stamp, latest = self.sequencer.last_committed(), "stale window read dropped");
            Ok(FrameOutcome::Superseded { stamp })
        }
    }
}
