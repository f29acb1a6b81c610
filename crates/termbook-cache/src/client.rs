use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};

use termbook_core::types::GenerationTag;

use crate::events::CacheEvent;
use crate::manager::Inner;

/// An open page/window served by the cache. Deregisters on drop.
pub struct CacheClient {
    id: u64,
    inner: Arc<Inner>,
    events: broadcast::Receiver<CacheEvent>,
}

impl CacheClient {
    pub(crate) fn new(id: u64, inner: Arc<Inner>, events: broadcast::Receiver<CacheEvent>) -> Self {
        Self { id, inner, events }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Generation serving this client; `None` until one is activated.
    pub fn controller(&self) -> Option<GenerationTag> {
        self.inner.controller_of(self.id)
    }

    /// Next cache event, or `None` once the manager is gone. Lagged events are
    /// skipped.
    pub async fn next_event(&mut self) -> Option<CacheEvent> {
        loop {
            match self.events.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => warn!(client = self.id, skipped, "cache events dropped"),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_next_event(&mut self) -> Option<CacheEvent> {
        loop {
            match self.events.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => warn!(client = self.id, skipped, "cache events dropped"),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for CacheClient {
    fn drop(&mut self) {
        self.inner.deregister(self.id);
        debug!(client = self.id, "client disconnected");
    }
}
