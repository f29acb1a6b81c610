//! Update notifier state machine.
//!
//! ```text
//! Idle --staged & complete & clients--> UpdateAvailable --accept--> Promoting
//!  ^                                         |                         |
//!  +----------------dismiss------------------+        GenerationChanged under
//!  +--------------------------------- Reloading <---- our client (once)
//! ```
//!
//! A generation change nobody asked for never reloads. A promotion that
//! cannot happen any more (the accepted generation was replaced or
//! reclaimed) drops back to `Idle` so newer releases are offered again.
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use termbook_cache::{AssetCacheManager, CacheClient, CacheEvent, UpdateDirective};
use termbook_core::types::GenerationTag;
use termbook_core::{Error, Result};

use crate::source::ReleaseSource;

/// Surfaces "a new version is available" to the user.
pub trait UpdatePrompt: Send + Sync {
    fn offer(&self, tag: &GenerationTag);
}

/// Reloads the host view so it picks up the new generation.
pub trait Reloader: Send + Sync {
    fn reload(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Dismiss,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierState {
    Idle,
    UpdateAvailable(GenerationTag),
    Promoting(GenerationTag),
    Reloading,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateSession {
    /// Tag the user accepted; only its activation allows a reload.
    pub promotion_requested: Option<GenerationTag>,
    pub dismissed: HashSet<GenerationTag>,
}

pub struct UpdateNotifier {
    cache: AssetCacheManager,
    client: Option<CacheClient>,
    events: broadcast::Receiver<CacheEvent>,
    directives: mpsc::Sender<UpdateDirective>,
    source: Arc<dyn ReleaseSource>,
    prompt: Arc<dyn UpdatePrompt>,
    reloader: Arc<dyn Reloader>,
    poll_interval: Duration,
    state: NotifierState,
    session: UpdateSession,
}

impl UpdateNotifier {
    /// Notifier for a view: connects its own cache client, which is what
    /// gets reloaded after a promotion.
    pub async fn connect(
        cache: AssetCacheManager,
        directives: mpsc::Sender<UpdateDirective>,
        source: Arc<dyn ReleaseSource>,
        prompt: Arc<dyn UpdatePrompt>,
        reloader: Arc<dyn Reloader>,
        poll_interval: Duration,
    ) -> Self {
        let client = cache.connect().await;
        let mut notifier = Self::headless(cache, directives, source, prompt, reloader, poll_interval);
        notifier.client = Some(client);
        notifier
    }

    /// Notifier without a view of its own. With no controlled clients it
    /// promotes complete releases silently.
    pub fn headless(
        cache: AssetCacheManager,
        directives: mpsc::Sender<UpdateDirective>,
        source: Arc<dyn ReleaseSource>,
        prompt: Arc<dyn UpdatePrompt>,
        reloader: Arc<dyn Reloader>,
        poll_interval: Duration,
    ) -> Self {
        let events = cache.subscribe();
        Self {
            cache,
            client: None,
            events,
            directives,
            source,
            prompt,
            reloader,
            poll_interval,
            state: NotifierState::Idle,
            session: UpdateSession::default(),
        }
    }

    pub fn state(&self) -> &NotifierState {
        &self.state
    }

    pub fn session(&self) -> &UpdateSession {
        &self.session
    }

    pub fn client(&self) -> Option<&CacheClient> {
        self.client.as_ref()
    }

    /// Ask the release source for something newer and stage it.
    pub async fn check_for_update(&mut self) -> Result<&NotifierState> {
        if let Some(release) = self.source.latest().await? {
            let active = self.cache.active().await;
            let staged = self.cache.staged().await.map(|s| s.tag);
            if active.as_ref() != Some(&release.tag) && staged.as_ref() != Some(&release.tag) {
                info!(tag = %release.tag, "new release found");
                self.cache.install(&release.tag, &release.manifest).await?;
            }
        }
        if let NotifierState::Promoting(tag) = &self.state {
            let pending = self.cache.staged().await.is_some_and(|s| &s.tag == tag && s.complete);
            if pending {
                debug!(tag = %tag, "promotion still pending; asking again");
                self.send_promote().await?;
            }
        }
        self.evaluate().await?;
        Ok(&self.state)
    }

    async fn send_promote(&self) -> Result<()> {
        self.directives
            .send(UpdateDirective::PromoteNow)
            .await
            .map_err(|_| Error::Storage("cache directive channel closed".into()))
    }

    /// Reload if our own client is now served by the accepted generation.
    fn finish_promotion(&mut self, current: &GenerationTag) {
        let ours = self.client.as_ref().and_then(CacheClient::controller);
        if ours.as_ref() == Some(current) {
            self.state = NotifierState::Reloading;
            info!(tag = %current, "generation changed; reloading");
            self.reloader.reload();
        } else {
            debug!(tag = %current, "promotion finished without an open client");
        }
    }

    /// Leave `Promoting` once the accepted generation is active or gone.
    /// Returns false while the promotion is still pending.
    async fn settle_promotion(&mut self) -> bool {
        let NotifierState::Promoting(accepted) = self.state.clone() else {
            return true;
        };
        if self.cache.active().await.as_ref() == Some(&accepted) {
            self.session.promotion_requested = None;
            self.finish_promotion(&accepted);
            self.state = NotifierState::Idle;
            return true;
        }
        if self.cache.staged().await.is_some_and(|s| s.tag == accepted && s.complete) {
            return false;
        }
        info!(tag = %accepted, "accepted generation is no longer staged; promotion dropped");
        self.session.promotion_requested = None;
        self.state = NotifierState::Idle;
        true
    }

    async fn evaluate(&mut self) -> Result<()> {
        if self.state == NotifierState::Reloading || !self.settle_promotion().await {
            return Ok(());
        }
        let Some(staged) = self.cache.staged().await else {
            self.state = NotifierState::Idle;
            return Ok(());
        };
        if !staged.complete {
            debug!(tag = %staged.tag, "staged generation incomplete; not offered");
            self.state = NotifierState::Idle;
            return Ok(());
        }
        if self.session.dismissed.contains(&staged.tag) {
            self.state = NotifierState::Idle;
            return Ok(());
        }

        let controlled = match self.cache.active().await {
            Some(active) => self.cache.controlled_clients(&active),
            None => 0,
        };
        if controlled == 0 {
            info!(tag = %staged.tag, "no open clients; promoting silently");
            self.cache.promote_staged().await?;
            self.state = NotifierState::Idle;
            return Ok(());
        }

        if self.state != NotifierState::UpdateAvailable(staged.tag.clone()) {
            info!(tag = %staged.tag, clients = controlled, "update available");
            self.prompt.offer(&staged.tag);
            self.state = NotifierState::UpdateAvailable(staged.tag);
        }
        Ok(())
    }

    /// User said yes: ask the cache manager to promote now.
    pub async fn accept(&mut self) -> Result<()> {
        let NotifierState::UpdateAvailable(tag) = &self.state else {
            debug!(state = ?self.state, "accept ignored; no update on offer");
            return Ok(());
        };
        let tag = tag.clone();
        // A failed send leaves the update on offer.
        self.send_promote().await?;
        self.session.promotion_requested = Some(tag.clone());
        self.state = NotifierState::Promoting(tag.clone());
        info!(tag = %tag, "promotion requested");
        Ok(())
    }

    /// User said not now: this tag is not offered again.
    pub fn dismiss(&mut self) {
        if let NotifierState::UpdateAvailable(tag) = &self.state {
            info!(tag = %tag, "update dismissed");
            self.session.dismissed.insert(tag.clone());
            self.state = NotifierState::Idle;
        }
    }

    pub async fn handle_event(&mut self, event: CacheEvent) -> Result<()> {
        match event {
            CacheEvent::Staged { .. } => self.evaluate().await,
            CacheEvent::GenerationChanged { current, .. } => {
                match self.session.promotion_requested.take() {
                    Some(accepted) if accepted == current => self.finish_promotion(&current),
                    Some(accepted) => {
                        debug!(accepted = %accepted, tag = %current, "another generation was activated; promotion dropped")
                    }
                    None => debug!(tag = %current, "generation changed without a request; not reloading"),
                }
                self.state = NotifierState::Idle;
                self.evaluate().await
            }
        }
    }

    /// Handle every event already queued. Returns how many were handled.
    pub async fn drain_events(&mut self) -> Result<usize> {
        let mut handled = 0;
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    self.handle_event(event).await?;
                    handled += 1;
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "cache events dropped; re-evaluating");
                    self.evaluate().await?;
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return Ok(handled),
            }
        }
    }

    /// Poll on the configured interval (first poll immediately), react to
    /// cache events and user decisions until `shutdown` resolves.
    pub async fn run<F>(mut self, mut decisions: mpsc::Receiver<Decision>, shutdown: F) -> Self
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.check_for_update().await {
                        warn!(error = %e, "update check failed");
                    }
                }
                event = self.events.recv() => {
                    let handled = match event {
                        Ok(event) => self.handle_event(event).await,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "cache events dropped; re-evaluating");
                            self.evaluate().await
                        }
                        Err(RecvError::Closed) => break,
                    };
                    if let Err(e) = handled {
                        warn!(error = %e, "cache event handling failed");
                    }
                }
                Some(decision) = decisions.recv() => {
                    let handled = match decision {
                        Decision::Accept => self.accept().await,
                        Decision::Dismiss => {
                            self.dismiss();
                            Ok(())
                        }
                    };
                    if let Err(e) = handled {
                        warn!(error = %e, "decision handling failed");
                    }
                }
            }
        }
        debug!("update notifier stopped");
        self
    }
}
