use termbook_core::types::GenerationTag;

/// Broadcast to every connected client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// An install finished; `complete` is false if some resources failed.
    Staged { tag: GenerationTag, complete: bool },
    /// The serving generation changed and all open clients were claimed.
    GenerationChanged { previous: Option<GenerationTag>, current: GenerationTag },
}

/// Sent to the cache manager over its directive channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateDirective {
    /// Activate the staged generation without waiting for clients to close.
    PromoteNow,
}
