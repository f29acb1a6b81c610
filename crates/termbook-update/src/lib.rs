//! termbook-update
//!
//! Watches for new asset releases, stages them, asks the user before
//! promoting, and reloads open views once the promotion has taken effect.
pub mod notifier;
pub mod source;

pub use notifier::{Decision, NotifierState, Reloader, UpdateNotifier, UpdatePrompt, UpdateSession};
pub use source::{DirReleaseSource, ReleaseSource, StaticReleaseSource};
