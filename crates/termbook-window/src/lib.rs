//! termbook-window
//!
//! Maps a scroll offset and viewport height to the minimal slice of a
//! collection, reads it from the record store and hands it to a render sink.
//! Reads are sequence-stamped so the newest issued read always wins.
pub mod geometry;
pub mod manager;
pub mod scheduler;
pub mod session;

pub use geometry::WindowGeometry;
pub use manager::{FrameOutcome, WindowManager};
pub use scheduler::{LatestSlot, StampSequencer};
pub use session::ViewSession;
