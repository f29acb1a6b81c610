//! termbook-store
//!
//! Named, ordered term/definition collections with bulk population, windowed
//! reads and prefix search. Backends live in `memory` and `lance`.
pub mod lance;
pub mod memory;
pub mod registry;
pub mod source;
pub mod store;

pub use lance::LanceBackend;
pub use memory::MemoryBackend;
pub use registry::{CollectionHandle, CollectionRegistry};
pub use source::JsonDirSource;
pub use store::{LoadOutcome, PopulationReport, RecordStore};
