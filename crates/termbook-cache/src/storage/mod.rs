//! [`GenerationStorage`](termbook_core::traits::GenerationStorage) backends.
mod fs;
mod memory;

pub use fs::FsStorage;
pub use memory::MemoryStorage;
