//! LanceDB-backed record backend: one table per collection, rows
//! `(id, term, definition)`.
pub mod schema;
pub mod table;

pub use table::LanceBackend;
