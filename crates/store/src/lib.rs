//! Storage backends for Conclave.
//!
//! Both backends implement every trait in `conclave_core::store`. SQLite is
//! the shared, persistent backend; the in-memory store serves tests and
//! single-process runs.

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
