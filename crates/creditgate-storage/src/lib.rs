//! Storage backends for CreditGate
//!
//! Implements the [`creditgate_core::MeteringStore`] trait twice: an
//! in-memory backend for tests and development, and a SQLite backend for
//! single-node deployments. Multi-entity operations (debit, subscription
//! activation) are atomic inside each backend: one write-lock section in
//! memory, one SQL transaction in SQLite.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
