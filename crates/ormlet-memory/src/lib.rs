//! In-memory store adapter for ormlet.
//!
//! [`MemoryStore`] keeps every table in process memory and implements the
//! [`StoreAdapter`](ormlet_core::StoreAdapter) boundary the way a database
//! driver would: each fetch or write batch is one round trip, write batches
//! are all-or-nothing, and key, uniqueness and foreign key constraints are
//! enforced on every write.
//!
//! It also carries the hooks tests need to exercise failure paths:
//! injected transient [`Fault`]s, a fetch hook that runs before rows are
//! read, and per-store [`MemoryStats`] counters.
//!
//! The [`northwind`] module builds a seeded sample database.

pub mod config;
mod engine;
pub mod northwind;
pub mod store;
pub mod table;

pub use config::MemoryStoreConfig;
pub use store::{Fault, MemoryConnection, MemoryStats, MemoryStore, RoutineFn};
pub use table::{Table, TableSet};
