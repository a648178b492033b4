//! # metergrid-db: Durable Local Store for MeterGrid
//!
//! Local persistence layer for the offline-first core: a SQLite-backed
//! durable key-value map and the [`LocalStore`] component built on top of
//! it, holding entity snapshot caches, the pending-operation queue, the
//! conflict history, and the last-sync timestamp.
//!
//! ## Storage Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      kv_entries (SQLite)                            │
//! │                                                                     │
//! │  key                          value                                 │
//! │  ───────────────────────────  ────────────────────────────────     │
//! │  snapshot:products            [StoredRecord, ...]                   │
//! │  snapshot:meters              [StoredRecord, ...]                   │
//! │  snapshot:customers           [StoredRecord, ...]                   │
//! │  snapshot:sales_transactions  [StoredRecord, ...]                   │
//! │  pending_operations           [PendingOperation, ...] (FIFO)        │
//! │  conflicts                    [Conflict, ...]                       │
//! │  last_sync                    RFC3339 timestamp                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! No network access happens in this crate; every call is local and every
//! write is immediately durable.

pub mod error;
pub mod kv;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use kv::{KvBackend, KvConfig, MemoryKv, SqliteKv};
pub use store::LocalStore;
