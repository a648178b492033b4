//! # metergrid-sync: Offline-First Sync Engine for MeterGrid
//!
//! This crate provides the synchronization layer for MeterGrid, enabling
//! offline-first operation against a record-oriented remote service with
//! background sync and explicit conflict resolution.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        Sync Layer Architecture                      │
//! │                                                                     │
//! │  Presentation layer                                                 │
//! │       │                                                             │
//! │       ▼                                                             │
//! │  ┌──────────────────────────────────────────────────────────────┐   │
//! │  │                  Inventory (facade)                          │   │
//! │  │                                                              │   │
//! │  │  online?  ──► write remote, mirror authoritative result      │   │
//! │  │  offline? ──► temp id, optimistic snapshot, queue operation  │   │
//! │  └───────┬──────────────────────────┬───────────────────────────┘   │
//! │          │                          │                               │
//! │          ▼                          ▼                               │
//! │  ┌────────────────┐  ┌────────────────────────────────────────┐     │
//! │  │ Connectivity   │  │ SyncEngine                             │     │
//! │  │ monitor        │  │                                        │     │
//! │  │ (bounded probe │  │ drains queue oldest-first, one bounded │     │
//! │  │  + retry)      │  │ remote call at a time                  │     │
//! │  └────────────────┘  └───────────────┬────────────────────────┘     │
//! │                                      │                              │
//! │                                      ▼                              │
//! │                      ┌────────────────────────────────────────┐     │
//! │                      │ Conflict detector & resolver           │     │
//! │                      │ delete / version / data; auto-resolve  │     │
//! │                      │ only where provably safe               │     │
//! │                      └────────────────────────────────────────┘     │
//! │                                                                     │
//! │  SyncWatcher: periodic connectivity re-check, opportunistic drain   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use metergrid_db::{KvConfig, LocalStore};
//! use metergrid_sync::{HttpRemote, Inventory, SyncConfig, SyncWatcher};
//!
//! let config = SyncConfig::load_or_default("metergrid.toml")?;
//! let store = LocalStore::open(KvConfig::new("metergrid.db")).await?;
//! let remote = Arc::new(HttpRemote::new(&config.remote)?);
//!
//! let inventory = Inventory::new(store, remote, &config);
//! let watcher = SyncWatcher::spawn(
//!     inventory.monitor(),
//!     inventory.engine(),
//!     config.engine.poll_interval(),
//! );
//!
//! // The dashboard talks to `inventory` only.
//! let meters = inventory.meters().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod conflict;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod facade;
pub mod remote;
pub mod retry;
pub mod watcher;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{EngineSettings, ProbeSettings, RemoteSettings, SyncConfig};
pub use connectivity::{ConnState, ConnectivityMonitor};
pub use engine::{SyncEngine, SyncReport, SyncStatus};
pub use error::{SyncError, SyncResult};
pub use facade::{
    Inventory, NewCustomer, NewMeter, NewProduct, NewSale, NewSaleItem, SaleReceipt,
};
pub use remote::{HttpRemote, MemoryRemote, RemoteStore};
pub use retry::{with_retry, RetryPolicy};
pub use watcher::{SyncWatcher, SyncWatcherHandle};
