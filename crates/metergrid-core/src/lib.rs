//! # metergrid-core: Pure Domain Logic for MeterGrid
//!
//! This crate is the heart of MeterGrid. It contains the domain model for
//! tracking electricity meters through their lifecycle (stock-in, allocation,
//! installation, sale, return, repair) plus the bookkeeping types the
//! offline-first sync layer is built on: pending operations, conflict
//! records, and record identity.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     MeterGrid Architecture                          │
//! │                                                                     │
//! │  Presentation layer (dashboard pages, dialogs, tables)              │
//! │       │                                                             │
//! │       ▼                                                             │
//! │  metergrid-sync   Inventory facade, conflict resolution, engine     │
//! │       │                                                             │
//! │       ▼                                                             │
//! │  metergrid-db     Durable local store (snapshots, op queue)         │
//! │       │                                                             │
//! │       ▼                                                             │
//! │  ★ metergrid-core (THIS CRATE) ★                                    │
//! │                                                                     │
//! │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS                │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain entities (Product, Meter, Customer, Sale) and the
//!   closed [`types::EntityKind`] set
//! - [`operation`] - Pending mutations and optimistic record identity
//! - [`conflict`] - Conflict records and resolution strategies
//! - [`error`] - Domain error types
//! - [`validation`] - Status transitions and input validation
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: Every function is deterministic where possible
//! 2. **No I/O**: Database, network, file system access is FORBIDDEN here
//! 3. **Explicit Errors**: All errors are typed, never strings or panics
//! 4. **Remote field convention**: Every entity serializes to the exact
//!    snake_case JSON the remote service stores, so queued payloads replay
//!    verbatim

// =============================================================================
// Module Declarations
// =============================================================================

pub mod conflict;
pub mod error;
pub mod operation;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use conflict::{Conflict, ConflictKind, Resolution};
pub use error::{CoreError, CoreResult, ValidationError};
pub use operation::{OperationKind, PendingOperation, RecordIdentity, StoredRecord};
pub use types::{Customer, EntityKind, Meter, MeterStatus, Product, Sale, SaleItem};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Fields never considered when diffing or merging divergent records.
///
/// `id` is identity, the two timestamps are audit columns the remote service
/// maintains itself.
pub const AUDIT_FIELDS: &[&str] = &["id", "created_at", "updated_at"];

/// Prefix for locally generated temporary ids assigned to records created
/// while offline. Replaced by the server-assigned id at sync time.
pub const TEMP_ID_PREFIX: &str = "local-";

/// Returns true when `id` is a locally generated temporary id.
pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Generates a collision-resistant temporary id for an offline write.
pub fn new_temp_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4())
}
