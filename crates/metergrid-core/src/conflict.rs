//! # Conflict Records
//!
//! A conflict is a detected divergence between a pending local operation and
//! the current authoritative remote state. Conflicts are data, not errors:
//! they flow through the sync engine's normal return path and are persisted
//! for the lifetime of the local session.
//!
//! ## Conflict Kinds
//! ```text
//! delete   the record vanished server-side while a local edit was queued
//! version  the server record was modified more recently than the client's
//!          basis
//! data     a domain invariant diverged (e.g. a meter already marked sold)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::EntityKind;

// =============================================================================
// Conflict Kind
// =============================================================================

/// Classification of a detected divergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Record no longer exists server-side.
    Delete,
    /// Server record modified more recently than the client's basis.
    Version,
    /// Domain-specific invariant violation on an exclusive-state field.
    Data,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictKind::Delete => write!(f, "delete"),
            ConflictKind::Version => write!(f, "version"),
            ConflictKind::Data => write!(f, "data"),
        }
    }
}

// =============================================================================
// Resolution Strategy
// =============================================================================

/// How a conflict was, or must be, reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// The remote record wins; the client's stale intent is discarded.
    Server,
    /// The client's pending payload wins.
    Client,
    /// Disjoint change-sets unioned onto the server record.
    Merge,
    /// Requires an externally supplied final value.
    Manual,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resolution::Server => write!(f, "server"),
            Resolution::Client => write!(f, "client"),
            Resolution::Merge => write!(f, "merge"),
            Resolution::Manual => write!(f, "manual"),
        }
    }
}

// =============================================================================
// Conflict
// =============================================================================

/// A detected divergence between a pending operation and remote state.
///
/// Invariant: immutable once `resolved` is true, except for the audit
/// fields written by the resolution itself. Re-resolution through the same
/// record is rejected by the resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,

    /// The pending operation that triggered detection.
    pub operation_id: String,

    pub entity: EntityKind,

    /// The record in dispute.
    pub entity_id: String,

    pub kind: ConflictKind,

    /// The client's divergent view (the pending payload).
    pub client_data: Value,

    /// The server's divergent view; `None` for delete conflicts.
    pub server_data: Option<Value>,

    pub resolved: bool,

    /// Strategy applied, once resolved.
    pub resolution: Option<Resolution>,

    /// Final payload, once resolved. `None` when the server side won a
    /// delete conflict (there is nothing left to write).
    pub resolved_data: Option<Value>,

    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Conflict {
    /// Creates an unresolved conflict for the given operation.
    pub fn new(
        operation_id: impl Into<String>,
        entity: EntityKind,
        entity_id: impl Into<String>,
        kind: ConflictKind,
        client_data: Value,
        server_data: Option<Value>,
    ) -> Self {
        Conflict {
            id: Uuid::new_v4().to_string(),
            operation_id: operation_id.into(),
            entity,
            entity_id: entity_id.into(),
            kind,
            client_data,
            server_data,
            resolved: false,
            resolution: None,
            resolved_data: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_conflict_starts_unresolved() {
        let conflict = Conflict::new(
            "op-1",
            EntityKind::Meter,
            "m1",
            ConflictKind::Data,
            json!({"id": "m1", "status": "allocated"}),
            Some(json!({"id": "m1", "status": "sold"})),
        );
        assert!(!conflict.resolved);
        assert!(conflict.resolution.is_none());
        assert!(conflict.resolved_at.is_none());
    }

    #[test]
    fn kind_and_resolution_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&ConflictKind::Version).unwrap(),
            "\"version\""
        );
        assert_eq!(
            serde_json::to_string(&Resolution::Manual).unwrap(),
            "\"manual\""
        );
    }
}
