//! # Pending Operations & Record Identity
//!
//! Bookkeeping types for the offline write path.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  OFFLINE MUTATION (e.g., update_meter_status)                       │
//! │       │                                                             │
//! │       ▼                                                             │
//! │  1. Patch local snapshot optimistically                             │
//! │  2. Append PendingOperation to the durable queue                    │
//! │       │                                                             │
//! │       ▼                                                             │
//! │  BACKGROUND SYNC (later, when connectivity returns)                 │
//! │  • Replay operations oldest-first against the remote service        │
//! │  • Conflict check per update/delete before mutating                 │
//! │  • Remove from queue on success or safe auto-resolution            │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::EntityKind;

// =============================================================================
// Operation Kind
// =============================================================================

/// The mutation a pending operation replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Add,
    Update,
    Delete,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Add => write!(f, "add"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

// =============================================================================
// Pending Operation
// =============================================================================

/// A mutation not yet confirmed by the remote service.
///
/// `data` is the payload in the remote service's field convention, replayed
/// verbatim. `base` is the record as the client last saw it and is what
/// conflict detection compares against; it is `None` for adds, which by
/// definition have no prior server state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Unique identifier, assigned at enqueue time.
    pub id: String,

    /// Creation time. Replay order is oldest-first; operations on the same
    /// entity must replay in the order they were created.
    pub timestamp: DateTime<Utc>,

    pub entity: EntityKind,

    pub kind: OperationKind,

    /// Replayable payload in remote field convention.
    pub data: Value,

    /// The client's basis: the record as last seen before this mutation.
    pub base: Option<Value>,
}

impl PendingOperation {
    /// Creates an operation with a fresh id and timestamp.
    pub fn new(entity: EntityKind, kind: OperationKind, data: Value, base: Option<Value>) -> Self {
        PendingOperation {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            entity,
            kind,
            data,
            base,
        }
    }

    /// The id of the record this operation targets.
    pub fn entity_id(&self) -> Option<&str> {
        self.data.get("id").and_then(Value::as_str)
    }
}

// =============================================================================
// Record Identity
// =============================================================================

/// Whether a locally cached record is server-confirmed or an optimistic
/// offline write awaiting its server-assigned id.
///
/// Modelling this explicitly makes post-sync reconciliation (swapping the
/// temp id for the server id everywhere it is referenced) a traceable
/// operation rather than implicit array splicing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RecordIdentity {
    /// The record exists remotely under this id.
    Confirmed { server_id: String },

    /// Created offline; `operation_id` is the queued add that will create
    /// it remotely.
    Pending {
        temp_id: String,
        operation_id: String,
    },
}

impl RecordIdentity {
    /// The id this record is currently addressable by.
    pub fn id(&self) -> &str {
        match self {
            RecordIdentity::Confirmed { server_id } => server_id,
            RecordIdentity::Pending { temp_id, .. } => temp_id,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, RecordIdentity::Pending { .. })
    }
}

// =============================================================================
// Stored Record
// =============================================================================

/// An entity snapshot as held in the durable local store: identity plus the
/// record data in remote field convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub identity: RecordIdentity,
    pub data: Value,
}

impl StoredRecord {
    /// Wraps a server-confirmed record.
    pub fn confirmed(data: Value) -> Self {
        let server_id = data
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        StoredRecord {
            identity: RecordIdentity::Confirmed { server_id },
            data,
        }
    }

    /// Wraps an optimistic offline write.
    pub fn pending(temp_id: impl Into<String>, operation_id: impl Into<String>, data: Value) -> Self {
        StoredRecord {
            identity: RecordIdentity::Pending {
                temp_id: temp_id.into(),
                operation_id: operation_id.into(),
            },
            data,
        }
    }

    pub fn id(&self) -> &str {
        self.identity.id()
    }
}

// =============================================================================
// Reference Rewriting
// =============================================================================

/// Replaces every string occurrence of `from` with `to` anywhere in `value`.
///
/// Used when a server id is assigned to a record created offline: queued
/// payloads and cached snapshots may reference the temp id (a sale's meter
/// ids, a meter's customer id) and must be rewritten in place.
pub fn replace_id_refs(value: &mut Value, from: &str, to: &str) {
    match value {
        Value::String(s) => {
            if s == from {
                *s = to.to_string();
            }
        }
        Value::Array(items) => {
            for item in items {
                replace_id_refs(item, from, to);
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                replace_id_refs(v, from, to);
            }
        }
        _ => {}
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operation_carries_fresh_id_and_timestamp() {
        let op = PendingOperation::new(
            EntityKind::Meter,
            OperationKind::Update,
            json!({"id": "m1", "status": "allocated"}),
            Some(json!({"id": "m1", "status": "in-stock"})),
        );
        assert!(!op.id.is_empty());
        assert_eq!(op.entity_id(), Some("m1"));
    }

    #[test]
    fn identity_roundtrips_through_json() {
        let identity = RecordIdentity::Pending {
            temp_id: "local-abc".into(),
            operation_id: "op-1".into(),
        };
        let json = serde_json::to_string(&identity).unwrap();
        let back: RecordIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, identity);
        assert_eq!(back.id(), "local-abc");
        assert!(back.is_pending());
    }

    #[test]
    fn replace_id_refs_rewrites_nested_values() {
        let mut sale = json!({
            "id": "s1",
            "customer_id": "local-cust",
            "items": [
                {"meter_id": "local-cust", "price_cents": 100},
                {"meter_id": "m2", "price_cents": 200}
            ]
        });
        replace_id_refs(&mut sale, "local-cust", "srv-9");
        assert_eq!(sale["customer_id"], "srv-9");
        assert_eq!(sale["items"][0]["meter_id"], "srv-9");
        assert_eq!(sale["items"][1]["meter_id"], "m2");
    }
}
