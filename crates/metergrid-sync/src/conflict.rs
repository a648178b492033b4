//! # Conflict Detection & Resolution
//!
//! Given a pending local operation and the corresponding current remote
//! record, decides whether the two have diverged, classifies the
//! divergence, and applies resolution strategies.
//!
//! ## Detection Order
//! ```text
//! add operation          ──► never a conflict (no prior server state)
//! server record missing  ──► delete conflict
//! exclusive-state field  ──► data conflict when the server's state is no
//!   (meters: status)         longer the state the client's basis assumed
//! last-modified marker   ──► version conflict when the server record is
//!                            strictly newer than the client's basis
//! otherwise              ──► no conflict, safe to replay
//! ```
//!
//! The exclusive-state check runs before the version check on purpose: a
//! concurrent sold/allocated transition must surface as a data conflict
//! and reach a human, never degrade into a version conflict that field
//! merging might paper over.
//!
//! ## Auto-Resolution
//! ```text
//! delete  ──► server wins (the stale local intent is discarded)
//! version ──► merge when client and server changed disjoint field sets,
//!             manual otherwise
//! data    ──► always manual (double-selling a meter is not recoverable)
//! ```
//!
//! Field comparison is a shallow, field-by-field inequality check. It does
//! not understand nested object diffs; two edits inside the same JSON blob
//! count as one changed field.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use metergrid_core::{
    Conflict, ConflictKind, OperationKind, PendingOperation, Resolution, AUDIT_FIELDS,
};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Field Diffing
// =============================================================================

/// The set of fields whose values differ between two records.
///
/// Shallow comparison over the union of both objects' keys; identity and
/// audit fields are never part of the result.
pub fn changed_fields(basis: &Value, current: &Value) -> BTreeSet<String> {
    let empty = serde_json::Map::new();
    let basis_map = basis.as_object().unwrap_or(&empty);
    let current_map = current.as_object().unwrap_or(&empty);

    let mut changed = BTreeSet::new();
    for key in basis_map.keys().chain(current_map.keys()) {
        if AUDIT_FIELDS.contains(&key.as_str()) {
            continue;
        }
        if basis_map.get(key) != current_map.get(key) {
            changed.insert(key.clone());
        }
    }
    changed
}

/// The fields a (possibly partial) client payload actually changes
/// relative to the basis.
///
/// Unlike [`changed_fields`], only keys present in the payload count:
/// a partial update leaves absent fields untouched, so they are not part
/// of the client's change-set.
pub fn patch_changed_fields(basis: &Value, patch: &Value) -> BTreeSet<String> {
    let empty = serde_json::Map::new();
    let patch_map = patch.as_object().unwrap_or(&empty);
    let basis_map = basis.as_object().unwrap_or(&empty);

    let mut changed = BTreeSet::new();
    for (key, value) in patch_map {
        if AUDIT_FIELDS.contains(&key.as_str()) {
            continue;
        }
        if basis_map.get(key.as_str()) != Some(value) {
            changed.insert(key.clone());
        }
    }
    changed
}

/// Parses a record's last-modified marker, when it carries one.
fn last_modified(record: &Value) -> Option<DateTime<Utc>> {
    record
        .get("updated_at")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|ts| ts.with_timezone(&Utc))
}

// =============================================================================
// Detection
// =============================================================================

/// Checks a pending operation against the current remote record.
///
/// Returns `None` when the operation is safe to replay.
pub fn detect(op: &PendingOperation, server: Option<&Value>) -> Option<Conflict> {
    // Adds have no prior server state to conflict with.
    if op.kind == OperationKind::Add {
        return None;
    }

    let entity_id = op.entity_id().unwrap_or_default().to_string();

    // Someone else removed the record.
    let server = match server {
        Some(record) => record,
        None => {
            debug!(entity = %op.entity, %entity_id, "Record vanished server-side");
            return Some(Conflict::new(
                &op.id,
                op.entity,
                entity_id,
                ConflictKind::Delete,
                op.data.clone(),
                None,
            ));
        }
    };

    if let Some(base) = op.base.as_ref() {
        // Exclusive-state invariant: the server's state moved away from
        // the state this operation was based on (e.g. the client queued
        // "set allocated" against in-stock, but the server already shows
        // sold).
        if let Some(field) = op.entity.exclusive_state_field() {
            if op.data.get(field).is_some() && base.get(field) != server.get(field) {
                debug!(
                    entity = %op.entity,
                    %entity_id,
                    field,
                    "Exclusive state diverged from the client's basis"
                );
                return Some(Conflict::new(
                    &op.id,
                    op.entity,
                    entity_id,
                    ConflictKind::Data,
                    op.data.clone(),
                    Some(server.clone()),
                ));
            }
        }

        // Version check: server modified more recently than the basis.
        if let (Some(base_ts), Some(server_ts)) = (last_modified(base), last_modified(server)) {
            if server_ts > base_ts {
                debug!(
                    entity = %op.entity,
                    %entity_id,
                    %base_ts,
                    %server_ts,
                    "Server record newer than the client's basis"
                );
                return Some(Conflict::new(
                    &op.id,
                    op.entity,
                    entity_id,
                    ConflictKind::Version,
                    op.data.clone(),
                    Some(server.clone()),
                ));
            }
        }
    }

    None
}

// =============================================================================
// Auto-Resolution
// =============================================================================

/// Picks the resolution strategy that is provably safe for a conflict, or
/// `Manual` when none is.
///
/// `basis` is the record the conflicting operation was based on; without
/// it a version conflict cannot prove its change-sets disjoint and falls
/// back to manual.
pub fn auto_resolve(conflict: &Conflict, basis: Option<&Value>) -> Resolution {
    match conflict.kind {
        // Remote deletion wins; the client's stale intent is discarded.
        ConflictKind::Delete => Resolution::Server,

        // Domain invariant violations are never auto-resolved: silently
        // overwriting a sale/allocation status risks double-allocation of
        // physical inventory.
        ConflictKind::Data => Resolution::Manual,

        ConflictKind::Version => {
            let (basis, server) = match (basis, conflict.server_data.as_ref()) {
                (Some(b), Some(s)) => (b, s),
                _ => return Resolution::Manual,
            };

            let client_changed = patch_changed_fields(basis, &conflict.client_data);
            let server_changed = changed_fields(basis, server);

            if client_changed.is_disjoint(&server_changed) {
                Resolution::Merge
            } else {
                Resolution::Manual
            }
        }
    }
}

/// Unions the client's changes onto the server record.
///
/// Starts from server data and overlays every field the client changed
/// relative to it, skipping identity and audit fields. Only used when
/// [`auto_resolve`] proved the change-sets disjoint.
pub fn merge_objects(client: &Value, server: &Value) -> Value {
    let mut merged = server.clone();

    if let (Some(fields), Some(target)) = (client.as_object(), merged.as_object_mut()) {
        for (key, value) in fields {
            if AUDIT_FIELDS.contains(&key.as_str()) {
                continue;
            }
            if target.get(key) != Some(value) {
                target.insert(key.clone(), value.clone());
            }
        }
    }

    merged
}

// =============================================================================
// Resolution
// =============================================================================

/// Applies a resolution strategy to a conflict, producing the final data.
///
/// - `Server`: final data is the server's record (absent for delete
///   conflicts, where there is nothing left to write)
/// - `Client`: final data is the client's pending payload
/// - `Merge`/`Manual`: the caller MUST supply `resolved_data`
///
/// Resolution is terminal: resolving an already-resolved conflict is
/// rejected, never silently re-resolved differently.
pub fn resolve(
    mut conflict: Conflict,
    strategy: Resolution,
    resolved_data: Option<Value>,
) -> SyncResult<Conflict> {
    if conflict.resolved {
        return Err(SyncError::AlreadyResolved {
            id: conflict.id.clone(),
        });
    }

    let final_data = match strategy {
        Resolution::Server => conflict.server_data.clone(),
        Resolution::Client => Some(conflict.client_data.clone()),
        Resolution::Merge | Resolution::Manual => Some(resolved_data.ok_or_else(|| {
            SyncError::InvalidArgument(format!(
                "resolved_data is required for {strategy} resolution"
            ))
        })?),
    };

    conflict.resolved = true;
    conflict.resolution = Some(strategy);
    conflict.resolved_data = final_data;
    conflict.resolved_at = Some(Utc::now());

    Ok(conflict)
}

// =============================================================================
// Unit Tests
// =============================================================================
