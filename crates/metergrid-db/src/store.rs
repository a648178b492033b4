//! # Local Store
//!
//! The durable local cache the sync core runs on: entity snapshots per
//! kind, the FIFO queue of pending operations, the conflict history, and
//! the last successful synchronization timestamp.
//!
//! Pure storage; no business logic and no network access. Every write goes
//! straight through to the [`KvBackend`], so there is no batching window in
//! which a crash could lose a queued operation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use metergrid_core::operation::replace_id_refs;
use metergrid_core::{Conflict, EntityKind, PendingOperation, StoredRecord};

use crate::error::{StoreError, StoreResult};
use crate::kv::{KvBackend, KvConfig, SqliteKv};

// =============================================================================
// Storage Keys
// =============================================================================

const KEY_PENDING: &str = "pending_operations";
const KEY_CONFLICTS: &str = "conflicts";
const KEY_LAST_SYNC: &str = "last_sync";

fn snapshot_key(kind: EntityKind) -> String {
    format!("snapshot:{}", kind.collection())
}

// =============================================================================
// Local Store
// =============================================================================

/// Durable local store for snapshots, the pending-operation queue, conflict
/// history, and the last-sync timestamp.
#[derive(Clone)]
pub struct LocalStore {
    kv: Arc<dyn KvBackend>,
}

impl LocalStore {
    /// Wraps an existing backend. Tests inject [`crate::kv::MemoryKv`] here.
    pub fn new(kv: Arc<dyn KvBackend>) -> Self {
        LocalStore { kv }
    }

    /// Opens a SQLite-backed store at the configured path.
    pub async fn open(config: KvConfig) -> StoreResult<Self> {
        let kv = SqliteKv::connect(config).await?;
        Ok(LocalStore { kv: Arc::new(kv) })
    }

    // =========================================================================
    // JSON plumbing
    // =========================================================================

    async fn read_list<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Vec<T>> {
        match self.kv.get(key).await? {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| StoreError::CorruptValue {
                key: key.to_string(),
                reason: e.to_string(),
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn write_list<T: Serialize>(&self, key: &str, items: &[T]) -> StoreResult<()> {
        let raw = serde_json::to_string(items).map_err(|e| StoreError::CorruptValue {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.kv.set(key, &raw).await
    }

    // =========================================================================
    // Entity Snapshots
    // =========================================================================

    /// Returns the cached snapshot list for one entity kind.
    pub async fn entities(&self, kind: EntityKind) -> StoreResult<Vec<StoredRecord>> {
        self.read_list(&snapshot_key(kind)).await
    }

    /// Wholesale replace of one entity kind's snapshot (full refresh).
    pub async fn save_entities(
        &self,
        kind: EntityKind,
        records: Vec<StoredRecord>,
    ) -> StoreResult<()> {
        debug!(kind = %kind, count = records.len(), "Replacing entity snapshot");
        self.write_list(&snapshot_key(kind), &records).await
    }

    /// Looks a single record up by its current id (server id or temp id).
    pub async fn find_record(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> StoreResult<Option<StoredRecord>> {
        let records = self.entities(kind).await?;
        Ok(records.into_iter().find(|r| r.id() == id))
    }

    /// Inserts or replaces a single record (individual patch after a
    /// successful single-entity sync or an optimistic local write).
    pub async fn upsert_record(&self, kind: EntityKind, record: StoredRecord) -> StoreResult<()> {
        let mut records = self.entities(kind).await?;
        match records.iter_mut().find(|r| r.id() == record.id()) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        self.write_list(&snapshot_key(kind), &records).await
    }

    /// Removes a single record from the snapshot, if present.
    pub async fn remove_record(&self, kind: EntityKind, id: &str) -> StoreResult<()> {
        let mut records = self.entities(kind).await?;
        records.retain(|r| r.id() != id);
        self.write_list(&snapshot_key(kind), &records).await
    }

    /// Confirms an offline-created record under its server-assigned id.
    ///
    /// Swaps the pending identity for a confirmed one, replaces the cached
    /// data with the authoritative server record, and rewrites every
    /// reference to the temp id in the remaining pending queue and in the
    /// other snapshots (a queued sale's meter ids, a meter's customer id).
    pub async fn confirm_record(
        &self,
        kind: EntityKind,
        temp_id: &str,
        server_data: Value,
    ) -> StoreResult<()> {
        let server_id = server_data
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::CorruptValue {
                key: snapshot_key(kind),
                reason: "server record without id".to_string(),
            })?
            .to_string();

        debug!(kind = %kind, temp_id, server_id = %server_id, "Confirming record");

        // Replace the pending record itself.
        let mut records = self.entities(kind).await?;
        records.retain(|r| r.id() != temp_id);
        records.push(StoredRecord::confirmed(server_data));
        self.write_list(&snapshot_key(kind), &records).await?;

        // Rewrite references in all snapshots.
        for other in EntityKind::ALL {
            if other == kind {
                continue;
            }
            let mut records = self.entities(other).await?;
            let mut touched = false;
            for record in &mut records {
                let before = record.data.clone();
                replace_id_refs(&mut record.data, temp_id, &server_id);
                touched |= before != record.data;
            }
            if touched {
                self.write_list(&snapshot_key(other), &records).await?;
            }
        }

        // Rewrite references in the remaining queue.
        let mut ops = self.pending_ops().await?;
        let mut touched = false;
        for op in &mut ops {
            let before_data = op.data.clone();
            let before_base = op.base.clone();
            replace_id_refs(&mut op.data, temp_id, &server_id);
            if let Some(base) = op.base.as_mut() {
                replace_id_refs(base, temp_id, &server_id);
            }
            touched |= before_data != op.data || before_base != op.base;
        }
        if touched {
            self.write_list(KEY_PENDING, &ops).await?;
        }

        Ok(())
    }

    // =========================================================================
    // Pending-Operation Queue
    // =========================================================================

    /// Appends an operation to the queue, assigning an id and timestamp if
    /// the caller left them unset. Returns the stored operation.
    pub async fn append_pending(
        &self,
        mut op: PendingOperation,
    ) -> StoreResult<PendingOperation> {
        if op.id.is_empty() {
            op.id = Uuid::new_v4().to_string();
        }

        debug!(
            op_id = %op.id,
            entity = %op.entity,
            kind = %op.kind,
            "Queueing pending operation"
        );

        let mut ops: Vec<PendingOperation> = self.read_list(KEY_PENDING).await?;
        ops.push(op.clone());
        self.write_list(KEY_PENDING, &ops).await?;

        Ok(op)
    }

    /// The full queue, in insertion order.
    pub async fn pending_ops(&self) -> StoreResult<Vec<PendingOperation>> {
        self.read_list(KEY_PENDING).await
    }

    pub async fn pending_count(&self) -> StoreResult<usize> {
        Ok(self.pending_ops().await?.len())
    }

    /// Removes one operation by id, persisting the remainder.
    pub async fn remove_pending(&self, id: &str) -> StoreResult<()> {
        let mut ops = self.pending_ops().await?;
        ops.retain(|op| op.id != id);
        self.write_list(KEY_PENDING, &ops).await
    }

    /// Replaces a queued operation in place (used when the engine rebases
    /// an operation's basis after an earlier replay touched the same
    /// record).
    pub async fn update_pending(&self, op: &PendingOperation) -> StoreResult<()> {
        let mut ops = self.pending_ops().await?;
        let slot = ops
            .iter_mut()
            .find(|o| o.id == op.id)
            .ok_or_else(|| StoreError::not_found("Pending operation", &op.id))?;
        *slot = op.clone();
        self.write_list(KEY_PENDING, &ops).await
    }

    // =========================================================================
    // Conflict History
    // =========================================================================

    pub async fn append_conflict(&self, conflict: Conflict) -> StoreResult<()> {
        let mut conflicts: Vec<Conflict> = self.read_list(KEY_CONFLICTS).await?;
        conflicts.push(conflict);
        self.write_list(KEY_CONFLICTS, &conflicts).await
    }

    pub async fn conflicts(&self) -> StoreResult<Vec<Conflict>> {
        self.read_list(KEY_CONFLICTS).await
    }

    /// Conflicts recorded against one record, oldest first.
    pub async fn conflicts_for(
        &self,
        entity: EntityKind,
        entity_id: &str,
    ) -> StoreResult<Vec<Conflict>> {
        let conflicts = self.conflicts().await?;
        Ok(conflicts
            .into_iter()
            .filter(|c| c.entity == entity && c.entity_id == entity_id)
            .collect())
    }

    pub async fn find_conflict(&self, id: &str) -> StoreResult<Option<Conflict>> {
        let conflicts = self.conflicts().await?;
        Ok(conflicts.into_iter().find(|c| c.id == id))
    }

    /// Persists a resolution outcome.
    pub async fn update_conflict(&self, conflict: &Conflict) -> StoreResult<()> {
        let mut conflicts = self.conflicts().await?;
        let slot = conflicts
            .iter_mut()
            .find(|c| c.id == conflict.id)
            .ok_or_else(|| StoreError::not_found("Conflict", &conflict.id))?;
        *slot = conflict.clone();
        self.write_list(KEY_CONFLICTS, &conflicts).await
    }

    // =========================================================================
    // Last-Sync Timestamp
    // =========================================================================

    pub async fn last_sync(&self) -> StoreResult<Option<DateTime<Utc>>> {
        match self.kv.get(KEY_LAST_SYNC).await? {
            Some(raw) => {
                let parsed = DateTime::parse_from_rfc3339(&raw).map_err(|e| {
                    StoreError::CorruptValue {
                        key: KEY_LAST_SYNC.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(Some(parsed.with_timezone(&Utc)))
            }
            None => Ok(None),
        }
    }

    pub async fn set_last_sync(&self, timestamp: DateTime<Utc>) -> StoreResult<()> {
        self.kv.set(KEY_LAST_SYNC, &timestamp.to_rfc3339()).await
    }

    // =========================================================================
    // Full Reset
    // =========================================================================

    /// Wipes every collection, the queue, the conflict history and the
    /// timestamp. Idempotent: clearing an already-empty store is a no-op.
    pub async fn clear_all(&self) -> StoreResult<()> {
        debug!("Clearing all local data");
        self.kv.clear().await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use metergrid_core::{OperationKind, RecordIdentity};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn memory_store() -> LocalStore {
        LocalStore::new(Arc::new(MemoryKv::new()))
    }

    fn update_op(entity: EntityKind, data: Value, base: Value) -> PendingOperation {
        PendingOperation::new(entity, OperationKind::Update, data, Some(base))
    }

    #[tokio::test]
    async fn snapshots_replace_wholesale() {
        let store = memory_store();

        store
            .save_entities(
                EntityKind::Product,
                vec![StoredRecord::confirmed(json!({"id": "p1", "name": "EM-310"}))],
            )
            .await
            .unwrap();

        store
            .save_entities(
                EntityKind::Product,
                vec![StoredRecord::confirmed(json!({"id": "p2", "name": "EM-500"}))],
            )
            .await
            .unwrap();

        let records = store.entities(EntityKind::Product).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id(), "p2");
    }

    #[tokio::test]
    async fn upsert_patches_individual_records() {
        let store = memory_store();

        store
            .upsert_record(
                EntityKind::Meter,
                StoredRecord::confirmed(json!({"id": "m1", "status": "in-stock"})),
            )
            .await
            .unwrap();
        store
            .upsert_record(
                EntityKind::Meter,
                StoredRecord::confirmed(json!({"id": "m1", "status": "allocated"})),
            )
            .await
            .unwrap();

        let records = store.entities(EntityKind::Meter).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data["status"], "allocated");
    }

    #[tokio::test]
    async fn queue_preserves_insertion_order_and_assigns_ids() {
        let store = memory_store();

        let mut first = update_op(EntityKind::Meter, json!({"id": "m1"}), json!({"id": "m1"}));
        first.id = String::new();
        let first = store.append_pending(first).await.unwrap();
        assert!(!first.id.is_empty());

        let second = store
            .append_pending(update_op(
                EntityKind::Meter,
                json!({"id": "m2"}),
                json!({"id": "m2"}),
            ))
            .await
            .unwrap();

        let ops = store.pending_ops().await.unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].id, first.id);
        assert_eq!(ops[1].id, second.id);

        store.remove_pending(&first.id).await.unwrap();
        let ops = store.pending_ops().await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].id, second.id);
    }

    #[tokio::test]
    async fn confirm_record_rewrites_queue_and_snapshot_references() {
        let store = memory_store();

        // Meter added offline, then referenced by a queued sale.
        let add = store
            .append_pending(PendingOperation::new(
                EntityKind::Meter,
                OperationKind::Add,
                json!({"id": "local-m", "serial_number": "SN-1"}),
                None,
            ))
            .await
            .unwrap();
        store
            .upsert_record(
                EntityKind::Meter,
                StoredRecord::pending("local-m", &add.id, json!({"id": "local-m"})),
            )
            .await
            .unwrap();
        store
            .append_pending(PendingOperation::new(
                EntityKind::Sale,
                OperationKind::Add,
                json!({"id": "local-s", "items": [{"meter_id": "local-m"}]}),
                None,
            ))
            .await
            .unwrap();

        store
            .confirm_record(
                EntityKind::Meter,
                "local-m",
                json!({"id": "srv-m", "serial_number": "SN-1"}),
            )
            .await
            .unwrap();

        let meters = store.entities(EntityKind::Meter).await.unwrap();
        assert_eq!(meters.len(), 1);
        assert_eq!(meters[0].id(), "srv-m");
        assert!(matches!(
            meters[0].identity,
            RecordIdentity::Confirmed { .. }
        ));

        let ops = store.pending_ops().await.unwrap();
        let sale = ops.iter().find(|o| o.entity == EntityKind::Sale).unwrap();
        assert_eq!(sale.data["items"][0]["meter_id"], "srv-m");
    }

    #[tokio::test]
    async fn conflicts_are_queryable_by_record() {
        let store = memory_store();

        store
            .append_conflict(Conflict::new(
                "op-1",
                EntityKind::Meter,
                "m1",
                metergrid_core::ConflictKind::Data,
                json!({"id": "m1"}),
                None,
            ))
            .await
            .unwrap();
        store
            .append_conflict(Conflict::new(
                "op-2",
                EntityKind::Product,
                "p1",
                metergrid_core::ConflictKind::Version,
                json!({"id": "p1"}),
                None,
            ))
            .await
            .unwrap();

        let for_meter = store.conflicts_for(EntityKind::Meter, "m1").await.unwrap();
        assert_eq!(for_meter.len(), 1);
        assert_eq!(for_meter[0].operation_id, "op-1");
    }

    #[tokio::test]
    async fn last_sync_roundtrip() {
        let store = memory_store();
        assert_eq!(store.last_sync().await.unwrap(), None);

        let now = Utc::now();
        store.set_last_sync(now).await.unwrap();

        let loaded = store.last_sync().await.unwrap().unwrap();
        assert_eq!(loaded.timestamp_millis(), now.timestamp_millis());
    }

    #[tokio::test]
    async fn clear_all_is_idempotent() {
        let store = memory_store();

        store
            .append_pending(update_op(
                EntityKind::Meter,
                json!({"id": "m1"}),
                json!({"id": "m1"}),
            ))
            .await
            .unwrap();
        store.set_last_sync(Utc::now()).await.unwrap();

        store.clear_all().await.unwrap();
        assert_eq!(store.pending_count().await.unwrap(), 0);
        assert_eq!(store.last_sync().await.unwrap(), None);
        assert!(store.entities(EntityKind::Meter).await.unwrap().is_empty());

        // Clearing twice leaves the same empty state.
        store.clear_all().await.unwrap();
        assert_eq!(store.pending_count().await.unwrap(), 0);
        assert_eq!(store.last_sync().await.unwrap(), None);
    }
}
