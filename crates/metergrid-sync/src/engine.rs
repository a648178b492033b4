//! # Synchronization Engine
//!
//! Drains the pending-operation queue against the remote service, invoking
//! the conflict detector per operation, applying auto-resolution where it
//! is provably safe, and persisting results back to the local store.
//!
//! ## Sync Pass
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  1. Read queue (empty? short-circuit to success)                    │
//! │  2. Sort oldest-first - per-entity replay order is an invariant:    │
//! │     a later queued "sold" must never be overwritten by an earlier   │
//! │     queued "allocated"                                              │
//! │  3. Per operation, strictly sequentially:                           │
//! │     • update/delete: fetch current remote record, run detector      │
//! │     • conflict? auto-resolve if safe, else leave queued (failed)    │
//! │     • clean? replay; success removes the operation                  │
//! │     • any remote error: failed, operation stays queued for retry    │
//! │  4. Persist last-sync timestamp regardless of partial failure       │
//! │  5. Status: conflict > error > success                              │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Individual operation failures never abort the batch. Every remote call
//! is bounded by the per-operation timeout; a hung call is a per-operation
//! failure, not a stalled batch. Concurrent passes are serialized by a
//! guard; a second caller is told a pass is in flight rather than queued
//! behind it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use metergrid_core::{
    Conflict, EntityKind, OperationKind, PendingOperation, Resolution, StoredRecord,
};
use metergrid_db::LocalStore;

use crate::config::EngineSettings;
use crate::conflict;
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteStore;

// =============================================================================
// Sync Status
// =============================================================================

/// Process-wide, ephemeral sync state. Transitions are driven solely by
/// the engine's most recent pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Success,
    Error,
    Conflict,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Idle => write!(f, "idle"),
            SyncStatus::Syncing => write!(f, "syncing"),
            SyncStatus::Success => write!(f, "success"),
            SyncStatus::Error => write!(f, "error"),
            SyncStatus::Conflict => write!(f, "conflict"),
        }
    }
}

// =============================================================================
// Sync Report
// =============================================================================

/// Aggregate outcome of one sync pass.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Operations replayed or safely auto-resolved (removed from queue).
    pub processed: usize,

    /// Operations left queued for retry or manual resolution.
    pub failed: usize,

    /// Conflicts observed during the pass, resolved or not.
    pub conflicts: Vec<Conflict>,

    /// Remote error messages recorded for failed operations.
    pub errors: Vec<String>,
}

// =============================================================================
// Sync Engine
// =============================================================================

/// Orchestrates queue drain, conflict handling and snapshot refresh.
pub struct SyncEngine {
    store: LocalStore,
    remote: Arc<dyn RemoteStore>,
    status: Arc<RwLock<SyncStatus>>,
    /// Serializes sync passes; two passes racing to remove the same
    /// operation would double-apply meter transitions.
    gate: Mutex<()>,
    op_timeout: Duration,
}

impl SyncEngine {
    pub fn new(store: LocalStore, remote: Arc<dyn RemoteStore>, settings: &EngineSettings) -> Self {
        SyncEngine {
            store,
            remote,
            status: Arc::new(RwLock::new(SyncStatus::Idle)),
            gate: Mutex::new(()),
            op_timeout: settings.op_timeout(),
        }
    }

    /// The engine's current status.
    pub async fn status(&self) -> SyncStatus {
        *self.status.read().await
    }

    /// Bounds a remote call by the per-operation timeout.
    async fn bounded<T>(&self, call: impl Future<Output = SyncResult<T>>) -> SyncResult<T> {
        match timeout(self.op_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(self.op_timeout.as_secs())),
        }
    }

    // =========================================================================
    // Sync Pass
    // =========================================================================

    /// Runs one complete drain attempt over the pending-operation queue.
    ///
    /// Returns [`SyncError::SyncInProgress`] when another pass is already
    /// in flight (periodic callers skip; they do not queue up).
    pub async fn sync_pending_operations(&self) -> SyncResult<SyncReport> {
        let _guard = self.gate.try_lock().map_err(|_| SyncError::SyncInProgress)?;

        *self.status.write().await = SyncStatus::Syncing;
        let mut report = SyncReport::default();

        let mut ops = self.store.pending_ops().await?;
        if ops.is_empty() {
            debug!("Pending queue empty, nothing to sync");
            self.store.set_last_sync(Utc::now()).await?;
            *self.status.write().await = SyncStatus::Success;
            return Ok(report);
        }

        // Oldest first. The sort is stable, so same-timestamp operations
        // keep their insertion order.
        ops.sort_by_key(|op| op.timestamp);

        info!(count = ops.len(), "Draining pending-operation queue");

        for op in &ops {
            if let Err(err) = self.process_operation(op, &mut report).await {
                warn!(
                    op_id = %op.id,
                    entity = %op.entity,
                    kind = %op.kind,
                    %err,
                    "Operation failed, staying queued for retry"
                );
                report.failed += 1;
                report.errors.push(err.to_string());
            }
        }

        // The timestamp moves even on partial failure so elapsed-time
        // displays stay meaningful.
        self.store.set_last_sync(Utc::now()).await?;

        let status = if !report.conflicts.is_empty() {
            SyncStatus::Conflict
        } else if report.failed > 0 {
            SyncStatus::Error
        } else {
            SyncStatus::Success
        };
        *self.status.write().await = status;

        info!(
            processed = report.processed,
            failed = report.failed,
            conflicts = report.conflicts.len(),
            %status,
            "Sync pass complete"
        );

        Ok(report)
    }

    async fn process_operation(
        &self,
        op: &PendingOperation,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        debug!(op_id = %op.id, entity = %op.entity, kind = %op.kind, "Replaying operation");

        match op.kind {
            OperationKind::Add => self.replay_add(op, report).await,
            OperationKind::Update => self.replay_update(op, report).await,
            OperationKind::Delete => self.replay_delete(op, report).await,
        }
    }

    // =========================================================================
    // Replay: Add
    // =========================================================================

    async fn replay_add(&self, op: &PendingOperation, report: &mut SyncReport) -> SyncResult<()> {
        if op.entity == EntityKind::Sale {
            return self.replay_sale(op, report).await;
        }

        let server_record = self
            .bounded(self.remote.insert(op.entity.collection(), op.data.clone()))
            .await?;
        let server_id = server_record
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        self.confirm_locally(op.entity, op, server_record.clone()).await?;
        self.store.remove_pending(&op.id).await?;
        // Later queued edits of this record were based on the offline
        // copy; move their basis onto the record the server just created.
        self.rebase_queue(op.entity, &server_id, &server_record).await?;
        report.processed += 1;
        Ok(())
    }

    /// Swaps a temp id for the server-assigned id, or plain-mirrors when
    /// the payload carried no id at all.
    async fn confirm_locally(
        &self,
        kind: EntityKind,
        op: &PendingOperation,
        server_record: Value,
    ) -> SyncResult<()> {
        match op.entity_id() {
            Some(temp_id) if !temp_id.is_empty() => {
                let temp_id = temp_id.to_string();
                self.store.confirm_record(kind, &temp_id, server_record).await?;
            }
            _ => {
                self.store
                    .upsert_record(kind, StoredRecord::confirmed(server_record))
                    .await?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Replay: Composite Sale
    // =========================================================================

    /// Replays a queued sale: parent transaction, then child line items.
    ///
    /// The per-meter `sold` transitions are queued as their own update
    /// operations right behind the sale, so each one passes through the
    /// conflict detector immediately before its status write.
    async fn replay_sale(&self, op: &PendingOperation, report: &mut SyncReport) -> SyncResult<()> {
        let mut txn = op.data.clone();
        let items = txn
            .as_object_mut()
            .and_then(|map| map.remove("items"))
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();

        let server_txn = self
            .bounded(self.remote.insert(EntityKind::Sale.collection(), txn))
            .await?;
        let server_txn_id = server_txn
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        for mut item in items {
            if let Some(map) = item.as_object_mut() {
                map.insert("transaction_id".into(), Value::String(server_txn_id.clone()));
            }
            self.bounded(self.remote.insert("sales_items", item)).await?;
        }

        self.confirm_locally(EntityKind::Sale, op, server_txn).await?;
        self.store.remove_pending(&op.id).await?;
        report.processed += 1;
        Ok(())
    }

    // =========================================================================
    // Replay: Update / Delete
    // =========================================================================

    async fn replay_update(&self, op: &PendingOperation, report: &mut SyncReport) -> SyncResult<()> {
        let id = op
            .entity_id()
            .ok_or_else(|| SyncError::InvalidArgument("update operation without id".into()))?
            .to_string();

        let server = self
            .bounded(self.remote.fetch(op.entity.collection(), &id))
            .await?;

        if let Some(found) = conflict::detect(op, server.as_ref()) {
            return self.handle_conflict(op, found, report).await;
        }

        let server_record = self
            .bounded(self.remote.update(op.entity.collection(), &id, op.data.clone()))
            .await?;

        self.store
            .upsert_record(op.entity, StoredRecord::confirmed(server_record.clone()))
            .await?;
        self.store.remove_pending(&op.id).await?;
        self.rebase_queue(op.entity, &id, &server_record).await?;

        report.processed += 1;
        Ok(())
    }

    async fn replay_delete(&self, op: &PendingOperation, report: &mut SyncReport) -> SyncResult<()> {
        let id = op
            .entity_id()
            .ok_or_else(|| SyncError::InvalidArgument("delete operation without id".into()))?
            .to_string();

        let server = self
            .bounded(self.remote.fetch(op.entity.collection(), &id))
            .await?;

        if let Some(found) = conflict::detect(op, server.as_ref()) {
            return self.handle_conflict(op, found, report).await;
        }

        self.bounded(self.remote.delete(op.entity.collection(), &id)).await?;
        self.store.remove_record(op.entity, &id).await?;
        self.store.remove_pending(&op.id).await?;

        report.processed += 1;
        Ok(())
    }

    /// Rebases later queued operations on the same record onto the state
    /// the remote just confirmed. Their intent (the fields they write) is
    /// untouched; only the basis moves, keeping version detection
    /// meaningful under the per-entity ordering invariant.
    async fn rebase_queue(
        &self,
        entity: EntityKind,
        id: &str,
        server_record: &Value,
    ) -> SyncResult<()> {
        let ops = self.store.pending_ops().await?;
        for mut later in ops {
            if later.entity == entity && later.entity_id() == Some(id) && later.base.is_some() {
                later.base = Some(server_record.clone());
                self.store.update_pending(&later).await?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Conflict Handling
    // =========================================================================

    async fn handle_conflict(
        &self,
        op: &PendingOperation,
        found: Conflict,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        self.store.append_conflict(found.clone()).await?;

        let strategy = conflict::auto_resolve(&found, op.base.as_ref());

        if strategy == Resolution::Manual {
            warn!(
                entity = %found.entity,
                entity_id = %found.entity_id,
                kind = %found.kind,
                "Conflict requires manual resolution, operation stays queued"
            );
            report.failed += 1;
            report.conflicts.push(found);
            return Ok(());
        }

        info!(
            entity = %found.entity,
            entity_id = %found.entity_id,
            kind = %found.kind,
            %strategy,
            "Auto-resolving conflict"
        );

        let resolved_data = match (strategy, found.server_data.as_ref()) {
            (Resolution::Merge, Some(server)) => {
                Some(conflict::merge_objects(&found.client_data, server))
            }
            _ => None,
        };

        let resolved = conflict::resolve(found, strategy, resolved_data)?;
        self.apply_resolution(op.entity, &resolved).await?;
        self.store.update_conflict(&resolved).await?;
        self.store.remove_pending(&op.id).await?;

        report.processed += 1;
        report.conflicts.push(resolved);
        Ok(())
    }

    /// Applies a resolution's outcome to the remote service and the local
    /// mirror. Shared by auto-resolution and caller-driven manual
    /// resolution.
    pub(crate) async fn apply_resolution(
        &self,
        entity: EntityKind,
        resolved: &Conflict,
    ) -> SyncResult<()> {
        match (resolved.resolution, resolved.resolved_data.as_ref()) {
            // The server side already holds the final data; mirror it.
            (Some(Resolution::Server), Some(data)) => {
                self.store
                    .upsert_record(entity, StoredRecord::confirmed(data.clone()))
                    .await?;
            }

            // Server won a delete conflict: the record is gone remotely,
            // drop the local mirror too.
            (Some(Resolution::Server), None) | (None, None) => {
                self.store.remove_record(entity, &resolved.entity_id).await?;
            }

            // Client, merge and manual outcomes push the reconciled
            // record to the remote service.
            (_, Some(data)) => {
                let server_record = self
                    .bounded(self.remote.update(
                        entity.collection(),
                        &resolved.entity_id,
                        data.clone(),
                    ))
                    .await?;
                self.store
                    .upsert_record(entity, StoredRecord::confirmed(server_record.clone()))
                    .await?;
                self.rebase_queue(entity, &resolved.entity_id, &server_record).await?;
            }

            (_, None) => {
                self.store.remove_record(entity, &resolved.entity_id).await?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Online Sale Support
    // =========================================================================

    /// Drives the per-meter `sold` transition for an online sale, checking
    /// each meter for a conflict immediately before its status write.
    ///
    /// A conflicted meter is skipped and surfaced, never double-sold; all
    /// other meters still transition.
    pub(crate) async fn sell_meters(
        &self,
        meter_ids: &[String],
        customer_id: &str,
    ) -> SyncResult<Vec<Conflict>> {
        let mut conflicts = Vec::new();

        for meter_id in meter_ids {
            let base = self
                .store
                .find_record(EntityKind::Meter, meter_id)
                .await?
                .map(|r| r.data);

            let data = serde_json::json!({
                "id": meter_id,
                "status": "sold",
                "customer_id": customer_id,
            });

            // Transient operation: exists only to drive the detector; it
            // is never queued.
            let probe = PendingOperation::new(EntityKind::Meter, OperationKind::Update, data, base);

            let server = self
                .bounded(self.remote.fetch(EntityKind::Meter.collection(), meter_id))
                .await?;

            if let Some(found) = conflict::detect(&probe, server.as_ref()) {
                warn!(meter_id = %meter_id, kind = %found.kind, "Meter conflicted during sale, skipping status write");
                self.store.append_conflict(found.clone()).await?;
                conflicts.push(found);
                continue;
            }

            let server_record = self
                .bounded(self.remote.update(
                    EntityKind::Meter.collection(),
                    meter_id,
                    probe.data.clone(),
                ))
                .await?;
            self.store
                .upsert_record(EntityKind::Meter, StoredRecord::confirmed(server_record))
                .await?;
        }

        Ok(conflicts)
    }

    // =========================================================================
    // Snapshot Refresh
    // =========================================================================

    /// Full pull of every collection into the local store.
    ///
    /// Server records replace the confirmed snapshot wholesale; records
    /// still pending their offline add are kept, since the remote does not
    /// know them yet.
    pub async fn refresh_snapshots(&self) -> SyncResult<()> {
        for kind in EntityKind::ALL {
            let records = self.bounded(self.remote.list(kind.collection())).await?;

            let mut stored: Vec<StoredRecord> =
                records.into_iter().map(StoredRecord::confirmed).collect();

            let pending: Vec<StoredRecord> = self
                .store
                .entities(kind)
                .await?
                .into_iter()
                .filter(|r| r.identity.is_pending())
                .collect();
            stored.extend(pending);

            self.store.save_entities(kind, stored).await?;
        }

        self.store.set_last_sync(Utc::now()).await?;
        info!("Snapshot refresh complete");
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;
    use metergrid_db::MemoryKv;
    use serde_json::json;

    fn engine_with(remote: Arc<MemoryRemote>) -> SyncEngine {
        let store = LocalStore::new(Arc::new(MemoryKv::new()));
        SyncEngine::new(store, remote, &EngineSettings::default())
    }

    #[tokio::test]
    async fn empty_queue_short_circuits_to_success() {
        let engine = engine_with(Arc::new(MemoryRemote::new()));
        assert_eq!(engine.status().await, SyncStatus::Idle);

        let report = engine.sync_pending_operations().await.unwrap();
        assert_eq!(report.processed, 0);
        assert_eq!(report.failed, 0);
        assert_eq!(engine.status().await, SyncStatus::Success);
        assert!(engine.store.last_sync().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn add_replay_confirms_the_temp_record() {
        let remote = Arc::new(MemoryRemote::new());
        let engine = engine_with(remote.clone());

        let op = engine
            .store
            .append_pending(PendingOperation::new(
                EntityKind::Customer,
                OperationKind::Add,
                json!({"id": "local-c", "name": "Amina Yusuf"}),
                None,
            ))
            .await
            .unwrap();
        engine
            .store
            .upsert_record(
                EntityKind::Customer,
                StoredRecord::pending("local-c", &op.id, json!({"id": "local-c", "name": "Amina Yusuf"})),
            )
            .await
            .unwrap();

        let report = engine.sync_pending_operations().await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 0);

        let customers = engine.store.entities(EntityKind::Customer).await.unwrap();
        assert_eq!(customers.len(), 1);
        assert!(customers[0].id().starts_with("srv-"));
        assert!(!customers[0].identity.is_pending());
        assert_eq!(remote.records("customers").await.len(), 1);
    }

    #[tokio::test]
    async fn unreachable_remote_leaves_operations_queued() {
        let remote = Arc::new(MemoryRemote::new());
        let engine = engine_with(remote.clone());

        engine
            .store
            .append_pending(PendingOperation::new(
                EntityKind::Customer,
                OperationKind::Add,
                json!({"id": "local-c", "name": "Amina Yusuf"}),
                None,
            ))
            .await
            .unwrap();

        remote.set_failing(true);
        let report = engine.sync_pending_operations().await.unwrap();
        assert_eq!(report.processed, 0);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(engine.status().await, SyncStatus::Error);
        assert_eq!(engine.store.pending_count().await.unwrap(), 1);

        // Connectivity returns; the queued operation drains on the next
        // pass.
        remote.set_failing(false);
        let report = engine.sync_pending_operations().await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(engine.status().await, SyncStatus::Success);
        assert_eq!(engine.store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn refresh_keeps_pending_records() {
        let remote = Arc::new(MemoryRemote::new());
        remote
            .seed("meters", vec![json!({"id": "srv-1", "status": "in-stock"})])
            .await;
        let engine = engine_with(remote);

        engine
            .store
            .upsert_record(
                EntityKind::Meter,
                StoredRecord::pending("local-m", "op-1", json!({"id": "local-m"})),
            )
            .await
            .unwrap();

        engine.refresh_snapshots().await.unwrap();

        let meters = engine.store.entities(EntityKind::Meter).await.unwrap();
        assert_eq!(meters.len(), 2);
        assert!(meters.iter().any(|m| m.id() == "srv-1"));
        assert!(meters.iter().any(|m| m.id() == "local-m"));
    }
}
