//! # Inventory Facade
//!
//! The single entry point the presentation layer calls for every entity
//! mutation and read. Per call, the facade decides between the online path
//! (write straight to the remote service, mirror the authoritative result)
//! and the offline path (temporary id, optimistic snapshot write, queued
//! operation replayable verbatim later).
//!
//! ## Error Contract
//! - Online-path remote errors propagate to the caller; a rejected
//!   well-formed mutation is assumed real and is NOT silently queued.
//! - Connectivity problems never surface as errors; they surface as the
//!   offline path being taken.
//! - Validation failures are thrown before anything is written or queued.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use metergrid_core::validation::{check_transition, require_non_negative, require_text};
use metergrid_core::{
    new_temp_id, Conflict, Customer, EntityKind, Meter, MeterStatus, OperationKind,
    PendingOperation, Product, Resolution, Sale, SaleItem, StoredRecord,
};
use metergrid_db::LocalStore;

use crate::config::SyncConfig;
use crate::conflict;
use crate::connectivity::{ConnState, ConnectivityMonitor};
use crate::engine::{SyncEngine, SyncReport};
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteStore;

// =============================================================================
// Input Types
// =============================================================================

/// Input for a new product (meter model).
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub model: String,
    pub manufacturer: String,
    pub price_cents: i64,
    pub stock_quantity: i64,
    pub notes: Option<String>,
}

/// Input for a new physical meter. Meters enter the system in stock.
#[derive(Debug, Clone)]
pub struct NewMeter {
    pub serial_number: String,
    pub product_id: String,
    pub location: Option<String>,
    pub notes: Option<String>,
}

/// Input for a new customer.
#[derive(Debug, Clone)]
pub struct NewCustomer {
    pub name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
}

/// One meter in a sale; the price is frozen at time of sale.
#[derive(Debug, Clone)]
pub struct NewSaleItem {
    pub meter_id: String,
    pub price_cents: i64,
}

/// Input for recording a sale.
#[derive(Debug, Clone)]
pub struct NewSale {
    pub customer_id: String,
    pub items: Vec<NewSaleItem>,
    pub notes: Option<String>,
}

/// Outcome of a recorded sale. `conflicts` carries meters whose status
/// write was skipped because another process got there first.
#[derive(Debug, Clone)]
pub struct SaleReceipt {
    pub sale: Sale,
    pub items: Vec<SaleItem>,
    pub conflicts: Vec<Conflict>,
}

// =============================================================================
// Inventory Facade
// =============================================================================

/// Consumer-facing API over the sync core.
///
/// Constructed explicitly by the application entry point; no ambient
/// singletons, so independent instances can coexist in tests.
pub struct Inventory {
    store: LocalStore,
    remote: Arc<dyn RemoteStore>,
    monitor: Arc<ConnectivityMonitor>,
    engine: Arc<SyncEngine>,
}

impl Inventory {
    /// Wires the facade, connectivity monitor and sync engine together
    /// over one store and one remote client.
    pub fn new(store: LocalStore, remote: Arc<dyn RemoteStore>, config: &SyncConfig) -> Self {
        let monitor = Arc::new(ConnectivityMonitor::new(remote.clone(), &config.probe));
        let engine = Arc::new(SyncEngine::new(store.clone(), remote.clone(), &config.engine));

        Inventory {
            store,
            remote,
            monitor,
            engine,
        }
    }

    pub fn engine(&self) -> Arc<SyncEngine> {
        self.engine.clone()
    }

    pub fn monitor(&self) -> Arc<ConnectivityMonitor> {
        self.monitor.clone()
    }

    // =========================================================================
    // Products
    // =========================================================================

    pub async fn add_product(&self, input: NewProduct) -> SyncResult<Product> {
        require_text("name", &input.name)?;
        require_text("model", &input.model)?;
        require_non_negative("price_cents", input.price_cents)?;
        require_non_negative("stock_quantity", input.stock_quantity)?;

        let now = Utc::now();
        let record = json!({
            "id": Uuid::new_v4().to_string(),
            "name": input.name,
            "model": input.model,
            "manufacturer": input.manufacturer,
            "price_cents": input.price_cents,
            "stock_quantity": input.stock_quantity,
            "notes": input.notes,
            "created_at": now,
            "updated_at": now,
        });

        let stored = self.create(EntityKind::Product, record).await?;
        Ok(serde_json::from_value(stored)?)
    }

    /// Sets a product's stock level.
    pub async fn update_product_stock(
        &self,
        product_id: &str,
        stock_quantity: i64,
    ) -> SyncResult<Product> {
        require_non_negative("stock_quantity", stock_quantity)?;

        let patch = json!({"id": product_id, "stock_quantity": stock_quantity});
        let stored = self
            .mutate(EntityKind::Product, product_id, patch, |data| {
                data["stock_quantity"] = json!(stock_quantity);
            })
            .await?;
        Ok(serde_json::from_value(stored)?)
    }

    pub async fn products(&self) -> SyncResult<Vec<Product>> {
        self.read_all(EntityKind::Product).await
    }

    // =========================================================================
    // Meters
    // =========================================================================

    pub async fn add_meter(&self, input: NewMeter) -> SyncResult<Meter> {
        require_text("serial_number", &input.serial_number)?;
        require_text("product_id", &input.product_id)?;

        let now = Utc::now();
        let record = json!({
            "id": Uuid::new_v4().to_string(),
            "serial_number": input.serial_number,
            "product_id": input.product_id,
            "status": MeterStatus::InStock,
            "location": input.location,
            "agent_id": null,
            "customer_id": null,
            "notes": input.notes,
            "created_at": now,
            "updated_at": now,
        });

        let stored = self.create(EntityKind::Meter, record).await?;
        Ok(serde_json::from_value(stored)?)
    }

    /// Moves a meter along its lifecycle, enforcing the status state
    /// machine against the locally cached record.
    pub async fn update_meter_status(
        &self,
        meter_id: &str,
        status: MeterStatus,
    ) -> SyncResult<Meter> {
        let current = self.require_record(EntityKind::Meter, meter_id).await?;
        let from: MeterStatus = serde_json::from_value(current.data["status"].clone())?;
        check_transition(from, status)?;

        let patch = json!({"id": meter_id, "status": status});
        let stored = self
            .mutate(EntityKind::Meter, meter_id, patch, |data| {
                data["status"] = json!(status);
            })
            .await?;
        Ok(serde_json::from_value(stored)?)
    }

    pub async fn meters(&self) -> SyncResult<Vec<Meter>> {
        self.read_all(EntityKind::Meter).await
    }

    // =========================================================================
    // Customers
    // =========================================================================

    pub async fn add_customer(&self, input: NewCustomer) -> SyncResult<Customer> {
        require_text("name", &input.name)?;

        let now = Utc::now();
        let record = json!({
            "id": Uuid::new_v4().to_string(),
            "name": input.name,
            "phone": input.phone,
            "address": input.address,
            "notes": input.notes,
            "created_at": now,
            "updated_at": now,
        });

        let stored = self.create(EntityKind::Customer, record).await?;
        Ok(serde_json::from_value(stored)?)
    }

    pub async fn customers(&self) -> SyncResult<Vec<Customer>> {
        self.read_all(EntityKind::Customer).await
    }

    // =========================================================================
    // Sales
    // =========================================================================

    /// Records a sale: the transaction, one line item per meter, and the
    /// dependent per-meter transition to sold. The meter transitions are
    /// driven in both the online and the offline branch.
    pub async fn record_sale(&self, input: NewSale) -> SyncResult<SaleReceipt> {
        require_text("customer_id", &input.customer_id)?;
        if input.items.is_empty() {
            return Err(SyncError::InvalidArgument(
                "a sale needs at least one item".into(),
            ));
        }

        // Validate every meter before writing or queueing anything, so a
        // rejected sale leaves no partial state behind.
        let mut meter_bases = Vec::with_capacity(input.items.len());
        for item in &input.items {
            let record = self.require_record(EntityKind::Meter, &item.meter_id).await?;
            let from: MeterStatus = serde_json::from_value(record.data["status"].clone())?;
            check_transition(from, MeterStatus::Sold)?;
            meter_bases.push(record);
        }

        let total_cents: i64 = input.items.iter().map(|i| i.price_cents).sum();

        if self.monitor.is_online().await {
            self.record_sale_online(input, total_cents).await
        } else {
            self.record_sale_offline(input, meter_bases, total_cents).await
        }
    }

    async fn record_sale_online(
        &self,
        input: NewSale,
        total_cents: i64,
    ) -> SyncResult<SaleReceipt> {
        let now = Utc::now();
        let txn = json!({
            "id": Uuid::new_v4().to_string(),
            "customer_id": input.customer_id,
            "total_cents": total_cents,
            "notes": input.notes,
            "created_at": now,
            "updated_at": now,
        });

        let server_txn = self
            .remote
            .insert(EntityKind::Sale.collection(), txn)
            .await?;
        let sale_id = server_txn
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut items = Vec::with_capacity(input.items.len());
        for item in &input.items {
            let item_record = json!({
                "id": Uuid::new_v4().to_string(),
                "transaction_id": sale_id,
                "meter_id": item.meter_id,
                "price_cents": item.price_cents,
                "created_at": now,
            });
            let stored_item = self.remote.insert("sales_items", item_record).await?;
            items.push(serde_json::from_value(stored_item)?);
        }

        self.store
            .upsert_record(EntityKind::Sale, StoredRecord::confirmed(server_txn.clone()))
            .await?;

        // Per-meter sold transitions, each conflict-checked right before
        // its write. Conflicted meters are skipped and surfaced.
        let meter_ids: Vec<String> = input.items.iter().map(|i| i.meter_id.clone()).collect();
        let conflicts = self.engine.sell_meters(&meter_ids, &input.customer_id).await?;

        info!(sale_id = %sale_id, meters = meter_ids.len(), conflicts = conflicts.len(), "Recorded sale online");

        Ok(SaleReceipt {
            sale: serde_json::from_value(server_txn)?,
            items,
            conflicts,
        })
    }

    async fn record_sale_offline(
        &self,
        input: NewSale,
        meter_bases: Vec<StoredRecord>,
        total_cents: i64,
    ) -> SyncResult<SaleReceipt> {
        let now = Utc::now();
        let sale_id = new_temp_id();

        let items: Vec<Value> = input
            .items
            .iter()
            .map(|item| {
                json!({
                    "id": new_temp_id(),
                    "transaction_id": sale_id,
                    "meter_id": item.meter_id,
                    "price_cents": item.price_cents,
                    "created_at": now,
                })
            })
            .collect();

        // The queued sale carries its line items; replay strips them into
        // the child collection.
        let txn = json!({
            "id": sale_id,
            "customer_id": input.customer_id,
            "total_cents": total_cents,
            "notes": input.notes,
            "created_at": now,
            "updated_at": now,
            "items": items,
        });

        let sale_op = self
            .store
            .append_pending(PendingOperation::new(
                EntityKind::Sale,
                OperationKind::Add,
                txn.clone(),
                None,
            ))
            .await?;
        self.store
            .upsert_record(
                EntityKind::Sale,
                StoredRecord::pending(&sale_id, &sale_op.id, txn.clone()),
            )
            .await?;

        // Queue the dependent meter transitions behind the sale; they
        // replay in creation order and are conflict-checked individually.
        for (item, base_record) in input.items.iter().zip(meter_bases) {
            let base = base_record.data.clone();
            let patch = json!({
                "id": item.meter_id,
                "status": MeterStatus::Sold,
                "customer_id": input.customer_id,
            });
            self.store
                .append_pending(PendingOperation::new(
                    EntityKind::Meter,
                    OperationKind::Update,
                    patch,
                    Some(base.clone()),
                ))
                .await?;

            let mut optimistic = base;
            optimistic["status"] = json!(MeterStatus::Sold);
            optimistic["customer_id"] = json!(input.customer_id);
            self.store
                .upsert_record(
                    EntityKind::Meter,
                    StoredRecord {
                        identity: base_record.identity,
                        data: optimistic,
                    },
                )
                .await?;
        }

        info!(sale_id = %sale_id, meters = input.items.len(), "Recorded sale offline, queued for sync");

        let mut sale_value = txn;
        if let Some(map) = sale_value.as_object_mut() {
            map.remove("items");
        }

        Ok(SaleReceipt {
            sale: serde_json::from_value(sale_value)?,
            items: items
                .into_iter()
                .map(serde_json::from_value)
                .collect::<Result<_, _>>()?,
            conflicts: Vec::new(),
        })
    }

    pub async fn sales(&self) -> SyncResult<Vec<Sale>> {
        let records = self.store.entities(EntityKind::Sale).await?;
        records
            .into_iter()
            .map(|mut r| {
                // Offline sale snapshots embed their items.
                if let Some(map) = r.data.as_object_mut() {
                    map.remove("items");
                }
                serde_json::from_value(r.data).map_err(SyncError::from)
            })
            .collect()
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Deletes a record of any kind.
    ///
    /// Online: deleted remotely and dropped from the snapshot. Offline:
    /// dropped from the snapshot optimistically and queued; replay runs
    /// the conflict detector first, so a record someone else edited in
    /// the meantime surfaces as a conflict instead of disappearing.
    pub async fn delete_entity(&self, kind: EntityKind, id: &str) -> SyncResult<()> {
        let current = self.require_record(kind, id).await?;

        if self.monitor.is_online().await {
            self.remote.delete(kind.collection(), id).await?;
            self.store.remove_record(kind, id).await?;
        } else {
            self.store
                .append_pending(PendingOperation::new(
                    kind,
                    OperationKind::Delete,
                    json!({"id": id}),
                    Some(current.data),
                ))
                .await?;
            self.store.remove_record(kind, id).await?;
            debug!(kind = %kind, id, "Deleted offline, queued for sync");
        }

        Ok(())
    }

    // =========================================================================
    // Connectivity, Sync & Maintenance
    // =========================================================================

    /// Probes the remote service (with bounded retry) and reports the
    /// resulting state.
    pub async fn check_connection(&self) -> ConnState {
        self.monitor.check_with_retry().await
    }

    /// Pulls fresh snapshots of every collection when online; a no-op
    /// offline, where local data keeps serving reads.
    pub async fn refresh_data(&self) -> SyncResult<()> {
        match self.monitor.check_with_retry().await {
            ConnState::Online => self.engine.refresh_snapshots().await,
            _ => {
                debug!("Offline, serving local snapshots");
                Ok(())
            }
        }
    }

    /// Runs one sync pass over the pending-operation queue.
    pub async fn sync_data(&self) -> SyncResult<SyncReport> {
        self.engine.sync_pending_operations().await
    }

    /// Wipes all local data: snapshots, queue, conflict history and the
    /// last-sync timestamp. Idempotent.
    pub async fn clear_all_data(&self) -> SyncResult<()> {
        self.store.clear_all().await.map_err(SyncError::from)
    }

    /// Number of mutations awaiting sync ("N changes pending").
    pub async fn pending_count(&self) -> SyncResult<usize> {
        Ok(self.store.pending_count().await?)
    }

    pub async fn last_sync_time(&self) -> SyncResult<Option<chrono::DateTime<Utc>>> {
        Ok(self.store.last_sync().await?)
    }

    // =========================================================================
    // Conflicts
    // =========================================================================

    pub async fn conflicts(&self) -> SyncResult<Vec<Conflict>> {
        Ok(self.store.conflicts().await?)
    }

    pub async fn conflicts_for(
        &self,
        entity: EntityKind,
        entity_id: &str,
    ) -> SyncResult<Vec<Conflict>> {
        Ok(self.store.conflicts_for(entity, entity_id).await?)
    }

    /// Applies a caller-chosen resolution to a recorded conflict, pushes
    /// the outcome, and releases the originating queued operation.
    pub async fn resolve_conflict(
        &self,
        conflict_id: &str,
        strategy: Resolution,
        resolved_data: Option<Value>,
    ) -> SyncResult<Conflict> {
        let found = self
            .store
            .find_conflict(conflict_id)
            .await?
            .ok_or_else(|| SyncError::ConflictNotFound(conflict_id.to_string()))?;

        let entity = found.entity;
        let resolved = conflict::resolve(found, strategy, resolved_data)?;

        self.engine.apply_resolution(entity, &resolved).await?;
        self.store.update_conflict(&resolved).await?;
        // The queued operation, if still present, is superseded by the
        // resolution.
        self.store.remove_pending(&resolved.operation_id).await?;

        info!(conflict_id, %strategy, "Conflict resolved");
        Ok(resolved)
    }

    // =========================================================================
    // Shared Mutation Paths
    // =========================================================================

    async fn require_record(&self, kind: EntityKind, id: &str) -> SyncResult<StoredRecord> {
        self.store
            .find_record(kind, id)
            .await?
            .ok_or_else(|| SyncError::RecordNotFound {
                entity: kind.to_string(),
                id: id.to_string(),
            })
    }

    /// Online: insert remotely and mirror the authoritative record.
    /// Offline: temp id, optimistic snapshot, queued add.
    async fn create(&self, kind: EntityKind, mut record: Value) -> SyncResult<Value> {
        if self.monitor.is_online().await {
            let server = self.remote.insert(kind.collection(), record).await?;
            self.store
                .upsert_record(kind, StoredRecord::confirmed(server.clone()))
                .await?;
            Ok(server)
        } else {
            let temp_id = new_temp_id();
            record["id"] = json!(temp_id);

            let op = self
                .store
                .append_pending(PendingOperation::new(
                    kind,
                    OperationKind::Add,
                    record.clone(),
                    None,
                ))
                .await?;
            self.store
                .upsert_record(kind, StoredRecord::pending(&temp_id, &op.id, record.clone()))
                .await?;

            debug!(kind = %kind, %temp_id, "Created offline, queued for sync");
            Ok(record)
        }
    }

    /// Online: patch remotely and mirror. Offline: optimistic snapshot
    /// patch plus a queued update carrying the pre-patch record as basis.
    async fn mutate(
        &self,
        kind: EntityKind,
        id: &str,
        patch: Value,
        apply: impl FnOnce(&mut Value),
    ) -> SyncResult<Value> {
        let current = self.require_record(kind, id).await?;

        if self.monitor.is_online().await {
            let server = self.remote.update(kind.collection(), id, patch).await?;
            self.store
                .upsert_record(kind, StoredRecord::confirmed(server.clone()))
                .await?;
            Ok(server)
        } else {
            let base = current.data.clone();

            self.store
                .append_pending(PendingOperation::new(
                    kind,
                    OperationKind::Update,
                    patch,
                    Some(base.clone()),
                ))
                .await?;

            let mut optimistic = base;
            apply(&mut optimistic);
            self.store
                .upsert_record(
                    kind,
                    StoredRecord {
                        identity: current.identity,
                        data: optimistic.clone(),
                    },
                )
                .await?;

            debug!(kind = %kind, id, "Updated offline, queued for sync");
            Ok(optimistic)
        }
    }

    async fn read_all<T: serde::de::DeserializeOwned>(&self, kind: EntityKind) -> SyncResult<Vec<T>> {
        let records = self.store.entities(kind).await?;
        records
            .into_iter()
            .map(|r| serde_json::from_value(r.data).map_err(SyncError::from))
            .collect()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
