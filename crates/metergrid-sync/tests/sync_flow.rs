//! End-to-end sync flows over an in-memory store and an in-memory remote:
//! offline queueing, replay ordering, conflict detection and resolution,
//! and temp-id reconciliation.

use std::sync::Arc;

use serde_json::json;

use metergrid_core::{ConflictKind, EntityKind, MeterStatus, Resolution};
use metergrid_db::{LocalStore, MemoryKv};
use metergrid_sync::{
    ConnState, Inventory, MemoryRemote, NewCustomer, NewMeter, NewSale, NewSaleItem, RemoteStore,
    SyncConfig, SyncStatus,
};

// =============================================================================
// Test Harness
// =============================================================================

fn fast_config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.probe.attempts = 2;
    config.probe.initial_backoff_ms = 1;
    config.probe.max_backoff_secs = 1;
    config.probe.timeout_secs = 1;
    config
}

fn harness() -> (Inventory, Arc<MemoryRemote>) {
    // RUST_LOG=debug surfaces the sync layer's tracing output when a
    // flow needs debugging.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let remote = Arc::new(MemoryRemote::new());
    let store = LocalStore::new(Arc::new(MemoryKv::new()));
    let inventory = Inventory::new(store, remote.clone(), &fast_config());
    (inventory, remote)
}

fn seeded_meter(id: &str, status: &str, updated_at: &str) -> serde_json::Value {
    json!({
        "id": id,
        "serial_number": "SN-1000",
        "product_id": "p1",
        "status": status,
        "location": "warehouse-a",
        "agent_id": null,
        "customer_id": null,
        "notes": null,
        "created_at": "2026-01-01T08:00:00Z",
        "updated_at": updated_at,
    })
}

fn seeded_product(id: &str, stock: i64, updated_at: &str) -> serde_json::Value {
    json!({
        "id": id,
        "name": "Single Phase Meter",
        "model": "EM-310",
        "manufacturer": "Acrel",
        "price_cents": 45000,
        "stock_quantity": stock,
        "notes": null,
        "created_at": "2026-01-01T08:00:00Z",
        "updated_at": updated_at,
    })
}

async fn go_offline(inventory: &Inventory, remote: &MemoryRemote) {
    remote.set_failing(true);
    assert_eq!(inventory.check_connection().await, ConnState::Offline);
}

async fn go_online(inventory: &Inventory, remote: &MemoryRemote) {
    remote.set_failing(false);
    assert_eq!(inventory.check_connection().await, ConnState::Online);
}

// =============================================================================
// Ordering Invariant
// =============================================================================

#[tokio::test]
async fn same_meter_updates_replay_in_enqueue_order() {
    let (inventory, remote) = harness();
    remote
        .seed("meters", vec![seeded_meter("m1", "in-stock", "2026-01-01T08:00:00Z")])
        .await;

    go_online(&inventory, &remote).await;
    inventory.refresh_data().await.unwrap();

    go_offline(&inventory, &remote).await;
    inventory
        .update_meter_status("m1", MeterStatus::Allocated)
        .await
        .unwrap();
    inventory
        .update_meter_status("m1", MeterStatus::Sold)
        .await
        .unwrap();
    assert_eq!(inventory.pending_count().await.unwrap(), 2);

    go_online(&inventory, &remote).await;
    let report = inventory.sync_data().await.unwrap();

    assert_eq!(report.processed, 2);
    assert_eq!(report.failed, 0);
    assert!(report.conflicts.is_empty());
    assert_eq!(inventory.pending_count().await.unwrap(), 0);

    // The later queued "sold" is the final remote state, never
    // "allocated".
    let meter = remote.record("meters", "m1").await.unwrap();
    assert_eq!(meter["status"], "sold");
    assert_eq!(inventory.engine().status().await, SyncStatus::Success);
}

// =============================================================================
// No Silent Double-Sale
// =============================================================================

#[tokio::test]
async fn concurrent_sale_surfaces_a_data_conflict_instead_of_overwriting() {
    let (inventory, remote) = harness();
    remote
        .seed("meters", vec![seeded_meter("m1", "in-stock", "2026-01-01T08:00:00Z")])
        .await;

    go_online(&inventory, &remote).await;
    inventory.refresh_data().await.unwrap();

    // Another client sells the meter behind our back.
    remote
        .seed("meters", vec![seeded_meter("m1", "sold", "2026-01-02T09:00:00Z")])
        .await;

    go_offline(&inventory, &remote).await;
    inventory
        .update_meter_status("m1", MeterStatus::Allocated)
        .await
        .unwrap();

    go_online(&inventory, &remote).await;
    let report = inventory.sync_data().await.unwrap();

    assert_eq!(report.processed, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].kind, ConflictKind::Data);
    assert!(!report.conflicts[0].resolved);

    // The remote record was not touched and the operation stays queued
    // until a human decides.
    let meter = remote.record("meters", "m1").await.unwrap();
    assert_eq!(meter["status"], "sold");
    assert_eq!(inventory.pending_count().await.unwrap(), 1);
    assert_eq!(inventory.engine().status().await, SyncStatus::Conflict);

    let recorded = inventory
        .conflicts_for(EntityKind::Meter, "m1")
        .await
        .unwrap();
    assert_eq!(recorded.len(), 1);
    assert!(!recorded[0].resolved);
}

// =============================================================================
// Delete Wins As Server
// =============================================================================

#[tokio::test]
async fn vanished_record_auto_resolves_to_server_and_drains_the_operation() {
    let (inventory, remote) = harness();
    remote
        .seed("meters", vec![seeded_meter("m1", "in-stock", "2026-01-01T08:00:00Z")])
        .await;

    go_online(&inventory, &remote).await;
    inventory.refresh_data().await.unwrap();

    go_offline(&inventory, &remote).await;
    inventory
        .update_meter_status("m1", MeterStatus::Allocated)
        .await
        .unwrap();
    assert_eq!(inventory.pending_count().await.unwrap(), 1);

    // Someone removed the record server-side while we were offline.
    remote.seed("meters", vec![]).await;

    go_online(&inventory, &remote).await;
    let report = inventory.sync_data().await.unwrap();

    // Auto-resolved: the queue shrinks by one and no error is reported.
    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 0);
    assert!(report.errors.is_empty());
    assert_eq!(inventory.pending_count().await.unwrap(), 0);

    assert_eq!(report.conflicts.len(), 1);
    let conflict = &report.conflicts[0];
    assert_eq!(conflict.kind, ConflictKind::Delete);
    assert!(conflict.resolved);
    assert_eq!(conflict.resolution, Some(Resolution::Server));

    // The stale local mirror is gone too.
    assert!(inventory.meters().await.unwrap().is_empty());
}

// =============================================================================
// Disjoint-Field Auto-Merge
// =============================================================================

#[tokio::test]
async fn disjoint_changes_merge_both_sides() {
    let (inventory, remote) = harness();
    remote
        .seed("products", vec![seeded_product("p1", 10, "2026-01-01T08:00:00Z")])
        .await;

    go_online(&inventory, &remote).await;
    inventory.refresh_data().await.unwrap();

    // Server side: another client edits the notes.
    remote
        .update("products", "p1", json!({"id": "p1", "notes": "relocated to depot B"}))
        .await
        .unwrap();

    // Client side, offline: stock level changes.
    go_offline(&inventory, &remote).await;
    inventory.update_product_stock("p1", 5).await.unwrap();

    go_online(&inventory, &remote).await;
    let report = inventory.sync_data().await.unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].kind, ConflictKind::Version);
    assert_eq!(report.conflicts[0].resolution, Some(Resolution::Merge));
    assert_eq!(inventory.pending_count().await.unwrap(), 0);

    // The merged record carries the client's stock, the server's notes,
    // and every other server field unchanged.
    let product = remote.record("products", "p1").await.unwrap();
    assert_eq!(product["stock_quantity"], 5);
    assert_eq!(product["notes"], "relocated to depot B");
    assert_eq!(product["name"], "Single Phase Meter");
}

// =============================================================================
// Overlapping Fields Stay Manual
// =============================================================================

#[tokio::test]
async fn overlapping_changes_stay_queued_until_manually_resolved() {
    let (inventory, remote) = harness();
    remote
        .seed("products", vec![seeded_product("p1", 10, "2026-01-01T08:00:00Z")])
        .await;

    go_online(&inventory, &remote).await;
    inventory.refresh_data().await.unwrap();

    // Both sides change the same field to different values.
    remote
        .update("products", "p1", json!({"id": "p1", "stock_quantity": 3}))
        .await
        .unwrap();

    go_offline(&inventory, &remote).await;
    inventory.update_product_stock("p1", 7).await.unwrap();

    go_online(&inventory, &remote).await;
    let report = inventory.sync_data().await.unwrap();

    // No auto-resolution: the operation stays queued after the pass.
    assert_eq!(report.processed, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(report.conflicts.len(), 1);
    assert!(!report.conflicts[0].resolved);
    assert_eq!(inventory.pending_count().await.unwrap(), 1);

    let product = remote.record("products", "p1").await.unwrap();
    assert_eq!(product["stock_quantity"], 3);

    // A human picks the client's value.
    let conflict_id = report.conflicts[0].id.clone();
    let resolved = inventory
        .resolve_conflict(
            &conflict_id,
            Resolution::Manual,
            Some(json!({"id": "p1", "stock_quantity": 7})),
        )
        .await
        .unwrap();
    assert!(resolved.resolved);

    let product = remote.record("products", "p1").await.unwrap();
    assert_eq!(product["stock_quantity"], 7);
    assert_eq!(inventory.pending_count().await.unwrap(), 0);

    // Resolution is terminal.
    let err = inventory
        .resolve_conflict(&conflict_id, Resolution::Server, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        metergrid_sync::SyncError::AlreadyResolved { .. }
    ));
}

// =============================================================================
// Idempotent Clear
// =============================================================================

#[tokio::test]
async fn clearing_twice_leaves_the_same_empty_state() {
    let (inventory, remote) = harness();

    go_offline(&inventory, &remote).await;
    inventory
        .add_meter(NewMeter {
            serial_number: "SN-1".into(),
            product_id: "p1".into(),
            location: None,
            notes: None,
        })
        .await
        .unwrap();
    assert_eq!(inventory.pending_count().await.unwrap(), 1);

    inventory.clear_all_data().await.unwrap();
    assert_eq!(inventory.pending_count().await.unwrap(), 0);
    assert!(inventory.meters().await.unwrap().is_empty());
    assert_eq!(inventory.last_sync_time().await.unwrap(), None);

    inventory.clear_all_data().await.unwrap();
    assert_eq!(inventory.pending_count().await.unwrap(), 0);
    assert!(inventory.meters().await.unwrap().is_empty());
    assert_eq!(inventory.last_sync_time().await.unwrap(), None);
}

// =============================================================================
// Offline Round-Trip
// =============================================================================

#[tokio::test]
async fn offline_meter_survives_sync_under_its_server_id() {
    let (inventory, remote) = harness();

    go_offline(&inventory, &remote).await;
    let meter = inventory
        .add_meter(NewMeter {
            serial_number: "SN-777".into(),
            product_id: "p1".into(),
            location: Some("warehouse-b".into()),
            notes: None,
        })
        .await
        .unwrap();

    // Local read returns the meter under its temporary id.
    assert!(meter.id.starts_with("local-"));
    let local = inventory.meters().await.unwrap();
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].id, meter.id);
    assert_eq!(local[0].serial_number, "SN-777");
    assert_eq!(local[0].status, MeterStatus::InStock);
    assert_eq!(inventory.pending_count().await.unwrap(), 1);

    go_online(&inventory, &remote).await;
    let report = inventory.sync_data().await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 0);

    // Same meter, now under the server-assigned id, fields preserved,
    // enqueue record gone.
    let local = inventory.meters().await.unwrap();
    assert_eq!(local.len(), 1);
    assert!(local[0].id.starts_with("srv-"));
    assert_eq!(local[0].serial_number, "SN-777");
    assert_eq!(local[0].location.as_deref(), Some("warehouse-b"));
    assert_eq!(inventory.pending_count().await.unwrap(), 0);

    let remote_meters = remote.records("meters").await;
    assert_eq!(remote_meters.len(), 1);
    assert_eq!(remote_meters[0]["serial_number"], "SN-777");
}

// =============================================================================
// Offline Composite Sale
// =============================================================================

#[tokio::test]
async fn offline_sale_replays_transaction_items_and_meter_transitions() {
    let (inventory, remote) = harness();

    go_offline(&inventory, &remote).await;

    let meter = inventory
        .add_meter(NewMeter {
            serial_number: "SN-900".into(),
            product_id: "p1".into(),
            location: None,
            notes: None,
        })
        .await
        .unwrap();
    inventory
        .update_meter_status(&meter.id, MeterStatus::Allocated)
        .await
        .unwrap();
    let customer = inventory
        .add_customer(NewCustomer {
            name: "Amina Yusuf".into(),
            phone: Some("+254700000000".into()),
            address: None,
            notes: None,
        })
        .await
        .unwrap();

    let receipt = inventory
        .record_sale(NewSale {
            customer_id: customer.id.clone(),
            items: vec![NewSaleItem {
                meter_id: meter.id.clone(),
                price_cents: 45000,
            }],
            notes: None,
        })
        .await
        .unwrap();
    assert!(receipt.sale.id.starts_with("local-"));
    // meter add + allocate + customer add + sale + meter sold.
    assert_eq!(inventory.pending_count().await.unwrap(), 5);

    go_online(&inventory, &remote).await;
    let report = inventory.sync_data().await.unwrap();

    assert_eq!(report.processed, 5);
    assert_eq!(report.failed, 0);
    assert!(report.conflicts.is_empty());
    assert_eq!(inventory.pending_count().await.unwrap(), 0);

    // Every temp reference was reconciled to a server id.
    let meters = remote.records("meters").await;
    let customers = remote.records("customers").await;
    let transactions = remote.records("sales_transactions").await;
    let items = remote.records("sales_items").await;

    assert_eq!(meters.len(), 1);
    assert_eq!(customers.len(), 1);
    assert_eq!(transactions.len(), 1);
    assert_eq!(items.len(), 1);

    let meter_id = meters[0]["id"].as_str().unwrap();
    let customer_id = customers[0]["id"].as_str().unwrap();
    let txn_id = transactions[0]["id"].as_str().unwrap();

    assert!(meter_id.starts_with("srv-"));
    assert_eq!(meters[0]["status"], "sold");
    assert_eq!(meters[0]["customer_id"], customer_id);
    assert_eq!(transactions[0]["customer_id"], customer_id);
    assert_eq!(items[0]["transaction_id"], txn_id);
    assert_eq!(items[0]["meter_id"], meter_id);

    // The local sale mirror is confirmed as well.
    let sales = inventory.sales().await.unwrap();
    assert_eq!(sales.len(), 1);
    assert_eq!(sales[0].id, txn_id);
}

// =============================================================================
// Offline Delete
// =============================================================================

#[tokio::test]
async fn offline_delete_replays_against_the_remote() {
    let (inventory, remote) = harness();
    remote
        .seed("customers", vec![json!({
            "id": "c1",
            "name": "Amina Yusuf",
            "phone": null,
            "address": null,
            "notes": null,
            "created_at": "2026-01-01T08:00:00Z",
            "updated_at": "2026-01-01T08:00:00Z",
        })])
        .await;

    go_online(&inventory, &remote).await;
    inventory.refresh_data().await.unwrap();

    go_offline(&inventory, &remote).await;
    inventory
        .delete_entity(EntityKind::Customer, "c1")
        .await
        .unwrap();

    // Gone locally right away, still present remotely.
    assert!(inventory.customers().await.unwrap().is_empty());
    assert_eq!(remote.records("customers").await.len(), 1);
    assert_eq!(inventory.pending_count().await.unwrap(), 1);

    go_online(&inventory, &remote).await;
    let report = inventory.sync_data().await.unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 0);
    assert!(remote.records("customers").await.is_empty());
    assert_eq!(inventory.pending_count().await.unwrap(), 0);
}

// =============================================================================
// Online Sale With A Contested Meter
// =============================================================================

#[tokio::test]
async fn online_sale_skips_a_meter_sold_by_someone_else() {
    let (inventory, remote) = harness();
    remote
        .seed(
            "meters",
            vec![
                seeded_meter("m1", "allocated", "2026-01-01T08:00:00Z"),
                seeded_meter("m2", "allocated", "2026-01-01T08:00:00Z"),
            ],
        )
        .await;

    go_online(&inventory, &remote).await;
    inventory.refresh_data().await.unwrap();

    // m2 gets sold by another terminal after our refresh.
    remote
        .seed(
            "meters",
            vec![
                seeded_meter("m1", "allocated", "2026-01-01T08:00:00Z"),
                seeded_meter("m2", "sold", "2026-01-02T09:00:00Z"),
            ],
        )
        .await;

    let receipt = inventory
        .record_sale(NewSale {
            customer_id: "c1".into(),
            items: vec![
                NewSaleItem { meter_id: "m1".into(), price_cents: 45000 },
                NewSaleItem { meter_id: "m2".into(), price_cents: 45000 },
            ],
            notes: None,
        })
        .await
        .unwrap();

    // The clean meter transitioned; the contested one was skipped and
    // surfaced as a conflict.
    assert_eq!(receipt.conflicts.len(), 1);
    assert_eq!(receipt.conflicts[0].entity_id, "m2");
    assert_eq!(receipt.conflicts[0].kind, ConflictKind::Data);

    let m1 = remote.record("meters", "m1").await.unwrap();
    let m2 = remote.record("meters", "m2").await.unwrap();
    assert_eq!(m1["status"], "sold");
    assert_eq!(m2["status"], "sold");
    assert_eq!(m2["updated_at"], "2026-01-02T09:00:00Z");
}
