//! # Sync Watcher
//!
//! Background task that periodically re-checks connectivity and drains the
//! pending queue when the remote service is reachable. Spawned by the
//! application entry point; controlled through its handle.
//!
//! The watcher never overlaps an in-flight sync pass: the engine's guard
//! turns a concurrent attempt into a skip, which the watcher logs and
//! ignores.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::connectivity::{ConnState, ConnectivityMonitor};
use crate::engine::SyncEngine;
use crate::error::SyncError;

// =============================================================================
// Watcher
// =============================================================================

/// Periodic connectivity re-check + opportunistic sync.
pub struct SyncWatcher {
    monitor: Arc<ConnectivityMonitor>,
    engine: Arc<SyncEngine>,
    poll_interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for controlling a running watcher.
#[derive(Clone)]
pub struct SyncWatcherHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl SyncWatcherHandle {
    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

impl SyncWatcher {
    /// Creates a watcher and spawns its background task.
    pub fn spawn(
        monitor: Arc<ConnectivityMonitor>,
        engine: Arc<SyncEngine>,
        poll_interval: Duration,
    ) -> SyncWatcherHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let watcher = SyncWatcher {
            monitor,
            engine,
            poll_interval,
            shutdown_rx,
        };
        tokio::spawn(watcher.run());

        SyncWatcherHandle { shutdown_tx }
    }

    async fn run(mut self) {
        info!(interval_secs = self.poll_interval.as_secs(), "Sync watcher starting");

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so construction does
        // not race application startup.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Sync watcher shutting down");
                    break;
                }
            }
        }

        info!("Sync watcher stopped");
    }

    async fn tick(&self) {
        if self.monitor.check().await != ConnState::Online {
            debug!("Still offline, skipping sync");
            return;
        }

        match self.engine.sync_pending_operations().await {
            Ok(report) => {
                if report.processed > 0 || report.failed > 0 {
                    info!(
                        processed = report.processed,
                        failed = report.failed,
                        conflicts = report.conflicts.len(),
                        "Background sync pass finished"
                    );
                }
            }
            // Another pass is in flight; do not pile up behind it.
            Err(SyncError::SyncInProgress) => {
                debug!("Sync already in flight, skipping");
            }
            Err(err) => {
                error!(%err, "Background sync pass failed");
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineSettings, ProbeSettings};
    use crate::remote::MemoryRemote;
    use metergrid_core::{EntityKind, OperationKind, PendingOperation};
    use metergrid_db::{LocalStore, MemoryKv};
    use serde_json::json;

    #[tokio::test]
    async fn drains_queue_once_connectivity_returns() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_failing(true);

        let store = LocalStore::new(Arc::new(MemoryKv::new()));
        store
            .append_pending(PendingOperation::new(
                EntityKind::Customer,
                OperationKind::Add,
                json!({"id": "local-c", "name": "Amina Yusuf"}),
                None,
            ))
            .await
            .unwrap();

        let monitor = Arc::new(ConnectivityMonitor::new(
            remote.clone(),
            &ProbeSettings {
                timeout_secs: 1,
                attempts: 1,
                initial_backoff_ms: 1,
                max_backoff_secs: 1,
            },
        ));
        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            remote.clone(),
            &EngineSettings::default(),
        ));

        let handle = SyncWatcher::spawn(monitor, engine, Duration::from_millis(10));

        // First ticks observe the offline remote and leave the queue
        // alone.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.pending_count().await.unwrap(), 1);

        remote.set_failing(false);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.pending_count().await.unwrap(), 0);
        assert_eq!(remote.records("customers").await.len(), 1);

        handle.shutdown().await;
    }
}
