//! # Connectivity Monitor
//!
//! Determines whether the remote service is reachable by issuing a minimal
//! read (the health probe) under a hard timeout. The timeout is mandatory:
//! a probe must never hang its caller.
//!
//! ## State
//! ```text
//! offline ──check()──► checking ──probe ok──► online
//!    ▲                    │
//!    └────── probe failed / timed out ───────┘
//! ```
//!
//! Any thrown error, timeout, or missing remote configuration is treated
//! as offline; connectivity problems are absorbed here, never surfaced as
//! errors to the caller.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::config::ProbeSettings;
use crate::remote::RemoteStore;
use crate::retry::{with_retry, RetryPolicy};

// =============================================================================
// Connection State
// =============================================================================

/// Tri-state connectivity status.
///
/// `Checking` is exposed so callers can avoid racing UI state while a
/// probe is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Online,
    Offline,
    Checking,
}

impl std::fmt::Display for ConnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnState::Online => write!(f, "online"),
            ConnState::Offline => write!(f, "offline"),
            ConnState::Checking => write!(f, "checking"),
        }
    }
}

// =============================================================================
// Connectivity Monitor
// =============================================================================

/// Probes the remote service and tracks the last observed state.
pub struct ConnectivityMonitor {
    remote: Arc<dyn RemoteStore>,
    probe_timeout: Duration,
    retry: RetryPolicy,
    state: Arc<RwLock<ConnState>>,
}

impl ConnectivityMonitor {
    pub fn new(remote: Arc<dyn RemoteStore>, settings: &ProbeSettings) -> Self {
        ConnectivityMonitor {
            remote,
            probe_timeout: settings.timeout(),
            retry: settings.retry_policy(),
            state: Arc::new(RwLock::new(ConnState::Offline)),
        }
    }

    /// The last observed state, without probing.
    pub async fn current(&self) -> ConnState {
        *self.state.read().await
    }

    pub async fn is_online(&self) -> bool {
        self.current().await == ConnState::Online
    }

    /// Runs a single bounded probe and records the outcome.
    pub async fn check(&self) -> ConnState {
        *self.state.write().await = ConnState::Checking;

        let observed = match timeout(self.probe_timeout, self.remote.ping()).await {
            Ok(Ok(())) => ConnState::Online,
            Ok(Err(err)) => {
                debug!(%err, "Connectivity probe failed");
                ConnState::Offline
            }
            Err(_) => {
                debug!(timeout_secs = self.probe_timeout.as_secs(), "Connectivity probe timed out");
                ConnState::Offline
            }
        };

        *self.state.write().await = observed;
        observed
    }

    /// Probes with the configured bounded retry before concluding offline.
    ///
    /// Transient DNS/TLS hiccups are common on mobile network transitions,
    /// so a single failed probe is not proof of being offline.
    pub async fn check_with_retry(&self) -> ConnState {
        let result = with_retry(&self.retry, "connectivity-probe", || async {
            match self.check().await {
                ConnState::Online => Ok(()),
                _ => Err("probe failed"),
            }
        })
        .await;

        match result {
            Ok(()) => ConnState::Online,
            Err(_) => {
                info!("Remote service unreachable, operating offline");
                ConnState::Offline
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
    use crate::error::SyncResult;
    use crate::remote::MemoryRemote;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_settings() -> ProbeSettings {
        ProbeSettings {
            timeout_secs: 1,
            attempts: 2,
            initial_backoff_ms: 1,
            max_backoff_secs: 1,
        }
    }

    #[tokio::test]
    async fn reports_online_when_probe_succeeds() {
        let remote = Arc::new(MemoryRemote::new());
        let monitor = ConnectivityMonitor::new(remote, &fast_settings());

        assert_eq!(monitor.current().await, ConnState::Offline);
        assert_eq!(monitor.check().await, ConnState::Online);
        assert!(monitor.is_online().await);
    }

    #[tokio::test]
    async fn absorbs_probe_errors_as_offline() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_failing(true);
        let monitor = ConnectivityMonitor::new(remote, &fast_settings());

        assert_eq!(monitor.check().await, ConnState::Offline);
        assert_eq!(monitor.check_with_retry().await, ConnState::Offline);
    }

    /// Remote whose probe never completes; only the monitor's timeout
    /// brings the call back.
    struct HangingRemote;

    #[async_trait]
    impl RemoteStore for HangingRemote {
        async fn ping(&self) -> SyncResult<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
        async fn list(&self, _: &str) -> SyncResult<Vec<Value>> {
            Ok(Vec::new())
        }
        async fn fetch(&self, _: &str, _: &str) -> SyncResult<Option<Value>> {
            Ok(None)
        }
        async fn insert(&self, _: &str, record: Value) -> SyncResult<Value> {
            Ok(record)
        }
        async fn update(&self, _: &str, _: &str, patch: Value) -> SyncResult<Value> {
            Ok(patch)
        }
        async fn delete(&self, _: &str, _: &str) -> SyncResult<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_probe_is_cut_off_by_timeout() {
        let monitor = ConnectivityMonitor::new(Arc::new(HangingRemote), &fast_settings());

        // With the paused clock the sleep inside the probe would block
        // forever; auto-advance drives the timeout instead.
        assert_eq!(monitor.check().await, ConnState::Offline);
    }

    /// Remote whose first probe fails and every later one succeeds.
    struct FlakyRemote {
        pings: AtomicU32,
    }

    #[async_trait]
    impl RemoteStore for FlakyRemote {
        async fn ping(&self) -> SyncResult<()> {
            if self.pings.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(crate::error::SyncError::Unreachable("blip".into()))
            } else {
                Ok(())
            }
        }
        async fn list(&self, _: &str) -> SyncResult<Vec<Value>> {
            Ok(Vec::new())
        }
        async fn fetch(&self, _: &str, _: &str) -> SyncResult<Option<Value>> {
            Ok(None)
        }
        async fn insert(&self, _: &str, record: Value) -> SyncResult<Value> {
            Ok(record)
        }
        async fn update(&self, _: &str, _: &str, patch: Value) -> SyncResult<Value> {
            Ok(patch)
        }
        async fn delete(&self, _: &str, _: &str) -> SyncResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn retry_recovers_from_a_transient_blip() {
        let remote = Arc::new(FlakyRemote { pings: AtomicU32::new(0) });
        let monitor = ConnectivityMonitor::new(remote, &fast_settings());

        assert_eq!(monitor.check_with_retry().await, ConnState::Online);
    }

    #[test]
    fn conn_state_display() {
        assert_eq!(ConnState::Online.to_string(), "online");
        assert_eq!(ConnState::Checking.to_string(), "checking");
    }
}
