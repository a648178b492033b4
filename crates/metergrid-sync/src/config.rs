//! # Sync Configuration
//!
//! TOML-backed configuration for the sync layer: remote service endpoint,
//! connectivity probe behavior, and engine timeouts.
//!
//! ## Example
//! ```toml
//! [remote]
//! base_url = "https://api.metergrid.example"
//! api_key = "mg_live_..."
//! request_timeout_secs = 30
//!
//! [probe]
//! timeout_secs = 5
//! attempts = 3
//! initial_backoff_ms = 200
//! max_backoff_secs = 2
//!
//! [engine]
//! op_timeout_secs = 10
//! poll_interval_secs = 30
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};
use crate::retry::RetryPolicy;

// =============================================================================
// Remote Settings
// =============================================================================

/// Remote record-service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    /// Base URL of the remote service. Empty means not configured, which
    /// the connectivity monitor reports as offline.
    pub base_url: String,

    /// Optional bearer token sent with every request.
    pub api_key: Option<String>,

    /// Per-request timeout for ordinary reads and writes.
    pub request_timeout_secs: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        RemoteSettings {
            base_url: String::new(),
            api_key: None,
            request_timeout_secs: 30,
        }
    }
}

// =============================================================================
// Probe Settings
// =============================================================================

/// Connectivity probe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// Hard timeout for a single probe. The probe must never hang its
    /// caller; this bound is mandatory, not advisory.
    pub timeout_secs: u64,

    /// Probe attempts before concluding offline. Transient DNS/TLS hiccups
    /// are common on mobile network transitions.
    pub attempts: u32,

    /// Initial backoff between attempts.
    pub initial_backoff_ms: u64,

    /// Backoff ceiling.
    pub max_backoff_secs: u64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        ProbeSettings {
            timeout_secs: 5,
            attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_secs: 2,
        }
    }
}

impl ProbeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Retry policy derived from these settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_secs(self.max_backoff_secs),
            multiplier: 2.0,
        }
    }
}

// =============================================================================
// Engine Settings
// =============================================================================

/// Synchronization engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Bound on every remote call made during a sync pass. A hung call
    /// counts as a per-operation failure, never a stalled batch.
    pub op_timeout_secs: u64,

    /// Interval at which the background watcher re-checks connectivity.
    pub poll_interval_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            op_timeout_secs: 10,
            poll_interval_secs: 30,
        }
    }
}

impl EngineSettings {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.op_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

// =============================================================================
// Sync Config
// =============================================================================

/// Top-level sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub remote: RemoteSettings,
    pub probe: ProbeSettings,
    pub engine: EngineSettings,
}

impl SyncConfig {
    /// Loads configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SyncError::InvalidConfig(format!("failed to read config: {e}")))?;
        let config: SyncConfig = toml::from_str(&raw)
            .map_err(|e| SyncError::InvalidConfig(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration, falling back to defaults when the file does
    /// not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            info!(path = %path.display(), "Loading sync config");
            Self::load(path)
        } else {
            debug!(path = %path.display(), "No sync config found, using defaults");
            Ok(SyncConfig::default())
        }
    }

    /// Writes the configuration back out as TOML.
    pub fn save(&self, path: impl AsRef<Path>) -> SyncResult<()> {
        let raw = toml::to_string_pretty(self)
            .map_err(|e| SyncError::InvalidConfig(format!("failed to serialize config: {e}")))?;
        std::fs::write(path.as_ref(), raw)
            .map_err(|e| SyncError::InvalidConfig(format!("failed to write config: {e}")))?;
        Ok(())
    }

    /// Sanity-checks the configuration.
    ///
    /// An empty `base_url` is allowed (the system simply runs offline);
    /// nonsense like a zero probe budget is not.
    pub fn validate(&self) -> SyncResult<()> {
        if !self.remote.base_url.is_empty()
            && !self.remote.base_url.starts_with("http://")
            && !self.remote.base_url.starts_with("https://")
        {
            return Err(SyncError::InvalidConfig(
                "remote.base_url must include http:// or https://".into(),
            ));
        }
        if self.probe.attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "probe.attempts must be at least 1".into(),
            ));
        }
        if self.probe.timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "probe.timeout_secs must be at least 1".into(),
            ));
        }
        if self.engine.op_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "engine.op_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
