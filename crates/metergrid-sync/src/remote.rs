//! # Remote Service Boundary
//!
//! The record-oriented remote service, seen from the client: per-entity
//! collections supporting list, fetch-by-id, insert, update-by-id and
//! delete-by-id, plus a minimal health probe. The core treats the service
//! as an opaque collaborator; nothing beyond request/response-with-error
//! semantics is assumed.
//!
//! Two implementations:
//! - [`HttpRemote`] - production client over HTTP (one route per
//!   collection, JSON bodies)
//! - [`MemoryRemote`] - in-memory reference implementation used by tests
//!   and demos, with a switch to simulate network failure

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use metergrid_core::is_temp_id;

use crate::config::RemoteSettings;
use crate::error::{SyncError, SyncResult};

// =============================================================================
// Remote Store Trait
// =============================================================================

/// Client-side view of the remote record service.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Minimal read used as the connectivity probe.
    async fn ping(&self) -> SyncResult<()>;

    /// All records in a collection.
    async fn list(&self, collection: &str) -> SyncResult<Vec<Value>>;

    /// One record by id; `None` when it does not exist.
    async fn fetch(&self, collection: &str, id: &str) -> SyncResult<Option<Value>>;

    /// Inserts a record, returning the authoritative server copy (with the
    /// server-assigned id and audit columns).
    async fn insert(&self, collection: &str, record: Value) -> SyncResult<Value>;

    /// Patches a record by id, returning the updated server copy.
    async fn update(&self, collection: &str, id: &str, patch: Value) -> SyncResult<Value>;

    /// Deletes a record by id.
    async fn delete(&self, collection: &str, id: &str) -> SyncResult<()>;
}

// =============================================================================
// HTTP Implementation
// =============================================================================

/// HTTP client for the remote record service.
///
/// Routes follow the collection layout: `GET /products`,
/// `GET|PATCH|DELETE /products/{id}`, `POST /products`, `GET /health`.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpRemote {
    /// Builds a client from settings. The per-request timeout applies to
    /// every call this client makes.
    pub fn new(settings: &RemoteSettings) -> SyncResult<Self> {
        let base_url = normalize_base_url(&settings.base_url)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        Ok(HttpRemote {
            base_url,
            api_key: settings.api_key.clone(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn error_from_response(response: reqwest::Response) -> SyncError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        SyncError::Remote {
            status: Some(status.as_u16()),
            message: parse_api_error(status, &body),
        }
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn ping(&self) -> SyncResult<()> {
        let response = self.authorize(self.client.get(self.url("health"))).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from_response(response).await)
        }
    }

    async fn list(&self, collection: &str) -> SyncResult<Vec<Value>> {
        let response = self.authorize(self.client.get(self.url(collection))).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        Ok(response.json().await?)
    }

    async fn fetch(&self, collection: &str, id: &str) -> SyncResult<Option<Value>> {
        let url = self.url(&format!("{collection}/{id}"));
        let response = self.authorize(self.client.get(url)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        Ok(Some(response.json().await?))
    }

    async fn insert(&self, collection: &str, record: Value) -> SyncResult<Value> {
        debug!(collection, "Inserting record");
        let response = self
            .authorize(self.client.post(self.url(collection)))
            .json(&record)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        Ok(response.json().await?)
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> SyncResult<Value> {
        debug!(collection, id, "Updating record");
        let url = self.url(&format!("{collection}/{id}"));
        let response = self
            .authorize(self.client.patch(url))
            .json(&patch)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        Ok(response.json().await?)
    }

    async fn delete(&self, collection: &str, id: &str) -> SyncResult<()> {
        debug!(collection, id, "Deleting record");
        let url = self.url(&format!("{collection}/{id}"));
        let response = self.authorize(self.client.delete(url)).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        Ok(())
    }
}

fn normalize_base_url(raw: &str) -> SyncResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SyncError::InvalidConfig(
            "remote base_url must not be empty".into(),
        ));
    }
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return Err(SyncError::InvalidConfig(
            "remote base_url must include http:// or https://".into(),
        ));
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return message.trim().to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        trimmed.to_string()
    }
}

// =============================================================================
// In-Memory Implementation
// =============================================================================

/// In-memory remote service for tests and demos.
///
/// Behaves like the real service: inserts assign a server id (replacing any
/// temporary id the client sent) and stamp audit columns, updates merge the
/// patch and bump `updated_at`.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    collections: Mutex<HashMap<String, Vec<Value>>>,
    fail: AtomicBool,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, every call fails as if the network were down.
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    /// Seeds a collection with records (replacing its contents).
    pub async fn seed(&self, collection: &str, records: Vec<Value>) {
        self.collections
            .lock()
            .await
            .insert(collection.to_string(), records);
    }

    /// Current contents of a collection.
    pub async fn records(&self, collection: &str) -> Vec<Value> {
        self.collections
            .lock()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// One record by id, straight from the backing map.
    pub async fn record(&self, collection: &str, id: &str) -> Option<Value> {
        self.records(collection)
            .await
            .into_iter()
            .find(|r| r.get("id").and_then(Value::as_str) == Some(id))
    }

    fn check_up(&self) -> SyncResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            Err(SyncError::Unreachable("simulated network failure".into()))
        } else {
            Ok(())
        }
    }

    fn not_found(collection: &str, id: &str) -> SyncError {
        SyncError::Remote {
            status: Some(404),
            message: format!("{collection}/{id} not found"),
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn ping(&self) -> SyncResult<()> {
        self.check_up()
    }

    async fn list(&self, collection: &str) -> SyncResult<Vec<Value>> {
        self.check_up()?;
        Ok(self.records(collection).await)
    }

    async fn fetch(&self, collection: &str, id: &str) -> SyncResult<Option<Value>> {
        self.check_up()?;
        Ok(self.record(collection, id).await)
    }

    async fn insert(&self, collection: &str, mut record: Value) -> SyncResult<Value> {
        self.check_up()?;

        let now = Utc::now().to_rfc3339();
        if let Some(map) = record.as_object_mut() {
            let client_id = map.get("id").and_then(Value::as_str).unwrap_or_default();
            if client_id.is_empty() || is_temp_id(client_id) {
                map.insert("id".into(), Value::String(format!("srv-{}", Uuid::new_v4())));
            }
            map.entry("created_at").or_insert_with(|| Value::String(now.clone()));
            map.insert("updated_at".into(), Value::String(now));
        }

        let mut collections = self.collections.lock().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .push(record.clone());

        Ok(record)
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> SyncResult<Value> {
        self.check_up()?;

        let mut collections = self.collections.lock().await;
        let records = collections
            .entry(collection.to_string())
            .or_default();

        let record = records
            .iter_mut()
            .find(|r| r.get("id").and_then(Value::as_str) == Some(id))
            .ok_or_else(|| Self::not_found(collection, id))?;

        if let (Some(target), Some(fields)) = (record.as_object_mut(), patch.as_object()) {
            for (key, value) in fields {
                if key == "id" || key == "created_at" {
                    continue;
                }
                target.insert(key.clone(), value.clone());
            }
            target.insert(
                "updated_at".into(),
                Value::String(Utc::now().to_rfc3339()),
            );
        }

        Ok(record.clone())
    }

    async fn delete(&self, collection: &str, id: &str) -> SyncResult<()> {
        self.check_up()?;

        let mut collections = self.collections.lock().await;
        let records = collections
            .entry(collection.to_string())
            .or_default();

        let before = records.len();
        records.retain(|r| r.get("id").and_then(Value::as_str) != Some(id));

        if records.len() == before {
            return Err(Self::not_found(collection, id));
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
