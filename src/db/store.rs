// src/db/store.rs
//! Document store contract consumed by the rest of the service.
//!
//! Documents are JSON objects addressed by `collection/id`. Backends provide
//! single-document CRUD, equality queries, change subscriptions and an
//! optimistic transaction: every document read through a [`Transaction`] is
//! version-checked at commit, and a mismatch surfaces as
//! [`StoreError::Conflict`] so callers can retry.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

/// Collection names used by the service.
pub mod collections {
    pub const INVENTORY: &str = "inventory";
    pub const ADDITION_REQUESTS: &str = "additionRequests";
    pub const REMOVAL_REQUESTS: &str = "removalRequests";
    pub const ACTION_LOGS: &str = "actionLogs";
    pub const NOTIFICATIONS: &str = "notifications";
}

const SERVER_TIMESTAMP_KEY: &str = "$serverTimestamp";

/// Errors raised by a document store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("concurrent write detected on {collection}/{id}")]
    Conflict { collection: String, id: String },

    #[error("document {collection}/{id} is not a JSON object")]
    InvalidDocument { collection: String, id: String },

    #[error("Failed to serialize document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Only optimistic-lock conflicts are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    pub fn not_found(collection: &str, id: &str) -> Self {
        StoreError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    pub fn conflict(collection: &str, id: &str) -> Self {
        StoreError::Conflict {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A document as returned by reads and queries.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub id: String,
    pub data: Value,
}

impl Snapshot {
    /// Decodes the document into a model, injecting the document id as `id`.
    pub fn decode<T: serde::de::DeserializeOwned>(self) -> StoreResult<T> {
        let mut data = self.data;
        if let Value::Object(map) = &mut data {
            map.insert("id".to_string(), Value::String(self.id));
        }
        Ok(serde_json::from_value(data)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// Emitted after a write has been committed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub collection: String,
    pub id: String,
    pub kind: ChangeKind,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Snapshot>>;

    /// Creates or replaces the document.
    async fn set(&self, collection: &str, id: &str, data: Value) -> StoreResult<()>;

    /// Merges top-level fields into an existing document.
    async fn update(&self, collection: &str, id: &str, patch: Value) -> StoreResult<()>;

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()>;

    /// Stores a document under a generated id and returns that id.
    async fn add(&self, collection: &str, data: Value) -> StoreResult<String>;

    async fn list(&self, collection: &str) -> StoreResult<Vec<Snapshot>>;

    /// Documents whose top-level `field` equals `value`.
    async fn query_eq(&self, collection: &str, field: &str, value: &Value)
        -> StoreResult<Vec<Snapshot>>;

    async fn begin(&self) -> StoreResult<Box<dyn Transaction>>;

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;

    async fn ping(&self) -> StoreResult<()>;
}

/// Reads are recorded with the version they observed; writes are staged and
/// only applied by [`Transaction::commit`]. Dropping a transaction discards
/// everything staged.
#[async_trait]
pub trait Transaction: Send {
    async fn get(&mut self, collection: &str, id: &str) -> StoreResult<Option<Snapshot>>;

    fn set(&mut self, collection: &str, id: &str, data: Value);

    /// Fails at commit if the document does not exist.
    fn update(&mut self, collection: &str, id: &str, patch: Value);

    /// Stages a new document under a generated id.
    fn create(&mut self, collection: &str, data: Value) -> String;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// A write staged inside a transaction.
#[derive(Debug, Clone)]
pub(crate) enum StagedWrite {
    Set { collection: String, id: String, data: Value },
    Update { collection: String, id: String, patch: Value },
}

/// Placeholder resolved to the commit time by the backend on write.
pub fn server_timestamp() -> Value {
    let mut marker = Map::new();
    marker.insert(SERVER_TIMESTAMP_KEY.to_string(), Value::Bool(true));
    Value::Object(marker)
}

fn is_server_timestamp(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.len() == 1 && map.get(SERVER_TIMESTAMP_KEY) == Some(&Value::Bool(true)))
}

/// Replaces every server timestamp placeholder in `value` with `now`.
pub fn resolve_server_timestamps(value: &mut Value, now: DateTime<Utc>) {
    if is_server_timestamp(value) {
        *value = Value::String(now.to_rfc3339_opts(SecondsFormat::Micros, true));
        return;
    }
    match value {
        Value::Object(map) => map.values_mut().for_each(|v| resolve_server_timestamps(v, now)),
        Value::Array(items) => items.iter_mut().for_each(|v| resolve_server_timestamps(v, now)),
        _ => {}
    }
}

pub(crate) fn into_object(collection: &str, id: &str, data: Value) -> StoreResult<Map<String, Value>> {
    match data {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::InvalidDocument {
            collection: collection.to_string(),
            id: id.to_string(),
        }),
    }
}

/// Serializes a model into a document body. `id` is kept out of the body since
/// it is the document key.
pub fn to_document<T: Serialize>(model: &T) -> StoreResult<Value> {
    let mut value = serde_json::to_value(model)?;
    if let Value::Object(map) = &mut value {
        map.remove("id");
    }
    Ok(value)
}
