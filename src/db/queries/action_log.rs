// src/db/queries/action_log.rs
use std::sync::Arc;

use serde_json::json;

use crate::db::models::action_log::ActionLogEntry;
use crate::db::store::{collections, server_timestamp, to_document, DocumentStore, Snapshot, Transaction};
use crate::errors::ServiceError;

/// Stages an audit entry; the store stamps `timestamp` at commit.
pub fn stage_action_log(tx: &mut dyn Transaction, entry: &ActionLogEntry) -> Result<String, ServiceError> {
    let mut doc = to_document(entry)?;
    if let serde_json::Value::Object(fields) = &mut doc {
        fields.insert("timestamp".into(), server_timestamp());
    }
    Ok(tx.create(collections::ACTION_LOGS, doc))
}

/// Read-only view of the audit trail.
#[derive(Clone)]
pub struct ActionLog {
    store: Arc<dyn DocumentStore>,
}

impl ActionLog {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Most recent entries first.
    pub async fn list(&self, limit: usize) -> Result<Vec<ActionLogEntry>, ServiceError> {
        let snapshots = self.store.list(collections::ACTION_LOGS).await?;
        let mut entries = decode(snapshots)?;
        entries.truncate(limit);
        Ok(entries)
    }

    pub async fn for_request(&self, request_id: &str) -> Result<Vec<ActionLogEntry>, ServiceError> {
        let snapshots = self
            .store
            .query_eq(collections::ACTION_LOGS, "requestId", &json!(request_id))
            .await?;
        decode(snapshots)
    }
}

fn decode(snapshots: Vec<Snapshot>) -> Result<Vec<ActionLogEntry>, ServiceError> {
    let mut entries = snapshots
        .into_iter()
        .map(Snapshot::decode::<ActionLogEntry>)
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::InMemoryStore;
    use crate::db::models::action_log::ActionType;

    fn entry(request_id: &str, action_type: ActionType) -> ActionLogEntry {
        ActionLogEntry {
            id: String::new(),
            action_type,
            request_id: request_id.into(),
            user_id: "u1".into(),
            user_name: "Sam".into(),
            admin_id: "admin-1".into(),
            admin_name: "Alex".into(),
            timestamp: None,
            details: json!({ "requestedItems": [] }),
        }
    }

    async fn record(store: &InMemoryStore, entry: &ActionLogEntry, at: &str) -> String {
        let mut tx = store.begin().await.unwrap();
        let id = stage_action_log(tx.as_mut(), entry).unwrap();
        tx.commit().await.unwrap();
        store
            .update(collections::ACTION_LOGS, &id, json!({ "timestamp": at }))
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn committed_entries_carry_a_timestamp() {
        let store = Arc::new(InMemoryStore::new());
        let mut tx = store.begin().await.unwrap();
        let id = stage_action_log(tx.as_mut(), &entry("r1", ActionType::AdditionApproved)).unwrap();
        tx.commit().await.unwrap();

        let log = ActionLog::new(store);
        let entries = log.list(10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        assert!(entries[0].timestamp.is_some());
    }

    #[tokio::test]
    async fn list_is_newest_first_and_limited() {
        let store = Arc::new(InMemoryStore::new());
        record(&store, &entry("r1", ActionType::AdditionApproved), "2024-01-01T10:00:00Z").await;
        record(&store, &entry("r2", ActionType::RemovalRejected), "2024-01-03T10:00:00Z").await;
        record(&store, &entry("r3", ActionType::RemovalApproved), "2024-01-02T10:00:00Z").await;
        let log = ActionLog::new(store);

        let all = log.list(10).await.unwrap();
        let order: Vec<_> = all.iter().map(|e| e.request_id.as_str()).collect();
        assert_eq!(order, ["r2", "r3", "r1"]);

        let latest = log.list(1).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].action_type, ActionType::RemovalRejected);
    }

    #[tokio::test]
    async fn entries_filter_by_request() {
        let store = Arc::new(InMemoryStore::new());
        record(&store, &entry("r1", ActionType::AdditionRejected), "2024-01-01T10:00:00Z").await;
        let wanted = record(&store, &entry("r2", ActionType::AdditionApproved), "2024-01-02T10:00:00Z").await;
        let log = ActionLog::new(store);

        let entries = log.for_request("r2").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, wanted);
        assert!(log.for_request("missing").await.unwrap().is_empty());
    }
}
