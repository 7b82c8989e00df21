// src/db/memory.rs
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::db::store::{
    into_object, resolve_server_timestamps, ChangeEvent, ChangeKind, DocumentStore, Snapshot,
    StagedWrite, StoreError, StoreResult, Transaction,
};

type Key = (String, String);

#[derive(Debug, Clone)]
struct Versioned {
    version: u64,
    data: Value,
}

#[derive(Default, Clone)]
struct Documents {
    docs: BTreeMap<Key, Versioned>,
    // Version a key had when it was deleted, so a recreated document never
    // reuses a version an open transaction may have recorded.
    tombstones: HashMap<Key, u64>,
    clock: u64,
}

impl Documents {
    /// Version 0 stands for "never written".
    fn version_of(&self, key: &Key) -> u64 {
        self.docs
            .get(key)
            .map(|doc| doc.version)
            .or_else(|| self.tombstones.get(key).copied())
            .unwrap_or(0)
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn snapshot(&self, key: &Key) -> Option<Snapshot> {
        self.docs.get(key).map(|doc| Snapshot {
            id: key.1.clone(),
            data: doc.data.clone(),
        })
    }

    fn put(&mut self, key: Key, data: Value) -> ChangeKind {
        let kind = if self.docs.contains_key(&key) { ChangeKind::Updated } else { ChangeKind::Created };
        let version = self.tick();
        self.tombstones.remove(&key);
        self.docs.insert(key, Versioned { version, data });
        kind
    }

    fn merge(&mut self, key: &Key, patch: Value) -> StoreResult<()> {
        let patch = into_object(&key.0, &key.1, patch)?;
        if !self.docs.contains_key(key) {
            return Err(StoreError::not_found(&key.0, &key.1));
        }
        let version = self.tick();
        if let Some(doc) = self.docs.get_mut(key) {
            if let Value::Object(fields) = &mut doc.data {
                fields.extend(patch);
            }
            doc.version = version;
        }
        Ok(())
    }

    fn remove(&mut self, key: &Key) -> Option<Versioned> {
        let removed = self.docs.remove(key)?;
        let version = self.tick();
        self.tombstones.insert(key.clone(), version);
        Some(removed)
    }
}

/// Process-local document store. Used when no database is configured and as
/// the store behind every test.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Documents>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Mutex::new(Documents::default())),
            changes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Documents> {
        // A panic while holding the lock cannot leave a half-applied write
        // behind, so a poisoned guard is still consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self, collection: &str, id: &str, kind: ChangeKind) {
        // No subscribers is not an error.
        let _ = self.changes.send(ChangeEvent {
            collection: collection.to_string(),
            id: id.to_string(),
            kind,
        });
    }
}

fn key(collection: &str, id: &str) -> Key {
    (collection.to_string(), id.to_string())
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Snapshot>> {
        Ok(self.lock().snapshot(&key(collection, id)))
    }

    async fn set(&self, collection: &str, id: &str, mut data: Value) -> StoreResult<()> {
        resolve_server_timestamps(&mut data, Utc::now());
        let data = Value::Object(into_object(collection, id, data)?);
        let kind = self.lock().put(key(collection, id), data);
        self.notify(collection, id, kind);
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, mut patch: Value) -> StoreResult<()> {
        resolve_server_timestamps(&mut patch, Utc::now());
        self.lock().merge(&key(collection, id), patch)?;
        self.notify(collection, id, ChangeKind::Updated);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        let removed = self.lock().remove(&key(collection, id));
        if removed.is_none() {
            return Err(StoreError::not_found(collection, id));
        }
        self.notify(collection, id, ChangeKind::Deleted);
        Ok(())
    }

    async fn add(&self, collection: &str, data: Value) -> StoreResult<String> {
        let id = Uuid::new_v4().to_string();
        self.set(collection, &id, data).await?;
        Ok(id)
    }

    async fn list(&self, collection: &str) -> StoreResult<Vec<Snapshot>> {
        let docs = self.lock();
        Ok(docs
            .docs
            .iter()
            .filter(|((coll, _), _)| coll == collection)
            .map(|((_, id), doc)| Snapshot {
                id: id.clone(),
                data: doc.data.clone(),
            })
            .collect())
    }

    async fn query_eq(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> StoreResult<Vec<Snapshot>> {
        let all = self.list(collection).await?;
        Ok(all
            .into_iter()
            .filter(|snap| snap.data.get(field) == Some(value))
            .collect())
    }

    async fn begin(&self) -> StoreResult<Box<dyn Transaction>> {
        Ok(Box::new(InMemoryTransaction {
            store: self.clone(),
            reads: HashMap::new(),
            writes: Vec::new(),
        }))
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

pub struct InMemoryTransaction {
    store: InMemoryStore,
    reads: HashMap<Key, u64>,
    writes: Vec<StagedWrite>,
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn get(&mut self, collection: &str, id: &str) -> StoreResult<Option<Snapshot>> {
        let key = key(collection, id);
        let docs = self.store.lock();
        let version = docs.version_of(&key);
        let snapshot = docs.snapshot(&key);
        drop(docs);

        // The first observed version is the one validated at commit.
        self.reads.entry(key).or_insert(version);
        Ok(snapshot)
    }

    fn set(&mut self, collection: &str, id: &str, data: Value) {
        self.writes.push(StagedWrite::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        });
    }

    fn update(&mut self, collection: &str, id: &str, patch: Value) {
        self.writes.push(StagedWrite::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            patch,
        });
    }

    fn create(&mut self, collection: &str, data: Value) -> String {
        let id = Uuid::new_v4().to_string();
        self.set(collection, &id, data);
        id
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let InMemoryTransaction { store, reads, writes } = *self;
        let now = Utc::now();
        let mut events = Vec::with_capacity(writes.len());

        {
            let mut docs = store.lock();
            for (key, seen) in &reads {
                if docs.version_of(key) != *seen {
                    debug!(collection = %key.0, id = %key.1, "Read set changed before commit");
                    return Err(StoreError::conflict(&key.0, &key.1));
                }
            }

            // Validate every write against a scratch copy first so a failure
            // leaves the committed state untouched.
            let mut staged = docs.clone();
            for write in writes {
                match write {
                    StagedWrite::Set { collection, id, mut data } => {
                        resolve_server_timestamps(&mut data, now);
                        let data = Value::Object(into_object(&collection, &id, data)?);
                        let kind = staged.put(key(&collection, &id), data);
                        events.push((collection, id, kind));
                    }
                    StagedWrite::Update { collection, id, mut patch } => {
                        resolve_server_timestamps(&mut patch, now);
                        staged.merge(&key(&collection, &id), patch)?;
                        events.push((collection, id, ChangeKind::Updated));
                    }
                }
            }
            *docs = staged;
        }

        for (collection, id, kind) in events {
            store.notify(&collection, &id, kind);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::server_timestamp;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn crud_and_query() {
        let store = InMemoryStore::new();
        assert_ok!(store.set("inventory", "apple", json!({ "name": "Apple", "unit": "kg" })).await);
        assert_ok!(store.set("inventory", "pear", json!({ "name": "Pear", "unit": "kg" })).await);
        assert_ok!(store.update("inventory", "apple", json!({ "quantity": 3 })).await);

        let apple = store.get("inventory", "apple").await.unwrap().unwrap();
        assert_eq!(apple.data["quantity"], json!(3));
        assert_eq!(apple.data["name"], json!("Apple"));

        let kg = store.query_eq("inventory", "unit", &json!("kg")).await.unwrap();
        assert_eq!(kg.len(), 2);

        assert_ok!(store.delete("inventory", "pear").await);
        assert!(store.get("inventory", "pear").await.unwrap().is_none());
        assert_err!(store.delete("inventory", "pear").await);
        assert_err!(store.update("inventory", "pear", json!({ "quantity": 1 })).await);
    }

    #[tokio::test]
    async fn server_timestamp_is_resolved_on_write() {
        let store = InMemoryStore::new();
        let id = store
            .add("actionLogs", json!({ "timestamp": server_timestamp() }))
            .await
            .unwrap();
        let doc = store.get("actionLogs", &id).await.unwrap().unwrap();
        assert!(doc.data["timestamp"].is_string());
    }

    #[tokio::test]
    async fn transaction_commits_all_writes() {
        let store = InMemoryStore::new();
        store.set("inventory", "apple", json!({ "quantity": 10 })).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let current = tx.get("inventory", "apple").await.unwrap().unwrap();
        assert_eq!(current.data["quantity"], json!(10));
        tx.update("inventory", "apple", json!({ "quantity": 5 }));
        let log_id = tx.create("actionLogs", json!({ "actionType": "test" }));
        assert_ok!(tx.commit().await);

        let apple = store.get("inventory", "apple").await.unwrap().unwrap();
        assert_eq!(apple.data["quantity"], json!(5));
        assert!(store.get("actionLogs", &log_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stale_read_set_conflicts() {
        let store = InMemoryStore::new();
        store.set("requests", "r1", json!({ "status": "pending" })).await.unwrap();

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        first.get("requests", "r1").await.unwrap();
        second.get("requests", "r1").await.unwrap();

        first.update("requests", "r1", json!({ "status": "approved" }));
        second.update("requests", "r1", json!({ "status": "rejected" }));

        assert_ok!(first.commit().await);
        let err = second.commit().await.unwrap_err();
        assert!(err.is_retryable());

        let doc = store.get("requests", "r1").await.unwrap().unwrap();
        assert_eq!(doc.data["status"], json!("approved"));
    }

    #[tokio::test]
    async fn delete_and_recreate_invalidates_earlier_reads() {
        let store = InMemoryStore::new();
        store.set("inventory", "apple", json!({ "quantity": 10 })).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.get("inventory", "apple").await.unwrap();

        store.delete("inventory", "apple").await.unwrap();
        store.set("inventory", "apple", json!({ "quantity": 1 })).await.unwrap();

        tx.update("inventory", "apple", json!({ "quantity": 5 }));
        let err = tx.commit().await.unwrap_err();
        assert!(err.is_retryable());

        let doc = store.get("inventory", "apple").await.unwrap().unwrap();
        assert_eq!(doc.data["quantity"], json!(1));
    }

    #[tokio::test]
    async fn read_of_missing_document_conflicts_once_it_is_created() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        assert!(tx.get("inventory", "salt").await.unwrap().is_none());

        store.set("inventory", "salt", json!({ "quantity": 3 })).await.unwrap();

        tx.set("inventory", "salt", json!({ "quantity": 1 }));
        assert!(tx.commit().await.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn failed_commit_leaves_no_partial_writes() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.set("inventory", "salt", json!({ "quantity": 1 }));
        tx.update("inventory", "missing", json!({ "quantity": 2 }));

        let err = tx.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(store.get("inventory", "salt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn subscribers_see_committed_changes() {
        let store = InMemoryStore::new();
        let mut rx = store.subscribe();
        store.set("inventory", "apple", json!({})).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.collection, "inventory");
        assert_eq!(event.id, "apple");
        assert_eq!(event.kind, ChangeKind::Created);
    }
}
