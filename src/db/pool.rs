// src/db/pool.rs
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::store::{
    into_object, resolve_server_timestamps, ChangeEvent, ChangeKind, DocumentStore, Snapshot,
    StagedWrite, StoreError, StoreResult, Transaction,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    data JSONB NOT NULL,
    version BIGINT NOT NULL DEFAULT 1,
    PRIMARY KEY (collection, id)
)
"#;

pub async fn get_db_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .idle_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await
}

/// Document store backed by a single JSONB table, one row per document.
/// Each row carries a version bumped on every write; transactions lock the
/// rows they read with `FOR UPDATE` at commit and compare versions.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
    changes: broadcast::Sender<ChangeEvent>,
}

impl PgDocumentStore {
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = get_db_pool(database_url).await?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn new(pool: PgPool) -> Self {
        let (changes, _) = broadcast::channel(256);
        Self { pool, changes }
    }

    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        info!("Document table ready");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn notify(&self, collection: &str, id: &str, kind: ChangeKind) {
        let _ = self.changes.send(ChangeEvent {
            collection: collection.to_string(),
            id: id.to_string(),
            kind,
        });
    }
}

fn snapshot_from_row(row: &sqlx::postgres::PgRow) -> Result<Snapshot, sqlx::Error> {
    let id: String = row.try_get("id")?;
    let data: Json<Value> = row.try_get("data")?;
    Ok(Snapshot { id, data: data.0 })
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Snapshot>> {
        let row = sqlx::query("SELECT id, data FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(snapshot_from_row).transpose()?)
    }

    async fn set(&self, collection: &str, id: &str, mut data: Value) -> StoreResult<()> {
        resolve_server_timestamps(&mut data, Utc::now());
        let data = Value::Object(into_object(collection, id, data)?);
        let inserted: bool = sqlx::query_scalar(
            r#"
            INSERT INTO documents (collection, id, data, version)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (collection, id)
            DO UPDATE SET data = EXCLUDED.data, version = documents.version + 1
            RETURNING (xmax = 0)
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(Json(&data))
        .fetch_one(&self.pool)
        .await?;

        let kind = if inserted { ChangeKind::Created } else { ChangeKind::Updated };
        self.notify(collection, id, kind);
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, mut patch: Value) -> StoreResult<()> {
        resolve_server_timestamps(&mut patch, Utc::now());
        let patch = Value::Object(into_object(collection, id, patch)?);
        let result = sqlx::query(
            "UPDATE documents SET data = data || $3, version = version + 1 WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .bind(Json(&patch))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(collection, id));
        }
        self.notify(collection, id, ChangeKind::Updated);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
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
        let rows = sqlx::query("SELECT id, data FROM documents WHERE collection = $1 ORDER BY id")
            .bind(collection)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(snapshot_from_row).collect::<Result<_, _>>()?)
    }

    async fn query_eq(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> StoreResult<Vec<Snapshot>> {
        let rows = sqlx::query(
            "SELECT id, data FROM documents WHERE collection = $1 AND data -> $2 = $3 ORDER BY id",
        )
        .bind(collection)
        .bind(field)
        .bind(Json(value))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(snapshot_from_row).collect::<Result<_, _>>()?)
    }

    async fn begin(&self) -> StoreResult<Box<dyn Transaction>> {
        Ok(Box::new(PgTransaction {
            store: self.clone(),
            reads: HashMap::new(),
            writes: Vec::new(),
        }))
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").fetch_optional(&self.pool).await?;
        Ok(())
    }
}

/// Optimistic transaction: reads go straight to the pool and remember the
/// version they saw; commit re-checks those versions under row locks.
pub struct PgTransaction {
    store: PgDocumentStore,
    reads: HashMap<(String, String), i64>,
    writes: Vec<StagedWrite>,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn get(&mut self, collection: &str, id: &str) -> StoreResult<Option<Snapshot>> {
        let row = sqlx::query(
            "SELECT id, data, version FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.store.pool)
        .await?;

        let (snapshot, version) = match row {
            Some(row) => (Some(snapshot_from_row(&row)?), row.try_get::<i64, _>("version")?),
            None => (None, 0),
        };
        self.reads
            .entry((collection.to_string(), id.to_string()))
            .or_insert(version);
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
        let PgTransaction { store, reads, writes } = *self;
        let now = Utc::now();
        let mut tx = store.pool.begin().await.map_err(db_error)?;

        for (collection, id, seen) in lock_order(&reads) {
            let current: Option<i64> = sqlx::query_scalar(
                "SELECT version FROM documents WHERE collection = $1 AND id = $2 FOR UPDATE",
            )
            .bind(collection)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?;

            if current.unwrap_or(0) != seen {
                debug!(collection = %collection, id = %id, "Read set changed before commit");
                return Err(StoreError::conflict(collection, id));
            }
        }

        let mut events = Vec::with_capacity(writes.len());
        for write in writes {
            match write {
                StagedWrite::Set { collection, id, mut data } => {
                    resolve_server_timestamps(&mut data, now);
                    let data = Value::Object(into_object(&collection, &id, data)?);
                    let read_absent = reads
                        .get(&(collection.clone(), id.clone()))
                        .is_some_and(|seen| *seen == 0);

                    let kind = if read_absent {
                        // No row to lock, so a concurrent insert shows up as a no-op here.
                        let result = sqlx::query(
                            r#"
                            INSERT INTO documents (collection, id, data, version)
                            VALUES ($1, $2, $3, 1)
                            ON CONFLICT (collection, id) DO NOTHING
                            "#,
                        )
                        .bind(&collection)
                        .bind(&id)
                        .bind(Json(&data))
                        .execute(&mut *tx)
                        .await
                        .map_err(db_error)?;
                        if result.rows_affected() == 0 {
                            debug!(collection = %collection, id = %id, "Document appeared before commit");
                            return Err(StoreError::conflict(&collection, &id));
                        }
                        ChangeKind::Created
                    } else {
                        let inserted: bool = sqlx::query_scalar(
                            r#"
                            INSERT INTO documents (collection, id, data, version)
                            VALUES ($1, $2, $3, 1)
                            ON CONFLICT (collection, id)
                            DO UPDATE SET data = EXCLUDED.data, version = documents.version + 1
                            RETURNING (xmax = 0)
                            "#,
                        )
                        .bind(&collection)
                        .bind(&id)
                        .bind(Json(&data))
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(db_error)?;
                        if inserted { ChangeKind::Created } else { ChangeKind::Updated }
                    };
                    events.push((collection, id, kind));
                }
                StagedWrite::Update { collection, id, mut patch } => {
                    resolve_server_timestamps(&mut patch, now);
                    let patch = Value::Object(into_object(&collection, &id, patch)?);
                    let result = sqlx::query(
                        "UPDATE documents SET data = data || $3, version = version + 1 WHERE collection = $1 AND id = $2",
                    )
                    .bind(&collection)
                    .bind(&id)
                    .bind(Json(&patch))
                    .execute(&mut *tx)
                    .await
                    .map_err(db_error)?;
                    if result.rows_affected() == 0 {
                        return Err(StoreError::not_found(&collection, &id));
                    }
                    events.push((collection, id, ChangeKind::Updated));
                }
            }
        }

        tx.commit().await.map_err(db_error)?;

        for (collection, id, kind) in events {
            store.notify(&collection, &id, kind);
        }
        Ok(())
    }
}

/// Read-set keys in a stable order so concurrent commits take row locks in the same sequence.
fn lock_order(reads: &HashMap<(String, String), i64>) -> Vec<(&str, &str, i64)> {
    let mut keys: Vec<_> = reads
        .iter()
        .map(|((collection, id), seen)| (collection.as_str(), id.as_str(), *seen))
        .collect();
    keys.sort_unstable();
    keys
}

/// Maps Postgres errors that a caller can fix by retrying onto `StoreError::Conflict`.
fn db_error(e: sqlx::Error) -> StoreError {
    let code = e.as_database_error().and_then(|db| db.code());
    match code.as_deref() {
        // serialization_failure, deadlock_detected, unique_violation
        Some("40001") | Some("40P01") | Some("23505") => StoreError::conflict("documents", ""),
        _ => StoreError::Database(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn read_set_is_locked_in_key_order() {
        let mut reads = HashMap::new();
        reads.insert(("inventory".to_string(), "tomatoes".to_string()), 3);
        reads.insert(("inventory".to_string(), "apples".to_string()), 0);
        reads.insert(("requests".to_string(), "a1".to_string()), 1);

        let order = lock_order(&reads);
        assert_eq!(
            order,
            vec![
                ("inventory", "apples", 0),
                ("inventory", "tomatoes", 3),
                ("requests", "a1", 1),
            ]
        );
    }

    #[test]
    fn non_database_errors_are_not_retryable() {
        let err = db_error(sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::Database(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    #[ignore]
    async fn racing_creates_of_an_absent_document_conflict() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let store = PgDocumentStore::connect(&url).await.expect("db connect");
        let id = Uuid::new_v4().to_string();

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        assert!(first.get("inventory", &id).await.unwrap().is_none());
        assert!(second.get("inventory", &id).await.unwrap().is_none());
        first.set("inventory", &id, json!({ "quantity": 1 }));
        second.set("inventory", &id, json!({ "quantity": 2 }));

        first.commit().await.unwrap();
        assert!(second.commit().await.unwrap_err().is_retryable());

        let doc = store.get("inventory", &id).await.unwrap().unwrap();
        assert_eq!(doc.data["quantity"], json!(1));
        store.delete("inventory", &id).await.unwrap();
    }

    // Needs a reachable Postgres: DATABASE_URL=... cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn optimistic_commit_against_postgres() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let store = PgDocumentStore::connect(&url).await.expect("db connect");
        let id = Uuid::new_v4().to_string();
        store.set("inventory", &id, json!({ "quantity": 10 })).await.unwrap();

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        first.get("inventory", &id).await.unwrap();
        second.get("inventory", &id).await.unwrap();
        first.update("inventory", &id, json!({ "quantity": 4 }));
        second.update("inventory", &id, json!({ "quantity": 7 }));

        first.commit().await.unwrap();
        assert!(second.commit().await.unwrap_err().is_retryable());

        let doc = store.get("inventory", &id).await.unwrap().unwrap();
        assert_eq!(doc.data["quantity"], json!(4));
        store.delete("inventory", &id).await.unwrap();
    }
}
