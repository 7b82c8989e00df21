// src/db/queries/requests.rs
use std::sync::Arc;

use serde_json::json;
use tokio::sync::broadcast;
use tracing::{info, instrument};

use crate::api::auth::AuthUser;
use crate::db::models::requests::{
    InventoryRequest, RequestKind, RequestStatus, RequestedItem,
};
use crate::db::store::{server_timestamp, ChangeEvent, DocumentStore, Snapshot};
use crate::errors::ServiceError;

/// Validates a batch of line items. Every item is checked; the first problem
/// found is reported.
pub fn validate_items(items: Vec<RequestedItem>) -> Result<Vec<RequestedItem>, ServiceError> {
    if items.is_empty() {
        return Err(ServiceError::Validation(
            "a request must contain at least one item".into(),
        ));
    }
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            item.validated()
                .map_err(|e| ServiceError::Validation(format!("item {}: {e}", index + 1)))
        })
        .collect()
}

/// Both request queues. Status changes are not exposed here; they only
/// happen inside the approval engine's transactions.
#[derive(Clone)]
pub struct RequestStore {
    store: Arc<dyn DocumentStore>,
}

impl RequestStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Persists a new pending request for `user`.
    #[instrument(skip(self, user, items), fields(user = %user.id, count = items.len()))]
    pub async fn submit(
        &self,
        kind: RequestKind,
        user: &AuthUser,
        items: Vec<RequestedItem>,
    ) -> Result<InventoryRequest, ServiceError> {
        let items = validate_items(items)?;
        let doc = json!({
            "userId": user.id,
            "userName": user.name,
            "requestedItems": items,
            "requestTimestamp": server_timestamp(),
            "status": RequestStatus::Pending,
        });

        let id = self.store.add(kind.collection(), doc).await?;
        info!(request_id = %id, %kind, "Submitted request");

        self.get(kind, &id).await
    }

    pub async fn find(&self, kind: RequestKind, id: &str) -> Result<Option<InventoryRequest>, ServiceError> {
        let snapshot = self.store.get(kind.collection(), id).await?;
        Ok(snapshot.map(Snapshot::decode).transpose()?)
    }

    pub async fn get(&self, kind: RequestKind, id: &str) -> Result<InventoryRequest, ServiceError> {
        self.find(kind, id)
            .await?
            .ok_or_else(|| ServiceError::RequestNotFound {
                kind,
                id: id.to_string(),
            })
    }

    /// Requests in the queue, newest first, optionally filtered by status.
    pub async fn list(
        &self,
        kind: RequestKind,
        status: Option<RequestStatus>,
    ) -> Result<Vec<InventoryRequest>, ServiceError> {
        let snapshots = match status {
            Some(status) => {
                self.store
                    .query_eq(kind.collection(), "status", &json!(status))
                    .await?
            }
            None => self.store.list(kind.collection()).await?,
        };
        decode_newest_first(snapshots)
    }

    pub async fn list_for_user(
        &self,
        kind: RequestKind,
        user_id: &str,
    ) -> Result<Vec<InventoryRequest>, ServiceError> {
        let snapshots = self
            .store
            .query_eq(kind.collection(), "userId", &json!(user_id))
            .await?;
        decode_newest_first(snapshots)
    }

    /// Change feed for one queue, for real-time admin views.
    pub fn subscribe(&self, kind: RequestKind) -> RequestFeed {
        RequestFeed {
            collection: kind.collection(),
            rx: self.store.subscribe(),
        }
    }
}

fn decode_newest_first(snapshots: Vec<Snapshot>) -> Result<Vec<InventoryRequest>, ServiceError> {
    let mut requests = snapshots
        .into_iter()
        .map(Snapshot::decode::<InventoryRequest>)
        .collect::<Result<Vec<_>, _>>()?;
    requests.sort_by(|a, b| b.request_timestamp.cmp(&a.request_timestamp));
    Ok(requests)
}

/// Store changes narrowed to a single request collection.
pub struct RequestFeed {
    collection: &'static str,
    rx: broadcast::Receiver<ChangeEvent>,
}

impl RequestFeed {
    /// Next change in this queue. `None` once the store is gone.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.collection == self.collection => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
