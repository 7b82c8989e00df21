// src/db/queries/notification.rs
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, instrument};

use crate::db::models::notification::{Notification, NotificationCountResponse};
use crate::db::store::{collections, DocumentStore, Snapshot};
use crate::errors::ServiceError;

/// Read side of the per-user inbox. Entries are written by the approval
/// engine; the only change allowed afterwards is marking them read.
#[derive(Clone)]
pub struct NotificationInbox {
    store: Arc<dyn DocumentStore>,
}

impl NotificationInbox {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// The user's notifications, newest first.
    pub async fn list_for_user(
        &self,
        user_id: &str,
        unread_only: bool,
    ) -> Result<Vec<Notification>, ServiceError> {
        let mut notifications = self
            .store
            .query_eq(collections::NOTIFICATIONS, "userId", &json!(user_id))
            .await?
            .into_iter()
            .map(Snapshot::decode::<Notification>)
            .collect::<Result<Vec<_>, _>>()?;
        if unread_only {
            notifications.retain(|n| !n.is_read);
        }
        notifications.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(notifications)
    }

    pub async fn count(&self, user_id: &str) -> Result<NotificationCountResponse, ServiceError> {
        let all = self.list_for_user(user_id, false).await?;
        let unread = all.iter().filter(|n| !n.is_read).count();
        Ok(NotificationCountResponse {
            total: all.len() as i64,
            unread: unread as i64,
        })
    }

    /// Marks one of the user's notifications read. Already-read entries are
    /// left untouched.
    #[instrument(skip(self))]
    pub async fn mark_read(&self, id: &str, user_id: &str) -> Result<Notification, ServiceError> {
        let mut notification: Notification = self
            .store
            .get(collections::NOTIFICATIONS, id)
            .await?
            .ok_or_else(|| ServiceError::NotificationNotFound(id.to_string()))?
            .decode()?;

        if notification.user_id != user_id {
            return Err(ServiceError::Forbidden(
                "notification belongs to another user".into(),
            ));
        }
        if !notification.is_read {
            self.store
                .update(collections::NOTIFICATIONS, id, json!({ "isRead": true }))
                .await?;
            notification.is_read = true;
            debug!(notification_id = %id, "Marked notification read");
        }
        Ok(notification)
    }

    /// Returns how many entries were flipped.
    pub async fn mark_all_read(&self, user_id: &str) -> Result<usize, ServiceError> {
        let unread = self.list_for_user(user_id, true).await?;
        for notification in &unread {
            self.store
                .update(collections::NOTIFICATIONS, &notification.id, json!({ "isRead": true }))
                .await?;
        }
        Ok(unread.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::InMemoryStore;
    use crate::db::models::notification::NotificationType;
    use crate::db::models::requests::RequestKind;
    use crate::utils::notification::NotificationBuilder;

    async fn seeded() -> (NotificationInbox, String) {
        let store = Arc::new(InMemoryStore::new());
        let mut tx = store.begin().await.unwrap();
        let id = NotificationBuilder::new("u1", NotificationType::RequestApproved, RequestKind::Addition, "r1")
            .message("approved")
            .stage(tx.as_mut())
            .unwrap();
        NotificationBuilder::new("u2", NotificationType::RequestRejected, RequestKind::Addition, "r2")
            .message("rejected")
            .stage(tx.as_mut())
            .unwrap();
        tx.commit().await.unwrap();
        (NotificationInbox::new(store), id)
    }

    #[tokio::test]
    async fn mark_read_flips_once() {
        let (inbox, id) = seeded().await;
        assert_eq!(inbox.count("u1").await.unwrap().unread, 1);

        let read = inbox.mark_read(&id, "u1").await.unwrap();
        assert!(read.is_read);
        let again = inbox.mark_read(&id, "u1").await.unwrap();
        assert!(again.is_read);

        let count = inbox.count("u1").await.unwrap();
        assert_eq!((count.total, count.unread), (1, 0));
    }

    #[tokio::test]
    async fn other_users_cannot_mark_read() {
        let (inbox, id) = seeded().await;
        let err = inbox.mark_read(&id, "u2").await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }

    #[tokio::test]
    async fn mark_all_read_only_touches_own_inbox() {
        let (inbox, _) = seeded().await;
        assert_eq!(inbox.mark_all_read("u1").await.unwrap(), 1);
        assert_eq!(inbox.mark_all_read("u1").await.unwrap(), 0);
        assert_eq!(inbox.count("u2").await.unwrap().unread, 1);
    }
}
