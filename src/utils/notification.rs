// src/utils/notification.rs
use serde_json::Value;

use crate::db::models::notification::NotificationType;
use crate::db::models::requests::{format_quantity, RequestKind, RequestedItem};
use crate::db::store::{collections, server_timestamp, Transaction};

/// Errors that can occur while building a notification
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Notification has no recipient")]
    MissingRecipient,

    #[error("Failed to serialize notification data: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Builds a per-user notification and stages it in a transaction, so the
/// inbox entry commits together with the decision it reports.
pub struct NotificationBuilder {
    user_id: String,
    notification_type: NotificationType,
    request_kind: RequestKind,
    request_id: String,
    message: String,
    admin_notes: Option<String>,
    approved_items: Option<Vec<RequestedItem>>,
}

impl NotificationBuilder {
    pub fn new(
        user_id: impl Into<String>,
        notification_type: NotificationType,
        request_kind: RequestKind,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            notification_type,
            request_kind,
            request_id: request_id.into(),
            message: String::new(),
            admin_notes: None,
            approved_items: None,
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn admin_notes(mut self, notes: impl Into<String>) -> Self {
        self.admin_notes = Some(notes.into());
        self
    }

    /// Items with quantities, kept for the inbox detail view
    pub fn approved_items(mut self, items: Vec<RequestedItem>) -> Self {
        self.approved_items = Some(items);
        self
    }

    pub fn build(self) -> Result<Value, NotificationError> {
        if self.user_id.trim().is_empty() {
            return Err(NotificationError::MissingRecipient);
        }

        let mut doc = serde_json::Map::new();
        doc.insert("userId".into(), Value::String(self.user_id));
        doc.insert("type".into(), serde_json::to_value(self.notification_type)?);
        doc.insert("message".into(), Value::String(self.message));
        doc.insert("requestId".into(), Value::String(self.request_id));
        doc.insert("requestKind".into(), serde_json::to_value(self.request_kind)?);
        doc.insert("timestamp".into(), server_timestamp());
        doc.insert("isRead".into(), Value::Bool(false));
        if let Some(notes) = self.admin_notes {
            doc.insert("adminNotes".into(), Value::String(notes));
        }
        if let Some(items) = self.approved_items {
            doc.insert("approvedItems".into(), serde_json::to_value(items)?);
        }
        Ok(Value::Object(doc))
    }

    /// Stages the notification and returns its id
    pub fn stage(self, tx: &mut dyn Transaction) -> Result<String, NotificationError> {
        let doc = self.build()?;
        Ok(tx.create(collections::NOTIFICATIONS, doc))
    }
}

/// "5 kg of Apple" for one item, "3 items" for several.
fn summarize(items: &[RequestedItem]) -> String {
    match items {
        [single] => single.describe(),
        many => format!("{} items", many.len()),
    }
}

pub fn approval_message(kind: RequestKind, items: &[RequestedItem]) -> String {
    format!(
        "Your request to {} {} has been approved.",
        kind.verb(),
        summarize(items)
    )
}

pub fn rejection_message(kind: RequestKind, items: &[RequestedItem], notes: &str) -> String {
    format!(
        "Your request to {} {} has been rejected. Reason: {}",
        kind.verb(),
        summarize(items),
        notes
    )
}

/// One line per item, used in audit log details.
pub fn item_lines(items: &[RequestedItem]) -> Vec<String> {
    items
        .iter()
        .map(|item| format!("{}: {} {}", item.name, format_quantity(item.quantity), item.unit))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::category::Subcategory;
    use crate::utils::units::Unit;
    use serde_json::json;

    fn item(name: &str) -> RequestedItem {
        RequestedItem {
            name: name.into(),
            category: None,
            subcategory: Subcategory::Fruits,
            quantity: 5.0,
            unit: Unit::Kilogram,
            inventory_item_id: None,
        }
    }

    #[test]
    fn messages_are_singular_or_counted() {
        assert_eq!(
            approval_message(RequestKind::Removal, &[item("Apple")]),
            "Your request to remove 5 kg of Apple has been approved."
        );
        assert_eq!(
            approval_message(RequestKind::Addition, &[item("Apple"), item("Pear")]),
            "Your request to add 2 items has been approved."
        );
        assert!(rejection_message(RequestKind::Addition, &[item("Apple")], "Duplicate")
            .ends_with("Reason: Duplicate"));
    }

    #[test]
    fn builder_produces_unread_inbox_entry() {
        let doc = NotificationBuilder::new("u1", NotificationType::RequestApproved, RequestKind::Removal, "r1")
            .message("done")
            .approved_items(vec![item("Apple")])
            .build()
            .unwrap();

        assert_eq!(doc["userId"], json!("u1"));
        assert_eq!(doc["type"], json!("request_approved"));
        assert_eq!(doc["requestKind"], json!("removal"));
        assert_eq!(doc["isRead"], json!(false));
        assert_eq!(doc["approvedItems"][0]["name"], json!("Apple"));
        assert!(doc.get("adminNotes").is_none());
    }

    #[test]
    fn builder_requires_recipient() {
        let result = NotificationBuilder::new(" ", NotificationType::RequestRejected, RequestKind::Addition, "r1")
            .build();
        assert!(matches!(result, Err(NotificationError::MissingRecipient)));
    }
}
