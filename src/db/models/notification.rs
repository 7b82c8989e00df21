// src/db/models/notification.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::requests::{RequestKind, RequestedItem};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    RequestApproved,
    RequestRejected,
}

/// Per-user inbox entry. `is_read` is the only field that ever changes, and
/// only from `false` to `true`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(default)]
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub type_field: NotificationType,
    pub message: String,
    pub request_id: String,
    pub request_kind: RequestKind,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_items: Option<Vec<RequestedItem>>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct NotificationCountResponse {
    pub total: i64,
    pub unread: i64,
}
