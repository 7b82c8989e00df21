// src/db/models/action_log.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::db::models::requests::{RequestKind, RequestStatus};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    AdditionApproved,
    AdditionRejected,
    RemovalApproved,
    RemovalRejected,
}

impl ActionType {
    pub fn for_decision(kind: RequestKind, decision: RequestStatus) -> Self {
        match (kind, decision) {
            (RequestKind::Addition, RequestStatus::Rejected) => ActionType::AdditionRejected,
            (RequestKind::Addition, _) => ActionType::AdditionApproved,
            (RequestKind::Removal, RequestStatus::Rejected) => ActionType::RemovalRejected,
            (RequestKind::Removal, _) => ActionType::RemovalApproved,
        }
    }
}

/// Append-only audit record, one per approve/reject decision.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActionLogEntry {
    #[serde(default)]
    pub id: String,
    pub action_type: ActionType,
    pub request_id: String,
    pub user_id: String,
    pub user_name: String,
    pub admin_id: String,
    pub admin_name: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[schema(value_type = Object)]
    pub details: Value,
}
