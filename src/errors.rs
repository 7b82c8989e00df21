// src/errors.rs
use axum::http::StatusCode;
use serde_json::json;

use crate::db::models::requests::{RequestKind, RequestStatus};
use crate::db::store::StoreError;
use crate::utils::api_response::ApiResponse;
use crate::utils::notification::NotificationError;

/// Errors surfaced by the inventory accessors, the pre-check and the
/// approval engine. A unit conflict is not an error and never appears here.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{kind} request {id} not found")]
    RequestNotFound { kind: RequestKind, id: String },

    #[error("Inventory item not found: {0}")]
    ItemNotFound(String),

    #[error("Notification not found: {0}")]
    NotificationNotFound(String),

    #[error("Inventory item {id} already exists as {name} ({unit})")]
    ItemExists { id: String, name: String, unit: String },

    #[error("Request {id} has already been processed (status: {status})")]
    AlreadyProcessed { id: String, status: RequestStatus },

    #[error("Insufficient stock for {item}: {available} {unit} available, {requested} {unit} requested")]
    InsufficientStock {
        item: String,
        available: f64,
        requested: f64,
        unit: String,
    },

    #[error("Inventory changed since the pre-check: {0}")]
    StalePlan(String),

    #[error("Gave up after {attempts} conflicting transaction attempts")]
    TransactionConflict { attempts: u32 },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Notification(#[from] NotificationError),

    #[error("Failed to serialize data: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::RequestNotFound { .. }
            | ServiceError::ItemNotFound(_)
            | ServiceError::NotificationNotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::AlreadyProcessed { .. }
            | ServiceError::InsufficientStock { .. }
            | ServiceError::ItemExists { .. }
            | ServiceError::StalePlan(_) => StatusCode::CONFLICT,
            ServiceError::TransactionConflict { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::Notification(_) | ServiceError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ServiceError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ServiceError::Store(StoreError::Conflict { .. }) => StatusCode::CONFLICT,
            ServiceError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "validation_error",
            ServiceError::RequestNotFound { .. } => "request_not_found",
            ServiceError::ItemNotFound(_) => "item_not_found",
            ServiceError::NotificationNotFound(_) => "notification_not_found",
            ServiceError::ItemExists { .. } => "item_exists",
            ServiceError::AlreadyProcessed { .. } => "already_processed",
            ServiceError::InsufficientStock { .. } => "insufficient_stock",
            ServiceError::StalePlan(_) => "stale_plan",
            ServiceError::TransactionConflict { .. } => "transaction_conflict",
            ServiceError::Forbidden(_) => "forbidden",
            ServiceError::Notification(_) => "notification_error",
            ServiceError::Serialization(_) => "serialization_error",
            ServiceError::Store(_) => "store_error",
        }
    }
}

impl From<ServiceError> for ApiResponse<()> {
    fn from(err: ServiceError) -> Self {
        ApiResponse::error(
            err.status_code(),
            err.to_string(),
            Some(json!({ "code": err.code() })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_http_statuses() {
        let already = ServiceError::AlreadyProcessed {
            id: "r1".into(),
            status: RequestStatus::Approved,
        };
        assert_eq!(already.status_code(), StatusCode::CONFLICT);
        assert!(already.to_string().contains("already been processed"));

        let missing = ServiceError::Store(StoreError::not_found("inventory", "apple"));
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);

        let response: ApiResponse<()> = ServiceError::Validation("bad".into()).into();
        assert_eq!(response.status_code, 400);
        assert!(!response.success);
    }

    #[test]
    fn insufficient_stock_message_is_readable() {
        let err = ServiceError::InsufficientStock {
            item: "Apple".into(),
            available: 10.0,
            requested: 15.0,
            unit: "kg".into(),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for Apple: 10 kg available, 15 kg requested"
        );
    }

    fn encode_unit(raw: &str) -> Result<serde_json::Value, ServiceError> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        Ok(value)
    }

    #[test]
    fn json_errors_convert_with_question_mark() {
        let err = encode_unit("{not json").unwrap_err();
        assert!(matches!(err, ServiceError::Serialization(_)));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let response: ApiResponse<()> = err.into();
        assert_eq!(response.status_code, 500);
    }

    #[test]
    fn store_conflicts_surface_as_conflict() {
        let err = ServiceError::Store(StoreError::conflict("inventory", "apple"));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "store_error");
    }
}
