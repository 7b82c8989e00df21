// src/db/models/requests.rs
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::store::collections;
use crate::utils::category::{main_category_of, Category, Subcategory};
use crate::utils::units::Unit;

/// Which queue a request lives in.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Addition,
    Removal,
}

impl RequestKind {
    pub fn collection(self) -> &'static str {
        match self {
            RequestKind::Addition => collections::ADDITION_REQUESTS,
            RequestKind::Removal => collections::REMOVAL_REQUESTS,
        }
    }

    /// Path segment used by the HTTP routes.
    pub fn from_path(segment: &str) -> Option<Self> {
        match segment {
            "additions" | "addition" => Some(RequestKind::Addition),
            "removals" | "removal" => Some(RequestKind::Removal),
            _ => None,
        }
    }

    pub fn verb(self) -> &'static str {
        match self {
            RequestKind::Addition => "add",
            RequestKind::Removal => "remove",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Addition => f.write_str("addition"),
            RequestKind::Removal => f.write_str("removal"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestStatus::Pending => f.write_str("pending"),
            RequestStatus::Approved => f.write_str("approved"),
            RequestStatus::Rejected => f.write_str("rejected"),
        }
    }
}

/// One proposed change inside a request.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequestedItem {
    pub name: String,
    /// Always derived from `subcategory` once validated.
    #[serde(default)]
    pub category: Option<Category>,
    pub subcategory: Subcategory,
    pub quantity: f64,
    pub unit: Unit,
    /// Removal requests raised from the inventory table point at the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory_item_id: Option<String>,
}

impl RequestedItem {
    pub fn category(&self) -> Category {
        main_category_of(self.subcategory)
    }

    /// Checks the line item and fills in the derived category.
    pub fn validated(mut self) -> Result<Self, String> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err("item name must not be empty".to_string());
        }
        if !self.quantity.is_finite() || self.quantity <= 0.0 {
            return Err(format!("quantity for '{name}' must be a positive number"));
        }
        let derived = self.category();
        if let Some(given) = self.category {
            if given != derived {
                return Err(format!(
                    "category '{given}' does not match subcategory '{}' (expected '{derived}')",
                    self.subcategory
                ));
            }
        }
        self.name = name.to_string();
        self.category = Some(derived);
        Ok(self)
    }

    /// "5 kg of Apples"
    pub fn describe(&self) -> String {
        format!("{} {} of {}", format_quantity(self.quantity), self.unit, self.name)
    }
}

pub fn format_quantity(quantity: f64) -> String {
    if quantity.fract() == 0.0 {
        format!("{quantity:.0}")
    } else {
        let s = format!("{quantity:.3}");
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

/// A submitted addition or removal proposal.
///
/// Older documents carry a single `requestedItem` instead of the
/// `requestedItems` list; both shapes decode into the list form here and
/// nowhere else.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase", try_from = "RequestDocument")]
pub struct InventoryRequest {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    pub requested_items: Vec<RequestedItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timestamp: Option<DateTime<Utc>>,
    pub status: RequestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_notes: Option<String>,
}

impl InventoryRequest {
    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }
}

/// Raw stored shape, accepting both the list and the legacy single item.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestDocument {
    #[serde(default)]
    id: String,
    user_id: String,
    #[serde(default)]
    user_name: String,
    #[serde(default)]
    requested_items: Option<Vec<RequestedItem>>,
    #[serde(default)]
    requested_item: Option<RequestedItem>,
    #[serde(default)]
    request_timestamp: Option<DateTime<Utc>>,
    status: RequestStatus,
    #[serde(default)]
    admin_id: Option<String>,
    #[serde(default)]
    admin_name: Option<String>,
    #[serde(default)]
    processed_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    admin_notes: Option<String>,
}

impl TryFrom<RequestDocument> for InventoryRequest {
    type Error = String;

    fn try_from(doc: RequestDocument) -> Result<Self, Self::Error> {
        let requested_items = match (doc.requested_items, doc.requested_item) {
            (Some(items), _) if !items.is_empty() => items,
            (_, Some(item)) => vec![item],
            _ => return Err(format!("request {} has no requested items", doc.id)),
        };

        Ok(InventoryRequest {
            id: doc.id,
            user_id: doc.user_id,
            user_name: doc.user_name,
            requested_items,
            request_timestamp: doc.request_timestamp,
            status: doc.status,
            admin_id: doc.admin_id,
            admin_name: doc.admin_name,
            processed_timestamp: doc.processed_timestamp,
            admin_notes: doc.admin_notes,
        })
    }
}

/// Body of a submission. `item` is the legacy single-item form.
#[derive(Debug, Serialize, Deserialize, Clone, Default, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewInventoryRequest {
    #[serde(default, alias = "requestedItems")]
    pub items: Vec<RequestedItem>,
    #[serde(default, alias = "requestedItem")]
    pub item: Option<RequestedItem>,
}

impl NewInventoryRequest {
    pub fn into_items(self) -> Vec<RequestedItem> {
        let mut items = self.items;
        items.extend(self.item);
        items
    }
}

#[derive(Debug, Deserialize, Default, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn apple() -> serde_json::Value {
        json!({ "name": "Apple", "subcategory": "Fruits", "quantity": 5, "unit": "kg" })
    }

    #[test]
    fn legacy_single_item_becomes_a_list() {
        let request: InventoryRequest = serde_json::from_value(json!({
            "id": "r1",
            "userId": "u1",
            "userName": "Sam",
            "requestedItem": apple(),
            "status": "pending",
        }))
        .unwrap();
        assert_eq!(request.requested_items.len(), 1);
        assert_eq!(request.requested_items[0].name, "Apple");

        let out = serde_json::to_value(&request).unwrap();
        assert!(out.get("requestedItem").is_none());
        assert_eq!(out["requestedItems"][0]["unit"], json!("kg"));
    }

    #[test]
    fn request_without_items_is_rejected() {
        let result = serde_json::from_value::<InventoryRequest>(json!({
            "id": "r2",
            "userId": "u1",
            "requestedItems": [],
            "status": "pending",
        }));
        assert!(result.is_err());
    }

    #[test]
    fn validation_derives_category_and_trims() {
        let item: RequestedItem = serde_json::from_value(json!({
            "name": "  Apple ", "subcategory": "Fruits", "quantity": 2, "unit": "kg"
        }))
        .unwrap();
        let item = item.validated().unwrap();
        assert_eq!(item.name, "Apple");
        assert_eq!(item.category, Some(Category::Produce));
    }

    #[test]
    fn validation_rejects_bad_line_items() {
        let base: RequestedItem = serde_json::from_value(apple()).unwrap();

        let mut blank = base.clone();
        blank.name = "   ".into();
        assert!(blank.validated().is_err());

        let mut negative = base.clone();
        negative.quantity = -1.0;
        assert!(negative.validated().is_err());

        let mut mismatched = base;
        mismatched.category = Some(Category::Dairy);
        assert!(mismatched.validated().is_err());
    }

    #[test]
    fn quantities_format_compactly() {
        assert_eq!(format_quantity(5.0), "5");
        assert_eq!(format_quantity(2.5), "2.5");
        assert_eq!(format_quantity(0.264172), "0.264");
    }
}
