// src/db/models/inventory.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::utils::category::{main_category_of, Category, Subcategory};
use crate::utils::units::Unit;

/// Trimmed, lowercased form of a display name. Identity key for matching
/// requested items against stock.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Deterministic document id for a newly created item: the normalized name
/// with whitespace runs collapsed to `_` and everything outside `[a-z0-9_]`
/// dropped. The same name always yields the same id.
pub fn derive_item_id(name: &str) -> String {
    normalize_name(name)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    #[serde(default)]
    pub id: String,
    pub name: String,
    /// Missing on items created before names were normalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_name: Option<String>,
    pub quantity: f64,
    pub unit: Unit,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<Subcategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl InventoryItem {
    pub fn identity_key(&self) -> String {
        self.normalized_name
            .clone()
            .unwrap_or_else(|| normalize_name(&self.name))
    }
}

/// Payload for registering an item directly (seeding, imports).
#[derive(Debug, Serialize, Deserialize, Clone, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewInventoryItem {
    /// Defaults to the id derived from `name`.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub quantity: f64,
    pub unit: Unit,
    pub subcategory: Subcategory,
}

impl NewInventoryItem {
    pub fn category(&self) -> Category {
        main_category_of(self.subcategory)
    }
}

/// Metadata edit. Quantity is deliberately absent: stock only moves through
/// approved requests.
#[derive(Debug, Serialize, Deserialize, Clone, Default, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InventoryPatch {
    pub name: Option<String>,
    pub subcategory: Option<Subcategory>,
    pub unit: Option<Unit>,
}
