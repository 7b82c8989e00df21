// src/db/queries/inventory.rs
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument};

use crate::db::models::inventory::{
    derive_item_id, normalize_name, InventoryItem, InventoryPatch, NewInventoryItem,
};
use crate::db::store::{collections, server_timestamp, to_document, DocumentStore, Snapshot};
use crate::errors::ServiceError;
use crate::utils::category::{main_category_of, Category, Subcategory};
use crate::utils::units::Unit;

/// Full document body for an item, with `normalizedName` filled in and
/// `lastUpdated` left for the store to stamp.
pub fn item_document(
    name: &str,
    quantity: f64,
    unit: Unit,
    category: Category,
    subcategory: Option<Subcategory>,
) -> Result<Value, ServiceError> {
    let item = InventoryItem {
        id: String::new(),
        name: name.to_string(),
        normalized_name: Some(normalize_name(name)),
        quantity,
        unit,
        category,
        subcategory,
        last_updated: None,
    };
    let mut doc = to_document(&item)?;
    if let Value::Object(fields) = &mut doc {
        fields.insert("lastUpdated".to_string(), server_timestamp());
    }
    Ok(doc)
}

/// CRUD and lookup over the `inventory` collection.
#[derive(Clone)]
pub struct InventoryStore {
    store: Arc<dyn DocumentStore>,
}

impl InventoryStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, id: &str) -> Result<Option<InventoryItem>, ServiceError> {
        let snapshot = self.store.get(collections::INVENTORY, id).await?;
        Ok(snapshot.map(Snapshot::decode).transpose()?)
    }

    /// All items ordered by display name.
    pub async fn list(&self) -> Result<Vec<InventoryItem>, ServiceError> {
        let mut items = self
            .store
            .list(collections::INVENTORY)
            .await?
            .into_iter()
            .map(Snapshot::decode::<InventoryItem>)
            .collect::<Result<Vec<_>, _>>()?;
        items.sort_by_key(|item| item.identity_key());
        Ok(items)
    }

    /// Writes a new item at its explicit id, or at the id derived from its name.
    /// Repeating a create for an item that already exists with the same name and
    /// unit returns the stored item untouched. Any other occupant of the id is
    /// reported as `ItemExists`; stock is never overwritten here.
    #[instrument(skip(self, new), fields(name = %new.name))]
    pub async fn create(&self, new: NewInventoryItem) -> Result<InventoryItem, ServiceError> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(ServiceError::Validation("item name must not be empty".into()));
        }
        if !new.quantity.is_finite() || new.quantity < 0.0 {
            return Err(ServiceError::Validation(format!(
                "quantity for '{name}' must be zero or more"
            )));
        }
        let id = match new.id.as_deref().map(str::trim) {
            Some(explicit) if !explicit.is_empty() => explicit.to_string(),
            _ => derive_item_id(name),
        };
        if id.is_empty() {
            return Err(ServiceError::Validation(format!(
                "cannot derive an id from item name '{name}'"
            )));
        }

        let mut tx = self.store.begin().await?;
        if let Some(snapshot) = tx.get(collections::INVENTORY, &id).await? {
            let existing: InventoryItem = snapshot.decode()?;
            if existing.identity_key() == normalize_name(name) && existing.unit == new.unit {
                debug!(item_id = %id, "Item already exists, create is a no-op");
                return Ok(existing);
            }
            return Err(ServiceError::ItemExists {
                id,
                name: existing.name,
                unit: existing.unit.to_string(),
            });
        }

        let doc = item_document(name, new.quantity, new.unit, new.category(), Some(new.subcategory))?;
        tx.set(collections::INVENTORY, &id, doc);
        tx.commit().await?;
        info!(item_id = %id, "Created inventory item");

        self.get(&id)
            .await?
            .ok_or_else(|| ServiceError::ItemNotFound(id))
    }

    /// Applies a metadata patch. Always refreshes `lastUpdated` and backfills
    /// `normalizedName` on legacy items.
    #[instrument(skip(self, patch))]
    pub async fn update(&self, id: &str, patch: InventoryPatch) -> Result<InventoryItem, ServiceError> {
        let existing = self
            .get(id)
            .await?
            .ok_or_else(|| ServiceError::ItemNotFound(id.to_string()))?;

        let mut fields = Map::new();
        let name = match patch.name.as_deref().map(str::trim) {
            Some("") => {
                return Err(ServiceError::Validation("item name must not be empty".into()));
            }
            Some(name) => {
                fields.insert("name".into(), json!(name));
                name.to_string()
            }
            None => existing.name.clone(),
        };
        fields.insert("normalizedName".into(), json!(normalize_name(&name)));
        if let Some(subcategory) = patch.subcategory {
            fields.insert("subcategory".into(), serde_json::to_value(subcategory)?);
            fields.insert(
                "category".into(),
                serde_json::to_value(main_category_of(subcategory))?,
            );
        }
        if let Some(unit) = patch.unit {
            fields.insert("unit".into(), serde_json::to_value(unit)?);
        }
        fields.insert("lastUpdated".into(), server_timestamp());

        self.store
            .update(collections::INVENTORY, id, Value::Object(fields))
            .await?;
        debug!(item_id = %id, "Updated inventory item");

        self.get(id)
            .await?
            .ok_or_else(|| ServiceError::ItemNotFound(id.to_string()))
    }

    pub async fn delete(&self, id: &str) -> Result<(), ServiceError> {
        self.store.delete(collections::INVENTORY, id).await?;
        info!(item_id = %id, "Deleted inventory item");
        Ok(())
    }

    pub async fn find_by_normalized_name(
        &self,
        name: &str,
    ) -> Result<Option<InventoryItem>, ServiceError> {
        let key = json!(normalize_name(name));
        self.first_match("normalizedName", &key).await
    }

    /// Exact match on the display name, for items stored before
    /// `normalizedName` existed.
    pub async fn find_by_exact_name(&self, name: &str) -> Result<Option<InventoryItem>, ServiceError> {
        self.first_match("name", &json!(name)).await
    }

    /// Normalized-name lookup first, then the legacy exact-name fallback.
    pub async fn find_match(&self, name: &str) -> Result<Option<InventoryItem>, ServiceError> {
        if let Some(item) = self.find_by_normalized_name(name).await? {
            return Ok(Some(item));
        }
        self.find_by_exact_name(name.trim()).await
    }

    async fn first_match(&self, field: &str, value: &Value) -> Result<Option<InventoryItem>, ServiceError> {
        let found = self
            .store
            .query_eq(collections::INVENTORY, field, value)
            .await?;
        Ok(found.into_iter().next().map(Snapshot::decode).transpose()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::InMemoryStore;

    fn inventory() -> (Arc<InMemoryStore>, InventoryStore) {
        let store = Arc::new(InMemoryStore::new());
        (store.clone(), InventoryStore::new(store))
    }

    fn onions() -> NewInventoryItem {
        NewInventoryItem {
            id: None,
            name: "Red Onions".into(),
            quantity: 4.0,
            unit: Unit::Kilogram,
            subcategory: Subcategory::Vegetables,
        }
    }

    #[tokio::test]
    async fn create_derives_id_and_normalized_name() {
        let (_, inventory) = inventory();
        let item = inventory.create(onions()).await.unwrap();

        assert_eq!(item.id, "red_onions");
        assert_eq!(item.normalized_name.as_deref(), Some("red onions"));
        assert_eq!(item.category, Category::Produce);
        assert!(item.last_updated.is_some());
    }

    #[tokio::test]
    async fn create_is_idempotent_by_name() {
        let (_, inventory) = inventory();
        inventory.create(onions()).await.unwrap();
        inventory.create(onions()).await.unwrap();
        assert_eq!(inventory.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_never_overwrites_existing_stock() {
        let (_, inventory) = inventory();
        let mut apples = onions();
        apples.name = "Apple".into();
        apples.quantity = 10.0;
        apples.subcategory = Subcategory::Fruits;
        inventory.create(apples.clone()).await.unwrap();

        let mut cases = apples.clone();
        cases.name = "apple".into();
        cases.quantity = 0.0;
        cases.unit = Unit::Case;
        let err = inventory.create(cases).await.unwrap_err();
        assert!(matches!(err, ServiceError::ItemExists { ref id, .. } if id == "apple"));

        let mut retry = apples;
        retry.quantity = 0.0;
        let existing = inventory.create(retry).await.unwrap();
        assert_eq!(existing.quantity, 10.0);

        let stored = inventory.get("apple").await.unwrap().unwrap();
        assert_eq!(stored.quantity, 10.0);
        assert_eq!(stored.unit, Unit::Kilogram);
    }

    #[tokio::test]
    async fn lookup_ignores_case_and_padding() {
        let (_, inventory) = inventory();
        inventory.create(onions()).await.unwrap();

        let found = inventory.find_by_normalized_name("  RED onions ").await.unwrap();
        assert_eq!(found.map(|item| item.id), Some("red_onions".to_string()));
        assert!(inventory.find_by_normalized_name("onions").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn legacy_items_match_by_exact_name() {
        let (store, inventory) = inventory();
        store
            .set(
                collections::INVENTORY,
                "legacy-1",
                json!({ "name": "Milk", "quantity": 2, "unit": "case", "category": "Dairy" }),
            )
            .await
            .unwrap();

        assert!(inventory.find_by_normalized_name("Milk").await.unwrap().is_none());
        let found = inventory.find_match("Milk").await.unwrap().unwrap();
        assert_eq!(found.id, "legacy-1");
        assert!(inventory.find_match("milk").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_backfills_and_rederives_category() {
        let (store, inventory) = inventory();
        store
            .set(
                collections::INVENTORY,
                "legacy-2",
                json!({ "name": "Cream", "quantity": 1, "unit": "L", "category": "Produce" }),
            )
            .await
            .unwrap();

        let patch = InventoryPatch {
            subcategory: Some(Subcategory::MilkCream),
            ..Default::default()
        };
        let item = inventory.update("legacy-2", patch).await.unwrap();
        assert_eq!(item.normalized_name.as_deref(), Some("cream"));
        assert_eq!(item.category, Category::Dairy);
        assert_eq!(item.quantity, 1.0);
        assert!(item.last_updated.is_some());
    }

    #[tokio::test]
    async fn create_rejects_negative_quantity_and_unnamed_items() {
        let (_, inventory) = inventory();
        let mut negative = onions();
        negative.quantity = -1.0;
        assert!(matches!(
            inventory.create(negative).await,
            Err(ServiceError::Validation(_))
        ));

        let mut symbols = onions();
        symbols.name = "!!!".into();
        assert!(matches!(
            inventory.create(symbols).await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn delete_missing_item_is_not_found() {
        let (_, inventory) = inventory();
        assert!(inventory.delete("nothing").await.is_err());
    }
}
