// src/approval/precheck.rs
//! Read-only planning step that runs before an approval commits.
//!
//! Each requested line item is matched against stock and tagged `create` or
//! `update`. When an item's unit cannot be converted into the unit already on
//! file and no resolution was supplied, the whole batch halts with a
//! [`UnitConflict`] for an admin to settle.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use utoipa::ToSchema;

use crate::db::models::inventory::{derive_item_id, normalize_name, InventoryItem};
use crate::db::models::requests::{InventoryRequest, RequestKind, RequestedItem};
use crate::db::queries::inventory::InventoryStore;
use crate::errors::ServiceError;
use crate::utils::units::{convert, Unit};

/// How to sum two quantities whose units do not convert.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UnitChoice {
    /// The stored item switches to the requested unit.
    UseIncoming,
    /// The stored item keeps its unit.
    KeepExisting,
}

/// Admin decisions keyed by the normalized item name.
pub type UnitResolutions = HashMap<String, UnitChoice>;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, ToSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannedAction {
    Create {
        #[serde(rename = "docId")]
        doc_id: String,
        item: RequestedItem,
    },
    /// `delta` is expressed in `unit_after`. `expected_unit` is the unit seen
    /// at planning time and is re-checked inside the transaction.
    Update {
        #[serde(rename = "docId")]
        doc_id: String,
        item: RequestedItem,
        delta: f64,
        #[serde(rename = "expectedUnit")]
        expected_unit: Unit,
        #[serde(rename = "unitAfter")]
        unit_after: Unit,
    },
}

impl PlannedAction {
    pub fn doc_id(&self) -> &str {
        match self {
            PlannedAction::Create { doc_id, .. } | PlannedAction::Update { doc_id, .. } => doc_id,
        }
    }

    pub fn item(&self) -> &RequestedItem {
        match self {
            PlannedAction::Create { item, .. } | PlannedAction::Update { item, .. } => item,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActionPlan {
    pub kind: RequestKind,
    pub request_id: String,
    pub actions: Vec<PlannedAction>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UnitConflict {
    pub item: RequestedItem,
    pub item_index: usize,
    pub existing_unit: Unit,
    pub existing_doc_id: String,
}

#[derive(Debug, Serialize, Clone, PartialEq, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PrecheckOutcome {
    Ready { plan: ActionPlan },
    Conflict { conflict: UnitConflict },
}

/// What a matched document looks like to the rest of the batch.
#[derive(Clone)]
struct Target {
    doc_id: String,
    unit: Unit,
}

impl From<InventoryItem> for Target {
    fn from(item: InventoryItem) -> Self {
        Target {
            doc_id: item.id,
            unit: item.unit,
        }
    }
}

#[derive(Clone)]
pub struct Resolver {
    inventory: InventoryStore,
}

impl Resolver {
    pub fn new(inventory: InventoryStore) -> Self {
        Self { inventory }
    }

    /// Builds the plan for a request. Never writes to the store.
    #[instrument(skip(self, request, resolutions), fields(request_id = %request.id))]
    pub async fn resolve(
        &self,
        kind: RequestKind,
        request: &InventoryRequest,
        resolutions: &UnitResolutions,
    ) -> Result<PrecheckOutcome, ServiceError> {
        // Items already planned in this batch, so repeated names land on the
        // same document.
        let mut planned: HashMap<String, Target> = HashMap::new();
        let mut actions = Vec::with_capacity(request.requested_items.len());

        for (index, item) in request.requested_items.iter().enumerate() {
            let key = normalize_name(&item.name);

            let target = match planned.get(&key) {
                Some(target) => Some(target.clone()),
                None => self.lookup(item).await?.map(Target::from),
            };

            let target = match target {
                Some(target) => target,
                None => {
                    let doc_id = derive_item_id(&item.name);
                    // Names that differ only in punctuation derive the same id.
                    let occupant = match planned.values().find(|t| t.doc_id == doc_id) {
                        Some(target) => Some(target.clone()),
                        None if doc_id.is_empty() => None,
                        None => self.inventory.get(&doc_id).await?.map(Target::from),
                    };
                    match occupant {
                        Some(target) => {
                            debug!(item = %item.name, %doc_id, "Derived id already in use");
                            target
                        }
                        None if kind == RequestKind::Removal => {
                            return Err(ServiceError::ItemNotFound(item.name.clone()));
                        }
                        None if doc_id.is_empty() => {
                            return Err(ServiceError::Validation(format!(
                                "cannot derive an id from item name '{}'",
                                item.name
                            )));
                        }
                        None => {
                            debug!(item = %item.name, %doc_id, "Planned create");
                            planned.insert(key, Target { doc_id: doc_id.clone(), unit: item.unit });
                            actions.push(PlannedAction::Create { doc_id, item: item.clone() });
                            continue;
                        }
                    }
                }
            };

            let (delta, unit_after) = if item.unit == target.unit {
                (item.quantity, target.unit)
            } else {
                match resolutions.get(&key) {
                    Some(UnitChoice::UseIncoming) => (item.quantity, item.unit),
                    Some(UnitChoice::KeepExisting) => (item.quantity, target.unit),
                    None => match convert(item.quantity, item.unit, target.unit) {
                        Some(converted) => (converted, target.unit),
                        None => {
                            debug!(item = %item.name, existing = %target.unit, requested = %item.unit, "Unit conflict");
                            return Ok(PrecheckOutcome::Conflict {
                                conflict: UnitConflict {
                                    item: item.clone(),
                                    item_index: index,
                                    existing_unit: target.unit,
                                    existing_doc_id: target.doc_id,
                                },
                            });
                        }
                    },
                }
            };

            for other in planned.values_mut().filter(|t| t.doc_id == target.doc_id) {
                other.unit = unit_after;
            }
            planned.insert(
                key,
                Target {
                    doc_id: target.doc_id.clone(),
                    unit: unit_after,
                },
            );
            actions.push(PlannedAction::Update {
                doc_id: target.doc_id,
                item: item.clone(),
                delta,
                expected_unit: target.unit,
                unit_after,
            });
        }

        Ok(PrecheckOutcome::Ready {
            plan: ActionPlan {
                kind,
                request_id: request.id.clone(),
                actions,
            },
        })
    }

    /// Explicit document id first, then normalized name, then the legacy
    /// exact-name match.
    async fn lookup(&self, item: &RequestedItem) -> Result<Option<InventoryItem>, ServiceError> {
        if let Some(id) = item.inventory_item_id.as_deref() {
            if let Some(found) = self.inventory.get(id).await? {
                return Ok(Some(found));
            }
        }
        self.inventory.find_match(&item.name).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::db::memory::InMemoryStore;
    use crate::db::models::requests::RequestStatus;
    use crate::db::store::{collections, DocumentStore};
    use crate::utils::category::Subcategory;

    fn line(name: &str, quantity: f64, unit: Unit) -> RequestedItem {
        RequestedItem {
            name: name.into(),
            category: None,
            subcategory: Subcategory::MilkCream,
            quantity,
            unit,
            inventory_item_id: None,
        }
    }

    fn request(items: Vec<RequestedItem>) -> InventoryRequest {
        InventoryRequest {
            id: "r1".into(),
            user_id: "u1".into(),
            user_name: "Sam".into(),
            requested_items: items,
            request_timestamp: None,
            status: RequestStatus::Pending,
            admin_id: None,
            admin_name: None,
            processed_timestamp: None,
            admin_notes: None,
        }
    }

    async fn resolver_with_milk() -> (Arc<InMemoryStore>, Resolver) {
        let store = Arc::new(InMemoryStore::new());
        store
            .set(
                collections::INVENTORY,
                "milk",
                json!({ "name": "Milk", "normalizedName": "milk", "quantity": 3, "unit": "case", "category": "Dairy" }),
            )
            .await
            .unwrap();
        let resolver = Resolver::new(InventoryStore::new(store.clone()));
        (store, resolver)
    }

    fn ready(outcome: PrecheckOutcome) -> ActionPlan {
        match outcome {
            PrecheckOutcome::Ready { plan } => plan,
            other => panic!("expected a plan, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_convertible_unit_halts_the_batch() {
        let (_, resolver) = resolver_with_milk().await;
        let req = request(vec![line("Cream", 1.0, Unit::Liter), line("milk", 2.0, Unit::Liter)]);

        let outcome = resolver
            .resolve(RequestKind::Addition, &req, &UnitResolutions::new())
            .await
            .unwrap();

        match outcome {
            PrecheckOutcome::Conflict { conflict } => {
                assert_eq!(conflict.item_index, 1);
                assert_eq!(conflict.existing_unit, Unit::Case);
                assert_eq!(conflict.existing_doc_id, "milk");
            }
            other => panic!("expected a conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn resolution_sums_directly() {
        let (_, resolver) = resolver_with_milk().await;
        let req = request(vec![line("Milk", 2.0, Unit::Liter)]);
        let resolutions = UnitResolutions::from([("milk".to_string(), UnitChoice::KeepExisting)]);

        let plan = ready(resolver.resolve(RequestKind::Addition, &req, &resolutions).await.unwrap());
        assert_eq!(
            plan.actions[0],
            PlannedAction::Update {
                doc_id: "milk".into(),
                item: req.requested_items[0].clone(),
                delta: 2.0,
                expected_unit: Unit::Case,
                unit_after: Unit::Case,
            }
        );

        let resolutions = UnitResolutions::from([("milk".to_string(), UnitChoice::UseIncoming)]);
        let plan = ready(resolver.resolve(RequestKind::Addition, &req, &resolutions).await.unwrap());
        assert!(matches!(
            plan.actions[0],
            PlannedAction::Update { unit_after: Unit::Liter, .. }
        ));
    }

    #[tokio::test]
    async fn convertible_units_are_converted() {
        let store = Arc::new(InMemoryStore::new());
        store
            .set(
                collections::INVENTORY,
                "flour",
                json!({ "name": "Flour", "normalizedName": "flour", "quantity": 500, "unit": "g", "category": "Dry Goods" }),
            )
            .await
            .unwrap();
        let resolver = Resolver::new(InventoryStore::new(store));
        let req = request(vec![line("FLOUR ", 2.0, Unit::Kilogram)]);

        let plan = ready(
            resolver
                .resolve(RequestKind::Addition, &req, &UnitResolutions::new())
                .await
                .unwrap(),
        );
        match &plan.actions[0] {
            PlannedAction::Update { delta, unit_after, .. } => {
                assert_eq!(*delta, 2000.0);
                assert_eq!(*unit_after, Unit::Gram);
            }
            other => panic!("expected an update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_items_are_created_or_rejected() {
        let (store, resolver) = resolver_with_milk().await;
        let req = request(vec![line("Red Onions", 4.0, Unit::Kilogram), line("red onions", 1.0, Unit::Kilogram)]);

        let plan = ready(
            resolver
                .resolve(RequestKind::Addition, &req, &UnitResolutions::new())
                .await
                .unwrap(),
        );
        assert_eq!(plan.actions[0].doc_id(), "red_onions");
        assert!(matches!(plan.actions[0], PlannedAction::Create { .. }));
        assert!(matches!(
            &plan.actions[1],
            PlannedAction::Update { doc_id, .. } if doc_id == "red_onions"
        ));
        assert!(store.list(collections::INVENTORY).await.unwrap().len() == 1);

        let err = resolver
            .resolve(RequestKind::Removal, &req, &UnitResolutions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ItemNotFound(_)));
    }

    #[tokio::test]
    async fn explicit_inventory_id_wins_over_name() {
        let (_, resolver) = resolver_with_milk().await;
        let mut item = line("Whole milk", 1.0, Unit::Case);
        item.inventory_item_id = Some("milk".into());

        let plan = ready(
            resolver
                .resolve(RequestKind::Removal, &request(vec![item]), &UnitResolutions::new())
                .await
                .unwrap(),
        );
        assert_eq!(plan.actions[0].doc_id(), "milk");
    }

    #[tokio::test]
    async fn names_sharing_a_derived_id_update_the_stored_item() {
        let (store, resolver) = resolver_with_milk().await;
        store
            .set(
                collections::INVENTORY,
                "redonions",
                json!({ "name": "Red-Onions", "normalizedName": "red-onions", "quantity": 2, "unit": "kg", "category": "Produce" }),
            )
            .await
            .unwrap();

        let req = request(vec![line("RedOnions", 1000.0, Unit::Gram)]);
        let plan = ready(
            resolver
                .resolve(RequestKind::Addition, &req, &UnitResolutions::new())
                .await
                .unwrap(),
        );
        assert_eq!(
            plan.actions[0],
            PlannedAction::Update {
                doc_id: "redonions".into(),
                item: req.requested_items[0].clone(),
                delta: 1.0,
                expected_unit: Unit::Kilogram,
                unit_after: Unit::Kilogram,
            }
        );
    }

    #[tokio::test]
    async fn colliding_new_names_in_one_batch_share_a_create() {
        let (_, resolver) = resolver_with_milk().await;
        let req = request(vec![line("Red-Onions", 1.0, Unit::Kilogram), line("RedOnions", 2.0, Unit::Kilogram)]);

        let plan = ready(
            resolver
                .resolve(RequestKind::Addition, &req, &UnitResolutions::new())
                .await
                .unwrap(),
        );
        assert!(matches!(&plan.actions[0], PlannedAction::Create { doc_id, .. } if doc_id == "redonions"));
        assert!(matches!(&plan.actions[1], PlannedAction::Update { doc_id, .. } if doc_id == "redonions"));
    }
}
