// src/approval/engine.rs
//! Commits approval decisions.
//!
//! Every approve or reject is one store transaction: the request is re-read
//! and must still be pending, inventory documents are re-read rather than
//! taken from the pre-check, and the status flip, the audit entry and the
//! requester's notification are staged alongside the stock changes. A store
//! conflict is retried a bounded number of times; every other failure drops
//! the transaction with nothing written.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::api::auth::AuthUser;
use crate::approval::precheck::{
    ActionPlan, PlannedAction, PrecheckOutcome, Resolver, UnitConflict, UnitResolutions,
};
use crate::db::models::action_log::{ActionLogEntry, ActionType};
use crate::db::models::inventory::{normalize_name, InventoryItem};
use crate::db::models::notification::NotificationType;
use crate::db::models::requests::{InventoryRequest, RequestKind, RequestStatus};
use crate::db::queries::action_log::stage_action_log;
use crate::db::queries::inventory::{item_document, InventoryStore};
use crate::db::queries::requests::RequestStore;
use crate::db::store::{collections, server_timestamp, DocumentStore, Transaction};
use crate::errors::ServiceError;
use crate::utils::notification::{approval_message, item_lines, rejection_message, NotificationBuilder};

pub const DEFAULT_REJECTION_NOTE: &str = "No reason provided";

/// Float noise tolerated when a removal empties an item exactly.
const QUANTITY_EPSILON: f64 = 1e-9;

#[derive(Debug, Serialize, Clone, PartialEq, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApprovalOutcome {
    Approved { request: InventoryRequest },
    /// Nothing was written; resubmit with a resolution for this item.
    Conflict { conflict: UnitConflict },
}

/// Inventory state as it evolves inside one transaction.
struct WorkingItem {
    item: InventoryItem,
    created: bool,
    backfill_name: bool,
}

#[derive(Clone)]
pub struct ApprovalEngine {
    store: Arc<dyn DocumentStore>,
    requests: RequestStore,
    resolver: Resolver,
    max_attempts: u32,
}

impl ApprovalEngine {
    pub fn new(store: Arc<dyn DocumentStore>, max_attempts: u32) -> Self {
        Self {
            requests: RequestStore::new(store.clone()),
            resolver: Resolver::new(InventoryStore::new(store.clone())),
            store,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Plans a pending request without writing anything.
    pub async fn precheck(
        &self,
        kind: RequestKind,
        id: &str,
        resolutions: &UnitResolutions,
    ) -> Result<PrecheckOutcome, ServiceError> {
        let request = self.requests.get(kind, id).await?;
        if !request.is_pending() {
            return Err(ServiceError::AlreadyProcessed {
                id: request.id,
                status: request.status,
            });
        }
        self.resolver.resolve(kind, &request, resolutions).await
    }

    /// Plans and commits in one call. The plan is rebuilt on every attempt,
    /// so a plan gone stale under a concurrent write is re-derived. A stale
    /// plan that re-derives unchanged is returned as the error.
    #[instrument(skip(self, admin, resolutions), fields(admin = %admin.id))]
    pub async fn approve(
        &self,
        kind: RequestKind,
        id: &str,
        admin: &AuthUser,
        resolutions: &UnitResolutions,
    ) -> Result<ApprovalOutcome, ServiceError> {
        let mut stale: Option<(ActionPlan, ServiceError)> = None;
        for attempt in 1..=self.max_attempts {
            let plan = match self.precheck(kind, id, resolutions).await? {
                PrecheckOutcome::Ready { plan } => plan,
                PrecheckOutcome::Conflict { conflict } => {
                    info!(request_id = %id, item = %conflict.item.name, "Approval halted on unit conflict");
                    return Ok(ApprovalOutcome::Conflict { conflict });
                }
            };
            if let Some((previous, err)) = stale.take() {
                if previous == plan {
                    warn!(request_id = %id, attempt, error = %err, "Plan re-derived unchanged, giving up");
                    return Err(err);
                }
            }

            match self.commit_approval(&plan, admin).await {
                Ok(()) => {
                    let request = self.requests.get(kind, id).await?;
                    return Ok(ApprovalOutcome::Approved { request });
                }
                Err(err @ ServiceError::StalePlan(_)) => {
                    warn!(request_id = %id, attempt, error = %err, "Plan went stale, re-planning");
                    stale = Some((plan, err));
                }
                Err(err) if is_retryable(&err) => {
                    warn!(request_id = %id, attempt, error = %err, "Retrying approval");
                    backoff(attempt).await;
                }
                Err(err) => return Err(err),
            }
        }
        Err(ServiceError::TransactionConflict {
            attempts: self.max_attempts,
        })
    }

    /// Commits a plan produced by an earlier [`precheck`](Self::precheck).
    /// Fails with `StalePlan` if stock moved in a way the plan cannot absorb.
    #[instrument(skip(self, plan, admin), fields(request_id = %plan.request_id, admin = %admin.id))]
    pub async fn approve_with_plan(
        &self,
        plan: &ActionPlan,
        admin: &AuthUser,
    ) -> Result<InventoryRequest, ServiceError> {
        for attempt in 1..=self.max_attempts {
            match self.commit_approval(plan, admin).await {
                Ok(()) => return self.requests.get(plan.kind, &plan.request_id).await,
                Err(err) if is_retryable(&err) => {
                    warn!(attempt, error = %err, "Retrying approval");
                    backoff(attempt).await;
                }
                Err(err) => return Err(err),
            }
        }
        Err(ServiceError::TransactionConflict {
            attempts: self.max_attempts,
        })
    }

    #[instrument(skip(self, admin, notes), fields(admin = %admin.id))]
    pub async fn reject(
        &self,
        kind: RequestKind,
        id: &str,
        admin: &AuthUser,
        notes: Option<&str>,
    ) -> Result<InventoryRequest, ServiceError> {
        let notes = notes
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_REJECTION_NOTE);

        for attempt in 1..=self.max_attempts {
            match self.commit_rejection(kind, id, admin, notes).await {
                Ok(()) => return self.requests.get(kind, id).await,
                Err(err) if is_retryable(&err) => {
                    warn!(request_id = %id, attempt, error = %err, "Retrying rejection");
                    backoff(attempt).await;
                }
                Err(err) => return Err(err),
            }
        }
        Err(ServiceError::TransactionConflict {
            attempts: self.max_attempts,
        })
    }

    async fn commit_approval(&self, plan: &ActionPlan, admin: &AuthUser) -> Result<(), ServiceError> {
        let mut tx = self.store.begin().await?;
        let request = read_pending(tx.as_mut(), plan.kind, &plan.request_id).await?;

        let mut working: BTreeMap<String, WorkingItem> = BTreeMap::new();
        for action in &plan.actions {
            apply_action(tx.as_mut(), plan.kind, action, &mut working).await?;
        }
        for (doc_id, entry) in &working {
            stage_inventory_write(tx.as_mut(), doc_id, entry)?;
        }

        tx.update(
            plan.kind.collection(),
            &request.id,
            json!({
                "status": RequestStatus::Approved,
                "adminId": admin.id,
                "adminName": admin.name,
                "processedTimestamp": server_timestamp(),
            }),
        );

        let entry = ActionLogEntry {
            id: String::new(),
            action_type: ActionType::for_decision(plan.kind, RequestStatus::Approved),
            request_id: request.id.clone(),
            user_id: request.user_id.clone(),
            user_name: request.user_name.clone(),
            admin_id: admin.id.clone(),
            admin_name: admin.name.clone(),
            timestamp: None,
            details: json!({
                "items": item_lines(&request.requested_items),
                "inventoryIds": working.keys().collect::<Vec<_>>(),
            }),
        };
        stage_action_log(tx.as_mut(), &entry)?;

        let mut notification = NotificationBuilder::new(
            &request.user_id,
            NotificationType::RequestApproved,
            plan.kind,
            &request.id,
        )
        .message(approval_message(plan.kind, &request.requested_items));
        if plan.kind == RequestKind::Removal {
            notification = notification.approved_items(request.requested_items.clone());
        }
        notification.stage(tx.as_mut())?;

        tx.commit().await?;
        info!(request_id = %request.id, kind = %plan.kind, items = working.len(), "Approved request");
        Ok(())
    }

    async fn commit_rejection(
        &self,
        kind: RequestKind,
        id: &str,
        admin: &AuthUser,
        notes: &str,
    ) -> Result<(), ServiceError> {
        let mut tx = self.store.begin().await?;
        let request = read_pending(tx.as_mut(), kind, id).await?;

        tx.update(
            kind.collection(),
            &request.id,
            json!({
                "status": RequestStatus::Rejected,
                "adminId": admin.id,
                "adminName": admin.name,
                "adminNotes": notes,
                "processedTimestamp": server_timestamp(),
            }),
        );

        let entry = ActionLogEntry {
            id: String::new(),
            action_type: ActionType::for_decision(kind, RequestStatus::Rejected),
            request_id: request.id.clone(),
            user_id: request.user_id.clone(),
            user_name: request.user_name.clone(),
            admin_id: admin.id.clone(),
            admin_name: admin.name.clone(),
            timestamp: None,
            details: json!({
                "items": item_lines(&request.requested_items),
                "notes": notes,
            }),
        };
        stage_action_log(tx.as_mut(), &entry)?;

        NotificationBuilder::new(&request.user_id, NotificationType::RequestRejected, kind, &request.id)
            .message(rejection_message(kind, &request.requested_items, notes))
            .admin_notes(notes)
            .stage(tx.as_mut())?;

        tx.commit().await?;
        info!(request_id = %request.id, %kind, "Rejected request");
        Ok(())
    }
}

fn is_retryable(err: &ServiceError) -> bool {
    matches!(err, ServiceError::Store(store) if store.is_retryable())
}

async fn backoff(attempt: u32) {
    tokio::time::sleep(Duration::from_millis(5 * u64::from(attempt))).await;
}

async fn read_pending(
    tx: &mut dyn Transaction,
    kind: RequestKind,
    id: &str,
) -> Result<InventoryRequest, ServiceError> {
    let request: InventoryRequest = tx
        .get(kind.collection(), id)
        .await?
        .ok_or_else(|| ServiceError::RequestNotFound {
            kind,
            id: id.to_string(),
        })?
        .decode()?;
    if !request.is_pending() {
        return Err(ServiceError::AlreadyProcessed {
            id: request.id,
            status: request.status,
        });
    }
    Ok(request)
}

async fn apply_action(
    tx: &mut dyn Transaction,
    kind: RequestKind,
    action: &PlannedAction,
    working: &mut BTreeMap<String, WorkingItem>,
) -> Result<(), ServiceError> {
    match action {
        PlannedAction::Create { doc_id, item } => {
            if kind == RequestKind::Removal {
                return Err(ServiceError::ItemNotFound(item.name.clone()));
            }
            if working.contains_key(doc_id) || tx.get(collections::INVENTORY, doc_id).await?.is_some() {
                return Err(ServiceError::StalePlan(format!(
                    "'{}' was added to inventory after planning",
                    item.name
                )));
            }
            working.insert(
                doc_id.clone(),
                WorkingItem {
                    item: InventoryItem {
                        id: doc_id.clone(),
                        name: item.name.clone(),
                        normalized_name: Some(normalize_name(&item.name)),
                        quantity: item.quantity,
                        unit: item.unit,
                        category: item.category(),
                        subcategory: Some(item.subcategory),
                        last_updated: None,
                    },
                    created: true,
                    backfill_name: false,
                },
            );
        }
        PlannedAction::Update {
            doc_id,
            item,
            delta,
            expected_unit,
            unit_after,
        } => {
            if !working.contains_key(doc_id) {
                let current: InventoryItem = tx
                    .get(collections::INVENTORY, doc_id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::StalePlan(format!("'{}' is no longer in inventory", item.name))
                    })?
                    .decode()?;
                let backfill_name = current.normalized_name.is_none();
                working.insert(
                    doc_id.clone(),
                    WorkingItem {
                        item: current,
                        created: false,
                        backfill_name,
                    },
                );
            }
            let Some(entry) = working.get_mut(doc_id) else {
                return Err(ServiceError::ItemNotFound(doc_id.clone()));
            };

            if entry.item.unit != *expected_unit {
                return Err(ServiceError::StalePlan(format!(
                    "unit of '{}' changed from {} to {}",
                    entry.item.name, expected_unit, entry.item.unit
                )));
            }

            let quantity = match kind {
                RequestKind::Addition => entry.item.quantity + delta,
                RequestKind::Removal => {
                    let remaining = entry.item.quantity - delta;
                    if remaining < -QUANTITY_EPSILON {
                        return Err(ServiceError::InsufficientStock {
                            item: entry.item.name.clone(),
                            available: entry.item.quantity,
                            requested: *delta,
                            unit: unit_after.to_string(),
                        });
                    }
                    remaining.max(0.0)
                }
            };
            entry.item.quantity = quantity;
            entry.item.unit = *unit_after;
        }
    }
    Ok(())
}

fn stage_inventory_write(
    tx: &mut dyn Transaction,
    doc_id: &str,
    entry: &WorkingItem,
) -> Result<(), ServiceError> {
    let item = &entry.item;
    if entry.created {
        let doc = item_document(&item.name, item.quantity, item.unit, item.category, item.subcategory)?;
        tx.set(collections::INVENTORY, doc_id, doc);
        return Ok(());
    }

    let mut patch = Map::new();
    patch.insert("quantity".into(), json!(item.quantity));
    patch.insert("unit".into(), serde_json::to_value(item.unit)?);
    patch.insert("lastUpdated".into(), server_timestamp());
    if entry.backfill_name {
        patch.insert("normalizedName".into(), json!(normalize_name(&item.name)));
    }
    tx.update(collections::INVENTORY, doc_id, Value::Object(patch));
    Ok(())
}
