use std::sync::Arc;

use crate::approval::engine::ApprovalEngine;
use crate::config::Config;
use crate::db::queries::action_log::ActionLog;
use crate::db::queries::inventory::InventoryStore;
use crate::db::queries::notification::NotificationInbox;
use crate::db::queries::requests::RequestStore;
use crate::db::store::DocumentStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub config: Arc<Config>,
    pub inventory: InventoryStore,
    pub requests: RequestStore,
    pub notifications: NotificationInbox,
    pub action_logs: ActionLog,
    pub engine: ApprovalEngine,
}

impl AppState {
    pub fn new(store: Arc<dyn DocumentStore>, config: Config) -> Self {
        Self {
            inventory: InventoryStore::new(store.clone()),
            requests: RequestStore::new(store.clone()),
            notifications: NotificationInbox::new(store.clone()),
            action_logs: ActionLog::new(store.clone()),
            engine: ApprovalEngine::new(store.clone(), config.max_transaction_attempts),
            config: Arc::new(config),
            store,
        }
    }
}
