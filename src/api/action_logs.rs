use axum::{
    extract::{Extension, Query, State},
    routing::get,
    Router,
};
use serde::Deserialize;
use utoipa::{IntoParams, OpenApi};

use crate::api::auth::AuthUser;
use crate::app_state::AppState;
use crate::db::models::action_log::{ActionLogEntry, ActionType};
use crate::utils::api_response::ApiResponse;

const DEFAULT_LIMIT: usize = 100;

pub fn action_log_routes() -> Router<AppState> {
    Router::new().route("/action-logs", get(list_action_logs))
}

#[derive(OpenApi)]
#[openapi(
    paths(list_action_logs),
    components(schemas(ActionLogEntry, ActionType)),
    tags((name = "Audit", description = "Approval and rejection history"))
)]
pub struct ActionLogDoc;

#[derive(Debug, Deserialize, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ActionLogQuery {
    /// Restrict to the entries for one request
    pub request_id: Option<String>,
    /// Maximum number of entries, default 100
    pub limit: Option<usize>,
}

#[utoipa::path(
    get,
    path = "/action-logs",
    params(ActionLogQuery),
    responses(
        (status = 200, description = "Audit entries, newest first", body = Vec<ActionLogEntry>),
        (status = 403, description = "Admin privileges required")
    ),
    tag = "Audit",
    security(("bearerAuth" = []))
)]
pub async fn list_action_logs(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ActionLogQuery>,
) -> Result<ApiResponse<Vec<ActionLogEntry>>, ApiResponse<()>> {
    user.require_admin()?;
    let entries = match query.request_id {
        Some(request_id) => state.action_logs.for_request(&request_id).await?,
        None => state.action_logs.list(query.limit.unwrap_or(DEFAULT_LIMIT)).await?,
    };
    Ok(ApiResponse::ok("Action logs retrieved", entries))
}
