use std::collections::HashMap;
use std::convert::Infallible;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::{OpenApi, ToSchema};

use crate::api::auth::AuthUser;
use crate::app_state::AppState;
use crate::approval::engine::ApprovalOutcome;
use crate::approval::precheck::{
    ActionPlan, PlannedAction, PrecheckOutcome, UnitChoice, UnitConflict, UnitResolutions,
};
use crate::db::models::inventory::normalize_name;
use crate::db::models::requests::{
    InventoryRequest, NewInventoryRequest, RequestFilter, RequestKind, RequestStatus, RequestedItem,
};
use crate::errors::ServiceError;
use crate::utils::api_response::ApiResponse;

pub fn request_routes() -> Router<AppState> {
    Router::new()
        .route("/requests/{kind}", post(submit_request).get(list_requests))
        .route("/requests/{kind}/feed", get(request_feed))
        .route("/requests/{kind}/{id}", get(get_request))
        .route("/requests/{kind}/{id}/precheck", post(precheck_request))
        .route("/requests/{kind}/{id}/approve", post(approve_request))
        .route("/requests/{kind}/{id}/reject", post(reject_request))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        submit_request,
        list_requests,
        get_request,
        request_feed,
        precheck_request,
        approve_request,
        reject_request
    ),
    components(schemas(
        InventoryRequest,
        NewInventoryRequest,
        RequestedItem,
        RequestKind,
        RequestStatus,
        DecisionPayload,
        RejectPayload,
        UnitChoice,
        UnitConflict,
        ActionPlan,
        PlannedAction,
        PrecheckOutcome,
        ApprovalOutcome
    )),
    tags((name = "Requests", description = "Addition and removal requests"))
)]
pub struct RequestDoc;

/// Unit resolutions for a pre-check or approval, keyed by item name.
#[derive(Debug, Serialize, Deserialize, Default, ToSchema)]
pub struct DecisionPayload {
    #[serde(default)]
    pub resolutions: HashMap<String, UnitChoice>,
}

impl DecisionPayload {
    fn into_resolutions(self) -> UnitResolutions {
        self.resolutions
            .into_iter()
            .map(|(name, choice)| (normalize_name(&name), choice))
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize, Default, ToSchema)]
pub struct RejectPayload {
    pub notes: Option<String>,
}

fn parse_kind(segment: &str) -> Result<RequestKind, ApiResponse<()>> {
    RequestKind::from_path(segment).ok_or_else(|| {
        ApiResponse::error(
            StatusCode::NOT_FOUND,
            format!("Unknown request kind '{segment}', expected 'additions' or 'removals'"),
            None,
        )
    })
}

#[utoipa::path(
    post,
    path = "/requests/{kind}",
    params(("kind" = String, Path, description = "additions or removals")),
    request_body = NewInventoryRequest,
    responses(
        (status = 201, description = "Request submitted", body = InventoryRequest),
        (status = 400, description = "Invalid line items")
    ),
    tag = "Requests",
    security(("bearerAuth" = []))
)]
#[instrument(skip(state, user, payload), fields(user = %user.id))]
pub async fn submit_request(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(kind): Path<String>,
    Json(payload): Json<NewInventoryRequest>,
) -> Result<ApiResponse<InventoryRequest>, ApiResponse<()>> {
    let kind = parse_kind(&kind)?;
    let request = state.requests.submit(kind, &user, payload.into_items()).await?;
    Ok(ApiResponse::success(
        StatusCode::CREATED,
        format!("{kind} request submitted"),
        request,
    ))
}

#[utoipa::path(
    get,
    path = "/requests/{kind}",
    params(
        ("kind" = String, Path, description = "additions or removals"),
        RequestFilter
    ),
    responses(
        (status = 200, description = "Requests, newest first", body = Vec<InventoryRequest>),
        (status = 403, description = "Filtering by status requires admin")
    ),
    tag = "Requests",
    security(("bearerAuth" = []))
)]
pub async fn list_requests(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(kind): Path<String>,
    Query(filter): Query<RequestFilter>,
) -> Result<ApiResponse<Vec<InventoryRequest>>, ApiResponse<()>> {
    let kind = parse_kind(&kind)?;
    let requests = match filter.status {
        Some(status) => {
            user.require_admin()?;
            state.requests.list(kind, Some(status)).await?
        }
        None => state.requests.list_for_user(kind, &user.id).await?,
    };
    Ok(ApiResponse::ok("Requests retrieved", requests))
}

#[utoipa::path(
    get,
    path = "/requests/{kind}/{id}",
    params(
        ("kind" = String, Path, description = "additions or removals"),
        ("id" = String, Path, description = "Request id")
    ),
    responses(
        (status = 200, description = "Request found", body = InventoryRequest),
        (status = 403, description = "Request belongs to another user"),
        (status = 404, description = "Request not found")
    ),
    tag = "Requests",
    security(("bearerAuth" = []))
)]
pub async fn get_request(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<ApiResponse<InventoryRequest>, ApiResponse<()>> {
    let kind = parse_kind(&kind)?;
    let request = state.requests.get(kind, &id).await?;
    if !user.is_admin && request.user_id != user.id {
        return Err(ServiceError::Forbidden("request belongs to another user".into()).into());
    }
    Ok(ApiResponse::ok("Request retrieved", request))
}

#[utoipa::path(
    get,
    path = "/requests/{kind}/feed",
    params(("kind" = String, Path, description = "additions or removals")),
    responses(
        (status = 200, description = "Server-sent change events for the queue", content_type = "text/event-stream")
    ),
    tag = "Requests",
    security(("bearerAuth" = []))
)]
pub async fn request_feed(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(kind): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiResponse<()>> {
    user.require_admin()?;
    let kind = parse_kind(&kind)?;

    let feed = state.requests.subscribe(kind);
    let events = stream::unfold(feed, |mut feed| async move {
        let change = feed.next().await?;
        let event = Event::default()
            .json_data(&change)
            .unwrap_or_else(|_| Event::default().comment("unencodable change"));
        Some((Ok(event), feed))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[utoipa::path(
    post,
    path = "/requests/{kind}/{id}/precheck",
    params(
        ("kind" = String, Path, description = "additions or removals"),
        ("id" = String, Path, description = "Request id")
    ),
    request_body(content = DecisionPayload, description = "Optional unit resolutions"),
    responses(
        (status = 200, description = "Plan or unit conflict", body = PrecheckOutcome),
        (status = 404, description = "Request or removal item not found"),
        (status = 409, description = "Request already processed")
    ),
    tag = "Requests",
    security(("bearerAuth" = []))
)]
pub async fn precheck_request(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((kind, id)): Path<(String, String)>,
    payload: Option<Json<DecisionPayload>>,
) -> Result<ApiResponse<PrecheckOutcome>, ApiResponse<()>> {
    user.require_admin()?;
    let kind = parse_kind(&kind)?;
    let resolutions = payload.map(|Json(p)| p).unwrap_or_default().into_resolutions();

    let outcome = state.engine.precheck(kind, &id, &resolutions).await?;
    Ok(ApiResponse::ok("Pre-check complete", outcome))
}

#[utoipa::path(
    post,
    path = "/requests/{kind}/{id}/approve",
    params(
        ("kind" = String, Path, description = "additions or removals"),
        ("id" = String, Path, description = "Request id")
    ),
    request_body(content = DecisionPayload, description = "Optional unit resolutions"),
    responses(
        (status = 200, description = "Approved, or halted on a unit conflict", body = ApprovalOutcome),
        (status = 404, description = "Request or removal item not found"),
        (status = 409, description = "Already processed or insufficient stock"),
        (status = 503, description = "Gave up after repeated write conflicts")
    ),
    tag = "Requests",
    security(("bearerAuth" = []))
)]
#[instrument(skip(state, user, payload), fields(admin = %user.id))]
pub async fn approve_request(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((kind, id)): Path<(String, String)>,
    payload: Option<Json<DecisionPayload>>,
) -> Result<ApiResponse<ApprovalOutcome>, ApiResponse<()>> {
    user.require_admin()?;
    let kind = parse_kind(&kind)?;
    let resolutions = payload.map(|Json(p)| p).unwrap_or_default().into_resolutions();

    let outcome = state.engine.approve(kind, &id, &user, &resolutions).await?;
    let message = match &outcome {
        ApprovalOutcome::Approved { .. } => "Request approved",
        ApprovalOutcome::Conflict { .. } => "Unit conflict needs a resolution",
    };
    Ok(ApiResponse::ok(message, outcome))
}

#[utoipa::path(
    post,
    path = "/requests/{kind}/{id}/reject",
    params(
        ("kind" = String, Path, description = "additions or removals"),
        ("id" = String, Path, description = "Request id")
    ),
    request_body(content = RejectPayload, description = "Optional rejection notes"),
    responses(
        (status = 200, description = "Request rejected", body = InventoryRequest),
        (status = 404, description = "Request not found"),
        (status = 409, description = "Request already processed")
    ),
    tag = "Requests",
    security(("bearerAuth" = []))
)]
#[instrument(skip(state, user, payload), fields(admin = %user.id))]
pub async fn reject_request(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((kind, id)): Path<(String, String)>,
    payload: Option<Json<RejectPayload>>,
) -> Result<ApiResponse<InventoryRequest>, ApiResponse<()>> {
    user.require_admin()?;
    let kind = parse_kind(&kind)?;
    let notes = payload.and_then(|Json(p)| p.notes);

    let request = state.engine.reject(kind, &id, &user, notes.as_deref()).await?;
    Ok(ApiResponse::ok("Request rejected", request))
}
