use axum::{
    extract::{Extension, Path, Query, State},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use utoipa::{IntoParams, OpenApi};

use crate::api::auth::AuthUser;
use crate::app_state::AppState;
use crate::db::models::notification::{Notification, NotificationCountResponse, NotificationType};
use crate::utils::api_response::ApiResponse;

pub fn notification_routes() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list_notifications))
        .route("/notifications/count", get(notification_count))
        .route("/notifications/read-all", post(mark_all_read))
        .route("/notifications/{id}/read", post(mark_read))
}

#[derive(OpenApi)]
#[openapi(
    paths(list_notifications, notification_count, mark_read, mark_all_read),
    components(schemas(Notification, NotificationCountResponse, NotificationType)),
    tags((name = "Notifications", description = "Per-user inbox"))
)]
pub struct NotificationDoc;

#[derive(Debug, Deserialize, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct NotificationFilter {
    /// Only return unread entries
    #[serde(default)]
    pub unread: bool,
}

#[utoipa::path(
    get,
    path = "/notifications",
    params(NotificationFilter),
    responses((status = 200, description = "Caller's notifications, newest first", body = Vec<Notification>)),
    tag = "Notifications",
    security(("bearerAuth" = []))
)]
pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(filter): Query<NotificationFilter>,
) -> Result<ApiResponse<Vec<Notification>>, ApiResponse<()>> {
    let notifications = state.notifications.list_for_user(&user.id, filter.unread).await?;
    Ok(ApiResponse::ok("Notifications retrieved", notifications))
}

#[utoipa::path(
    get,
    path = "/notifications/count",
    responses((status = 200, description = "Total and unread counts", body = NotificationCountResponse)),
    tag = "Notifications",
    security(("bearerAuth" = []))
)]
pub async fn notification_count(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<ApiResponse<NotificationCountResponse>, ApiResponse<()>> {
    let count = state.notifications.count(&user.id).await?;
    Ok(ApiResponse::ok("Notification count retrieved", count))
}

#[utoipa::path(
    post,
    path = "/notifications/{id}/read",
    params(("id" = String, Path, description = "Notification id")),
    responses(
        (status = 200, description = "Marked read", body = Notification),
        (status = 403, description = "Notification belongs to another user"),
        (status = 404, description = "Notification not found")
    ),
    tag = "Notifications",
    security(("bearerAuth" = []))
)]
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<ApiResponse<Notification>, ApiResponse<()>> {
    let notification = state.notifications.mark_read(&id, &user.id).await?;
    Ok(ApiResponse::ok("Notification marked as read", notification))
}

#[utoipa::path(
    post,
    path = "/notifications/read-all",
    responses((status = 200, description = "Number of entries marked read", body = usize)),
    tag = "Notifications",
    security(("bearerAuth" = []))
)]
pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<ApiResponse<usize>, ApiResponse<()>> {
    let updated = state.notifications.mark_all_read(&user.id).await?;
    Ok(ApiResponse::ok(format!("{updated} notifications marked as read"), updated))
}
