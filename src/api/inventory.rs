use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use utoipa::OpenApi;

use crate::api::auth::AuthUser;
use crate::app_state::AppState;
use crate::db::models::inventory::{InventoryItem, InventoryPatch, NewInventoryItem};
use crate::errors::ServiceError;
use crate::utils::api_response::ApiResponse;
use crate::utils::category::{category_table, Category, CategoryMapping, Subcategory};
use crate::utils::units::Unit;

pub fn inventory_routes() -> Router<AppState> {
    Router::new()
        .route("/inventory", get(list_inventory).post(create_item))
        .route(
            "/inventory/{id}",
            get(get_item).patch(update_item).delete(delete_item),
        )
        .route("/categories", get(list_categories))
}

#[derive(OpenApi)]
#[openapi(
    paths(list_inventory, get_item, create_item, update_item, delete_item, list_categories),
    components(schemas(
        InventoryItem,
        NewInventoryItem,
        InventoryPatch,
        CategoryMapping,
        Category,
        Subcategory,
        Unit
    )),
    tags((name = "Inventory", description = "Stock levels and item metadata"))
)]
pub struct InventoryDoc;

#[utoipa::path(
    get,
    path = "/inventory",
    responses((status = 200, description = "All items ordered by name", body = Vec<InventoryItem>)),
    tag = "Inventory",
    security(("bearerAuth" = []))
)]
pub async fn list_inventory(
    State(state): State<AppState>,
) -> Result<ApiResponse<Vec<InventoryItem>>, ApiResponse<()>> {
    let items = state.inventory.list().await?;
    Ok(ApiResponse::ok("Inventory retrieved", items))
}

#[utoipa::path(
    get,
    path = "/inventory/{id}",
    params(("id" = String, Path, description = "Inventory document id")),
    responses(
        (status = 200, description = "Item found", body = InventoryItem),
        (status = 404, description = "Item not found")
    ),
    tag = "Inventory",
    security(("bearerAuth" = []))
)]
pub async fn get_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<InventoryItem>, ApiResponse<()>> {
    let item = state
        .inventory
        .get(&id)
        .await?
        .ok_or(ServiceError::ItemNotFound(id))?;
    Ok(ApiResponse::ok("Item retrieved", item))
}

#[utoipa::path(
    post,
    path = "/inventory",
    request_body = NewInventoryItem,
    responses(
        (status = 201, description = "Item created", body = InventoryItem),
        (status = 400, description = "Invalid item"),
        (status = 403, description = "Admin privileges required"),
        (status = 409, description = "Another item already holds this id")
    ),
    tag = "Inventory",
    security(("bearerAuth" = []))
)]
pub async fn create_item(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<NewInventoryItem>,
) -> Result<ApiResponse<InventoryItem>, ApiResponse<()>> {
    user.require_admin()?;
    let item = state.inventory.create(payload).await?;
    Ok(ApiResponse::success(StatusCode::CREATED, "Item created", item))
}

#[utoipa::path(
    patch,
    path = "/inventory/{id}",
    params(("id" = String, Path, description = "Inventory document id")),
    request_body = InventoryPatch,
    responses(
        (status = 200, description = "Item updated", body = InventoryItem),
        (status = 404, description = "Item not found")
    ),
    tag = "Inventory",
    security(("bearerAuth" = []))
)]
pub async fn update_item(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(patch): Json<InventoryPatch>,
) -> Result<ApiResponse<InventoryItem>, ApiResponse<()>> {
    user.require_admin()?;
    let item = state.inventory.update(&id, patch).await?;
    Ok(ApiResponse::ok("Item updated", item))
}

#[utoipa::path(
    delete,
    path = "/inventory/{id}",
    params(("id" = String, Path, description = "Inventory document id")),
    responses(
        (status = 200, description = "Item deleted"),
        (status = 404, description = "Item not found")
    ),
    tag = "Inventory",
    security(("bearerAuth" = []))
)]
pub async fn delete_item(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<ApiResponse<()>, ApiResponse<()>> {
    user.require_admin()?;
    state.inventory.delete(&id).await?;
    Ok(ApiResponse::ok("Item deleted", ()))
}

#[utoipa::path(
    get,
    path = "/categories",
    responses((status = 200, description = "Subcategory to category table", body = Vec<CategoryMapping>)),
    tag = "Inventory"
)]
pub async fn list_categories() -> ApiResponse<Vec<CategoryMapping>> {
    ApiResponse::ok("Categories retrieved", category_table())
}
