use axum::middleware::from_fn_with_state;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_rapidoc::RapiDoc;
use utoipa_swagger_ui::SwaggerUi;

use crate::app_state::AppState;
use crate::middleware::auth::session_middleware;

pub mod action_logs;
pub mod auth;
pub mod health;
pub mod inventory;
pub mod notification;
pub mod requests;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearerAuth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(title = "Stockroom API", description = "Inventory requests and approvals"),
    modifiers(&BearerAuth)
)]
struct BaseDoc;

/// Every route group's OpenAPI document merged into one.
pub fn api_doc() -> utoipa::openapi::OpenApi {
    BaseDoc::openapi()
        .merge_from(requests::RequestDoc::openapi())
        .merge_from(inventory::InventoryDoc::openapi())
        .merge_from(notification::NotificationDoc::openapi())
        .merge_from(action_logs::ActionLogDoc::openapi())
}

/// Full application router. Everything except health checks and the API
/// docs sits behind session verification.
pub fn router(state: AppState) -> Router {
    let doc = api_doc();

    let private_routes = Router::new()
        .merge(requests::request_routes())
        .merge(inventory::inventory_routes())
        .merge(notification::notification_routes())
        .merge(action_logs::action_log_routes())
        .route_layer(from_fn_with_state(state.clone(), session_middleware));

    Router::new()
        .merge(health::health_routes())
        .merge(private_routes)
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", doc.clone()))
        .merge(RapiDoc::with_openapi("/api-docs/rapidoc.json", doc).path("/rapidoc"))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
