use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde_json::json;
use tracing::{debug, warn};

use crate::api::auth::{AuthUser, Claims};
use crate::app_state::AppState;
use crate::utils::api_response::ApiResponse;

/// Session token from the `Authorization: Bearer` header, falling back to the
/// session cookie.
fn session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    if let Some(bearer) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(bearer.trim().to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .map(|(_, value)| value.to_string())
}

/// **Session Middleware**
///
/// Verifies the session token and inserts the caller as an `AuthUser`
/// extension. With `AUTH_DISABLED` every request runs as the development
/// admin.
pub async fn session_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    if state.config.auth_disabled {
        req.extensions_mut().insert(AuthUser::development_admin());
        return Ok(next.run(req).await);
    }

    let token = session_token(req.headers(), &state.config.session_cookie).ok_or_else(|| {
        debug!("Request without session token");
        ApiResponse::<()>::error(StatusCode::UNAUTHORIZED, "Missing session token", None)
            .into_response()
    })?;

    let token_data = decode::<Claims>(
        &token,
        &DecodingKey::from_secret(state.config.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        warn!("Session token rejected: {e}");
        ApiResponse::<()>::error(
            StatusCode::UNAUTHORIZED,
            "Invalid session token",
            Some(json!({ "error": e.to_string() })),
        )
        .into_response()
    })?;

    req.extensions_mut().insert(AuthUser::from(token_data.claims));
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_header_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; session=from-cookie"));
        assert_eq!(session_token(&headers, "session").as_deref(), Some("from-cookie"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(session_token(&headers, "session").as_deref(), Some("from-header"));
    }

    #[test]
    fn other_cookies_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("sessionid=nope"));
        assert_eq!(session_token(&headers, "session"), None);
    }
}
