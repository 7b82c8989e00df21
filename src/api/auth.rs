// src/api/auth.rs
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::utils::api_response::ApiResponse;

/// Claims carried by the session token. Tokens are minted by the identity
/// provider; this service only verifies them.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject - user id
    pub sub: String,
    /// Display name of the authenticated user
    pub username: String,
    /// "admin" or "user"
    pub role: String,
    /// Expiration timestamp (UNIX TIME)
    pub exp: usize,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// The caller as seen by handlers and the approval engine.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: String,
    pub name: String,
    pub is_admin: bool,
}

impl AuthUser {
    /// Identity used when authentication is disabled for local development.
    pub fn development_admin() -> Self {
        AuthUser {
            id: "dev-admin".to_string(),
            name: "Development Admin".to_string(),
            is_admin: true,
        }
    }

    pub fn require_admin(&self) -> Result<(), ApiResponse<()>> {
        if self.is_admin {
            Ok(())
        } else {
            Err(ApiResponse::error(
                StatusCode::FORBIDDEN,
                "Admin privileges required",
                None,
            ))
        }
    }
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        let is_admin = claims.is_admin();
        AuthUser {
            id: claims.sub,
            name: claims.username,
            is_admin,
        }
    }
}
