//! Authenticated principal extraction for protected handlers.
//!
//! Pulls the bearer token out of the Authorization header, verifies it, and
//! hands downstream handlers a principal. Resource-scoped authorization is
//! decided per resource in those handlers, not here.

use axum::{
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use super::token::{TokenKeys, Verification};

/// Authenticated user context derived from a verified bearer token.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user_id: Uuid,
    pub email: String,
    pub username: String,
    pub admin: bool,
}

/// Uniform rejection for unauthenticated requests.
///
/// Expired, malformed, and wrongly signed tokens all surface as `Invalid`;
/// the distinct cause stays in the server logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthRejection {
    Missing,
    Invalid,
}

impl AuthRejection {
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Missing => "Missing authentication token.",
            Self::Invalid => "Invalid authentication token.",
        }
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": self.message() })),
        )
            .into_response()
    }
}

/// Resolve the Authorization header into a principal.
///
/// # Errors
/// Returns `AuthRejection::Missing` when no bearer token is present and
/// `AuthRejection::Invalid` when verification fails for any reason.
pub fn require_auth(headers: &HeaderMap, keys: &TokenKeys) -> Result<Principal, AuthRejection> {
    let Some(token) = extract_bearer_token(headers) else {
        return Err(AuthRejection::Missing);
    };

    match keys.verify(&token) {
        Verification::Valid(claims) => Ok(Principal {
            user_id: claims.sub,
            email: claims.email,
            username: claims.username,
            admin: claims.admin,
        }),
        Verification::Expired => {
            warn!("Rejected expired identity token");
            Err(AuthRejection::Invalid)
        }
        Verification::Malformed => {
            warn!("Rejected malformed identity token");
            Err(AuthRejection::Invalid)
        }
        Verification::SignatureMismatch => {
            warn!("Rejected identity token with signature mismatch");
            Err(AuthRejection::Invalid)
        }
    }
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
