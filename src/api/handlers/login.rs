//! Credential exchange: username and password in, signed identity token out.

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::{error, info_span, Instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{password::verify_password, token::TokenKeys};

// One message for unknown usernames and wrong passwords alike, so the
// response never confirms whether an account exists.
const INVALID_CREDENTIALS: &str = "Invalid username or password.";

// Verified against on username misses so both rejection paths pay for a
// hash and response timing does not reveal whether an account exists.
const DUMMY_PASSWORD_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$AAAAAAAAAAAAAAAAAAAAAA$AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginUser {
    pub id: String,
    pub username: String,
    pub email: String,
    pub admin: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: i64,
    pub user: LoginUser,
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 400, description = "Missing payload", body = String),
        (status = 401, description = "Invalid username or password"),
    ),
    tag = "auth"
)]
pub async fn login(
    pool: Extension<PgPool>,
    token_keys: Extension<Arc<TokenKeys>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let request: LoginRequest = match payload {
        Some(Json(payload)) => payload,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "message": "Missing payload" })),
            )
                .into_response()
        }
    };

    let username = request.username.trim();
    if username.is_empty() || request.password.is_empty() {
        return invalid_credentials();
    }

    let record = match lookup_credentials(&pool, username).await {
        Ok(record) => record,
        Err(err) => {
            error!("Credential lookup failed: {err}");
            return internal_failure();
        }
    };

    let Some(record) = record else {
        let _ = verify_password(&request.password, DUMMY_PASSWORD_HASH);
        return invalid_credentials();
    };

    if !verify_password(&request.password, &record.password_hash) {
        return invalid_credentials();
    }

    match token_keys.issue(record.id, &record.email, &record.username, record.admin) {
        Ok((token, claims)) => (
            StatusCode::OK,
            Json(LoginResponse {
                token,
                expires_at: claims.exp,
                user: LoginUser {
                    id: record.id.to_string(),
                    username: record.username,
                    email: record.email,
                    admin: record.admin,
                },
            }),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to issue identity token: {err}");
            internal_failure()
        }
    }
}

struct CredentialRow {
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
    admin: bool,
}

async fn lookup_credentials(
    pool: &PgPool,
    username: &str,
) -> Result<Option<CredentialRow>, sqlx::Error> {
    let query = "SELECT id, username, email, password_hash, admin FROM users WHERE username = $1";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(username)
        .fetch_optional(pool)
        .instrument(span)
        .await?;

    Ok(row.map(|row| CredentialRow {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        admin: row.get("admin"),
    }))
}

fn invalid_credentials() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "message": INVALID_CREDENTIALS })),
    )
        .into_response()
}

fn internal_failure() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "message": "Login failed" })),
    )
        .into_response()
}
