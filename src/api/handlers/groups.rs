//! Group access: creation, detail, and the authorization guard shared by
//! every group-scoped operation.
//!
//! Policy: a global administrator reaches any group. Anyone else needs a
//! membership row, and a missing membership is answered exactly like a
//! missing group, so the response never confirms a group exists to
//! non-members.

use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
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

use crate::auth::{
    principal::{require_auth, Principal},
    token::TokenKeys,
};

pub(crate) const ROLE_ADMIN: &str = "admin";
pub(crate) const ROLE_MEMBER: &str = "member";

const GROUP_NAME_MAX: usize = 80;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CreateGroupRequest {
    pub name: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GroupResponse {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub role: Option<String>,
}

#[utoipa::path(
    post,
    path = "/v1/groups",
    request_body = CreateGroupRequest,
    responses(
        (status = 201, description = "Group created, creator becomes its admin", body = GroupResponse),
        (status = 400, description = "Invalid group name", body = String),
        (status = 401, description = "Missing or invalid bearer token"),
    ),
    tag = "groups"
)]
pub async fn create_group(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    token_keys: Extension<Arc<TokenKeys>>,
    payload: Option<Json<CreateGroupRequest>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &token_keys) {
        Ok(principal) => principal,
        Err(rejection) => return rejection.into_response(),
    };

    let request: CreateGroupRequest = match payload {
        Some(Json(payload)) => payload,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "message": "Missing payload" })),
            )
                .into_response()
        }
    };

    let name = request.name.trim();
    if name.is_empty() || name.len() > GROUP_NAME_MAX {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": "Invalid group name" })),
        )
            .into_response();
    }

    match insert_group_with_admin(&pool, principal.user_id, name).await {
        Ok(response) => (StatusCode::CREATED, Json(response)).into_response(),
        Err(err) => {
            error!("Failed to create group: {err}");
            internal_failure()
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/groups/{group_id}",
    params(("group_id" = Uuid, Path, description = "Group identifier")),
    responses(
        (status = 200, description = "Group detail", body = GroupResponse),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 404, description = "Group not found"),
    ),
    tag = "groups"
)]
pub async fn get_group(
    Path(group_id): Path<Uuid>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    token_keys: Extension<Arc<TokenKeys>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &token_keys) {
        Ok(principal) => principal,
        Err(rejection) => return rejection.into_response(),
    };

    match resolve_group_context(&pool, &principal, group_id).await {
        Ok(Some(context)) => (StatusCode::OK, Json(context.to_response())).into_response(),
        Ok(None) => group_not_found(),
        Err(err) => {
            error!("Failed to resolve group: {err}");
            internal_failure()
        }
    }
}

/// A group as seen by one principal: the row plus that principal's role.
#[derive(Debug)]
pub(crate) struct GroupContext {
    pub(crate) id: Uuid,
    pub(crate) name: String,
    pub(crate) created_at: String,
    pub(crate) role: Option<String>,
}

impl GroupContext {
    pub(crate) fn can_manage(&self, principal: &Principal) -> bool {
        principal.admin || self.role.as_deref() == Some(ROLE_ADMIN)
    }

    fn to_response(&self) -> GroupResponse {
        GroupResponse {
            id: self.id.to_string(),
            name: self.name.clone(),
            created_at: self.created_at.clone(),
            role: self.role.clone(),
        }
    }
}

/// Resolve a group as one principal sees it, in a single query.
///
/// Global administrators see every group; other callers only see groups they
/// are members of. `None` covers both "no such group" and "not a member".
pub(crate) async fn resolve_group_context(
    pool: &PgPool,
    principal: &Principal,
    group_id: Uuid,
) -> Result<Option<GroupContext>, sqlx::Error> {
    let query = if principal.admin {
        r#"
        SELECT g.id, g.name,
            to_char(g.created_at AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS created_at,
            m.role
        FROM groups g
        LEFT JOIN group_memberships m ON m.group_id = g.id AND m.user_id = $2
        WHERE g.id = $1
        "#
    } else {
        r#"
        SELECT g.id, g.name,
            to_char(g.created_at AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS created_at,
            m.role
        FROM groups g
        JOIN group_memberships m ON m.group_id = g.id AND m.user_id = $2
        WHERE g.id = $1
        "#
    };
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(group_id)
        .bind(principal.user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await?;

    Ok(row.map(|row| GroupContext {
        id: row.get("id"),
        name: row.get("name"),
        created_at: row.get("created_at"),
        role: row.get::<Option<String>, _>("role"),
    }))
}

async fn insert_group_with_admin(
    pool: &PgPool,
    user_id: Uuid,
    name: &str,
) -> Result<GroupResponse, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let query = r#"
        INSERT INTO groups (name, created_by)
        VALUES ($1, $2)
        RETURNING id, name,
            to_char(created_at AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS created_at
    "#;
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(name)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await?;

    let group_id: Uuid = row.get("id");

    let query = r"
        INSERT INTO group_memberships (group_id, user_id, role)
        VALUES ($1, $2, $3)
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(group_id)
        .bind(user_id)
        .bind(ROLE_ADMIN)
        .execute(&mut *tx)
        .instrument(span)
        .await?;

    tx.commit().await?;

    Ok(GroupResponse {
        id: group_id.to_string(),
        name: row.get("name"),
        created_at: row.get("created_at"),
        role: Some(ROLE_ADMIN.to_string()),
    })
}

pub(crate) fn group_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "message": "Group not found." })),
    )
        .into_response()
}

pub(crate) fn internal_failure() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "message": "Request failed" })),
    )
        .into_response()
}
