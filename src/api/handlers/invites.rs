//! Invite lifecycle: minting, resolution, and the join protocol.
//!
//! An invite is an opaque bearer token scoped to one group. Creating one
//! requires manage rights on the group. Resolving one is unauthenticated so
//! an invited person can preview the group before signing in. Joining is
//! idempotent: concurrent or repeated joins converge on a single membership
//! row and both outcomes answer 200.

use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::{error, info_span, warn, Instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use super::groups::{group_not_found, internal_failure, resolve_group_context, ROLE_MEMBER};
use super::valid_invite_token;
use crate::auth::{principal::require_auth, token::TokenKeys};

const INVITE_TOKEN_BYTES: usize = 32;
const INVITE_TTL_MIN_SECONDS: u64 = 60;
const INVITE_TTL_MAX_SECONDS: u64 = 60 * 60 * 24 * 30;

const INVALID_INVITE: &str = "Invalid or expired invite token.";

/// Invite settings resolved at startup and shared via request extension.
#[derive(Clone, Copy, Debug)]
pub struct InviteConfig {
    default_ttl_seconds: u64,
}

impl InviteConfig {
    #[must_use]
    pub const fn new(default_ttl_seconds: u64) -> Self {
        Self {
            default_ttl_seconds,
        }
    }

    /// Effective lifetime for a new invite, clamped to sane bounds so a
    /// client can neither mint an immortal invite nor a stillborn one.
    #[must_use]
    pub fn clamp_ttl(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.default_ttl_seconds)
            .clamp(INVITE_TTL_MIN_SECONDS, INVITE_TTL_MAX_SECONDS)
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateInviteRequest {
    pub expires_in_seconds: Option<u64>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InviteResponse {
    pub token: String,
    pub group_id: String,
    pub expires_at: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ResolveInviteResponse {
    pub group_id: String,
    pub group_name: String,
    pub expires_at: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub message: String,
    pub group_id: String,
}

#[utoipa::path(
    post,
    path = "/v1/groups/{group_id}/invites",
    params(("group_id" = Uuid, Path, description = "Group identifier")),
    request_body = CreateInviteRequest,
    responses(
        (status = 201, description = "Invite created", body = InviteResponse),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 404, description = "Group not found or caller cannot manage it"),
    ),
    tag = "invites"
)]
pub async fn create_invite(
    Path(group_id): Path<Uuid>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    token_keys: Extension<Arc<TokenKeys>>,
    config: Extension<InviteConfig>,
    payload: Option<Json<CreateInviteRequest>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &token_keys) {
        Ok(principal) => principal,
        Err(rejection) => return rejection.into_response(),
    };

    let request = payload.map(|Json(payload)| payload).unwrap_or_default();

    let context = match resolve_group_context(&pool, &principal, group_id).await {
        Ok(Some(context)) => context,
        // Lack of manage rights is answered like a missing group.
        Ok(None) => return group_not_found(),
        Err(err) => {
            error!("Failed to resolve group for invite: {err}");
            return internal_failure();
        }
    };
    if !context.can_manage(&principal) {
        return group_not_found();
    }

    let token = match generate_invite_token() {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to generate invite token: {err}");
            return internal_failure();
        }
    };

    let ttl = config.clamp_ttl(request.expires_in_seconds);
    match insert_invite(&pool, &token, group_id, ttl).await {
        Ok(expires_at) => (
            StatusCode::CREATED,
            Json(InviteResponse {
                token,
                group_id: group_id.to_string(),
                expires_at,
            }),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to store invite: {err}");
            internal_failure()
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/invites/{token}",
    params(("token" = String, Path, description = "Invite token")),
    responses(
        (status = 200, description = "Invite preview", body = ResolveInviteResponse),
        (status = 404, description = "Unknown, expired, or malformed invite token"),
    ),
    tag = "invites"
)]
pub async fn resolve_invite(
    Path(token): Path<String>,
    pool: Extension<PgPool>,
) -> impl IntoResponse {
    if !valid_invite_token(&token) {
        return invite_not_found();
    }

    match lookup_invite(&pool, &token).await {
        Ok(Some(invite)) => (
            StatusCode::OK,
            Json(ResolveInviteResponse {
                group_id: invite.group_id.to_string(),
                group_name: invite.group_name,
                expires_at: invite.expires_at,
            }),
        )
            .into_response(),
        Ok(None) => invite_not_found(),
        Err(err) => {
            error!("Failed to resolve invite: {err}");
            internal_failure()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/invites/{token}/join",
    params(("token" = String, Path, description = "Invite token")),
    responses(
        (status = 200, description = "Caller is a member of the group", body = JoinResponse),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 404, description = "Unknown, expired, or malformed invite token"),
    ),
    tag = "invites"
)]
pub async fn join_group(
    Path(token): Path<String>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    token_keys: Extension<Arc<TokenKeys>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &token_keys) {
        Ok(principal) => principal,
        Err(rejection) => return rejection.into_response(),
    };

    if !valid_invite_token(&token) {
        return invite_not_found();
    }

    let invite = match lookup_invite(&pool, &token).await {
        Ok(Some(invite)) => invite,
        Ok(None) => {
            warn!("Join attempted with unknown or expired invite");
            return invite_not_found();
        }
        Err(err) => {
            error!("Failed to resolve invite for join: {err}");
            return internal_failure();
        }
    };

    match insert_membership_if_absent(&pool, invite.group_id, principal.user_id).await {
        Ok(rows) => {
            let message = match join_outcome(rows) {
                JoinOutcome::Joined => "Successfully joined the group.",
                JoinOutcome::AlreadyMember => "Already a member of this group.",
            };
            (
                StatusCode::OK,
                Json(JoinResponse {
                    message: message.to_string(),
                    group_id: invite.group_id.to_string(),
                }),
            )
                .into_response()
        }
        Err(err) => {
            error!("Failed to join group: {err}");
            internal_failure()
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum JoinOutcome {
    Joined,
    AlreadyMember,
}

/// Map the affected-row count of the conflict-free insert to an outcome.
const fn join_outcome(rows_affected: u64) -> JoinOutcome {
    if rows_affected > 0 {
        JoinOutcome::Joined
    } else {
        JoinOutcome::AlreadyMember
    }
}

#[derive(Debug)]
struct InviteRecord {
    group_id: Uuid,
    group_name: String,
    expires_at: String,
}

/// 32 bytes from the OS CSPRNG, base64url without padding.
fn generate_invite_token() -> anyhow::Result<String> {
    let mut bytes = [0u8; INVITE_TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| anyhow::anyhow!("OS entropy source failed: {err}"))?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

async fn insert_invite(
    pool: &PgPool,
    token: &str,
    group_id: Uuid,
    ttl_seconds: u64,
) -> Result<String, sqlx::Error> {
    let query = r#"
        INSERT INTO group_invites (token, group_id, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
        RETURNING to_char(expires_at AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS expires_at
    "#;
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token)
        .bind(group_id)
        .bind(i64::try_from(ttl_seconds).unwrap_or(i64::MAX))
        .fetch_one(pool)
        .instrument(span)
        .await?;
    Ok(row.get("expires_at"))
}

/// Fetch a live invite. Unknown and expired tokens are both `None`, so the
/// response never reveals whether a token ever existed.
async fn lookup_invite(pool: &PgPool, token: &str) -> Result<Option<InviteRecord>, sqlx::Error> {
    let query = r#"
        SELECT i.group_id, g.name AS group_name,
            to_char(i.expires_at AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS expires_at
        FROM group_invites i
        JOIN groups g ON g.id = i.group_id
        WHERE i.token = $1 AND i.expires_at > NOW()
    "#;
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token)
        .fetch_optional(pool)
        .instrument(span)
        .await?;

    Ok(row.map(|row| InviteRecord {
        group_id: row.get("group_id"),
        group_name: row.get("group_name"),
        expires_at: row.get("expires_at"),
    }))
}

/// Insert a membership unless one already exists. The conflict target is the
/// table's primary key, so concurrent joins race down to one inserted row
/// and the rest observe zero rows affected.
async fn insert_membership_if_absent(
    pool: &PgPool,
    group_id: Uuid,
    user_id: Uuid,
) -> Result<u64, sqlx::Error> {
    let query = r"
        INSERT INTO group_memberships (group_id, user_id, role)
        VALUES ($1, $2, $3)
        ON CONFLICT (group_id, user_id) DO NOTHING
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(group_id)
        .bind(user_id)
        .bind(ROLE_MEMBER)
        .execute(pool)
        .instrument(span)
        .await?;
    Ok(result.rows_affected())
}

fn invite_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "message": INVALID_INVITE })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::testutil::{insert_user, principal, test_pool};
    use anyhow::{Context, Result};
    use std::collections::HashSet;

    async fn insert_group(pool: &PgPool, created_by: Uuid, name: &str) -> Result<Uuid> {
        let row = sqlx::query(
            "INSERT INTO groups (name, created_by) VALUES ($1, $2) RETURNING id",
        )
        .bind(name)
        .bind(created_by)
        .fetch_one(pool)
        .await
        .context("failed to insert test group")?;
        Ok(row.get("id"))
    }

    #[test]
    fn generated_tokens_have_invite_shape_and_do_not_repeat() -> Result<()> {
        let mut seen = HashSet::new();
        for _ in 0..64 {
            let token = generate_invite_token()?;
            assert!(valid_invite_token(&token), "bad token shape: {token}");
            assert!(seen.insert(token));
        }
        Ok(())
    }

    #[test]
    fn ttl_is_clamped_to_bounds() {
        let config = InviteConfig::new(3600);
        assert_eq!(config.clamp_ttl(None), 3600);
        assert_eq!(config.clamp_ttl(Some(7200)), 7200);
        assert_eq!(config.clamp_ttl(Some(0)), INVITE_TTL_MIN_SECONDS);
        assert_eq!(config.clamp_ttl(Some(u64::MAX)), INVITE_TTL_MAX_SECONDS);
    }

    #[test]
    fn default_ttl_is_also_clamped() {
        let config = InviteConfig::new(u64::MAX);
        assert_eq!(config.clamp_ttl(None), INVITE_TTL_MAX_SECONDS);
    }

    #[test]
    fn rows_affected_maps_to_join_outcome() {
        assert_eq!(join_outcome(1), JoinOutcome::Joined);
        assert_eq!(join_outcome(0), JoinOutcome::AlreadyMember);
    }

    #[tokio::test]
    async fn invite_resolves_until_it_expires() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };

        let owner = insert_user(&pool, false).await?;
        let group_id = insert_group(&pool, owner, "climbing").await?;
        let token = generate_invite_token()?;
        insert_invite(&pool, &token, group_id, 3600).await?;

        let invite = lookup_invite(&pool, &token)
            .await?
            .context("fresh invite should resolve")?;
        assert_eq!(invite.group_id, group_id);
        assert_eq!(invite.group_name, "climbing");

        // Force expiry and verify the invite collapses to unknown.
        sqlx::query("UPDATE group_invites SET expires_at = NOW() - INTERVAL '1 second' WHERE token = $1")
            .bind(&token)
            .execute(&pool)
            .await?;
        assert!(lookup_invite(&pool, &token).await?.is_none());

        let unknown = generate_invite_token()?;
        assert!(lookup_invite(&pool, &unknown).await?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn repeated_joins_keep_a_single_membership_row() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };

        let owner = insert_user(&pool, false).await?;
        let joiner = insert_user(&pool, false).await?;
        let group_id = insert_group(&pool, owner, "pottery").await?;

        let first = insert_membership_if_absent(&pool, group_id, joiner).await?;
        assert_eq!(join_outcome(first), JoinOutcome::Joined);

        let second = insert_membership_if_absent(&pool, group_id, joiner).await?;
        assert_eq!(join_outcome(second), JoinOutcome::AlreadyMember);

        let row = sqlx::query(
            "SELECT COUNT(*) AS rows FROM group_memberships WHERE group_id = $1 AND user_id = $2",
        )
        .bind(group_id)
        .bind(joiner)
        .fetch_one(&pool)
        .await?;
        assert_eq!(row.get::<i64, _>("rows"), 1);

        Ok(())
    }

    #[tokio::test]
    async fn concurrent_joins_converge_on_one_membership() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };

        let owner = insert_user(&pool, false).await?;
        let joiner = insert_user(&pool, false).await?;
        let group_id = insert_group(&pool, owner, "chess").await?;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                insert_membership_if_absent(&pool, group_id, joiner).await
            }));
        }

        let mut joined = 0;
        let mut already = 0;
        for handle in handles {
            match join_outcome(handle.await??) {
                JoinOutcome::Joined => joined += 1,
                JoinOutcome::AlreadyMember => already += 1,
            }
        }
        assert_eq!(joined, 1);
        assert_eq!(already, 7);

        let row = sqlx::query(
            "SELECT COUNT(*) AS rows FROM group_memberships WHERE group_id = $1 AND user_id = $2",
        )
        .bind(group_id)
        .bind(joiner)
        .fetch_one(&pool)
        .await?;
        assert_eq!(row.get::<i64, _>("rows"), 1);

        Ok(())
    }

    #[tokio::test]
    async fn invite_minting_needs_manage_rights() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };

        let owner = insert_user(&pool, false).await?;
        let member = insert_user(&pool, false).await?;
        let group_id = insert_group(&pool, owner, "cooking").await?;
        insert_membership_if_absent(&pool, group_id, member).await?;

        let context = resolve_group_context(&pool, &principal(member, false), group_id)
            .await?
            .context("member should see the group")?;
        assert!(!context.can_manage(&principal(member, false)));
        assert!(context.can_manage(&principal(member, true)));

        Ok(())
    }
}
