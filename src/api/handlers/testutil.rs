//! Helpers for store-backed tests. These tests need a reachable Postgres and
//! are skipped unless TRIBU_TEST_DSN is set.

use crate::auth::{password::hash_password, principal::Principal};
use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));
const SCHEMA_LOCK: i64 = 727_001;

pub(crate) async fn test_pool() -> Result<Option<PgPool>> {
    let Ok(dsn) = std::env::var("TRIBU_TEST_DSN") else {
        eprintln!("Skipping store-backed test: TRIBU_TEST_DSN is not set");
        return Ok(None);
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&dsn)
        .await
        .context("failed to connect test pool")?;
    apply_schema(&pool).await?;
    Ok(Some(pool))
}

async fn apply_schema(pool: &PgPool) -> Result<()> {
    // Advisory lock serializes schema application across test binaries.
    let mut conn = pool.acquire().await?;
    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(SCHEMA_LOCK)
        .execute(&mut *conn)
        .await?;

    let mut outcome = Ok(());
    for (index, statement) in split_sql_statements(SCHEMA_SQL).iter().enumerate() {
        if let Err(err) = sqlx::query(statement).execute(&mut *conn).await {
            outcome = Err(err).with_context(|| format!("failed schema statement {}", index + 1));
            break;
        }
    }

    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(SCHEMA_LOCK)
        .execute(&mut *conn)
        .await?;
    outcome
}

fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("--") {
            continue;
        }
        current.push_str(line);
        current.push('\n');

        if trimmed.ends_with(';') {
            let statement = current.trim();
            if !statement.is_empty() {
                statements.push(statement.to_string());
            }
            current.clear();
        }
    }

    let leftover = current.trim();
    if !leftover.is_empty() {
        statements.push(leftover.to_string());
    }

    statements
}

pub(crate) async fn insert_user(pool: &PgPool, admin: bool) -> Result<Uuid> {
    let suffix = Uuid::new_v4().simple().to_string();
    let hash = hash_password("CorrectHorseBatteryStaple")?;
    let row = sqlx::query(
        "INSERT INTO users (username, email, password_hash, admin) VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind(format!("user-{suffix}"))
    .bind(format!("user-{suffix}@example.com"))
    .bind(hash)
    .bind(admin)
    .fetch_one(pool)
    .await
    .context("failed to insert test user")?;
    Ok(row.get("id"))
}

pub(crate) fn principal(user_id: Uuid, admin: bool) -> Principal {
    Principal {
        user_id,
        email: "test@example.com".to_string(),
        username: "test".to_string(),
        admin,
    }
}
