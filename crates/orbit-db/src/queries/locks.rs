//! Database query functions for the `locks` table -- TTL'd named mutual
//! exclusion, substituting for a Redis `SET NX PX` lock.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Attempt to acquire a named lock for `ttl`. Returns the holder token on
/// success, or `None` if the lock is currently held by someone else and not
/// yet expired.
pub async fn acquire(pool: &PgPool, name: &str, ttl: Duration) -> Result<Option<String>> {
    let token = Uuid::new_v4().to_string();
    let expires_at = Utc::now() + ttl;

    let row: Option<(String,)> = sqlx::query_as(
        "INSERT INTO locks (name, holder_token, expires_at) \
         VALUES ($1, $2, $3) \
         ON CONFLICT (name) DO UPDATE SET \
             holder_token = EXCLUDED.holder_token, \
             expires_at = EXCLUDED.expires_at \
         WHERE locks.expires_at < now() \
         RETURNING holder_token",
    )
    .bind(name)
    .bind(&token)
    .bind(expires_at)
    .fetch_optional(pool)
    .await
    .context("failed to acquire lock")?;

    Ok(row.map(|(t,)| t))
}

/// Release a lock, but only if `token` is still the current holder. Prevents
/// releasing a lock that expired and was re-acquired by someone else.
pub async fn release(pool: &PgPool, name: &str, token: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM locks WHERE name = $1 AND holder_token = $2")
        .bind(name)
        .bind(token)
        .execute(pool)
        .await
        .context("failed to release lock")?;

    Ok(result.rows_affected() > 0)
}
