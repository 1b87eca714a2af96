use chrono::{DateTime, Utc};
use common::error::{AppError, Res};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::models::token::IpnRegistration;

pub async fn insert_reset_token<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    token: &str,
    user_id: Uuid,
    expires_at: DateTime<Utc>,
) -> Res<()> {
    sqlx::query("INSERT INTO reset_tokens (token, user_id, expires_at) VALUES ($1, $2, $3)")
        .bind(token)
        .bind(user_id)
        .bind(expires_at)
        .execute(executor)
        .await?;
    Ok(())
}

/// Deletes the token and returns its user, in one statement, so a token can
/// only be redeemed once.
pub async fn consume_reset_token<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    token: &str,
) -> Res<Option<Uuid>> {
    sqlx::query_scalar::<_, Uuid>(
        "DELETE FROM reset_tokens WHERE token = $1 AND expires_at > NOW() RETURNING user_id",
    )
    .bind(token)
    .fetch_optional(executor)
    .await
    .map_err(AppError::from)
}

pub async fn delete_expired_reset_tokens<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
) -> Res<u64> {
    let result = sqlx::query("DELETE FROM reset_tokens WHERE expires_at <= NOW()")
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

pub async fn insert_revoked_token<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    jti: Uuid,
    expires_at: DateTime<Utc>,
) -> Res<()> {
    sqlx::query(
        "INSERT INTO revoked_tokens (jti, expires_at) VALUES ($1, $2) ON CONFLICT (jti) DO NOTHING",
    )
    .bind(jti)
    .bind(expires_at)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn is_revoked<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    jti: Uuid,
) -> Res<bool> {
    sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM revoked_tokens WHERE jti = $1)")
        .bind(jti)
        .fetch_one(executor)
        .await
        .map_err(AppError::from)
}

pub async fn delete_expired_revocations<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
) -> Res<u64> {
    let result = sqlx::query("DELETE FROM revoked_tokens WHERE expires_at <= NOW()")
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

pub async fn get_active_ipn<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    url: &str,
) -> Res<Option<IpnRegistration>> {
    sqlx::query_as::<_, IpnRegistration>(
        "SELECT * FROM ipn_registrations WHERE url = $1 AND ipn_status = 'Active'",
    )
    .bind(url)
    .fetch_optional(executor)
    .await
    .map_err(AppError::from)
}

pub async fn upsert_ipn<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    ipn_id: &str,
    url: &str,
) -> Res<IpnRegistration> {
    sqlx::query_as::<_, IpnRegistration>(
        r#"
        INSERT INTO ipn_registrations (ipn_id, url, ipn_status)
        VALUES ($1, $2, 'Active')
        ON CONFLICT (url) DO UPDATE SET ipn_id = EXCLUDED.ipn_id, ipn_status = 'Active'
        RETURNING *
        "#,
    )
    .bind(ipn_id)
    .bind(url)
    .fetch_one(executor)
    .await
    .map_err(AppError::from)
}
