use common::error::{AppError, Res};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::{
    dtos::user::UserCreateRequest,
    models::user::{AuthCredentials, User},
};

pub async fn exists_user<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    email: &str,
    username: Option<&str>,
) -> Res<bool> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM users WHERE email = $1 OR ($2::TEXT IS NOT NULL AND username = $2))",
    )
    .bind(email)
    .bind(username)
    .fetch_one(executor)
    .await
    .map_err(AppError::from)
}

pub async fn get_user_by_email<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    email: &str,
) -> Res<Option<User>> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(executor)
        .await
        .map_err(AppError::from)
}

pub async fn get_user_by_id<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
) -> Res<Option<User>> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(executor)
        .await
        .map_err(AppError::from)
}

/// All admin accounts, oldest first. Ties on creation time are broken by id.
pub async fn get_admins<'e, E: Executor<'e, Database = Postgres>>(executor: E) -> Res<Vec<User>> {
    sqlx::query_as::<_, User>(
        "SELECT * FROM users WHERE role = 'admin' ORDER BY created_at ASC, id ASC",
    )
    .fetch_all(executor)
    .await
    .map_err(AppError::from)
}

pub async fn insert_user<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    data: &UserCreateRequest,
) -> Res<User> {
    sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (email, username, name, role)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(&data.email)
    .bind(&data.username)
    .bind(&data.name)
    .bind(data.role.as_str())
    .fetch_one(executor)
    .await
    .map_err(AppError::from)
}

pub async fn update_user_role<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    user_id: Uuid,
    role: &str,
) -> Res<Option<User>> {
    sqlx::query_as::<_, User>(
        "UPDATE users SET role = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(user_id)
    .bind(role)
    .fetch_optional(executor)
    .await
    .map_err(AppError::from)
}

pub async fn insert_user_with_credentials<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    data: AuthCredentials,
) -> Res<()> {
    sqlx::query(
        r#"
        INSERT INTO auth_credentials (user_id, password_hash)
        VALUES ($1, $2)
        ON CONFLICT (user_id) DO UPDATE SET password_hash = EXCLUDED.password_hash
        "#,
    )
    .bind(data.user_id)
    .bind(data.password_hash)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn get_user_with_password_hash<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    email: &str,
) -> Res<Option<(User, AuthCredentials)>> {
    let row = sqlx::query_as::<_, UserWithHash>(
        r#"
        SELECT u.*, ac.password_hash
        FROM users u
        JOIN auth_credentials ac ON u.id = ac.user_id
        WHERE u.email = $1
        "#,
    )
    .bind(email)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(|record| {
        let credentials = AuthCredentials {
            user_id: record.user.id,
            password_hash: record.password_hash,
        };
        (record.user, credentials)
    }))
}

#[derive(sqlx::FromRow)]
struct UserWithHash {
    #[sqlx(flatten)]
    user: User,
    password_hash: String,
}
