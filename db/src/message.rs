use common::{
    error::{AppError, Res},
    misc::Role,
};
use sqlx::{Executor, PgPool, Postgres};

use crate::{
    dtos::message::{DeleteOutcome, MessageCreateRequest, ThreadKey},
    models::message::Message,
};

fn tombstone_column(side: Role) -> &'static str {
    match side {
        Role::Client => "client_deleted",
        Role::Admin => "admin_deleted",
    }
}

pub async fn insert_message<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    data: &MessageCreateRequest,
) -> Res<Message> {
    sqlx::query_as::<_, Message>(
        r#"
        INSERT INTO messages (job_id, sender_id, sender_role, recipient_id, content, files)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(data.job_id)
    .bind(data.sender_id)
    .bind(data.sender_role.as_str())
    .bind(data.recipient_id)
    .bind(&data.content)
    .bind(&data.files)
    .fetch_one(executor)
    .await
    .map_err(AppError::from)
}

pub async fn get_message<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    message_id: i64,
) -> Res<Option<Message>> {
    sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = $1")
        .bind(message_id)
        .fetch_optional(executor)
        .await
        .map_err(AppError::from)
}

pub async fn update_content<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    message_id: i64,
    content: &str,
) -> Res<Option<Message>> {
    sqlx::query_as::<_, Message>(
        "UPDATE messages SET content = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(message_id)
    .bind(content)
    .fetch_optional(executor)
    .await
    .map_err(AppError::from)
}

/// Messages of a thread still visible to `viewer`, oldest first.
pub async fn get_thread<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    thread: &ThreadKey,
    viewer: Role,
) -> Res<Vec<Message>> {
    let query = format!(
        r#"
        SELECT * FROM messages
        WHERE ((sender_id = $1 AND recipient_id = ANY($2))
            OR (sender_id = ANY($2) AND recipient_id = $1))
          AND NOT {}
        ORDER BY created_at ASC, id ASC
        "#,
        tombstone_column(viewer)
    );
    sqlx::query_as::<_, Message>(&query)
        .bind(thread.client_id)
        .bind(&thread.admin_ids)
        .fetch_all(executor)
        .await
        .map_err(AppError::from)
}

/// Sets the tombstone of `side` and removes the row once both sides are set.
/// Runs in one transaction: when both sides race, the second update waits for
/// the first commit and then performs the single delete.
pub async fn tombstone(pool: &PgPool, message_id: i64, side: Role) -> Res<DeleteOutcome> {
    let mut tx = pool.begin().await?;

    let update = format!(
        "UPDATE messages SET {} = TRUE WHERE id = $1 RETURNING id",
        tombstone_column(side)
    );
    let updated = sqlx::query_scalar::<_, i64>(&update)
        .bind(message_id)
        .fetch_optional(&mut *tx)
        .await?;
    if updated.is_none() {
        tx.rollback().await?;
        return Ok(DeleteOutcome::Gone);
    }

    let purged = sqlx::query(
        "DELETE FROM messages WHERE id = $1 AND client_deleted AND admin_deleted",
    )
    .bind(message_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;
    Ok(if purged > 0 {
        DeleteOutcome::Purged
    } else {
        DeleteOutcome::Hidden
    })
}

/// Tombstones every message of the thread for `side`, purging rows the other
/// side had already deleted. Returns the number of rows touched.
pub async fn tombstone_thread(pool: &PgPool, thread: &ThreadKey, side: Role) -> Res<u64> {
    let mut tx = pool.begin().await?;

    let update = format!(
        r#"
        UPDATE messages SET {} = TRUE
        WHERE (sender_id = $1 AND recipient_id = ANY($2))
           OR (sender_id = ANY($2) AND recipient_id = $1)
        "#,
        tombstone_column(side)
    );
    let touched = sqlx::query(&update)
        .bind(thread.client_id)
        .bind(&thread.admin_ids)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    sqlx::query(
        r#"
        DELETE FROM messages
        WHERE ((sender_id = $1 AND recipient_id = ANY($2))
            OR (sender_id = ANY($2) AND recipient_id = $1))
          AND client_deleted AND admin_deleted
        "#,
    )
    .bind(thread.client_id)
    .bind(&thread.admin_ids)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(touched)
}
