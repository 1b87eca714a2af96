use common::{
    error::{AppError, Res},
    misc::{STATUS_COMPLETED, STATUS_IN_PROGRESS},
};
use sqlx::{Executor, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    dtos::job::{JobCreateRequest, PaymentTransition},
    models::job::Job,
};

pub async fn insert_job<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    data: &JobCreateRequest,
) -> Res<Job> {
    sqlx::query_as::<_, Job>(
        r#"
        INSERT INTO jobs (client_id, subject, title, instructions, pages, deadline, cited_resources,
                          formatting_style, writer_level, spacing, total_amount, upfront_amount)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING *
        "#,
    )
    .bind(data.client_id)
    .bind(&data.subject)
    .bind(&data.title)
    .bind(&data.instructions)
    .bind(data.pages)
    .bind(data.deadline)
    .bind(data.cited_resources)
    .bind(&data.formatting_style)
    .bind(&data.writer_level)
    .bind(&data.spacing)
    .bind(data.total_amount)
    .bind(data.upfront_amount)
    .fetch_one(executor)
    .await
    .map_err(AppError::from)
}

pub async fn get_job<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    job_id: i64,
) -> Res<Option<Job>> {
    sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
        .bind(job_id)
        .fetch_optional(executor)
        .await
        .map_err(AppError::from)
}

pub async fn get_jobs<'e, E>(executor: E, client_id: Option<Uuid>) -> Res<Vec<Job>>
where
    E: Executor<'e, Database = Postgres>,
{
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM jobs");
    if let Some(client_id) = client_id {
        qb.push(" WHERE client_id = ").push_bind(client_id);
    }
    qb.push(" ORDER BY created_at DESC, id DESC");

    qb.build_query_as::<Job>()
        .fetch_all(executor)
        .await
        .map_err(AppError::from)
}

pub async fn get_job_by_tracking_id<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    tracking_id: &str,
) -> Res<Option<Job>> {
    sqlx::query_as::<_, Job>(
        "SELECT * FROM jobs WHERE upfront_tracking_id = $1 OR completion_tracking_id = $1",
    )
    .bind(tracking_id)
    .fetch_optional(executor)
    .await
    .map_err(AppError::from)
}

pub async fn append_files<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    job_id: i64,
    files: &[String],
) -> Res<Option<Job>> {
    sqlx::query_as::<_, Job>(
        "UPDATE jobs SET files = files || $2, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(job_id)
    .bind(files)
    .fetch_optional(executor)
    .await
    .map_err(AppError::from)
}

/// Appends deliverables and marks the job completed. No-op while the upfront
/// payment is still pending.
pub async fn deliver_files<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    job_id: i64,
    files: &[String],
) -> Res<Option<Job>> {
    sqlx::query_as::<_, Job>(
        r#"
        UPDATE jobs
        SET completed_files = completed_files || $2, status = $3, completed = TRUE, updated_at = NOW()
        WHERE id = $1 AND payment_status <> 'Pending'
        RETURNING *
        "#,
    )
    .bind(job_id)
    .bind(files)
    .bind(STATUS_COMPLETED)
    .fetch_optional(executor)
    .await
    .map_err(AppError::from)
}

/// Sets the fulfilment label. A delivered label is refused while payment is pending.
pub async fn update_status<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    job_id: i64,
    status: &str,
    completed: bool,
) -> Res<Option<Job>> {
    sqlx::query_as::<_, Job>(
        r#"
        UPDATE jobs SET status = $2, completed = $3, updated_at = NOW()
        WHERE id = $1 AND (payment_status <> 'Pending' OR NOT $3)
        RETURNING *
        "#,
    )
    .bind(job_id)
    .bind(status)
    .bind(completed)
    .fetch_optional(executor)
    .await
    .map_err(AppError::from)
}

pub async fn record_upfront_order<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    job_id: i64,
    tracking_id: &str,
    reference: &str,
) -> Res<Option<Job>> {
    sqlx::query_as::<_, Job>(
        r#"
        UPDATE jobs SET upfront_tracking_id = $2, upfront_reference = $3, updated_at = NOW()
        WHERE id = $1 AND payment_status = 'Pending' AND upfront_tracking_id IS NULL
        RETURNING *
        "#,
    )
    .bind(job_id)
    .bind(tracking_id)
    .bind(reference)
    .fetch_optional(executor)
    .await
    .map_err(AppError::from)
}

/// Stores the completion order, only while `replaces` is still the stored one.
pub async fn record_completion_order<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    job_id: i64,
    tracking_id: &str,
    reference: &str,
    replaces: Option<&str>,
) -> Res<Option<Job>> {
    sqlx::query_as::<_, Job>(
        r#"
        UPDATE jobs SET completion_tracking_id = $2, completion_reference = $3, updated_at = NOW()
        WHERE id = $1 AND payment_status = 'Partial' AND completion_tracking_id IS NOT DISTINCT FROM $4
        RETURNING *
        "#,
    )
    .bind(job_id)
    .bind(tracking_id)
    .bind(reference)
    .bind(replaces)
    .fetch_optional(executor)
    .await
    .map_err(AppError::from)
}

/// Compare-and-set on `payment_status`. Returns `None` when the job is not in
/// the source state or the tracking id belongs to another order, so
/// duplicate notifications never advance a job twice.
pub async fn apply_transition<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    job_id: i64,
    tracking_id: &str,
    transition: PaymentTransition,
) -> Res<Option<Job>> {
    let query = match transition {
        PaymentTransition::UpfrontSettled => {
            r#"
            UPDATE jobs SET payment_status = 'Partial', status = $3, updated_at = NOW()
            WHERE id = $1 AND payment_status = 'Pending' AND upfront_tracking_id = $2
            RETURNING *
            "#
        }
        PaymentTransition::CompletionSettled => {
            r#"
            UPDATE jobs SET payment_status = 'Completed', updated_at = NOW()
            WHERE id = $1 AND payment_status = 'Partial' AND completion_tracking_id = $2
            RETURNING *
            "#
        }
    };

    let mut q = sqlx::query_as::<_, Job>(query).bind(job_id).bind(tracking_id);
    if transition == PaymentTransition::UpfrontSettled {
        q = q.bind(STATUS_IN_PROGRESS);
    }
    q.fetch_optional(executor).await.map_err(AppError::from)
}

/// Deletes a job whose upfront checkout never got a tracking id.
pub async fn delete_draft<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    job_id: i64,
) -> Res<bool> {
    let result = sqlx::query(
        r#"
        DELETE FROM jobs
        WHERE id = $1 AND payment_status = 'Pending' AND upfront_tracking_id IS NULL
        "#,
    )
    .bind(job_id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}
