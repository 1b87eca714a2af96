use common::{
    error::{AppError, Res},
    misc::STATUS_COMPLETED,
};
use db::{
    models::job::Job,
    repo::{Store, require_job, require_user},
};
use notifier::{Notifier, events::LiveEvent};
use uuid::Uuid;

use crate::dtos::job::JobDetail;

/// Admins see every job, clients their own. Newest first.
pub async fn list(store: &dyn Store, viewer_id: Uuid) -> Res<Vec<Job>> {
    let viewer = require_user(store, viewer_id).await?;
    let owner = (!viewer.is_admin()).then_some(viewer.id);
    store.list_jobs(owner).await
}

pub async fn detail(store: &dyn Store, viewer_id: Uuid, job_id: i64) -> Res<JobDetail> {
    let messages = api_messages::services::message::list(store, viewer_id, Some(job_id), None).await?;
    let job = require_job(store, job_id).await?;
    let client = require_user(store, job.client_id).await?;

    let mut all_files: Vec<String> = Vec::new();
    let sources = job
        .files
        .iter()
        .chain(job.completed_files.iter())
        .chain(messages.iter().flat_map(|m| m.files.iter()));
    for file in sources {
        if !all_files.contains(file) {
            all_files.push(file.clone());
        }
    }

    Ok(JobDetail {
        job,
        client_name: client.name,
        client_email: client.email,
        messages,
        all_files,
    })
}

/// Admin status change. A `Completed` status marks the job delivered, which
/// is refused while the upfront payment is pending.
pub async fn update_status(
    store: &dyn Store,
    notifier: &Notifier,
    admin_id: Uuid,
    job_id: i64,
    status: &str,
) -> Res<Job> {
    let admin = require_user(store, admin_id).await?;
    if !admin.is_admin() {
        return Err(AppError::Unauthorized(
            "Only admins can update jobs".to_string(),
        ));
    }
    let status = status.trim();
    if status.is_empty() {
        return Err(AppError::Validation("status is required".to_string()));
    }
    require_job(store, job_id).await?;

    let completed = status == STATUS_COMPLETED;
    let job = store
        .update_job_status(job_id, status, completed)
        .await?
        .ok_or_else(|| {
            AppError::InvalidState(format!(
                "Job {} cannot be completed before the upfront payment is settled",
                job_id
            ))
        })?;

    log::info!("Job {} status set to {} by {}", job.id, job.status, admin.id);
    notifier.publish(LiveEvent::JobUpdated {
        client_id: job.client_id,
        job_id: job.id,
        status: job.status.clone(),
        payment_status: job.payment_status.clone(),
    });
    Ok(job)
}
