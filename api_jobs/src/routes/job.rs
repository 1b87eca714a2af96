use std::sync::Arc;

use actix_web::{Responder, get, put, web};
use common::{error::Res, http::Success, jwt::JwtClaims};
use db::repo::Store;
use notifier::Notifier;

use crate::{dtos::job::StatusUpdateRequest, services};

/// Lists jobs: every job for admins, the caller's own jobs for clients.
#[get("")]
pub async fn get_jobs(
    claims: web::ReqData<JwtClaims>,
    store: web::Data<Arc<dyn Store>>,
) -> Res<impl Responder> {
    let jobs = services::job::list(store.get_ref().as_ref(), claims.user_id).await?;
    Success::ok(jobs)
}

/// Retrieves one job with its conversation.
///
/// # Output
/// - Success: the job fields plus `client_name`, `client_email`, `messages`
///   (the caller's visible thread) and `all_files`
/// - Error: 403 when a client asks for another client's job, 404 when missing
///
/// # Frontend Example
/// ```javascript
/// const response = await fetch(`/api/dashboard/jobs/${jobId}`, {
///   headers: { 'Authorization': `Bearer ${token}` }
/// });
/// const { title, payment_status, messages, all_files } = await response.json();
/// ```
#[get("/{job_id}")]
pub async fn get_job(
    claims: web::ReqData<JwtClaims>,
    path: web::Path<i64>,
    store: web::Data<Arc<dyn Store>>,
) -> Res<impl Responder> {
    let detail =
        services::job::detail(store.get_ref().as_ref(), claims.user_id, path.into_inner()).await?;
    Success::ok(detail)
}

#[put("/{job_id}")]
pub async fn put_job(
    claims: web::ReqData<JwtClaims>,
    path: web::Path<i64>,
    req: web::Json<StatusUpdateRequest>,
    store: web::Data<Arc<dyn Store>>,
    notifier: web::Data<Notifier>,
) -> Res<impl Responder> {
    let job = services::job::update_status(
        store.get_ref().as_ref(),
        notifier.get_ref(),
        claims.user_id,
        path.into_inner(),
        &req.status,
    )
    .await?;
    Success::ok(job)
}
