use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::{Responder, get, post, web};
use common::{error::Res, http::Success, jwt::JwtClaims, storage::FileStore, upload::FormData};
use db::repo::Store;
use notifier::Notifier;

use crate::{dtos::message::SendMessage, services};

/// Sends a message about a job.
///
/// Admins attach deliverables as `completed_files`, which completes the job.
/// Clients attach extra inputs as `files`. The stored role decides which is read.
#[post("/{job_id}/messages")]
pub async fn post_job_message(
    claims: web::ReqData<JwtClaims>,
    path: web::Path<i64>,
    payload: Multipart,
    store: web::Data<Arc<dyn Store>>,
    files: web::Data<FileStore>,
    notifier: web::Data<Notifier>,
) -> Res<impl Responder> {
    let mut form = FormData::read(payload).await?;

    let req = SendMessage {
        job_id: Some(path.into_inner()),
        recipient_id: None,
        content: form.text("content").map(str::to_string),
        files: form.take_files("files"),
        completed_files: form.take_files("completed_files"),
    };
    let message = services::message::send(
        store.get_ref().as_ref(),
        files.get_ref(),
        notifier.get_ref(),
        claims.user_id,
        req,
    )
    .await?;
    Success::created(message)
}

/// The thread the job belongs to, as seen by the caller.
#[get("/{job_id}/messages")]
pub async fn get_job_messages(
    claims: web::ReqData<JwtClaims>,
    path: web::Path<i64>,
    store: web::Data<Arc<dyn Store>>,
) -> Res<impl Responder> {
    let messages = services::message::list(
        store.get_ref().as_ref(),
        claims.user_id,
        Some(path.into_inner()),
        None,
    )
    .await?;
    Success::ok(messages)
}
