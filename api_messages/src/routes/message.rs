use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::{Responder, delete, get, post, put, web};
use common::{
    error::{AppError, Res},
    http::Success,
    jwt::JwtClaims,
    storage::FileStore,
    upload::FormData,
};
use db::repo::Store;
use notifier::Notifier;
use uuid::Uuid;

use crate::{
    dtos::message::{
        ClearThreadResponse, DeleteMessageResponse, EditMessageRequest, SendMessage, ThreadQuery,
    },
    services,
};

/// Sends a general message.
///
/// # Input
/// Multipart form with `content`, `files` parts and, for admins, the
/// `recipient_id` of the client. Clients always write to the admin desk.
///
/// # Output
/// - Success: 201 with the stored message
/// - Error: 400 when both content and files are missing or a file type is not allowed,
///   404 when the recipient or admin does not exist
///
/// # Frontend Example
/// ```javascript
/// const form = new FormData();
/// form.append('content', 'Hello');
/// form.append('files', fileInput.files[0]);
/// await fetch('/api/dashboard/messages', {
///   method: 'POST',
///   headers: { 'Authorization': `Bearer ${token}` },
///   body: form
/// });
/// ```
#[post("")]
pub async fn post_message(
    claims: web::ReqData<JwtClaims>,
    payload: Multipart,
    store: web::Data<Arc<dyn Store>>,
    files: web::Data<FileStore>,
    notifier: web::Data<Notifier>,
) -> Res<impl Responder> {
    let mut form = FormData::read(payload).await?;
    let recipient_id = form
        .text("recipient_id")
        .map(|id| {
            id.parse::<Uuid>()
                .map_err(|_| AppError::Validation("Invalid recipient_id".to_string()))
        })
        .transpose()?;

    let req = SendMessage {
        job_id: None,
        recipient_id,
        content: form.text("content").map(str::to_string),
        files: form.take_files("files"),
        completed_files: Vec::new(),
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

/// Lists the caller's thread. Admins select the client with `?client_id=`.
#[get("")]
pub async fn get_messages(
    claims: web::ReqData<JwtClaims>,
    query: web::Query<ThreadQuery>,
    store: web::Data<Arc<dyn Store>>,
) -> Res<impl Responder> {
    let messages =
        services::message::list(store.get_ref().as_ref(), claims.user_id, None, query.client_id)
            .await?;
    Success::ok(messages)
}

/// Changes the text of a message. Only the sender may edit.
#[put("/{message_id}")]
pub async fn put_message(
    claims: web::ReqData<JwtClaims>,
    path: web::Path<i64>,
    req: web::Json<EditMessageRequest>,
    store: web::Data<Arc<dyn Store>>,
    notifier: web::Data<Notifier>,
) -> Res<impl Responder> {
    let message = services::message::edit(
        store.get_ref().as_ref(),
        notifier.get_ref(),
        claims.user_id,
        path.into_inner(),
        &req.content,
    )
    .await?;
    Success::ok(message)
}

/// Deletes a message for the caller's side.
///
/// # Output
/// - Success: `{ "id": 12, "outcome": "hidden" | "purged" | "gone" }`
/// - Error: 403 unless the caller sent the message or is an admin
#[delete("/{message_id}")]
pub async fn delete_message(
    claims: web::ReqData<JwtClaims>,
    path: web::Path<i64>,
    store: web::Data<Arc<dyn Store>>,
    notifier: web::Data<Notifier>,
) -> Res<impl Responder> {
    let id = path.into_inner();
    let outcome = services::message::delete(
        store.get_ref().as_ref(),
        notifier.get_ref(),
        claims.user_id,
        id,
    )
    .await?;
    Success::ok(DeleteMessageResponse { id, outcome })
}

#[post("/clear")]
pub async fn post_clear(
    claims: web::ReqData<JwtClaims>,
    query: web::Query<ThreadQuery>,
    store: web::Data<Arc<dyn Store>>,
    notifier: web::Data<Notifier>,
) -> Res<impl Responder> {
    let cleared = services::message::clear(
        store.get_ref().as_ref(),
        notifier.get_ref(),
        claims.user_id,
        query.client_id,
    )
    .await?;
    Success::ok(ClearThreadResponse { cleared })
}
