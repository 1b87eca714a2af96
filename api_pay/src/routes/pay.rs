use actix_multipart::Multipart;
use actix_web::{Responder, get, post, web};
use common::{error::Res, http::Success, jwt::JwtClaims, upload::FormData};

use crate::{
    dtos::pay::{CompletionRequest, JobDraft},
    services::{self, pay::PayContext},
};

/// Submits a new job and opens the checkout for its upfront share.
///
/// # Input
/// Multipart form with `subject`, `title`, `instructions`, `pages`, `deadline`,
/// `writerLevel`, `totalAmount` and the optional `citedResources`,
/// `formattingStyle`, `spacing`, `phone_number`, `country_code` and `files` parts.
///
/// # Output
/// - Success: 200 with `redirect_url`, `order_tracking_id` and `job_id`
/// - Error: 400 when the total does not match the quote or a field is invalid,
///   403 for admins, 502 when the gateway rejects the order
///
/// # Frontend Example
/// ```javascript
/// const form = new FormData(jobForm);
/// const res = await fetch('/api/dashboard/pay/initiate-upfront', {
///   method: 'POST',
///   headers: { 'Authorization': `Bearer ${token}` },
///   body: form
/// });
/// const { redirect_url } = await res.json();
/// window.location.href = redirect_url;
/// ```
#[post("/initiate-upfront")]
pub async fn post_initiate_upfront(
    claims: web::ReqData<JwtClaims>,
    payload: Multipart,
    ctx: web::Data<PayContext>,
) -> Res<impl Responder> {
    let form = FormData::read(payload).await?;
    let draft = JobDraft::from_form(form)?;
    let checkout = services::pay::initiate_upfront(ctx.get_ref(), claims.user_id, draft).await?;
    Success::ok(checkout)
}

/// Opens the checkout for the remaining amount of a job.
///
/// # Input
/// JSON body `{ "job_id": 42 }`. Allowed for admins and the job's owner.
///
/// # Output
/// - Success: 200 with the checkout redirect
/// - Error: 400 unless the upfront share is settled and the rest is unpaid
#[post("/initiate-completion")]
pub async fn post_initiate_completion(
    claims: web::ReqData<JwtClaims>,
    req: web::Json<CompletionRequest>,
    ctx: web::Data<PayContext>,
) -> Res<impl Responder> {
    let checkout =
        services::pay::initiate_completion(ctx.get_ref(), claims.user_id, req.job_id).await?;
    Success::ok(checkout)
}

/// Gateway status of one of the caller's orders.
#[get("/status/{tracking_id}")]
pub async fn get_status(
    claims: web::ReqData<JwtClaims>,
    path: web::Path<String>,
    ctx: web::Data<PayContext>,
) -> Res<impl Responder> {
    let snapshot = services::pay::get_status(ctx.get_ref(), claims.user_id, &path).await?;
    Success::ok(snapshot)
}

/// Registers the notification url with the gateway. Admins only.
#[post("/register-ipn")]
pub async fn post_register_ipn(
    claims: web::ReqData<JwtClaims>,
    ctx: web::Data<PayContext>,
) -> Res<impl Responder> {
    let registration = services::pay::register_ipn(ctx.get_ref(), claims.user_id).await?;
    Success::ok(registration)
}
