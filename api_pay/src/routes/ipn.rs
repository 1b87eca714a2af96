use std::sync::Arc;

use actix_web::{HttpRequest, HttpResponse, Responder, get, post, web};
use common::{
    env_config::Config,
    error::{AppError, Res},
    http::Success,
};

use crate::{
    dtos::pay::{IpnAck, IpnNotification},
    gateway::stripe_checkout,
    services::{
        self,
        pay::{IPN_CHANGE, Notification, PayContext},
    },
};

/// Reconciles the job and answers in the shape the gateway expects. The
/// gateway retries on anything but a 200, so failures are reported in the
/// body only.
async fn acknowledge(ctx: &PayContext, ipn: IpnNotification) -> HttpResponse {
    let notification = Notification {
        tracking_id: ipn.order_tracking_id.clone().unwrap_or_default(),
        merchant_reference: ipn.order_merchant_reference.clone(),
        notification_type: ipn.order_notification_type.clone().unwrap_or_default(),
    };
    let status = match services::pay::handle_webhook(ctx, notification).await {
        Ok(_) => 200,
        Err(e) => {
            log::error!(
                "IPN for {} not processed: {}",
                ipn.order_tracking_id.as_deref().unwrap_or("-"),
                e
            );
            500
        }
    };
    HttpResponse::Ok().json(IpnAck {
        order_notification_type: ipn.order_notification_type,
        order_tracking_id: ipn.order_tracking_id,
        order_merchant_reference: ipn.order_merchant_reference,
        status,
    })
}

/// Payment notification delivered as query parameters.
///
/// # Note
/// Called by the gateway, not by the frontend. The url is registered through
/// `POST /api/dashboard/pay/register-ipn` or on the first checkout.
#[get("/ipn")]
pub async fn get_ipn(
    query: web::Query<IpnNotification>,
    ctx: web::Data<PayContext>,
) -> impl Responder {
    acknowledge(ctx.get_ref(), query.into_inner()).await
}

/// Payment notification delivered as a JSON or form encoded body.
#[post("/ipn")]
pub async fn post_ipn(body: web::Bytes, ctx: web::Data<PayContext>) -> impl Responder {
    let ipn = serde_json::from_slice::<IpnNotification>(&body)
        .ok()
        .or_else(|| {
            std::str::from_utf8(&body)
                .ok()
                .and_then(|raw| web::Query::<IpnNotification>::from_query(raw).ok())
                .map(web::Query::into_inner)
        })
        .unwrap_or_default();
    acknowledge(ctx.get_ref(), ipn).await
}

/// Handles Stripe checkout events when Stripe is the configured gateway.
///
/// # Output
/// - Success: 200 once the event was read, whatever its effect on the job
/// - Error: 400 when the signature is missing or invalid
///
/// # Stripe Configuration Example
/// 1. Go to Stripe Dashboard → Developers → Webhooks
/// 2. Add Endpoint: https://yourapp.com/api/pay/stripe/webhook
/// 3. Select checkout.session.completed, checkout.session.expired and the async payment events
/// 4. Set the signing secret as STRIPE_WEBHOOK_SECRET
#[post("/stripe/webhook")]
pub async fn post_stripe_webhook(
    payload: String,
    req: HttpRequest,
    config: web::Data<Arc<Config>>,
    ctx: web::Data<PayContext>,
) -> Res<impl Responder> {
    let signature = match req.headers().get("stripe-signature") {
        Some(signature) => signature.to_str().unwrap_or(""),
        None => {
            return Err(AppError::Validation(
                "Stripe signature missing".to_string(),
            ));
        }
    };

    let Some((session_id, reference)) =
        stripe_checkout::checkout_reference(&payload, signature, &config.stripe_webhook_secret)?
    else {
        return Success::message("Event ignored");
    };

    let notification = Notification {
        tracking_id: session_id,
        merchant_reference: reference,
        notification_type: IPN_CHANGE.to_string(),
    };
    if let Err(e) = services::pay::handle_webhook(ctx.get_ref(), notification).await {
        log::error!("Stripe event not processed: {}", e);
    }
    Success::message("Webhook processed")
}
