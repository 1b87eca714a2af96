use async_trait::async_trait;
use common::error::{AppError, Res};
use stripe::{
    CheckoutSession, CheckoutSessionId, CheckoutSessionMode, CheckoutSessionPaymentStatus,
    CheckoutSessionStatus, Client, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionLineItemsPriceData, CreateCheckoutSessionLineItemsPriceDataProductData,
    Currency, Event, EventObject, EventType, Webhook,
};

use super::{OrderRequest, PaymentGateway, StatusSnapshot, SubmittedOrder, TransactionStatus};

fn stripe_error(context: &str, e: impl std::fmt::Display) -> AppError {
    AppError::PaymentGateway(format!("{}: {}", context, e))
}

/// Stripe Checkout as a gateway. Stripe authenticates with the secret key and
/// reports through the dashboard configured webhook, so the token and IPN
/// steps are local.
pub struct StripeCheckout {
    client: Client,
}

impl StripeCheckout {
    pub fn new(secret_key: &str) -> Self {
        StripeCheckout {
            client: Client::new(secret_key),
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeCheckout {
    fn name(&self) -> &'static str {
        "stripe"
    }

    async fn access_token(&self) -> Res<String> {
        Ok(String::new())
    }

    async fn register_ipn(&self, _token: &str, url: &str) -> Res<String> {
        Ok(format!("stripe:{}", url))
    }

    async fn submit_order(&self, _token: &str, order: &OrderRequest) -> Res<SubmittedOrder> {
        let currency = order
            .currency
            .to_lowercase()
            .parse::<Currency>()
            .map_err(|e| AppError::Validation(format!("Unsupported currency: {}", e)))?;

        let params = CreateCheckoutSession {
            mode: Some(CheckoutSessionMode::Payment),
            client_reference_id: Some(order.merchant_reference.as_str()),
            customer_email: Some(order.billing.email_address.as_str()),
            success_url: Some(order.callback_url.as_str()),
            cancel_url: Some(order.callback_url.as_str()),
            line_items: Some(vec![CreateCheckoutSessionLineItems {
                price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                    currency,
                    product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                        name: order.description.clone(),
                        ..Default::default()
                    }),
                    unit_amount: Some((order.amount * 100.0).round() as i64),
                    ..Default::default()
                }),
                quantity: Some(1),
                ..Default::default()
            }]),
            ..Default::default()
        };

        let session = CheckoutSession::create(&self.client, params)
            .await
            .map_err(|e| stripe_error("checkout session", e))?;
        let redirect_url = session
            .url
            .ok_or_else(|| stripe_error("checkout session", "no url in response"))?;
        Ok(SubmittedOrder {
            tracking_id: session.id.to_string(),
            redirect_url,
        })
    }

    async fn transaction_status(&self, _token: &str, tracking_id: &str) -> Res<StatusSnapshot> {
        let id = tracking_id
            .parse::<CheckoutSessionId>()
            .map_err(|e| AppError::Validation(format!("Invalid session id {}: {}", tracking_id, e)))?;
        let session = CheckoutSession::retrieve(&self.client, &id, &[])
            .await
            .map_err(|e| stripe_error("session lookup", e))?;

        let payment_status = match (session.payment_status, session.status) {
            (CheckoutSessionPaymentStatus::Paid, _) => TransactionStatus::Completed,
            (_, Some(CheckoutSessionStatus::Expired)) => TransactionStatus::Failed,
            _ => TransactionStatus::Pending,
        };
        Ok(StatusSnapshot {
            payment_status,
            confirmation_code: session.payment_intent.map(|pi| pi.id().to_string()),
            amount: session.amount_total.map(|cents| cents as f64 / 100.0),
            currency: session.currency.map(|c| c.to_string().to_uppercase()),
            payment_method: Some("card".to_string()),
        })
    }
}

/// Checkout session id and merchant reference carried by a webhook event,
/// `None` for events that do not concern a checkout.
pub fn checkout_reference(
    payload: &str,
    signature: &str,
    webhook_secret: &str,
) -> Res<Option<(String, Option<String>)>> {
    let event: Event = Webhook::construct_event(payload, signature, webhook_secret)
        .map_err(|e| AppError::Validation(format!("Webhook error: {}", e)))?;
    log::info!("Stripe event {} received", event.type_);

    match event.type_ {
        EventType::CheckoutSessionCompleted
        | EventType::CheckoutSessionAsyncPaymentSucceeded
        | EventType::CheckoutSessionAsyncPaymentFailed
        | EventType::CheckoutSessionExpired => match event.data.object {
            EventObject::CheckoutSession(session) => {
                Ok(Some((session.id.to_string(), session.client_reference_id)))
            }
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}
