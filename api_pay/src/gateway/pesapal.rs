use std::time::Duration;

use async_trait::async_trait;
use common::{
    env_config::PesapalConfig,
    error::{AppError, Res},
};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};

use super::{OrderRequest, PaymentGateway, StatusSnapshot, SubmittedOrder, TransactionStatus};

/// Pesapal API v3 client.
pub struct PesapalClient {
    http: reqwest::Client,
    base_url: String,
    consumer_key: String,
    consumer_secret: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
    error: Option<Value>,
}

#[derive(Deserialize)]
struct IpnResponse {
    ipn_id: Option<String>,
    status: Option<String>,
    error: Option<Value>,
}

#[derive(Deserialize)]
struct OrderResponse {
    order_tracking_id: Option<String>,
    redirect_url: Option<String>,
    error: Option<Value>,
}

#[derive(Deserialize)]
struct StatusResponse {
    payment_status_description: Option<String>,
    confirmation_code: Option<String>,
    amount: Option<f64>,
    currency: Option<String>,
    payment_method: Option<String>,
    error: Option<Value>,
}

fn gateway_error(context: &str, detail: impl std::fmt::Display) -> AppError {
    AppError::PaymentGateway(format!("{}: {}", context, detail))
}

fn rejected(context: &str, detail: impl std::fmt::Display) -> AppError {
    AppError::PaymentRejected(format!("{}: {}", context, detail))
}

/// Pesapal reports failures in an `error` object next to a 200 answer.
fn reject_error(context: &str, error: &Option<Value>) -> Res<()> {
    match error {
        Some(Value::Null) | None => Ok(()),
        Some(e) => {
            let message = e
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| e.to_string());
            Err(rejected(context, message))
        }
    }
}

impl PesapalClient {
    pub fn new(config: &PesapalConfig, timeout: Duration) -> Res<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(PesapalClient {
            http,
            base_url: config.environment.base_url().to_string(),
            consumer_key: config.consumer_key.clone(),
            consumer_secret: config.consumer_secret.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn read<T: DeserializeOwned>(context: &str, response: reqwest::Response) -> Res<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = format!("HTTP {}: {}", status, body);
            // 4xx other than throttling means the request itself was refused
            if status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(rejected(context, detail));
            }
            return Err(gateway_error(context, detail));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| gateway_error(context, e))
    }
}

#[async_trait]
impl PaymentGateway for PesapalClient {
    fn name(&self) -> &'static str {
        "pesapal"
    }

    async fn access_token(&self) -> Res<String> {
        let response = self
            .http
            .post(self.url("Auth/RequestToken"))
            .header("Accept", "application/json")
            .json(&json!({
                "consumer_key": self.consumer_key,
                "consumer_secret": self.consumer_secret,
            }))
            .send()
            .await
            .map_err(|e| gateway_error("token request", e))?;

        let body: TokenResponse = Self::read("token request", response).await?;
        reject_error("token request", &body.error)?;
        body.token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| gateway_error("token request", "no token in response"))
    }

    async fn register_ipn(&self, token: &str, url: &str) -> Res<String> {
        let response = self
            .http
            .post(self.url("URLSetup/RegisterIPN"))
            .bearer_auth(token)
            .header("Accept", "application/json")
            .json(&json!({ "url": url, "ipn_notification_type": "GET" }))
            .send()
            .await
            .map_err(|e| gateway_error("IPN registration", e))?;

        let body: IpnResponse = Self::read("IPN registration", response).await?;
        reject_error("IPN registration", &body.error)?;
        if body.status.as_deref() != Some("200") {
            return Err(gateway_error(
                "IPN registration",
                format!("status {}", body.status.unwrap_or_default()),
            ));
        }
        body.ipn_id
            .ok_or_else(|| gateway_error("IPN registration", "no ipn_id in response"))
    }

    async fn submit_order(&self, token: &str, order: &OrderRequest) -> Res<SubmittedOrder> {
        let response = self
            .http
            .post(self.url("Transactions/SubmitOrderRequest"))
            .bearer_auth(token)
            .header("Accept", "application/json")
            .json(&json!({
                "id": order.merchant_reference,
                "currency": order.currency,
                "amount": order.amount,
                "description": order.description,
                "callback_url": order.callback_url,
                "notification_id": order.notification_id,
                "billing_address": order.billing,
            }))
            .send()
            .await
            .map_err(|e| gateway_error("order submission", e))?;

        let body: OrderResponse = Self::read("order submission", response).await?;
        reject_error("order submission", &body.error)?;
        match (body.order_tracking_id, body.redirect_url) {
            (Some(tracking_id), Some(redirect_url)) => Ok(SubmittedOrder {
                tracking_id,
                redirect_url,
            }),
            _ => Err(gateway_error(
                "order submission",
                "response without tracking id or redirect url",
            )),
        }
    }

    async fn transaction_status(&self, token: &str, tracking_id: &str) -> Res<StatusSnapshot> {
        let response = self
            .http
            .get(self.url("Transactions/GetTransactionStatus"))
            .query(&[("orderTrackingId", tracking_id)])
            .bearer_auth(token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| gateway_error("status query", e))?;

        let body: StatusResponse = Self::read("status query", response).await?;
        reject_error("status query", &body.error)?;
        Ok(StatusSnapshot {
            payment_status: TransactionStatus::from_description(
                body.payment_status_description.as_deref().unwrap_or_default(),
            ),
            confirmation_code: body.confirmation_code,
            amount: body.amount,
            currency: body.currency,
            payment_method: body.payment_method,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_error_objects_are_ignored() {
        assert!(reject_error("x", &None).is_ok());
        assert!(reject_error("x", &Some(Value::Null)).is_ok());

        let err = reject_error(
            "order submission",
            &Some(json!({ "code": "invalid_amount", "message": "Amount too low" })),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Payment gateway rejected the request: order submission: Amount too low"
        );
        assert!(!err.is_transient());
    }

    #[test]
    fn status_descriptions() {
        assert_eq!(
            TransactionStatus::from_description("Completed"),
            TransactionStatus::Completed
        );
        assert!(TransactionStatus::from_description("INVALID").is_failure());
        assert_eq!(
            TransactionStatus::from_description(""),
            TransactionStatus::Pending
        );
    }
}
