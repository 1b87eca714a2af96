use async_trait::async_trait;
use common::error::Res;
use serde::Serialize;

pub mod pesapal;
pub mod stripe_checkout;

#[cfg(test)]
pub mod mock;

#[derive(Debug, Clone, Serialize)]
pub struct BillingAddress {
    pub email_address: String,
    pub phone_number: String,
    pub country_code: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub merchant_reference: String,
    pub amount: f64,
    pub currency: String,
    pub description: String,
    pub callback_url: String,
    /// Notification subscription the gateway reports this order to.
    pub notification_id: String,
    pub billing: BillingAddress,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmittedOrder {
    pub tracking_id: String,
    pub redirect_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Invalid,
    Reversed,
}

impl TransactionStatus {
    pub fn from_description(description: &str) -> Self {
        match description.trim().to_lowercase().as_str() {
            "completed" => TransactionStatus::Completed,
            "failed" => TransactionStatus::Failed,
            "invalid" => TransactionStatus::Invalid,
            "reversed" => TransactionStatus::Reversed,
            _ => TransactionStatus::Pending,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, TransactionStatus::Failed | TransactionStatus::Invalid)
    }
}

/// Authoritative state of one order as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub payment_status: TransactionStatus,
    pub confirmation_code: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub payment_method: Option<String>,
}

/// Hosted checkout provider.
///
/// Token and IPN calls may be retried by the caller. Order submission and
/// status queries are single attempts.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    async fn access_token(&self) -> Res<String>;

    /// Subscribes `url` to order notifications and returns the subscription id.
    async fn register_ipn(&self, token: &str, url: &str) -> Res<String>;

    async fn submit_order(&self, token: &str, order: &OrderRequest) -> Res<SubmittedOrder>;

    async fn transaction_status(&self, token: &str, tracking_id: &str) -> Res<StatusSnapshot>;
}
