use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};

use async_trait::async_trait;
use common::error::{AppError, Res};

use super::{OrderRequest, PaymentGateway, StatusSnapshot, SubmittedOrder, TransactionStatus};

/// Scriptable gateway that counts calls.
#[derive(Default)]
pub struct MockGateway {
    pub token_calls: AtomicU32,
    pub ipn_calls: AtomicU32,
    pub order_calls: AtomicU32,
    pub status_calls: AtomicU32,
    /// Token requests fail while this is above zero.
    pub token_failures: AtomicU32,
    pub fail_orders: AtomicBool,
    pub orders: Mutex<Vec<OrderRequest>>,
    status: Mutex<Option<TransactionStatus>>,
    /// Per-order overrides of `status`.
    order_status: Mutex<HashMap<String, TransactionStatus>>,
}

impl MockGateway {
    pub fn set_status(&self, status: TransactionStatus) {
        if let Ok(mut current) = self.status.lock() {
            *current = Some(status);
        }
    }

    pub fn set_order_status(&self, tracking_id: &str, status: TransactionStatus) {
        if let Ok(mut statuses) = self.order_status.lock() {
            statuses.insert(tracking_id.to_string(), status);
        }
    }

    pub fn calls(&self) -> u32 {
        self.token_calls.load(Ordering::SeqCst)
            + self.ipn_calls.load(Ordering::SeqCst)
            + self.order_calls.load(Ordering::SeqCst)
            + self.status_calls.load(Ordering::SeqCst)
    }

    pub fn last_order(&self) -> Option<OrderRequest> {
        self.orders.lock().ok()?.last().cloned()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn access_token(&self) -> Res<String> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        let pending = self.token_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.token_failures.store(pending - 1, Ordering::SeqCst);
            return Err(AppError::PaymentGateway("token endpoint busy".to_string()));
        }
        Ok("token".to_string())
    }

    async fn register_ipn(&self, _token: &str, _url: &str) -> Res<String> {
        let n = self.ipn_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("ipn-{}", n + 1))
    }

    async fn submit_order(&self, _token: &str, order: &OrderRequest) -> Res<SubmittedOrder> {
        let n = self.order_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(AppError::PaymentGateway("order rejected".to_string()));
        }
        if let Ok(mut orders) = self.orders.lock() {
            orders.push(order.clone());
        }
        Ok(SubmittedOrder {
            tracking_id: format!("track-{}", n + 1),
            redirect_url: format!("https://pay.example/{}", order.merchant_reference),
        })
    }

    async fn transaction_status(&self, _token: &str, tracking_id: &str) -> Res<StatusSnapshot> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let status = self
            .order_status
            .lock()
            .ok()
            .and_then(|s| s.get(tracking_id).copied())
            .or_else(|| self.status.lock().ok().and_then(|s| *s))
            .unwrap_or(TransactionStatus::Pending);
        Ok(StatusSnapshot {
            payment_status: status,
            confirmation_code: Some("CONF".to_string()),
            amount: None,
            currency: Some("USD".to_string()),
            payment_method: Some("Mpesa".to_string()),
        })
    }
}
