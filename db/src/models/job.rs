use chrono::{DateTime, Utc};
use common::misc::{PaymentStatus, STATUS_COMPLETED};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub client_id: Uuid,
    pub subject: String,
    pub title: String,
    pub instructions: String,
    pub pages: i32,
    pub deadline: DateTime<Utc>,
    pub cited_resources: i32,
    pub formatting_style: String,
    pub writer_level: String,
    pub spacing: String,
    pub total_amount: f64,
    pub upfront_amount: f64,
    pub status: String,
    pub completed: bool,
    pub payment_status: String,
    pub upfront_tracking_id: Option<String>,
    pub upfront_reference: Option<String>,
    pub completion_tracking_id: Option<String>,
    pub completion_reference: Option<String>,
    pub files: Vec<String>,
    pub completed_files: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Rows only ever hold the three labels the schema allows.
    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status.parse().unwrap_or(PaymentStatus::Pending)
    }

    pub fn remaining_amount(&self) -> f64 {
        ((self.total_amount - self.upfront_amount) * 100.0).round() / 100.0
    }

    pub fn is_delivered(&self) -> bool {
        self.completed || self.status == STATUS_COMPLETED
    }
}
