use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct JobCreateRequest {
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
}

/// A settled payment, applied only if the job is still in the source state
/// and the tracking id matches the order recorded for that phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentTransition {
    /// Pending -> Partial, job moves to "In Progress".
    UpfrontSettled,
    /// Partial -> Completed.
    CompletionSettled,
}
