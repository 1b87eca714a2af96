use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ResetToken {
    pub token: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct IpnRegistration {
    pub id: i64,
    pub ipn_id: String,
    pub url: String,
    pub ipn_status: String,
    pub created_at: DateTime<Utc>,
}
