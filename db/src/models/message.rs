use chrono::{DateTime, Utc};
use common::misc::Role;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    /// Job the message was sent about. Metadata only, threads are not split by job.
    pub job_id: Option<i64>,
    pub sender_id: Uuid,
    /// Role of the sender when the message was written.
    pub sender_role: String,
    pub recipient_id: Uuid,
    pub content: Option<String>,
    pub files: Vec<String>,
    pub client_deleted: bool,
    pub admin_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn hidden_for(&self, side: Role) -> bool {
        match side {
            Role::Client => self.client_deleted,
            Role::Admin => self.admin_deleted,
        }
    }

    /// The participant on the client side of the thread.
    pub fn client_id(&self) -> Uuid {
        if self.sender_role == Role::Admin.as_str() {
            self.recipient_id
        } else {
            self.sender_id
        }
    }
}
