use common::misc::Role;
use serde::Serialize;
use uuid::Uuid;

pub struct MessageCreateRequest {
    pub job_id: Option<i64>,
    pub sender_id: Uuid,
    pub sender_role: Role,
    pub recipient_id: Uuid,
    pub content: Option<String>,
    pub files: Vec<String>,
}

/// Participants of a conversation: one client and the admin side.
/// A message belongs to the thread when it goes from the client to any of
/// the admins or from any of the admins to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadKey {
    pub client_id: Uuid,
    pub admin_ids: Vec<Uuid>,
}

impl ThreadKey {
    pub fn contains(&self, sender_id: Uuid, recipient_id: Uuid) -> bool {
        (sender_id == self.client_id && self.admin_ids.contains(&recipient_id))
            || (recipient_id == self.client_id && self.admin_ids.contains(&sender_id))
    }
}

/// Result of setting one side's tombstone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteOutcome {
    /// Hidden for the requester, still visible to the other side.
    Hidden,
    /// Both sides deleted it, the row is gone.
    Purged,
    /// The row had already been removed by a concurrent delete.
    Gone,
}
