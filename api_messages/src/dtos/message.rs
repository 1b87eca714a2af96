use common::upload::Upload;
use db::dtos::message::DeleteOutcome;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A message as received from a multipart form.
#[derive(Debug, Default)]
pub struct SendMessage {
    pub job_id: Option<i64>,
    /// Only read for general messages written by an admin.
    pub recipient_id: Option<Uuid>,
    pub content: Option<String>,
    /// Plain uploads. On a job these extend the client's inputs.
    pub files: Vec<Upload>,
    /// Deliverables, only read on a job message written by an admin.
    pub completed_files: Vec<Upload>,
}

#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ThreadQuery {
    pub client_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct DeleteMessageResponse {
    pub id: i64,
    pub outcome: DeleteOutcome,
}

#[derive(Debug, Serialize)]
pub struct ClearThreadResponse {
    pub cleared: u64,
}
