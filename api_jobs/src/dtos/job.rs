use db::models::{job::Job, message::Message};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub job: Job,
    pub client_name: String,
    pub client_email: String,
    pub messages: Vec<Message>,
    /// Inputs, deliverables and message attachments, without duplicates.
    pub all_files: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: String,
}
