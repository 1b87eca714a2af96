use common::misc::Role;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Change pushed to connected dashboards. Every event belongs to the thread
/// or jobs of one client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveEvent {
    MessageCreated {
        client_id: Uuid,
        message_id: i64,
        job_id: Option<i64>,
    },
    MessageUpdated {
        client_id: Uuid,
        message_id: i64,
    },
    /// `message_id` is empty when the whole thread was cleared.
    MessageDeleted {
        client_id: Uuid,
        message_id: Option<i64>,
    },
    JobCreated {
        client_id: Uuid,
        job_id: i64,
    },
    JobUpdated {
        client_id: Uuid,
        job_id: i64,
        status: String,
        payment_status: String,
    },
}

impl LiveEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LiveEvent::MessageCreated { .. } => "message.created",
            LiveEvent::MessageUpdated { .. } => "message.updated",
            LiveEvent::MessageDeleted { .. } => "message.deleted",
            LiveEvent::JobCreated { .. } => "job.created",
            LiveEvent::JobUpdated { .. } => "job.updated",
        }
    }

    pub fn client_id(&self) -> Uuid {
        match self {
            LiveEvent::MessageCreated { client_id, .. }
            | LiveEvent::MessageUpdated { client_id, .. }
            | LiveEvent::MessageDeleted { client_id, .. }
            | LiveEvent::JobCreated { client_id, .. }
            | LiveEvent::JobUpdated { client_id, .. } => *client_id,
        }
    }

    /// Admins see every event, clients only their own.
    pub fn visible_to(&self, user_id: Uuid, role: Role) -> bool {
        role.is_admin() || self.client_id() == user_id
    }

    /// Server-sent events frame.
    pub fn to_frame(&self) -> Option<String> {
        let data = serde_json::to_string(self).ok()?;
        Some(format!("event: {}\ndata: {}\n\n", self.name(), data))
    }
}

/// Fan-out of live events to every open stream.
#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<LiveEvent>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Broadcaster { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: LiveEvent) {
        // no open stream is not an error
        let receivers = self.tx.send(event.clone()).unwrap_or(0);
        log::debug!("Published {} to {} stream(s)", event.name(), receivers);
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Broadcaster::new(256)
    }
}
