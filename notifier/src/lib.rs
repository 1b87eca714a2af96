use std::sync::Arc;

use actix_web::web;

pub mod events;
pub mod mail;

pub mod routes {
    pub mod events;
}

use events::{Broadcaster, LiveEvent};
use mail::{Mail, MailSender, PaymentNotice};

/// Outgoing side effects of the services: mails and live events.
/// Neither may fail the operation that triggered it.
#[derive(Clone)]
pub struct Notifier {
    mailer: Arc<dyn MailSender>,
    events: Broadcaster,
    notify_email: Option<String>,
}

impl Notifier {
    pub fn new(
        mailer: Arc<dyn MailSender>,
        events: Broadcaster,
        notify_email: Option<String>,
    ) -> Self {
        Notifier {
            mailer,
            events,
            notify_email,
        }
    }

    pub fn events(&self) -> &Broadcaster {
        &self.events
    }

    pub fn publish(&self, event: LiveEvent) {
        self.events.publish(event);
    }

    pub async fn send(&self, mail: Mail) {
        match self.mailer.send(&mail).await {
            Ok(()) => log::info!("Mail sent to {}", mail.to.join(", ")),
            Err(e) => log::error!("Failed to send mail '{}': {}", mail.subject, e),
        }
    }

    /// Payment mails go to the client, with the operator address in copy.
    pub async fn payment(&self, client_email: &str, notice: PaymentNotice<'_>) {
        let mut to = vec![client_email.to_string()];
        if let Some(operator) = &self.notify_email {
            to.push(operator.clone());
        }
        self.send(mail::payment_mail(to, &notice)).await;
    }
}

pub fn mount_events() -> actix_web::Scope {
    web::scope("/events").service(routes::events::get_events)
}
