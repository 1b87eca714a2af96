use async_trait::async_trait;
use chrono::Utc;
use common::{
    env_config::MailConfig,
    error::{AppError, Res},
};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mail {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, mail: &Mail) -> Res<()>;
}

/// Writes mails to the log. Used when no relay is configured.
pub struct LogMailer;

#[async_trait]
impl MailSender for LogMailer {
    async fn send(&self, mail: &Mail) -> Res<()> {
        log::info!("Mail to {}: {}", mail.to.join(", "), mail.subject);
        log::debug!("{}", mail.body);
        Ok(())
    }
}

/// Posts mails as JSON to an HTTP relay.
pub struct HttpMailer {
    client: reqwest::Client,
    url: String,
    api_key: String,
    from: String,
}

#[derive(Serialize)]
struct RelayPayload<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    text: &'a str,
}

impl HttpMailer {
    pub fn new(url: &str, api_key: &str, from: &str) -> Self {
        HttpMailer {
            client: reqwest::Client::new(),
            url: url.to_string(),
            api_key: api_key.to_string(),
            from: from.to_string(),
        }
    }
}

#[async_trait]
impl MailSender for HttpMailer {
    async fn send(&self, mail: &Mail) -> Res<()> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&RelayPayload {
                from: &self.from,
                to: &mail.to,
                subject: &mail.subject,
                text: &mail.body,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Internal(format!(
                "Mail relay answered {}",
                response.status()
            )));
        }
        Ok(())
    }
}

pub fn mailer_from_config(config: &MailConfig) -> Box<dyn MailSender> {
    match &config.api_url {
        Some(url) => Box::new(HttpMailer::new(url, &config.api_key, &config.from)),
        None => {
            log::warn!("MAIL_API_URL not set, mails will only be logged");
            Box::new(LogMailer)
        }
    }
}

/// Keeps every mail in memory.
#[cfg(any(test, feature = "memory"))]
#[derive(Default)]
pub struct MemoryMailer {
    sent: std::sync::Mutex<Vec<Mail>>,
    fail: std::sync::atomic::AtomicBool,
}

#[cfg(any(test, feature = "memory"))]
impl MemoryMailer {
    pub fn sent(&self) -> Vec<Mail> {
        self.sent.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(any(test, feature = "memory"))]
#[async_trait]
impl MailSender for MemoryMailer {
    async fn send(&self, mail: &Mail) -> Res<()> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(AppError::Internal("mail relay down".to_string()));
        }
        self.sent
            .lock()
            .map_err(|_| AppError::Internal("mailer poisoned".to_string()))?
            .push(mail.clone());
        Ok(())
    }
}

/// Payment leg a mail is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentLeg {
    Upfront,
    Completion,
}

impl PaymentLeg {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentLeg::Upfront => "Upfront",
            PaymentLeg::Completion => "Completion",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Pending,
    Successful,
    Failed,
}

impl PaymentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentOutcome::Pending => "Pending",
            PaymentOutcome::Successful => "Successful",
            PaymentOutcome::Failed => "Failed",
        }
    }
}

/// Details rendered into a payment mail. `job_id` is empty when the job
/// could not be created.
pub struct PaymentNotice<'a> {
    pub job_id: Option<i64>,
    pub title: &'a str,
    pub leg: PaymentLeg,
    pub outcome: PaymentOutcome,
    pub amount: f64,
    pub currency: &'a str,
    pub tracking_id: Option<&'a str>,
}

pub fn payment_mail(to: Vec<String>, notice: &PaymentNotice) -> Mail {
    let job = notice
        .job_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "N/A".to_string());
    Mail {
        to,
        subject: format!("Payment {} for Job #{}", notice.outcome.as_str(), job),
        body: format!(
            "Job ID: {}\nTitle: {}\nPayment Type: {}\nAmount: {:.2} {}\nStatus: {}\nOrder Tracking ID: {}\nDate: {}\n",
            job,
            notice.title,
            notice.leg.as_str(),
            notice.amount,
            notice.currency,
            notice.outcome.as_str(),
            notice.tracking_id.unwrap_or("N/A"),
            Utc::now().format("%Y-%m-%d %H:%M:%S")
        ),
    }
}

pub fn password_reset_mail(to: &str, name: &str, link: &str, ttl_minutes: i64) -> Mail {
    Mail {
        to: vec![to.to_string()],
        subject: "Password reset request".to_string(),
        body: format!(
            "Dear {},\n\nYou have requested to reset your password.\n\nOpen the following link to choose a new one:\n{}\n\nThe link expires in {} minutes. If you did not request this, ignore this mail.\n",
            name, link, ttl_minutes
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_mail_without_job() {
        let mail = payment_mail(
            vec!["client@example.com".to_string()],
            &PaymentNotice {
                job_id: None,
                title: "Untitled",
                leg: PaymentLeg::Upfront,
                outcome: PaymentOutcome::Failed,
                amount: 4.5,
                currency: "USD",
                tracking_id: None,
            },
        );

        assert_eq!(mail.subject, "Payment Failed for Job #N/A");
        assert!(mail.body.contains("Amount: 4.50 USD"));
        assert!(mail.body.contains("Order Tracking ID: N/A"));
    }

    #[tokio::test]
    async fn memory_mailer_can_fail() {
        let mailer = MemoryMailer::default();
        let mail = password_reset_mail("a@example.com", "Ann", "http://x/reset?token=t", 60);

        mailer.send(&mail).await.unwrap();
        mailer.fail_sends(true);
        assert!(mailer.send(&mail).await.is_err());
        assert_eq!(mailer.sent(), vec![mail]);
    }
}
