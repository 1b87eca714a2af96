use std::{sync::Arc, time::Duration};

use chrono::Utc;
use common::{
    env_config::Config,
    error::{AppError, Res},
    misc::PaymentStatus,
    storage::{FileScope, FileStore, UploadKind},
    upload::Upload,
};
use db::{
    dtos::job::JobCreateRequest,
    models::{job::Job, token::IpnRegistration, user::User},
    repo::{Store, require_job, require_user},
};
use notifier::{
    Notifier,
    events::LiveEvent,
    mail::{PaymentNotice, PaymentOutcome},
};
use uuid::Uuid;

use crate::{
    dtos::pay::{CheckoutResponse, JobDraft},
    gateway::{BillingAddress, OrderRequest, PaymentGateway, StatusSnapshot, TransactionStatus},
    machine::{self, PaymentPhase},
    retry::with_retry,
};

#[derive(Debug, Clone)]
pub struct PaySettings {
    pub upfront_ratio: f64,
    pub currency: String,
    pub ipn_url: String,
    /// Frontend page the gateway sends the payer back to.
    pub callback_url: String,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
}

impl PaySettings {
    pub fn from_config(config: &Config) -> Self {
        PaySettings {
            upfront_ratio: config.payment.upfront_ratio,
            currency: config.payment.currency.clone(),
            ipn_url: config.payment.ipn_url.clone(),
            callback_url: format!("{}/payment-callback", config.frontend_url),
            retry_attempts: config.payment.retry_attempts,
            retry_backoff: Duration::from_millis(config.payment.retry_backoff_ms),
        }
    }
}

/// Everything the payment services need.
pub struct PayContext {
    pub store: Arc<dyn Store>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub notifier: Notifier,
    pub files: FileStore,
    pub settings: PaySettings,
}

/// Result of one notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub job_id: i64,
    pub phase: PaymentPhase,
    pub gateway_status: TransactionStatus,
    /// Whether this notification moved the payment state.
    pub transitioned: bool,
}

/// A gateway notification: who it is about and what kind it is.
#[derive(Debug, Clone)]
pub struct Notification {
    pub tracking_id: String,
    pub merchant_reference: Option<String>,
    pub notification_type: String,
}

pub const IPN_CHANGE: &str = "IPNCHANGE";

impl PayContext {
    fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    async fn token(&self) -> Res<String> {
        with_retry(
            "Gateway token",
            self.settings.retry_attempts,
            self.settings.retry_backoff,
            || self.gateway.access_token(),
        )
        .await
    }

    async fn register(&self, token: &str) -> Res<IpnRegistration> {
        let url = self.settings.ipn_url.as_str();
        let ipn_id = with_retry(
            "IPN registration",
            self.settings.retry_attempts,
            self.settings.retry_backoff,
            || self.gateway.register_ipn(token, url),
        )
        .await?;
        let registration = self.store().save_ipn(&ipn_id, url).await?;
        log::info!("IPN {} registered for {}", registration.ipn_id, url);
        Ok(registration)
    }

    /// Stored subscription for the configured IPN url, registered on first use.
    async fn notification_id(&self, token: &str) -> Res<String> {
        match self.store().active_ipn(&self.settings.ipn_url).await? {
            Some(registration) => Ok(registration.ipn_id),
            None => Ok(self.register(token).await?.ipn_id),
        }
    }

    fn order(&self, client: &User, job: &Job, phase: PaymentPhase, notification_id: String) -> OrderRequest {
        let amount = phase.amount(job);
        let description = match phase {
            PaymentPhase::Upfront => format!("Upfront payment for job: {}", job.title),
            PaymentPhase::Completion => format!("Completion payment for job: {}", job.title),
        };
        OrderRequest {
            merchant_reference: machine::merchant_reference(job.id, phase, Utc::now().timestamp()),
            amount,
            currency: self.settings.currency.clone(),
            description,
            callback_url: format!("{}?job_id={}", self.settings.callback_url, job.id),
            notification_id,
            billing: BillingAddress {
                email_address: client.email.clone(),
                phone_number: String::new(),
                country_code: String::new(),
                first_name: client.first_name().to_string(),
                last_name: client.last_name().to_string(),
            },
        }
    }

    async fn payment_mail(
        &self,
        client: &User,
        job: Option<&Job>,
        phase: PaymentPhase,
        outcome: PaymentOutcome,
        amount: f64,
        tracking_id: Option<&str>,
    ) {
        self.notifier
            .payment(
                &client.email,
                PaymentNotice {
                    job_id: job.map(|j| j.id),
                    title: job.map(|j| j.title.as_str()).unwrap_or("Untitled"),
                    leg: phase.leg(),
                    outcome,
                    amount,
                    currency: &self.settings.currency,
                    tracking_id,
                },
            )
            .await;
    }
}

/// Creates the job, stores its inputs and opens the upfront checkout.
/// When any step fails the job row and its files are removed again.
pub async fn initiate_upfront(
    ctx: &PayContext,
    client_id: Uuid,
    draft: JobDraft,
) -> Res<CheckoutResponse> {
    let client = require_user(ctx.store(), client_id).await?;
    if client.is_admin() {
        return Err(AppError::Unauthorized(
            "Only clients can submit jobs".to_string(),
        ));
    }
    if draft.deadline <= Utc::now() {
        return Err(AppError::Validation(
            "Deadline must be in the future".to_string(),
        ));
    }
    let total = machine::verify_total(draft.pages, &draft.writer_level, draft.total_amount)?;
    FileStore::check(&draft.files)?;
    let upfront = machine::upfront_amount(total, ctx.settings.upfront_ratio);

    let job = ctx
        .store()
        .create_job(JobCreateRequest {
            client_id: client.id,
            subject: draft.subject.clone(),
            title: draft.title.clone(),
            instructions: draft.instructions.clone(),
            pages: draft.pages,
            deadline: draft.deadline,
            cited_resources: draft.cited_resources,
            formatting_style: draft.formatting_style.clone(),
            writer_level: draft.writer_level.clone(),
            spacing: draft.spacing.clone(),
            total_amount: total,
            upfront_amount: upfront,
        })
        .await?;
    log::info!("Job {} created for {}, awaiting upfront payment", job.id, client.id);

    match open_upfront_checkout(ctx, &client, &job, &draft).await {
        Ok(response) => {
            ctx.payment_mail(
                &client,
                Some(&job),
                PaymentPhase::Upfront,
                PaymentOutcome::Pending,
                upfront,
                Some(&response.order_tracking_id),
            )
            .await;
            ctx.notifier.publish(LiveEvent::JobCreated {
                client_id: client.id,
                job_id: job.id,
            });
            Ok(response)
        }
        Err(e) => {
            log::error!("Upfront checkout for job {} failed: {}", job.id, e);
            if let Err(cleanup) = ctx.store().discard_draft(job.id).await {
                log::error!("Failed to discard job {}: {}", job.id, cleanup);
            }
            if let Err(cleanup) = ctx.files.remove_job_dir(job.id).await {
                log::error!("Failed to remove files of job {}: {}", job.id, cleanup);
            }
            ctx.payment_mail(
                &client,
                None,
                PaymentPhase::Upfront,
                PaymentOutcome::Failed,
                upfront,
                None,
            )
            .await;
            Err(e)
        }
    }
}

async fn store_inputs(ctx: &PayContext, job: &Job, uploads: &[Upload]) -> Res<Job> {
    if uploads.is_empty() {
        return Ok(job.clone());
    }
    let saved = ctx
        .files
        .save(FileScope::Job(job.id), UploadKind::Initial, uploads)
        .await?;
    ctx.store()
        .append_job_files(job.id, &saved)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job.id)))
}

async fn open_upfront_checkout(
    ctx: &PayContext,
    client: &User,
    job: &Job,
    draft: &JobDraft,
) -> Res<CheckoutResponse> {
    let job = store_inputs(ctx, job, &draft.files).await?;
    let token = ctx.token().await?;
    let notification_id = ctx.notification_id(&token).await?;

    let mut order = ctx.order(client, &job, PaymentPhase::Upfront, notification_id);
    order.billing.phone_number = draft.phone_number.clone();
    order.billing.country_code = draft.country_code.clone();
    let submitted = ctx.gateway.submit_order(&token, &order).await?;

    ctx.store()
        .record_upfront_order(job.id, &submitted.tracking_id, &order.merchant_reference)
        .await?
        .ok_or_else(|| {
            AppError::InvalidState(format!("Job {} already has an upfront order", job.id))
        })?;
    log::info!(
        "Upfront order {} ({}) opened for job {}",
        submitted.tracking_id,
        order.merchant_reference,
        job.id
    );

    Ok(CheckoutResponse {
        redirect_url: submitted.redirect_url,
        order_tracking_id: submitted.tracking_id,
        job_id: job.id,
    })
}

/// Opens the checkout for the remaining amount of a job whose upfront share is paid.
pub async fn initiate_completion(
    ctx: &PayContext,
    user_id: Uuid,
    job_id: i64,
) -> Res<CheckoutResponse> {
    let user = require_user(ctx.store(), user_id).await?;
    let job = require_job(ctx.store(), job_id).await?;
    if !user.is_admin() && job.client_id != user.id {
        return Err(AppError::Unauthorized(format!(
            "Job {} belongs to another client",
            job.id
        )));
    }
    match job.payment_status() {
        PaymentStatus::Partial => {}
        PaymentStatus::Pending => {
            return Err(AppError::InvalidState(format!(
                "Job {} has no settled upfront payment",
                job.id
            )));
        }
        PaymentStatus::Completed => {
            return Err(AppError::InvalidState(format!(
                "Job {} is already paid",
                job.id
            )));
        }
    }

    if let Some(previous) = job.completion_tracking_id.as_deref() {
        release_completion_order(ctx, &job, previous).await?;
    }

    let client = require_user(ctx.store(), job.client_id).await?;
    let remaining = PaymentPhase::Completion.amount(&job);

    let opened = async {
        let token = ctx.token().await?;
        let notification_id = ctx.notification_id(&token).await?;
        let order = ctx.order(&client, &job, PaymentPhase::Completion, notification_id);
        let submitted = ctx.gateway.submit_order(&token, &order).await?;
        ctx.store()
            .record_completion_order(
                job.id,
                &submitted.tracking_id,
                &order.merchant_reference,
                job.completion_tracking_id.as_deref(),
            )
            .await?
            .ok_or_else(|| {
                AppError::InvalidState(format!("Job {} is no longer awaiting completion", job.id))
            })?;
        log::info!(
            "Completion order {} ({}) opened for job {}",
            submitted.tracking_id,
            order.merchant_reference,
            job.id
        );
        Ok::<_, AppError>(submitted)
    }
    .await;

    match opened {
        Ok(submitted) => {
            ctx.payment_mail(
                &client,
                Some(&job),
                PaymentPhase::Completion,
                PaymentOutcome::Pending,
                remaining,
                Some(&submitted.tracking_id),
            )
            .await;
            Ok(CheckoutResponse {
                redirect_url: submitted.redirect_url,
                order_tracking_id: submitted.tracking_id,
                job_id: job.id,
            })
        }
        Err(e) => {
            log::error!("Completion checkout for job {} failed: {}", job.id, e);
            ctx.payment_mail(
                &client,
                Some(&job),
                PaymentPhase::Completion,
                PaymentOutcome::Failed,
                remaining,
                None,
            )
            .await;
            Err(e)
        }
    }
}

/// Checks the completion order already issued for a job before a new one
/// replaces it. A paid order is reconciled instead, an open one blocks.
async fn release_completion_order(ctx: &PayContext, job: &Job, previous: &str) -> Res<()> {
    let token = ctx.token().await?;
    let snapshot = ctx.gateway.transaction_status(&token, previous).await?;
    match snapshot.payment_status {
        TransactionStatus::Completed => {
            log::warn!(
                "Job {} completion order {} is already paid, reconciling",
                job.id,
                previous
            );
            handle_webhook(
                ctx,
                Notification {
                    tracking_id: previous.to_string(),
                    merchant_reference: job.completion_reference.clone(),
                    notification_type: IPN_CHANGE.to_string(),
                },
            )
            .await?;
            Err(AppError::InvalidState(format!(
                "Job {} is already paid",
                job.id
            )))
        }
        TransactionStatus::Pending => Err(AppError::InvalidState(format!(
            "Completion order {} for job {} is still open",
            previous, job.id
        ))),
        TransactionStatus::Failed | TransactionStatus::Invalid | TransactionStatus::Reversed => {
            log::info!("Replacing dead completion order {} of job {}", previous, job.id);
            Ok(())
        }
    }
}

/// Job a notification is about: by merchant reference, else by tracking id.
async fn notified_job(ctx: &PayContext, notification: &Notification) -> Res<Job> {
    let by_reference = match notification
        .merchant_reference
        .as_deref()
        .and_then(machine::parse_reference)
    {
        Some((job_id, _)) => ctx.store().get_job(job_id).await?,
        None => None,
    };
    match by_reference {
        Some(job) => Ok(job),
        None => ctx
            .store()
            .find_job_by_tracking_id(&notification.tracking_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "No job for tracking id {}",
                    notification.tracking_id
                ))
            }),
    }
}

/// Reconciles a job with the gateway after a notification. The reported
/// status is never trusted, the gateway is asked again. Replays and
/// concurrent duplicates leave the state untouched.
pub async fn handle_webhook(ctx: &PayContext, notification: Notification) -> Res<Reconciliation> {
    if notification.notification_type != IPN_CHANGE {
        return Err(AppError::Validation(format!(
            "Unsupported notification type: {}",
            notification.notification_type
        )));
    }
    if notification.tracking_id.trim().is_empty() {
        return Err(AppError::Validation(
            "OrderTrackingId is required".to_string(),
        ));
    }

    let job = notified_job(ctx, &notification).await?;
    let tracking_id = notification.tracking_id.as_str();
    let phase = PaymentPhase::of(&job, tracking_id).ok_or_else(|| {
        AppError::NotFound(format!(
            "Tracking id {} was not issued for job {}",
            tracking_id, job.id
        ))
    })?;

    let token = ctx.token().await?;
    let snapshot = ctx.gateway.transaction_status(&token, tracking_id).await?;
    log::info!(
        "Job {} {:?} order {} reported {:?}",
        job.id,
        phase,
        tracking_id,
        snapshot.payment_status
    );

    let client = require_user(ctx.store(), job.client_id).await?;
    let mut transitioned = false;
    if snapshot.payment_status == TransactionStatus::Completed {
        match ctx
            .store()
            .apply_transition(job.id, tracking_id, phase.transition())
            .await?
        {
            Some(updated) => {
                transitioned = true;
                log::info!(
                    "Job {} payment moved to {}",
                    updated.id,
                    updated.payment_status
                );
                ctx.payment_mail(
                    &client,
                    Some(&updated),
                    phase,
                    PaymentOutcome::Successful,
                    phase.amount(&updated),
                    Some(tracking_id),
                )
                .await;
                ctx.notifier.publish(LiveEvent::JobUpdated {
                    client_id: updated.client_id,
                    job_id: updated.id,
                    status: updated.status.clone(),
                    payment_status: updated.payment_status.clone(),
                });
            }
            None => log::info!("Job {} already reconciled for {}", job.id, tracking_id),
        }
    } else if snapshot.payment_status.is_failure() {
        ctx.payment_mail(
            &client,
            Some(&job),
            phase,
            PaymentOutcome::Failed,
            phase.amount(&job),
            Some(tracking_id),
        )
        .await;
    }

    Ok(Reconciliation {
        job_id: job.id,
        phase,
        gateway_status: snapshot.payment_status,
        transitioned,
    })
}

/// Gateway status of one of the caller's own orders.
pub async fn get_status(ctx: &PayContext, user_id: Uuid, tracking_id: &str) -> Res<StatusSnapshot> {
    let job = ctx
        .store()
        .find_job_by_tracking_id(tracking_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No job for tracking id {}", tracking_id)))?;
    if job.client_id != user_id {
        return Err(AppError::Unauthorized(
            "Only the job owner can query its payments".to_string(),
        ));
    }
    let token = ctx.token().await?;
    ctx.gateway.transaction_status(&token, tracking_id).await
}

/// Registers the configured IPN url with the gateway again. Admins only.
pub async fn register_ipn(ctx: &PayContext, user_id: Uuid) -> Res<IpnRegistration> {
    let user = require_user(ctx.store(), user_id).await?;
    if !user.is_admin() {
        return Err(AppError::Unauthorized(
            "Only admins can register notifications".to_string(),
        ));
    }
    let token = ctx.token().await?;
    ctx.register(&token).await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use chrono::Duration as ChronoDuration;
    use common::misc::{Role, STATUS_IN_PROGRESS, STATUS_PENDING_PAYMENT};
    use db::{memory::MemoryStore, repo::JobStore};
    use notifier::{events::Broadcaster, mail::MemoryMailer};
    use tempfile::TempDir;

    use super::*;
    use crate::gateway::mock::MockGateway;

    struct Fixture {
        ctx: PayContext,
        store: MemoryStore,
        gateway: Arc<MockGateway>,
        mailer: Arc<MemoryMailer>,
        client: User,
        admin: User,
        dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let admin = store.add_user("admin@example.com", "Ada Admin", Role::Admin).unwrap();
        let client = store.add_user("client@example.com", "Carl Client", Role::Client).unwrap();
        let gateway = Arc::new(MockGateway::default());
        let mailer = Arc::new(MemoryMailer::default());
        let ctx = PayContext {
            store: Arc::new(store.clone()),
            gateway: gateway.clone(),
            notifier: Notifier::new(mailer.clone(), Broadcaster::default(), None),
            files: FileStore::new(dir.path()),
            settings: PaySettings {
                upfront_ratio: 0.25,
                currency: "USD".to_string(),
                ipn_url: "https://api.example/api/pay/ipn".to_string(),
                callback_url: "https://app.example/payment-callback".to_string(),
                retry_attempts: 3,
                retry_backoff: Duration::ZERO,
            },
        };
        Fixture {
            ctx,
            store,
            gateway,
            mailer,
            client,
            admin,
            dir,
        }
    }

    fn draft(pages: i32, level: &str, total: f64) -> JobDraft {
        JobDraft {
            subject: "History".to_string(),
            title: "Essay".to_string(),
            instructions: "Write it".to_string(),
            pages,
            deadline: Utc::now() + ChronoDuration::days(3),
            cited_resources: 2,
            formatting_style: "APA".to_string(),
            writer_level: level.to_string(),
            spacing: "double".to_string(),
            total_amount: total,
            phone_number: "0700000000".to_string(),
            country_code: "KE".to_string(),
            files: Vec::new(),
        }
    }

    fn ipn(tracking_id: &str, reference: Option<&str>) -> Notification {
        Notification {
            tracking_id: tracking_id.to_string(),
            merchant_reference: reference.map(str::to_string),
            notification_type: IPN_CHANGE.to_string(),
        }
    }

    fn subjects(mailer: &MemoryMailer) -> Vec<String> {
        mailer.sent().into_iter().map(|m| m.subject).collect()
    }

    #[tokio::test]
    async fn tampered_total_is_rejected_before_anything_happens() {
        let f = fixture();

        let err = initiate_upfront(&f.ctx, f.client.id, draft(5, "masters", 80.0))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InvalidAmount { .. }));
        assert_eq!(err.kind(), "validation_error");
        assert_eq!(f.gateway.calls(), 0);
        assert!(f.store.list_jobs(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upfront_checkout_opens_a_pending_job() {
        let f = fixture();
        let mut req = draft(5, "masters", 75.0);
        req.files.push(Upload {
            filename: "brief.pdf".to_string(),
            bytes: b"brief".to_vec(),
        });

        let checkout = initiate_upfront(&f.ctx, f.client.id, req).await.unwrap();

        let job = f.store.get_job(checkout.job_id).await.unwrap().unwrap();
        assert_eq!(job.payment_status(), PaymentStatus::Pending);
        assert_eq!(job.status, STATUS_PENDING_PAYMENT);
        assert_eq!(job.total_amount, 75.0);
        assert_eq!(job.upfront_amount, 18.75);
        assert_eq!(job.upfront_tracking_id.as_deref(), Some("track-1"));
        assert!(job.completion_tracking_id.is_none());
        assert!(job.files[0].starts_with(&format!("job_{}/initial-", job.id)));

        let order = f.gateway.last_order().unwrap();
        assert_eq!(order.amount, 18.75);
        assert!(order.merchant_reference.starts_with(&format!("JOB-{}-", job.id)));
        assert_eq!(order.notification_id, "ipn-1");
        assert_eq!(order.billing.first_name, "Carl");
        assert_eq!(checkout.redirect_url, format!("https://pay.example/{}", order.merchant_reference));
        assert_eq!(subjects(&f.mailer), vec![format!("Payment Pending for Job #{}", job.id)]);
    }

    #[tokio::test]
    async fn ipn_registration_is_reused() {
        let f = fixture();
        initiate_upfront(&f.ctx, f.client.id, draft(1, "college", 9.0)).await.unwrap();
        initiate_upfront(&f.ctx, f.client.id, draft(2, "phd", 36.0)).await.unwrap();

        assert_eq!(f.gateway.ipn_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.gateway.order_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn token_failures_are_retried() {
        let f = fixture();
        f.gateway.token_failures.store(2, Ordering::SeqCst);

        initiate_upfront(&f.ctx, f.client.id, draft(1, "college", 9.0)).await.unwrap();
        assert_eq!(f.gateway.token_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gateway_failure_rolls_the_job_back() {
        let f = fixture();
        f.gateway.fail_orders.store(true, Ordering::SeqCst);
        let mut req = draft(5, "masters", 75.0);
        req.files.push(Upload {
            filename: "brief.pdf".to_string(),
            bytes: b"brief".to_vec(),
        });

        let err = initiate_upfront(&f.ctx, f.client.id, req).await.unwrap_err();

        assert!(matches!(err, AppError::PaymentGateway(_)));
        assert!(f.store.list_jobs(None).await.unwrap().is_empty());
        assert!(!f.dir.path().join("job_1").exists());
        assert_eq!(subjects(&f.mailer), vec!["Payment Failed for Job #N/A".to_string()]);
    }

    #[tokio::test]
    async fn upfront_checks_actor_and_deadline() {
        let f = fixture();
        assert!(matches!(
            initiate_upfront(&f.ctx, f.admin.id, draft(1, "college", 9.0)).await,
            Err(AppError::Unauthorized(_))
        ));

        let mut late = draft(1, "college", 9.0);
        late.deadline = Utc::now() - ChronoDuration::minutes(1);
        assert!(matches!(
            initiate_upfront(&f.ctx, f.client.id, late).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            initiate_upfront(&f.ctx, f.client.id, draft(1, "postdoc", 9.0)).await,
            Err(AppError::Validation(_))
        ));
        assert_eq!(f.gateway.calls(), 0);
    }

    #[tokio::test]
    async fn settled_upfront_is_applied_once() {
        let f = fixture();
        let checkout = initiate_upfront(&f.ctx, f.client.id, draft(5, "masters", 75.0))
            .await
            .unwrap();
        let reference = f.gateway.last_order().unwrap().merchant_reference;
        f.gateway.set_status(TransactionStatus::Completed);

        let first = handle_webhook(&f.ctx, ipn(&checkout.order_tracking_id, Some(&reference)))
            .await
            .unwrap();
        assert!(first.transitioned);
        assert_eq!(first.phase, PaymentPhase::Upfront);

        let job = f.store.get_job(checkout.job_id).await.unwrap().unwrap();
        assert_eq!(job.payment_status(), PaymentStatus::Partial);
        assert_eq!(job.status, STATUS_IN_PROGRESS);

        let replay = handle_webhook(&f.ctx, ipn(&checkout.order_tracking_id, Some(&reference)))
            .await
            .unwrap();
        assert!(!replay.transitioned);
        let job = f.store.get_job(checkout.job_id).await.unwrap().unwrap();
        assert_eq!(job.payment_status(), PaymentStatus::Partial);

        let successes = subjects(&f.mailer)
            .into_iter()
            .filter(|s| s.starts_with("Payment Successful"))
            .count();
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn concurrent_duplicate_notifications_transition_once() {
        let f = fixture();
        let checkout = initiate_upfront(&f.ctx, f.client.id, draft(2, "college", 18.0))
            .await
            .unwrap();
        f.gateway.set_status(TransactionStatus::Completed);

        let (a, b) = tokio::join!(
            handle_webhook(&f.ctx, ipn(&checkout.order_tracking_id, None)),
            handle_webhook(&f.ctx, ipn(&checkout.order_tracking_id, None))
        );
        let transitions = [a.unwrap(), b.unwrap()]
            .iter()
            .filter(|r| r.transitioned)
            .count();
        assert_eq!(transitions, 1);
    }

    #[tokio::test]
    async fn completion_needs_a_partial_payment() {
        let f = fixture();
        let checkout = initiate_upfront(&f.ctx, f.client.id, draft(5, "masters", 75.0))
            .await
            .unwrap();
        let calls_before = f.gateway.calls();

        let err = initiate_completion(&f.ctx, f.admin.id, checkout.job_id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
        assert_eq!(f.gateway.calls(), calls_before);
    }

    #[tokio::test]
    async fn completion_uses_its_own_tracking_id() {
        let f = fixture();
        let upfront = initiate_upfront(&f.ctx, f.client.id, draft(5, "masters", 75.0))
            .await
            .unwrap();
        f.gateway.set_status(TransactionStatus::Completed);
        handle_webhook(&f.ctx, ipn(&upfront.order_tracking_id, None)).await.unwrap();

        let completion = initiate_completion(&f.ctx, f.client.id, upfront.job_id)
            .await
            .unwrap();
        let order = f.gateway.last_order().unwrap();
        assert_eq!(order.amount, 56.25);
        assert!(order
            .merchant_reference
            .starts_with(&format!("JOB-{}-COMPLETE-", upfront.job_id)));

        let job = f.store.get_job(upfront.job_id).await.unwrap().unwrap();
        assert_eq!(job.upfront_tracking_id.as_deref(), Some(upfront.order_tracking_id.as_str()));
        assert_eq!(job.completion_tracking_id.as_deref(), Some(completion.order_tracking_id.as_str()));

        // a late replay of the upfront notification changes nothing
        let replay = handle_webhook(&f.ctx, ipn(&upfront.order_tracking_id, None)).await.unwrap();
        assert!(!replay.transitioned);

        let done = handle_webhook(
            &f.ctx,
            ipn(&completion.order_tracking_id, Some(&order.merchant_reference)),
        )
        .await
        .unwrap();
        assert!(done.transitioned);
        assert_eq!(done.phase, PaymentPhase::Completion);
        let job = f.store.get_job(upfront.job_id).await.unwrap().unwrap();
        assert_eq!(job.payment_status(), PaymentStatus::Completed);

        assert!(matches!(
            initiate_completion(&f.ctx, f.admin.id, upfront.job_id).await,
            Err(AppError::InvalidState(_))
        ));
    }

    async fn settled_job(f: &Fixture) -> CheckoutResponse {
        let upfront = initiate_upfront(&f.ctx, f.client.id, draft(5, "masters", 75.0))
            .await
            .unwrap();
        f.gateway.set_status(TransactionStatus::Completed);
        handle_webhook(&f.ctx, ipn(&upfront.order_tracking_id, None)).await.unwrap();
        upfront
    }

    #[tokio::test]
    async fn open_completion_order_blocks_a_new_one() {
        let f = fixture();
        let upfront = settled_job(&f).await;
        let first = initiate_completion(&f.ctx, f.client.id, upfront.job_id)
            .await
            .unwrap();
        f.gateway.set_order_status(&first.order_tracking_id, TransactionStatus::Pending);
        let orders = f.gateway.order_calls.load(Ordering::SeqCst);

        let err = initiate_completion(&f.ctx, f.client.id, upfront.job_id)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InvalidState(_)));
        assert_eq!(f.gateway.order_calls.load(Ordering::SeqCst), orders);
        let job = f.store.get_job(upfront.job_id).await.unwrap().unwrap();
        assert_eq!(job.completion_tracking_id.as_deref(), Some(first.order_tracking_id.as_str()));
    }

    #[tokio::test]
    async fn paid_completion_order_is_reconciled_instead_of_replaced() {
        let f = fixture();
        let upfront = settled_job(&f).await;
        let first = initiate_completion(&f.ctx, f.client.id, upfront.job_id)
            .await
            .unwrap();
        // the client paid, but the notification never arrived
        let orders = f.gateway.order_calls.load(Ordering::SeqCst);

        let err = initiate_completion(&f.ctx, f.client.id, upfront.job_id)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InvalidState(_)));
        assert_eq!(f.gateway.order_calls.load(Ordering::SeqCst), orders);
        let job = f.store.get_job(upfront.job_id).await.unwrap().unwrap();
        assert_eq!(job.payment_status(), PaymentStatus::Completed);
        assert_eq!(job.completion_tracking_id.as_deref(), Some(first.order_tracking_id.as_str()));

        // the late notification for the paid order is a replay
        let late = handle_webhook(&f.ctx, ipn(&first.order_tracking_id, None)).await.unwrap();
        assert!(!late.transitioned);
    }

    #[tokio::test]
    async fn dead_completion_order_is_replaced() {
        let f = fixture();
        let upfront = settled_job(&f).await;
        let first = initiate_completion(&f.ctx, f.client.id, upfront.job_id)
            .await
            .unwrap();
        f.gateway.set_order_status(&first.order_tracking_id, TransactionStatus::Failed);

        let second = initiate_completion(&f.ctx, f.client.id, upfront.job_id)
            .await
            .unwrap();
        assert_ne!(second.order_tracking_id, first.order_tracking_id);
        let job = f.store.get_job(upfront.job_id).await.unwrap().unwrap();
        assert_eq!(job.completion_tracking_id.as_deref(), Some(second.order_tracking_id.as_str()));

        let done = handle_webhook(&f.ctx, ipn(&second.order_tracking_id, None)).await.unwrap();
        assert!(done.transitioned);
        let job = f.store.get_job(upfront.job_id).await.unwrap().unwrap();
        assert_eq!(job.payment_status(), PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn failed_payment_only_notifies() {
        let f = fixture();
        let checkout = initiate_upfront(&f.ctx, f.client.id, draft(1, "college", 9.0))
            .await
            .unwrap();
        f.gateway.set_status(TransactionStatus::Failed);

        let result = handle_webhook(&f.ctx, ipn(&checkout.order_tracking_id, Some("JOB-x")))
            .await
            .unwrap();

        assert!(!result.transitioned);
        let job = f.store.get_job(checkout.job_id).await.unwrap().unwrap();
        assert_eq!(job.payment_status(), PaymentStatus::Pending);
        assert_eq!(
            subjects(&f.mailer).last().cloned(),
            Some(format!("Payment Failed for Job #{}", job.id))
        );
    }

    #[tokio::test]
    async fn unknown_notifications_are_rejected() {
        let f = fixture();
        let mut wrong_type = ipn("track-1", None);
        wrong_type.notification_type = "RECURRING".to_string();

        assert!(matches!(
            handle_webhook(&f.ctx, wrong_type).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            handle_webhook(&f.ctx, ipn("track-404", Some("JOB-999-1"))).await,
            Err(AppError::NotFound(_))
        ));
        assert_eq!(f.gateway.status_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn status_is_private_to_the_owner() {
        let f = fixture();
        let other = f.store.add_user("o@example.com", "Other", Role::Client).unwrap();
        let checkout = initiate_upfront(&f.ctx, f.client.id, draft(1, "college", 9.0))
            .await
            .unwrap();

        assert!(matches!(
            get_status(&f.ctx, other.id, &checkout.order_tracking_id).await,
            Err(AppError::Unauthorized(_))
        ));
        let snapshot = get_status(&f.ctx, f.client.id, &checkout.order_tracking_id)
            .await
            .unwrap();
        assert_eq!(snapshot.payment_status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn ipn_registration_is_admin_only() {
        let f = fixture();
        assert!(matches!(
            register_ipn(&f.ctx, f.client.id).await,
            Err(AppError::Unauthorized(_))
        ));
        let registration = register_ipn(&f.ctx, f.admin.id).await.unwrap();
        assert_eq!(registration.url, f.ctx.settings.ipn_url);
        assert_eq!(registration.ipn_status, "Active");
    }
}
