use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    error::{AppError, Res},
    misc::Role,
};
use uuid::Uuid;

use crate::{
    dtos::{
        job::{JobCreateRequest, PaymentTransition},
        message::{DeleteOutcome, MessageCreateRequest, ThreadKey},
        user::UserCreateRequest,
    },
    models::{
        job::Job,
        message::Message,
        token::IpnRegistration,
        user::{AuthCredentials, User},
    },
};

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn user_exists(&self, email: &str, username: Option<&str>) -> Res<bool>;
    /// Creates the user and its credentials together.
    async fn create_user(&self, data: UserCreateRequest) -> Res<User>;
    async fn get_user(&self, user_id: Uuid) -> Res<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> Res<Option<User>>;
    async fn get_credentials(&self, email: &str) -> Res<Option<(User, AuthCredentials)>>;
    /// Admins ordered by creation time, then id.
    async fn list_admins(&self) -> Res<Vec<User>>;
    async fn set_role(&self, user_id: Uuid, role: Role) -> Res<Option<User>>;
    async fn set_password(&self, user_id: Uuid, password_hash: String) -> Res<()>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, data: JobCreateRequest) -> Res<Job>;
    async fn get_job(&self, job_id: i64) -> Res<Option<Job>>;
    async fn list_jobs(&self, client_id: Option<Uuid>) -> Res<Vec<Job>>;
    async fn find_job_by_tracking_id(&self, tracking_id: &str) -> Res<Option<Job>>;
    async fn append_job_files(&self, job_id: i64, files: &[String]) -> Res<Option<Job>>;
    async fn update_job_status(&self, job_id: i64, status: &str, completed: bool)
    -> Res<Option<Job>>;
    async fn record_upfront_order(
        &self,
        job_id: i64,
        tracking_id: &str,
        reference: &str,
    ) -> Res<Option<Job>>;
    /// Records a completion order in place of `replaces`, the order stored so
    /// far. `None` when the job is not `Partial` or another order was stored.
    async fn record_completion_order(
        &self,
        job_id: i64,
        tracking_id: &str,
        reference: &str,
        replaces: Option<&str>,
    ) -> Res<Option<Job>>;
    /// Atomic compare-and-set, `None` when the guard did not match.
    async fn apply_transition(
        &self,
        job_id: i64,
        tracking_id: &str,
        transition: PaymentTransition,
    ) -> Res<Option<Job>>;
    async fn discard_draft(&self, job_id: i64) -> Res<bool>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create_message(&self, data: MessageCreateRequest) -> Res<Message>;
    /// Inserts a message about `job_id` and records its files on the job in
    /// one transaction. `delivery` files are deliverables and complete the job.
    /// `None` when the job is missing or not deliverable; nothing is written then.
    async fn create_job_message(
        &self,
        job_id: i64,
        delivery: bool,
        data: MessageCreateRequest,
    ) -> Res<Option<(Job, Message)>>;
    async fn get_message(&self, message_id: i64) -> Res<Option<Message>>;
    async fn update_message_content(&self, message_id: i64, content: &str)
    -> Res<Option<Message>>;
    async fn tombstone_message(&self, message_id: i64, side: Role) -> Res<DeleteOutcome>;
    async fn tombstone_thread(&self, thread: &ThreadKey, side: Role) -> Res<u64>;
    async fn list_thread(&self, thread: &ThreadKey, viewer: Role) -> Res<Vec<Message>>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn save_reset_token(
        &self,
        token: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Res<()>;
    async fn consume_reset_token(&self, token: &str) -> Res<Option<Uuid>>;
    async fn purge_reset_tokens(&self) -> Res<u64>;
    async fn revoke_token(&self, jti: Uuid, expires_at: DateTime<Utc>) -> Res<()>;
    async fn is_revoked(&self, jti: Uuid) -> Res<bool>;
    async fn purge_revocations(&self) -> Res<u64>;
}

#[async_trait]
pub trait IpnStore: Send + Sync {
    async fn active_ipn(&self, url: &str) -> Res<Option<IpnRegistration>>;
    async fn save_ipn(&self, ipn_id: &str, url: &str) -> Res<IpnRegistration>;
}

/// Everything the services persist, behind one object.
pub trait Store: UserStore + JobStore + MessageStore + TokenStore + IpnStore {}

impl<T> Store for T where T: UserStore + JobStore + MessageStore + TokenStore + IpnStore {}

pub async fn require_user(store: &dyn Store, user_id: Uuid) -> Res<User> {
    store
        .get_user(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))
}

pub async fn require_job(store: &dyn Store, job_id: i64) -> Res<Job> {
    store
        .get_job(job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))
}
