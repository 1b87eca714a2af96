use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{error::Res, misc::Role};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    dtos::{
        job::{JobCreateRequest, PaymentTransition},
        message::{DeleteOutcome, MessageCreateRequest, ThreadKey},
        user::UserCreateRequest,
    },
    job, message,
    models::{
        job::Job,
        message::Message,
        token::IpnRegistration,
        user::{AuthCredentials, User},
    },
    repo::{IpnStore, JobStore, MessageStore, TokenStore, UserStore},
    token, user,
};

/// Postgres backed store. Every method delegates to the query functions of this crate.
#[derive(Clone)]
pub struct PgStore {
    pool: Arc<PgPool>,
}

impl PgStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        PgStore { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn user_exists(&self, email: &str, username: Option<&str>) -> Res<bool> {
        user::exists_user(self.pool(), email, username).await
    }

    async fn create_user(&self, data: UserCreateRequest) -> Res<User> {
        let mut tx = self.pool.begin().await?;
        let created = user::insert_user(&mut *tx, &data).await?;
        user::insert_user_with_credentials(
            &mut *tx,
            AuthCredentials {
                user_id: created.id,
                password_hash: data.password_hash,
            },
        )
        .await?;
        tx.commit().await?;
        Ok(created)
    }

    async fn get_user(&self, user_id: Uuid) -> Res<Option<User>> {
        user::get_user_by_id(self.pool(), user_id).await
    }

    async fn get_user_by_email(&self, email: &str) -> Res<Option<User>> {
        user::get_user_by_email(self.pool(), email).await
    }

    async fn get_credentials(&self, email: &str) -> Res<Option<(User, AuthCredentials)>> {
        user::get_user_with_password_hash(self.pool(), email).await
    }

    async fn list_admins(&self) -> Res<Vec<User>> {
        user::get_admins(self.pool()).await
    }

    async fn set_role(&self, user_id: Uuid, role: Role) -> Res<Option<User>> {
        user::update_user_role(self.pool(), user_id, role.as_str()).await
    }

    async fn set_password(&self, user_id: Uuid, password_hash: String) -> Res<()> {
        user::insert_user_with_credentials(
            self.pool(),
            AuthCredentials {
                user_id,
                password_hash,
            },
        )
        .await
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn create_job(&self, data: JobCreateRequest) -> Res<Job> {
        job::insert_job(self.pool(), &data).await
    }

    async fn get_job(&self, job_id: i64) -> Res<Option<Job>> {
        job::get_job(self.pool(), job_id).await
    }

    async fn list_jobs(&self, client_id: Option<Uuid>) -> Res<Vec<Job>> {
        job::get_jobs(self.pool(), client_id).await
    }

    async fn find_job_by_tracking_id(&self, tracking_id: &str) -> Res<Option<Job>> {
        job::get_job_by_tracking_id(self.pool(), tracking_id).await
    }

    async fn append_job_files(&self, job_id: i64, files: &[String]) -> Res<Option<Job>> {
        job::append_files(self.pool(), job_id, files).await
    }

    async fn update_job_status(
        &self,
        job_id: i64,
        status: &str,
        completed: bool,
    ) -> Res<Option<Job>> {
        job::update_status(self.pool(), job_id, status, completed).await
    }

    async fn record_upfront_order(
        &self,
        job_id: i64,
        tracking_id: &str,
        reference: &str,
    ) -> Res<Option<Job>> {
        job::record_upfront_order(self.pool(), job_id, tracking_id, reference).await
    }

    async fn record_completion_order(
        &self,
        job_id: i64,
        tracking_id: &str,
        reference: &str,
        replaces: Option<&str>,
    ) -> Res<Option<Job>> {
        job::record_completion_order(self.pool(), job_id, tracking_id, reference, replaces).await
    }

    async fn apply_transition(
        &self,
        job_id: i64,
        tracking_id: &str,
        transition: PaymentTransition,
    ) -> Res<Option<Job>> {
        job::apply_transition(self.pool(), job_id, tracking_id, transition).await
    }

    async fn discard_draft(&self, job_id: i64) -> Res<bool> {
        job::delete_draft(self.pool(), job_id).await
    }
}

#[async_trait]
impl MessageStore for PgStore {
    async fn create_message(&self, data: MessageCreateRequest) -> Res<Message> {
        message::insert_message(self.pool(), &data).await
    }

    async fn create_job_message(
        &self,
        job_id: i64,
        delivery: bool,
        data: MessageCreateRequest,
    ) -> Res<Option<(Job, Message)>> {
        let mut tx = self.pool.begin().await?;
        let updated = if data.files.is_empty() {
            job::get_job(&mut *tx, job_id).await?
        } else if delivery {
            job::deliver_files(&mut *tx, job_id, &data.files).await?
        } else {
            job::append_files(&mut *tx, job_id, &data.files).await?
        };
        // dropping the transaction rolls it back
        let Some(updated) = updated else {
            return Ok(None);
        };
        let created = message::insert_message(&mut *tx, &data).await?;
        tx.commit().await?;
        Ok(Some((updated, created)))
    }

    async fn get_message(&self, message_id: i64) -> Res<Option<Message>> {
        message::get_message(self.pool(), message_id).await
    }

    async fn update_message_content(
        &self,
        message_id: i64,
        content: &str,
    ) -> Res<Option<Message>> {
        message::update_content(self.pool(), message_id, content).await
    }

    async fn tombstone_message(&self, message_id: i64, side: Role) -> Res<DeleteOutcome> {
        message::tombstone(self.pool(), message_id, side).await
    }

    async fn tombstone_thread(&self, thread: &ThreadKey, side: Role) -> Res<u64> {
        message::tombstone_thread(self.pool(), thread, side).await
    }

    async fn list_thread(&self, thread: &ThreadKey, viewer: Role) -> Res<Vec<Message>> {
        message::get_thread(self.pool(), thread, viewer).await
    }
}

#[async_trait]
impl TokenStore for PgStore {
    async fn save_reset_token(
        &self,
        token: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Res<()> {
        token::insert_reset_token(self.pool(), token, user_id, expires_at).await
    }

    async fn consume_reset_token(&self, token: &str) -> Res<Option<Uuid>> {
        token::consume_reset_token(self.pool(), token).await
    }

    async fn purge_reset_tokens(&self) -> Res<u64> {
        token::delete_expired_reset_tokens(self.pool()).await
    }

    async fn revoke_token(&self, jti: Uuid, expires_at: DateTime<Utc>) -> Res<()> {
        token::insert_revoked_token(self.pool(), jti, expires_at).await
    }

    async fn is_revoked(&self, jti: Uuid) -> Res<bool> {
        token::is_revoked(self.pool(), jti).await
    }

    async fn purge_revocations(&self) -> Res<u64> {
        token::delete_expired_revocations(self.pool()).await
    }
}

#[async_trait]
impl IpnStore for PgStore {
    async fn active_ipn(&self, url: &str) -> Res<Option<IpnRegistration>> {
        token::get_active_ipn(self.pool(), url).await
    }

    async fn save_ipn(&self, ipn_id: &str, url: &str) -> Res<IpnRegistration> {
        token::upsert_ipn(self.pool(), ipn_id, url).await
    }
}
