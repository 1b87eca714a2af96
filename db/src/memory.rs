use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{
    error::{AppError, Res},
    misc::{PaymentStatus, Role, STATUS_COMPLETED, STATUS_IN_PROGRESS, STATUS_PENDING_PAYMENT},
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
    repo::{IpnStore, JobStore, MessageStore, TokenStore, UserStore},
};

#[derive(Default)]
struct State {
    users: Vec<User>,
    credentials: HashMap<Uuid, String>,
    jobs: BTreeMap<i64, Job>,
    messages: BTreeMap<i64, Message>,
    reset_tokens: HashMap<String, (Uuid, DateTime<Utc>)>,
    revoked: HashMap<Uuid, DateTime<Utc>>,
    ipns: Vec<IpnRegistration>,
    next_id: i64,
    // strictly increasing timestamps keep ordering deterministic
    clock: Option<DateTime<Utc>>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_message(&mut self, data: MessageCreateRequest) -> Message {
        let id = self.next_id();
        let now = self.tick();
        let message = Message {
            id,
            job_id: data.job_id,
            sender_id: data.sender_id,
            sender_role: data.sender_role.as_str().to_string(),
            recipient_id: data.recipient_id,
            content: data.content,
            files: data.files,
            client_deleted: false,
            admin_deleted: false,
            created_at: now,
            updated_at: now,
        };
        self.messages.insert(id, message.clone());
        message
    }

    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.clock {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.clock = Some(next);
        next
    }
}

/// Store kept in process memory. Each call holds one lock for its whole
/// read-check-write, which gives it the same atomicity as the SQL guards.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Res<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("memory store poisoned".to_string()))
    }

    /// Makes every later call fail, as after a panic while holding the lock.
    pub fn poison(&self) {
        let state = self.state.clone();
        let _ = std::thread::spawn(move || {
            let _guard = state.lock();
            panic!("memory store poisoned on purpose");
        })
        .join();
    }

    /// Inserts an account directly, without credentials.
    pub fn add_user(&self, email: &str, name: &str, role: Role) -> Res<User> {
        let mut state = self.lock()?;
        let now = state.tick();
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            username: None,
            name: name.to_string(),
            role: role.as_str().to_string(),
            created_at: now,
            updated_at: now,
        };
        state.users.push(user.clone());
        Ok(user)
    }

    /// Overwrites the stored row, for arranging test fixtures.
    pub fn put_job(&self, job: Job) -> Res<()> {
        self.lock()?.jobs.insert(job.id, job);
        Ok(())
    }

    pub fn message_count(&self) -> Res<usize> {
        Ok(self.lock()?.messages.len())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn user_exists(&self, email: &str, username: Option<&str>) -> Res<bool> {
        let state = self.lock()?;
        Ok(state.users.iter().any(|u| {
            u.email == email || (username.is_some() && u.username.as_deref() == username)
        }))
    }

    async fn create_user(&self, data: UserCreateRequest) -> Res<User> {
        let mut state = self.lock()?;
        if state.users.iter().any(|u| u.email == data.email) {
            return Err(AppError::Validation("Email already registered".to_string()));
        }
        let now = state.tick();
        let user = User {
            id: Uuid::new_v4(),
            email: data.email,
            username: data.username,
            name: data.name,
            role: data.role.as_str().to_string(),
            created_at: now,
            updated_at: now,
        };
        state.users.push(user.clone());
        state.credentials.insert(user.id, data.password_hash);
        Ok(user)
    }

    async fn get_user(&self, user_id: Uuid) -> Res<Option<User>> {
        Ok(self.lock()?.users.iter().find(|u| u.id == user_id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Res<Option<User>> {
        Ok(self.lock()?.users.iter().find(|u| u.email == email).cloned())
    }

    async fn get_credentials(&self, email: &str) -> Res<Option<(User, AuthCredentials)>> {
        let state = self.lock()?;
        Ok(state
            .users
            .iter()
            .find(|u| u.email == email)
            .and_then(|user| {
                state.credentials.get(&user.id).map(|hash| {
                    (
                        user.clone(),
                        AuthCredentials {
                            user_id: user.id,
                            password_hash: hash.clone(),
                        },
                    )
                })
            }))
    }

    async fn list_admins(&self) -> Res<Vec<User>> {
        let state = self.lock()?;
        let mut admins: Vec<User> = state
            .users
            .iter()
            .filter(|u| u.is_admin())
            .cloned()
            .collect();
        admins.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(admins)
    }

    async fn set_role(&self, user_id: Uuid, role: Role) -> Res<Option<User>> {
        let mut state = self.lock()?;
        let now = state.tick();
        Ok(state.users.iter_mut().find(|u| u.id == user_id).map(|u| {
            u.role = role.as_str().to_string();
            u.updated_at = now;
            u.clone()
        }))
    }

    async fn set_password(&self, user_id: Uuid, password_hash: String) -> Res<()> {
        self.lock()?.credentials.insert(user_id, password_hash);
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_job(&self, data: JobCreateRequest) -> Res<Job> {
        let mut state = self.lock()?;
        let id = state.next_id();
        let now = state.tick();
        let job = Job {
            id,
            client_id: data.client_id,
            subject: data.subject,
            title: data.title,
            instructions: data.instructions,
            pages: data.pages,
            deadline: data.deadline,
            cited_resources: data.cited_resources,
            formatting_style: data.formatting_style,
            writer_level: data.writer_level,
            spacing: data.spacing,
            total_amount: data.total_amount,
            upfront_amount: data.upfront_amount,
            status: STATUS_PENDING_PAYMENT.to_string(),
            completed: false,
            payment_status: PaymentStatus::Pending.as_str().to_string(),
            upfront_tracking_id: None,
            upfront_reference: None,
            completion_tracking_id: None,
            completion_reference: None,
            files: Vec::new(),
            completed_files: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        state.jobs.insert(id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: i64) -> Res<Option<Job>> {
        Ok(self.lock()?.jobs.get(&job_id).cloned())
    }

    async fn list_jobs(&self, client_id: Option<Uuid>) -> Res<Vec<Job>> {
        let state = self.lock()?;
        Ok(state
            .jobs
            .values()
            .rev()
            .filter(|j| client_id.is_none_or(|id| j.client_id == id))
            .cloned()
            .collect())
    }

    async fn find_job_by_tracking_id(&self, tracking_id: &str) -> Res<Option<Job>> {
        let state = self.lock()?;
        Ok(state
            .jobs
            .values()
            .find(|j| {
                j.upfront_tracking_id.as_deref() == Some(tracking_id)
                    || j.completion_tracking_id.as_deref() == Some(tracking_id)
            })
            .cloned())
    }

    async fn append_job_files(&self, job_id: i64, files: &[String]) -> Res<Option<Job>> {
        let mut state = self.lock()?;
        let now = state.tick();
        Ok(state.jobs.get_mut(&job_id).map(|job| {
            job.files.extend_from_slice(files);
            job.updated_at = now;
            job.clone()
        }))
    }

    async fn update_job_status(
        &self,
        job_id: i64,
        status: &str,
        completed: bool,
    ) -> Res<Option<Job>> {
        let mut state = self.lock()?;
        let now = state.tick();
        Ok(state
            .jobs
            .get_mut(&job_id)
            .filter(|job| job.payment_status() != PaymentStatus::Pending || !completed)
            .map(|job| {
                job.status = status.to_string();
                job.completed = completed;
                job.updated_at = now;
                job.clone()
            }))
    }

    async fn record_upfront_order(
        &self,
        job_id: i64,
        tracking_id: &str,
        reference: &str,
    ) -> Res<Option<Job>> {
        let mut state = self.lock()?;
        let now = state.tick();
        Ok(state
            .jobs
            .get_mut(&job_id)
            .filter(|job| {
                job.payment_status() == PaymentStatus::Pending && job.upfront_tracking_id.is_none()
            })
            .map(|job| {
                job.upfront_tracking_id = Some(tracking_id.to_string());
                job.upfront_reference = Some(reference.to_string());
                job.updated_at = now;
                job.clone()
            }))
    }

    async fn record_completion_order(
        &self,
        job_id: i64,
        tracking_id: &str,
        reference: &str,
        replaces: Option<&str>,
    ) -> Res<Option<Job>> {
        let mut state = self.lock()?;
        let now = state.tick();
        Ok(state
            .jobs
            .get_mut(&job_id)
            .filter(|job| {
                job.payment_status() == PaymentStatus::Partial
                    && job.completion_tracking_id.as_deref() == replaces
            })
            .map(|job| {
                job.completion_tracking_id = Some(tracking_id.to_string());
                job.completion_reference = Some(reference.to_string());
                job.updated_at = now;
                job.clone()
            }))
    }

    async fn apply_transition(
        &self,
        job_id: i64,
        tracking_id: &str,
        transition: PaymentTransition,
    ) -> Res<Option<Job>> {
        let mut state = self.lock()?;
        let now = state.tick();
        let Some(job) = state.jobs.get_mut(&job_id) else {
            return Ok(None);
        };

        let applied = match transition {
            PaymentTransition::UpfrontSettled => {
                if job.payment_status() == PaymentStatus::Pending
                    && job.upfront_tracking_id.as_deref() == Some(tracking_id)
                {
                    job.payment_status = PaymentStatus::Partial.as_str().to_string();
                    job.status = STATUS_IN_PROGRESS.to_string();
                    true
                } else {
                    false
                }
            }
            PaymentTransition::CompletionSettled => {
                if job.payment_status() == PaymentStatus::Partial
                    && job.completion_tracking_id.as_deref() == Some(tracking_id)
                {
                    job.payment_status = PaymentStatus::Completed.as_str().to_string();
                    true
                } else {
                    false
                }
            }
        };

        if applied {
            job.updated_at = now;
            Ok(Some(job.clone()))
        } else {
            Ok(None)
        }
    }

    async fn discard_draft(&self, job_id: i64) -> Res<bool> {
        let mut state = self.lock()?;
        let is_draft = state.jobs.get(&job_id).is_some_and(|job| {
            job.payment_status() == PaymentStatus::Pending && job.upfront_tracking_id.is_none()
        });
        if is_draft {
            state.jobs.remove(&job_id);
        }
        Ok(is_draft)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn create_message(&self, data: MessageCreateRequest) -> Res<Message> {
        if data.content.is_none() && data.files.is_empty() {
            return Err(AppError::Validation(
                "Message content or files required".to_string(),
            ));
        }
        let mut state = self.lock()?;
        Ok(state.insert_message(data))
    }

    async fn create_job_message(
        &self,
        job_id: i64,
        delivery: bool,
        data: MessageCreateRequest,
    ) -> Res<Option<(Job, Message)>> {
        if data.content.is_none() && data.files.is_empty() {
            return Err(AppError::Validation(
                "Message content or files required".to_string(),
            ));
        }
        let mut state = self.lock()?;
        let now = state.tick();
        let Some(job) = state.jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        if !data.files.is_empty() {
            if delivery {
                if job.payment_status() == PaymentStatus::Pending {
                    return Ok(None);
                }
                job.completed_files.extend_from_slice(&data.files);
                job.status = STATUS_COMPLETED.to_string();
                job.completed = true;
            } else {
                job.files.extend_from_slice(&data.files);
            }
            job.updated_at = now;
        }
        let job = job.clone();
        let message = state.insert_message(data);
        Ok(Some((job, message)))
    }

    async fn get_message(&self, message_id: i64) -> Res<Option<Message>> {
        Ok(self.lock()?.messages.get(&message_id).cloned())
    }

    async fn update_message_content(
        &self,
        message_id: i64,
        content: &str,
    ) -> Res<Option<Message>> {
        let mut state = self.lock()?;
        let now = state.tick();
        Ok(state.messages.get_mut(&message_id).map(|m| {
            m.content = Some(content.to_string());
            m.updated_at = now;
            m.clone()
        }))
    }

    async fn tombstone_message(&self, message_id: i64, side: Role) -> Res<DeleteOutcome> {
        let mut state = self.lock()?;
        let Some(message) = state.messages.get_mut(&message_id) else {
            return Ok(DeleteOutcome::Gone);
        };
        match side {
            Role::Client => message.client_deleted = true,
            Role::Admin => message.admin_deleted = true,
        }
        if message.client_deleted && message.admin_deleted {
            state.messages.remove(&message_id);
            Ok(DeleteOutcome::Purged)
        } else {
            Ok(DeleteOutcome::Hidden)
        }
    }

    async fn tombstone_thread(&self, thread: &ThreadKey, side: Role) -> Res<u64> {
        let mut state = self.lock()?;
        let mut touched = 0;
        for message in state.messages.values_mut() {
            if thread.contains(message.sender_id, message.recipient_id) {
                match side {
                    Role::Client => message.client_deleted = true,
                    Role::Admin => message.admin_deleted = true,
                }
                touched += 1;
            }
        }
        state
            .messages
            .retain(|_, m| !(m.client_deleted && m.admin_deleted));
        Ok(touched)
    }

    async fn list_thread(&self, thread: &ThreadKey, viewer: Role) -> Res<Vec<Message>> {
        let state = self.lock()?;
        let mut messages: Vec<Message> = state
            .messages
            .values()
            .filter(|m| thread.contains(m.sender_id, m.recipient_id) && !m.hidden_for(viewer))
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(messages)
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn save_reset_token(
        &self,
        token: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Res<()> {
        self.lock()?
            .reset_tokens
            .insert(token.to_string(), (user_id, expires_at));
        Ok(())
    }

    async fn consume_reset_token(&self, token: &str) -> Res<Option<Uuid>> {
        let mut state = self.lock()?;
        Ok(state
            .reset_tokens
            .remove(token)
            .filter(|(_, expires_at)| *expires_at > Utc::now())
            .map(|(user_id, _)| user_id))
    }

    async fn purge_reset_tokens(&self) -> Res<u64> {
        let mut state = self.lock()?;
        let before = state.reset_tokens.len();
        let now = Utc::now();
        state.reset_tokens.retain(|_, (_, expires_at)| *expires_at > now);
        Ok((before - state.reset_tokens.len()) as u64)
    }

    async fn revoke_token(&self, jti: Uuid, expires_at: DateTime<Utc>) -> Res<()> {
        self.lock()?.revoked.insert(jti, expires_at);
        Ok(())
    }

    async fn is_revoked(&self, jti: Uuid) -> Res<bool> {
        Ok(self.lock()?.revoked.contains_key(&jti))
    }

    async fn purge_revocations(&self) -> Res<u64> {
        let mut state = self.lock()?;
        let before = state.revoked.len();
        let now = Utc::now();
        state.revoked.retain(|_, expires_at| *expires_at > now);
        Ok((before - state.revoked.len()) as u64)
    }
}

#[async_trait]
impl IpnStore for MemoryStore {
    async fn active_ipn(&self, url: &str) -> Res<Option<IpnRegistration>> {
        Ok(self
            .lock()?
            .ipns
            .iter()
            .find(|r| r.url == url && r.ipn_status == "Active")
            .cloned())
    }

    async fn save_ipn(&self, ipn_id: &str, url: &str) -> Res<IpnRegistration> {
        let mut state = self.lock()?;
        if let Some(existing) = state.ipns.iter_mut().find(|r| r.url == url) {
            existing.ipn_id = ipn_id.to_string();
            existing.ipn_status = "Active".to_string();
            return Ok(existing.clone());
        }
        let id = state.next_id();
        let now = state.tick();
        let registration = IpnRegistration {
            id,
            ipn_id: ipn_id.to_string(),
            url: url.to_string(),
            ipn_status: "Active".to_string(),
            created_at: now,
        };
        state.ipns.push(registration.clone());
        Ok(registration)
    }
}
