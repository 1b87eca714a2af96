//! Runs against a throwaway database per test. Needs `DATABASE_URL` pointing
//! at a Postgres server: `cargo test -p db -- --ignored`.

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::misc::{PaymentStatus, Role};
use db::{
    PgStore,
    dtos::{
        job::{JobCreateRequest, PaymentTransition},
        message::{DeleteOutcome, MessageCreateRequest},
        user::UserCreateRequest,
    },
    models::{job::Job, user::User},
    repo::{JobStore, MessageStore, UserStore},
};
use sqlx::PgPool;

async fn user(store: &PgStore, email: &str, role: Role) -> User {
    store
        .create_user(UserCreateRequest {
            email: email.to_string(),
            username: None,
            name: "Test User".to_string(),
            role,
            password_hash: "hash".to_string(),
        })
        .await
        .unwrap()
}

async fn partial_job(store: &PgStore, client: &User) -> Job {
    let job = store
        .create_job(JobCreateRequest {
            client_id: client.id,
            subject: "History".to_string(),
            title: "Essay".to_string(),
            instructions: "Write".to_string(),
            pages: 2,
            deadline: Utc::now() + Duration::days(3),
            cited_resources: 0,
            formatting_style: "APA".to_string(),
            writer_level: "college".to_string(),
            spacing: "double".to_string(),
            total_amount: 18.0,
            upfront_amount: 4.5,
        })
        .await
        .unwrap();
    store
        .record_upfront_order(job.id, "track-1", "JOB-1-1")
        .await
        .unwrap()
        .unwrap();
    store
        .apply_transition(job.id, "track-1", PaymentTransition::UpfrontSettled)
        .await
        .unwrap()
        .unwrap()
}

#[sqlx::test]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn concurrent_settlements_transition_once(pool: PgPool) {
    let store = PgStore::new(Arc::new(pool));
    let client = user(&store, "c@example.com", Role::Client).await;
    let job = partial_job(&store, &client).await;
    store
        .record_completion_order(job.id, "track-2", "JOB-1-COMPLETE-2", None)
        .await
        .unwrap()
        .unwrap();

    let (a, b) = tokio::join!(
        store.apply_transition(job.id, "track-2", PaymentTransition::CompletionSettled),
        store.apply_transition(job.id, "track-2", PaymentTransition::CompletionSettled)
    );
    let applied = [a.unwrap(), b.unwrap()].iter().filter(|r| r.is_some()).count();
    assert_eq!(applied, 1);

    let job = store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(job.payment_status(), PaymentStatus::Completed);
}

#[sqlx::test]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn completion_order_only_replaces_the_stored_one(pool: PgPool) {
    let store = PgStore::new(Arc::new(pool));
    let client = user(&store, "c@example.com", Role::Client).await;
    let job = partial_job(&store, &client).await;

    assert!(store
        .record_completion_order(job.id, "track-2", "ref-2", None)
        .await
        .unwrap()
        .is_some());
    assert!(store
        .record_completion_order(job.id, "track-3", "ref-3", None)
        .await
        .unwrap()
        .is_none());
    let replaced = store
        .record_completion_order(job.id, "track-3", "ref-3", Some("track-2"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(replaced.completion_tracking_id.as_deref(), Some("track-3"));
}

#[sqlx::test]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn concurrent_deletes_purge_once(pool: PgPool) {
    let store = PgStore::new(Arc::new(pool));
    let client = user(&store, "c@example.com", Role::Client).await;
    let admin = user(&store, "a@example.com", Role::Admin).await;
    let msg = store
        .create_message(MessageCreateRequest {
            job_id: None,
            sender_id: client.id,
            sender_role: Role::Client,
            recipient_id: admin.id,
            content: Some("hi".to_string()),
            files: Vec::new(),
        })
        .await
        .unwrap();

    let (by_client, by_admin) = tokio::join!(
        store.tombstone_message(msg.id, Role::Client),
        store.tombstone_message(msg.id, Role::Admin)
    );
    let mut outcomes = vec![by_client.unwrap(), by_admin.unwrap()];
    outcomes.sort_by_key(|o| *o as u8);

    assert_eq!(outcomes, vec![DeleteOutcome::Hidden, DeleteOutcome::Purged]);
    assert!(store.get_message(msg.id).await.unwrap().is_none());
}

#[sqlx::test]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn undeliverable_job_message_writes_nothing(pool: PgPool) {
    let store = PgStore::new(Arc::new(pool));
    let client = user(&store, "c@example.com", Role::Client).await;
    let admin = user(&store, "a@example.com", Role::Admin).await;
    let pending = store
        .create_job(JobCreateRequest {
            client_id: client.id,
            subject: "History".to_string(),
            title: "Essay".to_string(),
            instructions: "Write".to_string(),
            pages: 1,
            deadline: Utc::now() + Duration::days(3),
            cited_resources: 0,
            formatting_style: "APA".to_string(),
            writer_level: "college".to_string(),
            spacing: "double".to_string(),
            total_amount: 9.0,
            upfront_amount: 2.25,
        })
        .await
        .unwrap();

    let created = store
        .create_job_message(
            pending.id,
            true,
            MessageCreateRequest {
                job_id: Some(pending.id),
                sender_id: admin.id,
                sender_role: Role::Admin,
                recipient_id: client.id,
                content: None,
                files: vec![format!("job_{}/completed-essay.pdf", pending.id)],
            },
        )
        .await
        .unwrap();
    assert!(created.is_none());

    let job = store.get_job(pending.id).await.unwrap().unwrap();
    assert!(!job.completed);
    assert!(job.completed_files.is_empty());
}
