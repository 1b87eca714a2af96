use common::{
    error::{AppError, Res},
    misc::PaymentStatus,
    storage::{FileScope, FileStore, UploadKind},
    upload::Upload,
};
use db::{
    dtos::message::{DeleteOutcome, MessageCreateRequest, ThreadKey},
    models::{job::Job, message::Message, user::User},
    repo::{Store, require_job, require_user},
};
use notifier::{Notifier, events::LiveEvent};
use uuid::Uuid;

use crate::{
    dtos::message::SendMessage,
    resolver::{resolve_counterparty, thread_key},
};

/// Clients may only act on their own jobs.
pub fn ensure_job_access(user: &User, job: &Job) -> Res<()> {
    if user.is_admin() || job.client_id == user.id {
        Ok(())
    } else {
        Err(AppError::Unauthorized(format!(
            "Job {} belongs to another client",
            job.id
        )))
    }
}

async fn load_job(store: &dyn Store, user: &User, job_id: Option<i64>) -> Res<Option<Job>> {
    match job_id {
        Some(id) => {
            let job = require_job(store, id).await?;
            ensure_job_access(user, &job)?;
            Ok(Some(job))
        }
        None => Ok(None),
    }
}

/// Thread seen by `viewer`: admins name the client through the job or `client_id`.
async fn viewer_thread(
    store: &dyn Store,
    viewer: &User,
    job: Option<&Job>,
    client_id: Option<Uuid>,
) -> Res<ThreadKey> {
    if viewer.is_admin() && job.is_none() && client_id.is_none() {
        return Err(AppError::Validation("client_id is required".to_string()));
    }
    let counterparty = resolve_counterparty(store, viewer, job, client_id).await?;
    thread_key(store, viewer, &counterparty).await
}

/// Stores the uploads of a job message, then records them on the job and
/// inserts the message together. Admin uploads are deliverables and mark the
/// job completed, which needs a settled upfront payment.
async fn send_on_job(
    store: &dyn Store,
    files: &FileStore,
    data: MessageCreateRequest,
    sender: &User,
    job: &Job,
    uploads: &[Upload],
) -> Res<(Job, Message)> {
    let delivering = sender.is_admin() && !uploads.is_empty();
    if delivering && job.payment_status() == PaymentStatus::Pending {
        return Err(AppError::InvalidState(format!(
            "Job {} cannot be delivered before the upfront payment is settled",
            job.id
        )));
    }

    let kind = if delivering {
        UploadKind::Completed
    } else {
        UploadKind::Additional
    };
    let saved = files.save(FileScope::Job(job.id), kind, uploads).await?;

    let created = store
        .create_job_message(
            job.id,
            delivering,
            MessageCreateRequest {
                files: saved.clone(),
                ..data
            },
        )
        .await;
    match created {
        Ok(Some(pair)) => Ok(pair),
        Ok(None) => {
            files.remove_files(&saved).await;
            Err(AppError::InvalidState(format!(
                "Job {} changed while attaching files",
                job.id
            )))
        }
        Err(e) => {
            files.remove_files(&saved).await;
            Err(e)
        }
    }
}

pub async fn send(
    store: &dyn Store,
    files: &FileStore,
    notifier: &Notifier,
    sender_id: Uuid,
    req: SendMessage,
) -> Res<Message> {
    let sender = require_user(store, sender_id).await?;
    let content = req
        .content
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    // deliverables come from admins on a job, everything else is a plain upload
    let uploads = if req.job_id.is_some() && sender.is_admin() {
        req.completed_files
    } else {
        req.files
    };
    if content.is_none() && uploads.is_empty() {
        return Err(AppError::Validation(
            "Message content or files required".to_string(),
        ));
    }
    FileStore::check(&uploads)?;

    let job = load_job(store, &sender, req.job_id).await?;
    let recipient = resolve_counterparty(store, &sender, job.as_ref(), req.recipient_id).await?;
    let client_id = if sender.is_admin() {
        recipient.id
    } else {
        sender.id
    };
    let data = MessageCreateRequest {
        job_id: job.as_ref().map(|j| j.id),
        sender_id: sender.id,
        sender_role: sender.role(),
        recipient_id: recipient.id,
        content,
        files: Vec::new(),
    };

    let (message, job) = match &job {
        Some(job) => {
            let (job, message) = send_on_job(store, files, data, &sender, job, &uploads).await?;
            (message, Some(job))
        }
        None => {
            let stored = files
                .save(FileScope::Temp, UploadKind::Message, &uploads)
                .await?;
            let created = store
                .create_message(MessageCreateRequest {
                    files: stored.clone(),
                    ..data
                })
                .await;
            match created {
                Ok(message) => (message, None),
                Err(e) => {
                    files.remove_files(&stored).await;
                    return Err(e);
                }
            }
        }
    };

    log::info!(
        "Message {} sent by {} to {}",
        message.id,
        sender.id,
        recipient.id
    );
    notifier.publish(LiveEvent::MessageCreated {
        client_id,
        message_id: message.id,
        job_id: message.job_id,
    });
    if let Some(job) = job {
        notifier.publish(LiveEvent::JobUpdated {
            client_id: job.client_id,
            job_id: job.id,
            status: job.status.clone(),
            payment_status: job.payment_status.clone(),
        });
    }

    Ok(message)
}

pub async fn edit(
    store: &dyn Store,
    notifier: &Notifier,
    editor_id: Uuid,
    message_id: i64,
    content: &str,
) -> Res<Message> {
    let editor = require_user(store, editor_id).await?;
    let message = store
        .get_message(message_id)
        .await?
        .filter(|m| !m.hidden_for(editor.role()))
        .ok_or_else(|| AppError::NotFound(format!("Message {} not found", message_id)))?;

    if message.sender_id != editor.id {
        return Err(AppError::Unauthorized(
            "Only the sender can edit a message".to_string(),
        ));
    }
    let content = content.trim();
    if content.is_empty() {
        return Err(AppError::Validation("Content cannot be empty".to_string()));
    }

    let updated = store
        .update_message_content(message_id, content)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Message {} not found", message_id)))?;

    notifier.publish(LiveEvent::MessageUpdated {
        client_id: updated.client_id(),
        message_id: updated.id,
    });
    Ok(updated)
}

/// Hides the message for the requester's side. The row is removed once
/// both sides deleted it; losing that race to the other side is not an error.
pub async fn delete(
    store: &dyn Store,
    notifier: &Notifier,
    requester_id: Uuid,
    message_id: i64,
) -> Res<DeleteOutcome> {
    let requester = require_user(store, requester_id).await?;
    let message = store
        .get_message(message_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Message {} not found", message_id)))?;

    if message.sender_id != requester.id && !requester.is_admin() {
        return Err(AppError::Unauthorized(
            "Only the sender or an admin can delete a message".to_string(),
        ));
    }

    let outcome = store.tombstone_message(message_id, requester.role()).await?;
    log::info!(
        "Message {} deleted by {} ({:?})",
        message_id,
        requester.id,
        outcome
    );

    notifier.publish(LiveEvent::MessageDeleted {
        client_id: message.client_id(),
        message_id: Some(message_id),
    });
    Ok(outcome)
}

/// Deletes every message of the requester's thread for the requester's side.
pub async fn clear(
    store: &dyn Store,
    notifier: &Notifier,
    requester_id: Uuid,
    client_id: Option<Uuid>,
) -> Res<u64> {
    let requester = require_user(store, requester_id).await?;
    let thread = viewer_thread(store, &requester, None, client_id).await?;
    let side = requester.role();

    let touched = store.tombstone_thread(&thread, side).await?;
    log::info!(
        "Thread of {} cleared by {} ({} message(s))",
        thread.client_id,
        requester.id,
        touched
    );

    notifier.publish(LiveEvent::MessageDeleted {
        client_id: thread.client_id,
        message_id: None,
    });
    Ok(touched)
}

/// Messages of the viewer's thread, without the ones the viewer deleted.
/// A job only selects the thread, messages are not filtered by job.
pub async fn list(
    store: &dyn Store,
    viewer_id: Uuid,
    job_id: Option<i64>,
    client_id: Option<Uuid>,
) -> Res<Vec<Message>> {
    let viewer = require_user(store, viewer_id).await?;
    let job = load_job(store, &viewer, job_id).await?;
    let thread = viewer_thread(store, &viewer, job.as_ref(), client_id).await?;
    store.list_thread(&thread, viewer.role()).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use common::misc::Role;
    use db::{
        dtos::job::{JobCreateRequest, PaymentTransition},
        memory::MemoryStore,
        repo::{JobStore, MessageStore, UserStore},
    };
    use notifier::{events::Broadcaster, mail::LogMailer};
    use tempfile::TempDir;

    use super::*;

    struct Fixture {
        store: MemoryStore,
        files: FileStore,
        notifier: Notifier,
        client: User,
        admin: User,
        _dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let admin = store.add_user("admin@example.com", "Admin", Role::Admin).unwrap();
        let client = store.add_user("client@example.com", "Client", Role::Client).unwrap();
        Fixture {
            files: FileStore::new(dir.path()),
            notifier: Notifier::new(Arc::new(LogMailer), Broadcaster::default(), None),
            store,
            client,
            admin,
            _dir: dir,
        }
    }

    fn text(content: &str) -> SendMessage {
        SendMessage {
            content: Some(content.to_string()),
            ..Default::default()
        }
    }

    fn upload(name: &str) -> Upload {
        Upload {
            filename: name.to_string(),
            bytes: b"data".to_vec(),
        }
    }

    async fn job_for(store: &MemoryStore, client: &User, settled: bool) -> Job {
        let job = store
            .create_job(JobCreateRequest {
                client_id: client.id,
                subject: "Biology".to_string(),
                title: "Lab report".to_string(),
                instructions: "Summarise".to_string(),
                pages: 1,
                deadline: Utc::now() + Duration::days(2),
                cited_resources: 0,
                formatting_style: "APA".to_string(),
                writer_level: "college".to_string(),
                spacing: "double".to_string(),
                total_amount: 9.0,
                upfront_amount: 2.25,
            })
            .await
            .unwrap();
        if !settled {
            return job;
        }
        store
            .record_upfront_order(job.id, "track", "JOB-ref")
            .await
            .unwrap();
        store
            .apply_transition(job.id, "track", PaymentTransition::UpfrontSettled)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn deleted_message_stays_visible_to_the_other_side() {
        let f = fixture();
        let sent = send(&f.store, &f.files, &f.notifier, f.client.id, text("hi"))
            .await
            .unwrap();
        assert_eq!(sent.recipient_id, f.admin.id);
        assert_eq!(sent.sender_role, "client");

        let seen = list(&f.store, f.admin.id, None, Some(f.client.id)).await.unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].content.as_deref(), Some("hi"));

        let outcome = delete(&f.store, &f.notifier, f.client.id, sent.id).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Hidden);

        assert!(list(&f.store, f.client.id, None, None).await.unwrap().is_empty());
        assert_eq!(
            list(&f.store, f.admin.id, None, Some(f.client.id))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn concurrent_deletes_remove_the_row_once() {
        let f = fixture();
        let sent = send(&f.store, &f.files, &f.notifier, f.client.id, text("hi"))
            .await
            .unwrap();

        let (by_client, by_admin) = tokio::join!(
            delete(&f.store, &f.notifier, f.client.id, sent.id),
            delete(&f.store, &f.notifier, f.admin.id, sent.id)
        );
        let mut outcomes = vec![by_client.unwrap(), by_admin.unwrap()];
        outcomes.sort_by_key(|o| *o as u8);

        assert_eq!(outcomes, vec![DeleteOutcome::Hidden, DeleteOutcome::Purged]);
        assert!(f.store.get_message(sent.id).await.unwrap().is_none());
        assert_eq!(f.store.message_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let f = fixture();
        let err = send(&f.store, &f.files, &f.notifier, f.client.id, text("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn only_the_sender_edits() {
        let f = fixture();
        let sent = send(&f.store, &f.files, &f.notifier, f.client.id, text("draft"))
            .await
            .unwrap();

        assert!(matches!(
            edit(&f.store, &f.notifier, f.admin.id, sent.id, "changed").await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            edit(&f.store, &f.notifier, f.client.id, sent.id, " ").await,
            Err(AppError::Validation(_))
        ));
        let edited = edit(&f.store, &f.notifier, f.client.id, sent.id, "final")
            .await
            .unwrap();
        assert_eq!(edited.content.as_deref(), Some("final"));
    }

    #[tokio::test]
    async fn recipient_cannot_delete_for_the_sender_side() {
        let f = fixture();
        let other = f.store.add_user("o@example.com", "Other", Role::Client).unwrap();
        let sent = send(&f.store, &f.files, &f.notifier, f.client.id, text("hi"))
            .await
            .unwrap();

        assert!(matches!(
            delete(&f.store, &f.notifier, other.id, sent.id).await,
            Err(AppError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn delivery_waits_for_the_upfront_payment() {
        let f = fixture();
        let job = job_for(&f.store, &f.client, false).await;
        let req = SendMessage {
            job_id: Some(job.id),
            completed_files: vec![upload("essay.pdf")],
            ..Default::default()
        };

        let err = send(&f.store, &f.files, &f.notifier, f.admin.id, req)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
        let unchanged = f.store.get_job(job.id).await.unwrap().unwrap();
        assert!(!unchanged.completed);
        assert!(unchanged.completed_files.is_empty());
    }

    #[tokio::test]
    async fn delivery_completes_a_paid_job() {
        let f = fixture();
        let job = job_for(&f.store, &f.client, true).await;
        let mut rx = f.notifier.events().subscribe();
        let req = SendMessage {
            job_id: Some(job.id),
            content: Some("Here you go".to_string()),
            completed_files: vec![upload("essay.pdf")],
            ..Default::default()
        };

        let message = send(&f.store, &f.files, &f.notifier, f.admin.id, req)
            .await
            .unwrap();
        assert_eq!(message.recipient_id, f.client.id);
        assert_eq!(message.job_id, Some(job.id));

        let delivered = f.store.get_job(job.id).await.unwrap().unwrap();
        assert!(delivered.completed);
        assert_eq!(delivered.completed_files, message.files);
        assert!(message.files[0].starts_with(&format!("job_{}/completed-", job.id)));

        assert!(matches!(
            rx.recv().await.unwrap(),
            LiveEvent::MessageCreated { .. }
        ));
        assert!(matches!(rx.recv().await.unwrap(), LiveEvent::JobUpdated { .. }));
    }

    #[tokio::test]
    async fn every_job_message_announces_the_job() {
        let f = fixture();
        let job = job_for(&f.store, &f.client, true).await;
        let mut rx = f.notifier.events().subscribe();
        let req = SendMessage {
            job_id: Some(job.id),
            content: Some("status?".to_string()),
            ..Default::default()
        };

        send(&f.store, &f.files, &f.notifier, f.client.id, req)
            .await
            .unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            LiveEvent::MessageCreated { .. }
        ));
        match rx.recv().await.unwrap() {
            LiveEvent::JobUpdated { job_id, .. } => assert_eq!(job_id, job.id),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn promoted_admin_delivers_with_an_old_token() {
        let f = fixture();
        let job = job_for(&f.store, &f.client, true).await;
        let writer = f.store.add_user("w@example.com", "Writer", Role::Client).unwrap();
        f.store.set_role(writer.id, Role::Admin).await.unwrap();
        let req = SendMessage {
            job_id: Some(job.id),
            completed_files: vec![upload("essay.pdf")],
            ..Default::default()
        };

        let message = send(&f.store, &f.files, &f.notifier, writer.id, req)
            .await
            .unwrap();
        let delivered = f.store.get_job(job.id).await.unwrap().unwrap();
        assert!(delivered.completed);
        assert_eq!(delivered.completed_files, message.files);
    }

    #[tokio::test]
    async fn clients_cannot_upload_deliverables() {
        let f = fixture();
        let job = job_for(&f.store, &f.client, true).await;
        let req = SendMessage {
            job_id: Some(job.id),
            completed_files: vec![upload("essay.pdf")],
            ..Default::default()
        };

        let err = send(&f.store, &f.files, &f.notifier, f.client.id, req)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(!f.store.get_job(job.id).await.unwrap().unwrap().completed);
    }

    #[tokio::test]
    async fn client_files_extend_the_job_inputs() {
        let f = fixture();
        let job = job_for(&f.store, &f.client, false).await;
        let req = SendMessage {
            job_id: Some(job.id),
            files: vec![upload("notes.docx")],
            ..Default::default()
        };

        send(&f.store, &f.files, &f.notifier, f.client.id, req)
            .await
            .unwrap();
        let updated = f.store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(updated.files.len(), 1);
        assert!(updated.files[0].starts_with(&format!("job_{}/additional-", job.id)));
        assert!(!updated.completed);
    }

    #[tokio::test]
    async fn clients_cannot_write_about_foreign_jobs() {
        let f = fixture();
        let other = f.store.add_user("o@example.com", "Other", Role::Client).unwrap();
        let job = job_for(&f.store, &other, false).await;
        let req = SendMessage {
            job_id: Some(job.id),
            content: Some("hello".to_string()),
            ..Default::default()
        };

        assert!(matches!(
            send(&f.store, &f.files, &f.notifier, f.client.id, req).await,
            Err(AppError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn clear_hides_the_thread_for_one_side() {
        let f = fixture();
        send(&f.store, &f.files, &f.notifier, f.client.id, text("one"))
            .await
            .unwrap();
        let reply = SendMessage {
            recipient_id: Some(f.client.id),
            content: Some("two".to_string()),
            ..Default::default()
        };
        send(&f.store, &f.files, &f.notifier, f.admin.id, reply)
            .await
            .unwrap();

        assert!(matches!(
            clear(&f.store, &f.notifier, f.admin.id, None).await,
            Err(AppError::Validation(_))
        ));
        assert_eq!(
            clear(&f.store, &f.notifier, f.client.id, None).await.unwrap(),
            2
        );
        assert!(list(&f.store, f.client.id, None, None).await.unwrap().is_empty());
        assert_eq!(
            list(&f.store, f.admin.id, None, Some(f.client.id))
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn general_attachments_go_to_temp() {
        let f = fixture();
        let req = SendMessage {
            files: vec![upload("scan.png")],
            ..Default::default()
        };

        let message = send(&f.store, &f.files, &f.notifier, f.client.id, req)
            .await
            .unwrap();
        assert!(message.content.is_none());
        assert!(message.files[0].starts_with("temp/msg-"));
        assert!(f.files.resolve(&message.files[0]).unwrap().exists());
    }
}
