use common::{
    error::{AppError, Res},
    misc::Role,
};
use db::{
    dtos::message::ThreadKey,
    models::{job::Job, user::User},
    repo::{Store, require_user},
};
use uuid::Uuid;

/// The admin side of every conversation. Clients write to the primary admin,
/// any admin may read and answer the thread.
#[derive(Debug, Clone)]
pub struct AdminDesk {
    pub primary: User,
    pub admin_ids: Vec<Uuid>,
}

impl AdminDesk {
    /// The primary is the oldest admin account, ties broken by id.
    pub async fn load(store: &dyn Store) -> Res<Self> {
        let admins = store.list_admins().await?;
        let primary = admins
            .first()
            .cloned()
            .ok_or_else(|| AppError::NotFound("No admin account exists".to_string()))?;
        Ok(AdminDesk {
            primary,
            admin_ids: admins.iter().map(|a| a.id).collect(),
        })
    }

    /// Thread between `client` and the admin side.
    pub fn thread_with(&self, client: &User) -> Res<ThreadKey> {
        if client.is_admin() {
            return Err(AppError::Validation(
                "A thread needs a client participant".to_string(),
            ));
        }
        Ok(ThreadKey {
            client_id: client.id,
            admin_ids: self.admin_ids.clone(),
        })
    }
}

/// Picks who receives a message from `user`.
///
/// Clients always talk to the primary admin. Admins talk to the owner of
/// `job`, or to the explicit `recipient_id` for general messages.
pub async fn resolve_counterparty(
    store: &dyn Store,
    user: &User,
    job: Option<&Job>,
    recipient_id: Option<Uuid>,
) -> Res<User> {
    match user.role() {
        Role::Client => Ok(AdminDesk::load(store).await?.primary),
        Role::Admin => {
            let client_id = match (job, recipient_id) {
                (Some(job), _) => job.client_id,
                (None, Some(id)) => id,
                (None, None) => {
                    return Err(AppError::Validation(
                        "recipient_id is required for general messages".to_string(),
                    ));
                }
            };
            let client = require_user(store, client_id).await?;
            if client.is_admin() {
                return Err(AppError::Validation(
                    "Recipient must be a client".to_string(),
                ));
            }
            Ok(client)
        }
    }
}

/// Thread key of the conversation between `a` and `b`, whichever side each is on.
pub async fn thread_key(store: &dyn Store, a: &User, b: &User) -> Res<ThreadKey> {
    let client = match (a.role(), b.role()) {
        (Role::Client, Role::Admin) => a,
        (Role::Admin, Role::Client) => b,
        _ => {
            return Err(AppError::Validation(
                "A thread is always between a client and an admin".to_string(),
            ));
        }
    };
    AdminDesk::load(store).await?.thread_with(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::memory::MemoryStore;

    #[tokio::test]
    async fn oldest_admin_is_primary() {
        let store = MemoryStore::new();
        let first = store.add_user("a1@example.com", "First", Role::Admin).unwrap();
        let second = store.add_user("a2@example.com", "Second", Role::Admin).unwrap();
        let client = store.add_user("c@example.com", "Client", Role::Client).unwrap();

        let counterparty = resolve_counterparty(&store, &client, None, None).await.unwrap();
        assert_eq!(counterparty.id, first.id);

        let key = thread_key(&store, &second, &client).await.unwrap();
        assert_eq!(key.client_id, client.id);
        assert_eq!(key.admin_ids, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn missing_admin_is_not_found() {
        let store = MemoryStore::new();
        let client = store.add_user("c@example.com", "Client", Role::Client).unwrap();

        let err = resolve_counterparty(&store, &client, None, None).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn admin_needs_a_client_recipient() {
        let store = MemoryStore::new();
        let admin = store.add_user("a@example.com", "Admin", Role::Admin).unwrap();
        let other = store.add_user("b@example.com", "Other", Role::Admin).unwrap();

        assert!(matches!(
            resolve_counterparty(&store, &admin, None, None).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            resolve_counterparty(&store, &admin, None, Some(other.id)).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            resolve_counterparty(&store, &admin, None, Some(Uuid::new_v4())).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn thread_key_is_symmetric() {
        let store = MemoryStore::new();
        let admin = store.add_user("a@example.com", "Admin", Role::Admin).unwrap();
        let client = store.add_user("c@example.com", "Client", Role::Client).unwrap();

        assert_eq!(
            thread_key(&store, &admin, &client).await.unwrap(),
            thread_key(&store, &client, &admin).await.unwrap()
        );
    }
}
