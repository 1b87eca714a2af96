use chrono::{DateTime, Utc};
use common::misc::Role;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: Option<String>,
    pub name: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Unknown role labels fall back to the least privileged role.
    pub fn role(&self) -> Role {
        self.role.parse().unwrap_or(Role::Client)
    }

    pub fn is_admin(&self) -> bool {
        self.role().is_admin()
    }

    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or_default()
    }

    pub fn last_name(&self) -> &str {
        self.name.split_whitespace().last().unwrap_or_default()
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct AuthCredentials {
    pub user_id: Uuid,
    pub password_hash: String,
}
