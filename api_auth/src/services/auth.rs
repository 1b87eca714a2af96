use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{Duration, Utc};
use common::{
    env_config::JwtConfig,
    error::{AppError, Res},
    jwt::{self, ClaimsSpec, JwtClaims},
    misc::Role,
};
use db::{dtos::user::UserCreateRequest, models::user::User, repo::Store};
use notifier::{Notifier, mail};
use uuid::Uuid;

use crate::dtos::auth::{AuthResponse, LoginRequest, RegisterRequest};

pub const MIN_PASSWORD_LEN: usize = 8;

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn check_password(password: &str) -> Res<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

pub fn hash_password(password: &str) -> Res<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password. {}", e)))
}

fn verify_password(password: &str, stored_hash: &str) -> Res<bool> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| AppError::Internal(format!("Stored password hash is invalid. {}", e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Creates an account. Addresses listed in `admin_emails` become admins,
/// everyone else a client.
pub async fn register(store: &dyn Store, admin_emails: &[String], req: RegisterRequest) -> Res<User> {
    let email = normalize_email(&req.email);
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::Validation("A valid email is required".to_string()));
    }
    if req.name.trim().is_empty() {
        return Err(AppError::Validation("Name is required".to_string()));
    }
    check_password(&req.password)?;

    let username = req
        .username
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(str::to_string);
    if store.user_exists(&email, username.as_deref()).await? {
        return Err(AppError::Validation(
            "Email or username already registered".to_string(),
        ));
    }

    let role = if admin_emails.contains(&email) {
        Role::Admin
    } else {
        Role::Client
    };
    let user = store
        .create_user(UserCreateRequest {
            email,
            username,
            name: req.name.trim().to_string(),
            role,
            password_hash: hash_password(&req.password)?,
        })
        .await?;
    log::info!("User {} registered as {}", user.id, role);
    Ok(user)
}

/// Verifies the credentials and issues a token carrying the stored role.
pub async fn login(store: &dyn Store, jwt_config: &JwtConfig, req: LoginRequest) -> Res<AuthResponse> {
    let invalid = || AppError::Unauthenticated("Invalid credentials".to_string());
    let (user, credentials) = store
        .get_credentials(&normalize_email(&req.email))
        .await?
        .ok_or_else(invalid)?;
    if !verify_password(&req.password, &credentials.password_hash)? {
        return Err(invalid());
    }
    let token = jwt::generate_jwt(
        ClaimsSpec {
            user_id: user.id,
            role: user.role(),
        },
        jwt_config,
    )?;
    Ok(AuthResponse { token, user })
}

/// Revokes the presented token until it would have expired anyway.
pub async fn logout(store: &dyn Store, claims: &JwtClaims) -> Res<()> {
    store.revoke_token(claims.jti, claims.expires_at()).await?;
    log::info!("Token {} of user {} revoked", claims.jti, claims.user_id);
    Ok(())
}

/// Mails a single-use reset link. Unknown addresses get the same answer so
/// the endpoint does not reveal which accounts exist.
pub async fn forgot_password(
    store: &dyn Store,
    notifier: &Notifier,
    frontend_url: &str,
    ttl_minutes: i64,
    email: &str,
) -> Res<()> {
    let Some(user) = store.get_user_by_email(&normalize_email(email)).await? else {
        log::info!("Password reset requested for unknown address");
        return Ok(());
    };
    let token = Uuid::new_v4().simple().to_string();
    store
        .save_reset_token(&token, user.id, Utc::now() + Duration::minutes(ttl_minutes))
        .await?;
    let link = format!("{}/reset-password?token={}", frontend_url, token);
    notifier
        .send(mail::password_reset_mail(&user.email, &user.name, &link, ttl_minutes))
        .await;
    Ok(())
}

pub async fn reset_password(store: &dyn Store, token: &str, password: &str) -> Res<()> {
    check_password(password)?;
    let user_id = store
        .consume_reset_token(token.trim())
        .await?
        .ok_or_else(|| AppError::Validation("Reset token is invalid or expired".to_string()))?;
    store.set_password(user_id, hash_password(password)?).await?;
    log::info!("Password of user {} reset", user_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use db::memory::MemoryStore;
    use notifier::{events::Broadcaster, mail::MemoryMailer};

    use super::*;
    use db::repo::{TokenStore, UserStore};

    fn jwt_config() -> JwtConfig {
        JwtConfig {
            secret: "secret".to_string(),
            expiration_hours: 1,
        }
    }

    fn register_req(email: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            username: None,
            name: "Grace Hopper".to_string(),
            password: "correct horse".to_string(),
        }
    }

    #[tokio::test]
    async fn admin_emails_provision_admins() {
        let store = MemoryStore::new();
        let admins = vec!["boss@example.com".to_string()];

        let admin = register(&store, &admins, register_req(" Boss@Example.com ")).await.unwrap();
        let client = register(&store, &admins, register_req("c@example.com")).await.unwrap();

        assert_eq!(admin.email, "boss@example.com");
        assert!(admin.is_admin());
        assert!(!client.is_admin());
    }

    #[tokio::test]
    async fn duplicate_and_weak_registrations_fail() {
        let store = MemoryStore::new();
        register(&store, &[], register_req("a@example.com")).await.unwrap();

        assert!(matches!(
            register(&store, &[], register_req("a@example.com")).await,
            Err(AppError::Validation(_))
        ));
        let mut weak = register_req("b@example.com");
        weak.password = "short".to_string();
        assert!(matches!(
            register(&store, &[], weak).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn login_issues_a_token_with_the_stored_role() {
        let store = MemoryStore::new();
        let admins = vec!["boss@example.com".to_string()];
        register(&store, &admins, register_req("boss@example.com")).await.unwrap();

        let auth = login(
            &store,
            &jwt_config(),
            LoginRequest {
                email: "boss@example.com".to_string(),
                password: "correct horse".to_string(),
            },
        )
        .await
        .unwrap();
        let claims = jwt::validate_jwt(&auth.token, "secret").unwrap();
        assert_eq!(claims.user_id, auth.user.id);
        assert_eq!(claims.role, Role::Admin);

        let wrong = login(
            &store,
            &jwt_config(),
            LoginRequest {
                email: "boss@example.com".to_string(),
                password: "battery staple".to_string(),
            },
        )
        .await;
        assert!(matches!(wrong, Err(AppError::Unauthenticated(_))));
    }

    #[tokio::test]
    async fn logout_revokes_the_token_id() {
        let store = MemoryStore::new();
        register(&store, &[], register_req("a@example.com")).await.unwrap();
        let auth = login(
            &store,
            &jwt_config(),
            LoginRequest {
                email: "a@example.com".to_string(),
                password: "correct horse".to_string(),
            },
        )
        .await
        .unwrap();
        let claims = jwt::validate_jwt(&auth.token, "secret").unwrap();

        logout(&store, &claims).await.unwrap();
        assert!(store.is_revoked(claims.jti).await.unwrap());
    }

    #[tokio::test]
    async fn reset_link_works_once() {
        let store = MemoryStore::new();
        let mailer = Arc::new(MemoryMailer::default());
        let notifier = Notifier::new(mailer.clone(), Broadcaster::default(), None);
        let user = register(&store, &[], register_req("a@example.com")).await.unwrap();

        forgot_password(&store, &notifier, "https://app.example", 30, "a@example.com")
            .await
            .unwrap();
        forgot_password(&store, &notifier, "https://app.example", 30, "nobody@example.com")
            .await
            .unwrap();

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec![user.email.clone()]);
        let token = sent[0]
            .body
            .split("token=")
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .unwrap()
            .to_string();

        reset_password(&store, &token, "new password").await.unwrap();
        assert!(matches!(
            reset_password(&store, &token, "another password").await,
            Err(AppError::Validation(_))
        ));

        let (_, credentials) = store.get_credentials("a@example.com").await.unwrap().unwrap();
        assert!(verify_password("new password", &credentials.password_hash).unwrap());
    }
}
