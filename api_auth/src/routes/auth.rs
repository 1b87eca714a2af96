use std::sync::Arc;

use actix_web::{Responder, post, web};
use common::{env_config::Config, error::Res, http::Success, jwt::JwtClaims};
use db::repo::Store;
use notifier::Notifier;

use crate::dtos::auth::{ForgotPasswordRequest, LoginRequest, RegisterRequest, ResetPasswordRequest};
use crate::services;

/// Registers a new user with email and password authentication.
///
/// # Input
/// - `req`: JSON payload with `email`, optional `username`, `name` and `password`
///
/// # Output
/// - Success: Returns the created user object with 201 Created status
/// - Error: Returns 400 Bad Request if the email or username already exists
///
/// # Frontend Example
/// ```javascript
/// const response = await fetch('/api/auth/register', {
///   method: 'POST',
///   headers: { 'Content-Type': 'application/json' },
///   body: JSON.stringify({
///     email: 'user@example.com',
///     name: 'Jane Doe',
///     password: 'securepassword'
///   })
/// });
/// ```
#[post("/register")]
pub async fn post_register(
    req: web::Json<RegisterRequest>,
    store: web::Data<Arc<dyn Store>>,
    config: web::Data<Arc<Config>>,
) -> Res<impl Responder> {
    let user =
        services::auth::register(store.get_ref().as_ref(), &config.admin_emails, req.into_inner())
            .await?;
    Success::created(user)
}

/// Authenticates a user with email and password.
///
/// # Output
/// - Success: Returns an auth response with JWT token and user details
/// - Error: Returns 401 Unauthorized for invalid credentials
///
/// # Frontend Example
/// ```javascript
/// const response = await fetch('/api/auth/login', {
///   method: 'POST',
///   headers: { 'Content-Type': 'application/json' },
///   body: JSON.stringify({ email: 'user@example.com', password: 'securepassword' })
/// });
/// const { token, user } = await response.json();
/// localStorage.setItem('authToken', token);
/// ```
#[post("/login")]
pub async fn post_login(
    req: web::Json<LoginRequest>,
    store: web::Data<Arc<dyn Store>>,
    config: web::Data<Arc<Config>>,
) -> Res<impl Responder> {
    let auth =
        services::auth::login(store.get_ref().as_ref(), &config.jwt_config, req.into_inner())
            .await?;
    Success::ok(auth)
}

/// Sends a password reset link. Answers the same for unknown addresses.
#[post("/forgot-password")]
pub async fn post_forgot_password(
    req: web::Json<ForgotPasswordRequest>,
    store: web::Data<Arc<dyn Store>>,
    notifier: web::Data<Notifier>,
    config: web::Data<Arc<Config>>,
) -> Res<impl Responder> {
    services::auth::forgot_password(
        store.get_ref().as_ref(),
        notifier.get_ref(),
        &config.frontend_url,
        config.reset_token_ttl_minutes,
        &req.email,
    )
    .await?;
    Success::message("If the address is registered, a reset link has been sent")
}

/// Sets a new password with a token from the reset mail.
#[post("/reset-password")]
pub async fn post_reset_password(
    req: web::Json<ResetPasswordRequest>,
    store: web::Data<Arc<dyn Store>>,
) -> Res<impl Responder> {
    services::auth::reset_password(store.get_ref().as_ref(), &req.token, &req.password).await?;
    Success::message("Password updated")
}

/// Revokes the token the request was made with.
#[post("/logout")]
pub async fn post_logout(
    claims: web::ReqData<JwtClaims>,
    store: web::Data<Arc<dyn Store>>,
) -> Res<impl Responder> {
    services::auth::logout(store.get_ref().as_ref(), &claims).await?;
    Success::message("Logged out")
}
