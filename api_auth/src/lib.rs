use actix_web::web;
use middleware::auth::AuthMiddleware;

pub mod middleware {
    pub mod auth;
}

pub mod routes {
    pub mod auth;
    pub mod user;
}

pub mod services {
    pub mod auth;
    pub mod user;
}

pub mod dtos {
    pub mod auth;
}

/// Public account endpoints.
pub fn mount_auth() -> actix_web::Scope {
    web::scope("/auth")
        .service(routes::auth::post_register)
        .service(routes::auth::post_login)
        .service(routes::auth::post_forgot_password)
        .service(routes::auth::post_reset_password)
}

/// Endpoints for the signed-in user.
pub fn mount_session() -> actix_web::Scope {
    web::scope("/auth")
        .service(routes::user::get_me)
        .service(routes::auth::post_logout)
}

pub fn mount_users() -> actix_web::Scope {
    web::scope("/users").service(routes::user::put_role)
}

pub fn auth_middleware() -> AuthMiddleware {
    AuthMiddleware::new()
}
