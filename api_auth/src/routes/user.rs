use std::sync::Arc;

use actix_web::{Responder, get, put, web};
use common::{error::Res, http::Success, jwt::JwtClaims};
use db::repo::Store;
use uuid::Uuid;

use crate::{dtos::auth::RoleUpdateRequest, services};

/// Endpoint to retrieve the current authenticated user's information.
///
/// # Output
/// - Success: Returns a JSON object with the user's profile and role
/// - Error: Returns 401 Unauthorized if no valid token is provided or 404 Not Found if user doesn't exist
///
/// # Frontend Example
/// ```javascript
/// const response = await fetch('/api/dashboard/auth/me', {
///   headers: {
///     'Authorization': `Bearer ${localStorage.getItem('authToken')}`
///   }
/// });
/// const user = await response.json();
/// // { id: "a1b2c3d4-...", email: "user@example.com", name: "Jane Doe", role: "client", ... }
/// ```
#[get("/me")]
pub async fn get_me(
    claims: web::ReqData<JwtClaims>,
    store: web::Data<Arc<dyn Store>>,
) -> Res<impl Responder> {
    let user = services::user::get_me(store.get_ref().as_ref(), claims.user_id).await?;
    Success::ok(user)
}

/// Changes the role of a user. Admins only.
///
/// # Input
/// JSON body `{ "role": "admin" }` or `{ "role": "client" }`.
#[put("/{user_id}/role")]
pub async fn put_role(
    claims: web::ReqData<JwtClaims>,
    path: web::Path<Uuid>,
    req: web::Json<RoleUpdateRequest>,
    store: web::Data<Arc<dyn Store>>,
) -> Res<impl Responder> {
    let user = services::user::set_role(
        store.get_ref().as_ref(),
        claims.user_id,
        path.into_inner(),
        req.role,
    )
    .await?;
    Success::ok(user)
}
