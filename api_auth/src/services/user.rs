use common::{
    error::{AppError, Res},
    misc::Role,
};
use db::{
    models::user::User,
    repo::{Store, require_user},
};
use uuid::Uuid;

pub async fn get_me(store: &dyn Store, user_id: Uuid) -> Res<User> {
    require_user(store, user_id).await
}

/// Changes the role of `target_id`. Only admins may do this, and the last
/// admin cannot be demoted.
pub async fn set_role(store: &dyn Store, actor_id: Uuid, target_id: Uuid, role: Role) -> Res<User> {
    let actor = require_user(store, actor_id).await?;
    if !actor.is_admin() {
        return Err(AppError::Unauthorized(
            "Only admins can change roles".to_string(),
        ));
    }
    let target = require_user(store, target_id).await?;
    if target.is_admin() && !role.is_admin() {
        let admins = store.list_admins().await?;
        if admins.len() <= 1 {
            return Err(AppError::InvalidState(
                "The last admin cannot be demoted".to_string(),
            ));
        }
    }
    let updated = store
        .set_role(target.id, role)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", target.id)))?;
    log::info!("User {} set role of {} to {}", actor.id, updated.id, role);
    Ok(updated)
}
