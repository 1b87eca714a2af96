use common::misc::Role;

pub struct UserCreateRequest {
    pub email: String,
    pub username: Option<String>,
    pub name: String,
    pub role: Role,
    pub password_hash: String,
}
