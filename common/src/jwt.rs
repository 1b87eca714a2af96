use actix_web::{HttpMessage, HttpResponse, dev::ServiceRequest};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    env_config::JwtConfig,
    error::{AppError, Res},
    misc::Role,
};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JwtClaims {
    pub user_id: Uuid,
    pub role: Role,
    /// Token id, persisted on logout so the token can be revoked before it expires.
    pub jti: Uuid,
    pub exp: usize,
}

impl JwtClaims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp as i64, 0).unwrap_or_else(Utc::now)
    }
}

pub struct ClaimsSpec {
    pub user_id: Uuid,
    pub role: Role,
}

/// Generates JWT token based on user object and JWT configuration options
pub fn generate_jwt(spec: ClaimsSpec, config: &JwtConfig) -> Res<String> {
    let expiration = Utc::now()
        .checked_add_signed(Duration::hours(config.expiration_hours))
        .ok_or_else(|| AppError::Internal("Token expiration overflow".to_string()))?
        .timestamp();

    let claims = JwtClaims {
        user_id: spec.user_id,
        role: spec.role,
        jti: Uuid::new_v4(),
        exp: expiration as usize,
    };

    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
    .map_err(AppError::from)
}

/// Extracts claims object from JWT token.
/// Requires JWT secret.
pub fn validate_jwt(token: &str, secret: &str) -> Res<JwtClaims> {
    let token_data = jsonwebtoken::decode::<JwtClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

pub fn get_jwt_claims_or_error(req: &ServiceRequest) -> Result<JwtClaims, HttpResponse> {
    if let Some(jwt_claims_res) = req.extensions().get::<Res<JwtClaims>>() {
        match jwt_claims_res {
            Ok(claims) => Ok(claims.clone()),
            Err(app_error) => Err(app_error.to_http_response()),
        }
    } else {
        Err(
            AppError::Unauthenticated("No authorization token provided".to_string())
                .to_http_response(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret".to_string(),
            expiration_hours: 1,
        }
    }

    #[test]
    fn issued_token_validates_with_role() {
        let user_id = Uuid::new_v4();
        let token = generate_jwt(
            ClaimsSpec {
                user_id,
                role: Role::Admin,
            },
            &config(),
        )
        .unwrap();

        let claims = validate_jwt(&token, "test-secret").unwrap();
        assert_eq!(claims.user_id, user_id);
        assert_eq!(claims.role, Role::Admin);
        assert!(claims.expires_at() > Utc::now());
    }

    #[test]
    fn every_token_gets_its_own_id() {
        let spec = || ClaimsSpec {
            user_id: Uuid::new_v4(),
            role: Role::Client,
        };
        let a = validate_jwt(&generate_jwt(spec(), &config()).unwrap(), "test-secret").unwrap();
        let b = validate_jwt(&generate_jwt(spec(), &config()).unwrap(), "test-secret").unwrap();
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = generate_jwt(
            ClaimsSpec {
                user_id: Uuid::new_v4(),
                role: Role::Client,
            },
            &config(),
        )
        .unwrap();
        assert!(matches!(
            validate_jwt(&token, "other-secret"),
            Err(AppError::JWT(_))
        ));
    }
}
