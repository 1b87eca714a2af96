use actix_web::{HttpResponse, http::StatusCode};
use thiserror::Error;

pub type Res<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    // === CONVERSION ERRORS ===
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JWT error: {0}")]
    JWT(#[from] jsonwebtoken::errors::Error),

    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // === APPLICATION ERRORS ===
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Total amount mismatch: expected {expected:.2}, got {provided:.2}")]
    InvalidAmount { expected: f64, provided: f64 },

    #[error("Authentication error: {0}")]
    Unauthenticated(String),

    #[error("Authorization error: {0}")]
    Unauthorized(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Payment gateway error: {0}")]
    PaymentGateway(String),

    /// The gateway answered and refused the request. Retrying will not help.
    #[error("Payment gateway rejected the request: {0}")]
    PaymentRejected(String),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    /// Machine readable error kind sent next to the human readable message.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) | AppError::InvalidAmount { .. } => "validation_error",
            AppError::Unauthenticated(_) | AppError::JWT(_) => "unauthenticated",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::NotFound(_) => "not_found",
            AppError::InvalidState(_) => "invalid_state",
            AppError::PaymentGateway(_) | AppError::PaymentRejected(_) => "payment_gateway_error",
            AppError::Database(_)
            | AppError::Reqwest(_)
            | AppError::Io(_)
            | AppError::Internal(_) => "internal_error",
        }
    }

    /// Failures worth another attempt: the network or the gateway itself.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::PaymentGateway(_) | AppError::Reqwest(_))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::InvalidAmount { .. } | AppError::InvalidState(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Unauthenticated(_) | AppError::JWT(_) => StatusCode::UNAUTHORIZED,
            AppError::Unauthorized(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PaymentGateway(_) | AppError::PaymentRejected(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_)
            | AppError::Reqwest(_)
            | AppError::Io(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_http_response(&self) -> HttpResponse {
        let is_dev = cfg!(debug_assertions);
        let kind = self.kind();

        let to_internal_json = |err_msg: &str| {
            if is_dev {
                serde_json::json!({ "error": err_msg, "kind": kind })
            } else {
                serde_json::json!({ "error": "Internal server error", "kind": kind })
            }
        };

        match self {
            // === CONVERSION ERRORS ===
            AppError::Database(error) => {
                log::error!("Database error: {}", error);
                HttpResponse::InternalServerError().json(to_internal_json(&error.to_string()))
            }
            AppError::JWT(error) => {
                log::debug!("JWT error: {}", error);
                HttpResponse::Unauthorized()
                    .json(serde_json::json!({ "error": "Invalid or expired token", "kind": kind }))
            }
            AppError::Reqwest(error) => {
                log::error!("Reqwest error: {}", error);
                HttpResponse::InternalServerError().json(to_internal_json(&error.to_string()))
            }
            AppError::Io(error) => {
                log::error!("IO error: {}", error);
                HttpResponse::InternalServerError().json(to_internal_json(&error.to_string()))
            }
            AppError::Internal(error) => {
                log::error!("Internal error: {}", error);
                HttpResponse::InternalServerError().json(to_internal_json(error.as_str()))
            }

            // === APPLICATION ERRORS ===
            AppError::PaymentGateway(error) | AppError::PaymentRejected(error) => {
                log::error!("Payment gateway error: {}", error);
                HttpResponse::build(self.status())
                    .json(serde_json::json!({ "error": self.to_string(), "kind": kind }))
            }
            _ => HttpResponse::build(self.status())
                .json(serde_json::json!({ "error": self.to_string(), "kind": kind })),
        }
    }
}

impl actix_web::ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.status()
    }

    fn error_response(&self) -> HttpResponse {
        self.to_http_response()
    }
}
