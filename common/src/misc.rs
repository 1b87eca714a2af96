use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Admin => "admin",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "client" => Ok(Role::Client),
            "admin" => Ok(Role::Admin),
            other => Err(AppError::Validation(format!("Unknown role: {}", other))),
        }
    }
}

/// Payment progress of a job. Variants are ordered so that a legal
/// transition always moves to a strictly greater value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Partial,
    Completed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Partial => "Partial",
            PaymentStatus::Completed => "Completed",
        }
    }

    /// The only state reachable from `self`, if any.
    pub fn next(&self) -> Option<PaymentStatus> {
        match self {
            PaymentStatus::Pending => Some(PaymentStatus::Partial),
            PaymentStatus::Partial => Some(PaymentStatus::Completed),
            PaymentStatus::Completed => None,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(PaymentStatus::Pending),
            "Partial" => Ok(PaymentStatus::Partial),
            "Completed" => Ok(PaymentStatus::Completed),
            other => Err(AppError::Internal(format!(
                "Unknown payment status: {}",
                other
            ))),
        }
    }
}

// job fulfilment labels
pub const STATUS_PENDING_PAYMENT: &str = "Pending Payment";
pub const STATUS_IN_PROGRESS: &str = "In Progress";
pub const STATUS_COMPLETED: &str = "Completed";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_status_only_moves_forward() {
        assert_eq!(PaymentStatus::Pending.next(), Some(PaymentStatus::Partial));
        assert_eq!(PaymentStatus::Partial.next(), Some(PaymentStatus::Completed));
        assert_eq!(PaymentStatus::Completed.next(), None);
        assert!(PaymentStatus::Pending < PaymentStatus::Partial);
        assert!(PaymentStatus::Partial < PaymentStatus::Completed);
    }

    #[test]
    fn role_parsing_is_case_insensitive() {
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(" client ".parse::<Role>().unwrap(), Role::Client);
        assert!("writer".parse::<Role>().is_err());
    }
}
