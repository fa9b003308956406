use thiserror::Error;

use crate::models::DonationStatus;

/// Typed failures returned to callers of state-changing and discovery
/// operations. Every rejected operation surfaces exactly one of these.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FoodlinkError {
    /// Malformed input: bad coordinates, missing fields, non-positive quantity.
    #[error("validation error: {0}")]
    Validation(String),

    /// The caller's role or identity does not satisfy the guard.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The donation is not in a state that allows the requested action.
    /// Clients should re-fetch and retry against current state.
    #[error("invalid transition: {action} not allowed while {from}")]
    InvalidTransition {
        from: DonationStatus,
        action: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness violation (duplicate email, second feedback for a donation).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The store or channel infrastructure failed or timed out. Reads may be
    /// retried; writes must re-check current state first.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl FoodlinkError {
    /// Stable machine-readable code used in HTTP bodies and in-channel errors.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Unauthorized(_) => "unauthorized",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::ServiceUnavailable(_) => "service_unavailable",
        }
    }

    pub fn invalid_transition(from: DonationStatus, action: impl Into<String>) -> Self {
        Self::InvalidTransition {
            from,
            action: action.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FoodlinkError>;
