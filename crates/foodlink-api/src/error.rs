use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::warn;

use foodlink_types::FoodlinkError;
use foodlink_types::api::ErrorResponse;

/// Error half of every handler's result.
#[derive(Debug)]
pub enum ApiError {
    /// Missing, malformed or expired session token.
    Unauthenticated,
    Domain(FoodlinkError),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<FoodlinkError> for ApiError {
    fn from(e: FoodlinkError) -> Self {
        Self::Domain(e)
    }
}

pub fn status_for(e: &FoodlinkError) -> StatusCode {
    match e {
        FoodlinkError::Validation(_) => StatusCode::BAD_REQUEST,
        FoodlinkError::Unauthorized(_) => StatusCode::FORBIDDEN,
        FoodlinkError::InvalidTransition { .. } | FoodlinkError::Conflict(_) => {
            StatusCode::CONFLICT
        }
        FoodlinkError::NotFound(_) => StatusCode::NOT_FOUND,
        FoodlinkError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse {
                    error: "unauthenticated".into(),
                    message: "missing or invalid session token".into(),
                },
            ),
            Self::Domain(e) => {
                let status = status_for(&e);
                if status == StatusCode::SERVICE_UNAVAILABLE {
                    warn!("Request failed: {}", e);
                }
                (
                    status,
                    ErrorResponse {
                        error: e.code().into(),
                        message: e.to_string(),
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foodlink_types::models::DonationStatus;

    #[test]
    fn taxonomy_maps_to_statuses() {
        let cases = [
            (FoodlinkError::Validation("x".into()), 400),
            (FoodlinkError::Unauthorized("x".into()), 403),
            (
                FoodlinkError::invalid_transition(DonationStatus::Accepted, "accept"),
                409,
            ),
            (FoodlinkError::Conflict("x".into()), 409),
            (FoodlinkError::NotFound("x".into()), 404),
            (FoodlinkError::ServiceUnavailable("x".into()), 503),
        ];
        for (e, code) in cases {
            assert_eq!(status_for(&e).as_u16(), code, "{:?}", e);
        }
    }

    #[test]
    fn unauthenticated_is_401() {
        let response = ApiError::Unauthenticated.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
