use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use super::responses::ErrorBody;
use crate::challenge::ChallengeError;
use crate::service::ServiceError;

/// An HTTP error: status, machine-readable code and message.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        let message = e.to_string();
        match e {
            ServiceError::InvalidEmail => Self::bad_request("invalid_email", message),
            ServiceError::NoEligibleGroup => Self::not_found("no_eligible_group", message),
            ServiceError::Challenge(ChallengeError::InvalidToken) => {
                Self::bad_request("invalid_token", message)
            }
            ServiceError::Challenge(ChallengeError::Expired) => {
                Self::bad_request("expired", message)
            }
            ServiceError::Challenge(ChallengeError::InvalidCode) => {
                Self::bad_request("invalid_code", message)
            }
            ServiceError::UnknownGroup(_) => Self::not_found("unknown_group", message),
            ServiceError::UnknownTarget(_) => Self::not_found("unknown_target", message),
            ServiceError::DomainMismatch => {
                Self::new(StatusCode::FORBIDDEN, "domain_mismatch", message)
            }
            ServiceError::InvalidCommitment => Self::bad_request("invalid_commitment", message),
            ServiceError::GroupFull => Self::new(StatusCode::CONFLICT, "group_full", message),
            ServiceError::StaleGroupState => {
                Self::new(StatusCode::FORBIDDEN, "stale_group_state", message)
            }
            ServiceError::InvalidProof => {
                Self::new(StatusCode::FORBIDDEN, "invalid_proof", message)
            }
            ServiceError::DuplicateSubmission => {
                Self::new(StatusCode::CONFLICT, "duplicate_submission", message)
            }
            ServiceError::Validation(_) => Self::bad_request("validation_error", message),
            ServiceError::Unavailable(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "verification_unavailable",
                message,
            ),
            ServiceError::Internal(detail) => {
                error!(error = %detail, "Internal error");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal error",
                )
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return Self::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                rejection.body_text(),
            );
        }
        Self::bad_request("malformed_request", rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            code: self.code.to_string(),
        };
        (self.status, Json(body)).into_response()
    }
}
