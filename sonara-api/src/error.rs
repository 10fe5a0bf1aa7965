//! Error handling for the API server
//!
//! Handlers return `ApiResult<T>`; every library error converts into
//! [`ApiError`], which renders as
//!
//! ```json
//! { "error": "<machine code>", "message": "<text>" }
//! ```
//!
//! Storage and other internal failures are logged and answered with a generic
//! 500 so that no internal detail reaches the client.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use sonara_shared::auth::{jwt::JwtError, middleware::AuthError, password::PasswordError};
use sonara_shared::billing::BillingError;
use sonara_shared::store::StoreError;
use std::fmt;

/// API result type alias
pub type ApiResult<T> = Result<T, ApiError>;

/// Message shared by every unauthenticated response
pub const UNAUTHENTICATED_MESSAGE: &str = "Invalid or missing credentials";

/// Unified API error type
#[derive(Debug)]
pub enum ApiError {
    /// Bad request (400)
    BadRequest(String),

    /// Unrecognized payment callback status (400)
    UnknownStatus(String),

    /// Unauthorized (401)
    Unauthorized(String),

    /// Forbidden (403), including missing premium entitlement
    Forbidden(String),

    /// Not found (404)
    NotFound(String),

    /// Conflict (409)
    Conflict(String),

    /// Unprocessable entity (422)
    ValidationError(Vec<ValidationErrorDetail>),

    /// Internal server error (500)
    InternalError(String),

    /// Service unavailable (503)
    ServiceUnavailable(String),
}

/// Validation error detail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrorDetail {
    pub field: String,
    pub message: String,
}

impl ValidationErrorDetail {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (e.g. "unauthorized", "conflict")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ValidationErrorDetail>>,
}

impl ApiError {
    /// Uniform 401 used for every authentication failure
    pub fn unauthenticated() -> Self {
        ApiError::Unauthorized(UNAUTHENTICATED_MESSAGE.to_string())
    }

    /// 422 for a single field
    pub fn invalid_field(field: &str, message: &str) -> Self {
        ApiError::ValidationError(vec![ValidationErrorDetail::new(field, message)])
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::UnknownStatus(status) => write!(f, "Unknown payment status: {}", status),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::ValidationError(errors) => {
                write!(f, "Validation failed: {} errors", errors.len())
            }
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            ApiError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg, None),
            ApiError::UnknownStatus(status) => (
                StatusCode::BAD_REQUEST,
                "unknown_status",
                format!("Unrecognized payment status: {}", status),
                None,
            ),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg, None),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg, None),
            ApiError::ValidationError(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                "Request validation failed".to_string(),
                Some(errors),
            ),
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            ApiError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                msg,
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
            details,
        });

        (status, body).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(_: AuthError) -> Self {
        ApiError::unauthenticated()
    }
}

impl From<JwtError> for ApiError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::MissingSecret | JwtError::CreateError(_) => {
                ApiError::InternalError(format!("Token service failure: {}", err))
            }
            JwtError::Expired | JwtError::Malformed(_) | JwtError::WrongKind { .. } => {
                ApiError::unauthenticated()
            }
        }
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        ApiError::InternalError(format!("Password operation failed: {}", err))
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => {
                ApiError::Conflict("An active or trial subscription already exists".to_string())
            }
            StoreError::Duplicate("email") => {
                ApiError::Conflict("Email already exists".to_string())
            }
            StoreError::Duplicate(what) => ApiError::Conflict(format!("Duplicate {}", what)),
            StoreError::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            StoreError::Database(e) => ApiError::InternalError(format!("Database error: {}", e)),
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Conflict(_) => {
                ApiError::Conflict("An active or trial subscription already exists".to_string())
            }
            BillingError::NotFound(_) => ApiError::NotFound("Payment not found".to_string()),
            BillingError::UnknownStatus(status) => ApiError::UnknownStatus(status),
            BillingError::InvalidAmount(_) => {
                ApiError::invalid_field("amount", "Amount must be a positive number of minor units")
            }
            BillingError::ActivationDeferred { .. } => ApiError::ServiceUnavailable(
                "Payment recorded; subscription activation will be retried".to_string(),
            ),
            BillingError::Store(e) => e.into(),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut details: Vec<ValidationErrorDetail> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |error| ValidationErrorDetail {
                    field: field.to_string(),
                    message: error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "Validation failed".to_string()),
                })
            })
            .collect();
        details.sort_by(|a, b| a.field.cmp(&b.field));
        ApiError::ValidationError(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ApiError::BadRequest("Invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: Invalid input");

        let err = ApiError::ValidationError(vec![
            ValidationErrorDetail::new("email", "Invalid email format"),
            ValidationErrorDetail::new("password", "Password too short"),
        ]);
        assert_eq!(err.to_string(), "Validation failed: 2 errors");
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (ApiError::unauthenticated(), StatusCode::UNAUTHORIZED),
            (ApiError::Forbidden("no".into()), StatusCode::FORBIDDEN),
            (ApiError::UnknownStatus("refunded".into()), StatusCode::BAD_REQUEST),
            (ApiError::invalid_field("plan", "bad"), StatusCode::UNPROCESSABLE_ENTITY),
            (ApiError::InternalError("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_billing_error_mapping() {
        assert!(matches!(ApiError::from(BillingError::Conflict(1)), ApiError::Conflict(_)));
        assert!(matches!(
            ApiError::from(BillingError::NotFound("ref".into())),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            ApiError::from(BillingError::UnknownStatus("x".into())),
            ApiError::UnknownStatus(s) if s == "x"
        ));
        assert!(matches!(
            ApiError::from(BillingError::ActivationDeferred {
                payment_id: 1,
                source: StoreError::NotFound("subscription"),
            }),
            ApiError::ServiceUnavailable(_)
        ));
    }

    #[test]
    fn test_token_errors_are_uniform() {
        let expired = ApiError::from(JwtError::Expired).to_string();
        let malformed = ApiError::from(JwtError::Malformed("bad".into())).to_string();
        let missing = ApiError::from(AuthError::MissingCredentials).to_string();

        assert_eq!(expired, malformed);
        assert_eq!(expired, missing);
    }
}
