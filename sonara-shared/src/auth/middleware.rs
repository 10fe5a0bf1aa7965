//! Session context propagation for Axum
//!
//! Turns a raw `Authorization` header into a verified [`AuthContext`]. Every
//! failure (header missing, not a bearer value, token rejected) collapses
//! into the same `401 Unauthorized` response so callers cannot tell which
//! check failed.
//!
//! Token material is never logged. Rejections are logged with the failure
//! category and an 8-hex-digit SHA-256 fingerprint of the token.
//!
//! # Example
//!
//! ```
//! use axum::http::HeaderValue;
//! use sonara_shared::auth::jwt::TokenService;
//! use sonara_shared::auth::middleware::authenticate;
//! use sonara_shared::clock::SystemClock;
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let tokens = TokenService::new("a-signing-secret-of-at-least-32-bytes", Arc::new(SystemClock))?;
//! let issued = tokens.issue_access_token(7)?;
//!
//! let header = HeaderValue::from_str(&format!("Bearer {}", issued.token))?;
//! let auth = authenticate(Some(&header), &tokens)?;
//! assert_eq!(auth.user_id, 7);
//! # Ok(())
//! # }
//! ```

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use super::jwt::{JwtError, TokenKind, TokenService};
use crate::UserId;

/// Verified identity scoped to one request
///
/// Handlers receive it as an extractor and pass `user_id` explicitly to every
/// downstream operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    /// Authenticated user id
    pub user_id: UserId,

    /// When the presented access token expires
    pub token_expires_at: DateTime<Utc>,
}

/// Why a credential was rejected
///
/// The distinction is internal; the HTTP response is identical for all.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No Authorization header
    #[error("missing credentials")]
    MissingCredentials,

    /// Header present but not `Bearer <token>`
    #[error("malformed authorization header")]
    InvalidFormat,

    /// Token failed verification
    #[error("invalid token: {0}")]
    InvalidToken(#[from] JwtError),
}

impl AuthError {
    /// Short category used in logs
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials => "missing",
            AuthError::InvalidFormat => "malformed_header",
            AuthError::InvalidToken(JwtError::Expired) => "expired",
            AuthError::InvalidToken(JwtError::WrongKind { .. }) => "wrong_kind",
            AuthError::InvalidToken(_) => "invalid",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": "unauthorized",
                "message": "Invalid or missing credentials",
            })),
        )
            .into_response()
    }
}

/// Short, non-reversible fingerprint of a token for log correlation
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..4])
}

/// Verifies the raw `Authorization` header value
///
/// # Errors
///
/// Returns `AuthError` if the header is absent, is not a bearer value, or the
/// token does not verify as an access token.
pub fn authenticate(
    header: Option<&HeaderValue>,
    tokens: &TokenService,
) -> Result<AuthContext, AuthError> {
    let header = header.ok_or(AuthError::MissingCredentials)?;

    let value = header.to_str().map_err(|_| AuthError::InvalidFormat)?;
    let token = value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::InvalidFormat)?;

    let claim = tokens.verify(token, TokenKind::Access).map_err(|e| {
        let err = AuthError::InvalidToken(e);
        tracing::debug!(
            reason = err.reason(),
            token_fingerprint = %token_fingerprint(token),
            "Rejected bearer token"
        );
        err
    })?;

    Ok(AuthContext {
        user_id: claim.identity,
        token_expires_at: claim.expires_at,
    })
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .copied()
            .ok_or(AuthError::MissingCredentials)
    }
}
