/// Authentication endpoints
///
/// - `POST /v1/auth/register` - Register new user
/// - `POST /v1/auth/login` - Login and get tokens
/// - `POST /v1/auth/refresh` - Exchange a refresh token for an access token
///
/// Login answers the same 401 for an unknown email and a wrong password, and
/// spends the same hashing work on both.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    routes::users::UserProfile,
};
use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sonara_shared::{
    auth::password,
    models::user::{CreateUser, User},
    UserId,
};
use validator::Validate;

/// Register request
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,

    #[validate(length(min = 1, max = 100, message = "First name must be 1-100 characters"))]
    pub first_name: String,

    #[validate(length(min = 1, max = 100, message = "Last name must be 1-100 characters"))]
    pub last_name: String,

    /// Optional UI locale, defaults to "en"
    #[validate(length(min = 2, max = 10, message = "Locale must be 2-10 characters"))]
    pub locale: Option<String>,
}

/// Login request
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    pub password: String,
}

/// Login response
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: UserId,
    pub access_token: String,
    pub refresh_token: String,

    /// Always "Bearer"
    pub token_type: &'static str,

    /// Access token expiry
    pub expires_at: DateTime<Utc>,
}

/// Refresh token request
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Refresh token response
#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
}

/// Register a new user
///
/// # Endpoint
///
/// ```text
/// POST /v1/auth/register
/// Content-Type: application/json
///
/// {
///   "email": "ada@example.com",
///   "password": "pw",
///   "first_name": "Ada",
///   "last_name": "Lovelace"
/// }
/// ```
///
/// # Errors
///
/// - `409 Conflict`: Email already exists
/// - `422 Unprocessable Entity`: Validation failed
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<UserProfile>)> {
    req.validate()?;

    let password_hash = password::hash_password(&req.password)?;

    let user = state
        .users
        .create_user(
            CreateUser {
                email: User::normalize_email(&req.email),
                password_hash,
                first_name: Some(req.first_name.trim().to_string()),
                last_name: Some(req.last_name.trim().to_string()),
                locale: req.locale,
            },
            state.clock.now(),
        )
        .await?;

    tracing::info!(user_id = user.id, "User registered");

    Ok((StatusCode::CREATED, Json(UserProfile::from(user))))
}

/// Login endpoint
///
/// # Errors
///
/// - `401 Unauthorized`: Unknown email or wrong password
/// - `422 Unprocessable Entity`: Validation failed
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    req.validate()?;

    let Some(user) = state.users.find_user_by_email(&req.email).await? else {
        password::verify_against_dummy(&req.password)?;
        tracing::info!("Login rejected: unknown email");
        return Err(ApiError::unauthenticated());
    };

    if !password::verify_password(&req.password, &user.password_hash)? {
        tracing::info!(user_id = user.id, "Login rejected: wrong password");
        return Err(ApiError::unauthenticated());
    }

    state.users.record_login(user.id, state.clock.now()).await?;

    let access = state.tokens.issue_access_token(user.id)?;
    let refresh = state.tokens.issue_refresh_token(user.id)?;

    tracing::info!(user_id = user.id, "User logged in");

    Ok(Json(LoginResponse {
        user_id: user.id,
        access_token: access.token,
        refresh_token: refresh.token,
        token_type: "Bearer",
        expires_at: access.expires_at,
    }))
}

/// Token refresh endpoint
///
/// # Errors
///
/// - `401 Unauthorized`: Invalid, expired or non-refresh token
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<Json<RefreshResponse>> {
    let access = state.tokens.refresh(&req.refresh_token)?;

    Ok(Json(RefreshResponse {
        access_token: access.token,
        token_type: "Bearer",
        expires_at: access.expires_at,
    }))
}
