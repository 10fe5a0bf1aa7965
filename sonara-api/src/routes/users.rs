/// The caller's own profile
///
/// - `GET /v1/me`

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sonara_shared::{
    auth::middleware::AuthContext,
    models::{subscription::Subscription, user::User},
    UserId,
};

/// Public view of a user
#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub display_name: Option<String>,
    pub locale: String,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            display_name: user.display_name(),
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            locale: user.locale,
            created_at: user.created_at,
            last_login_at: user.last_login_at,
        }
    }
}

/// Profile plus current entitlement
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: UserProfile,

    /// Live trial or paid subscription, or null
    pub subscription: Option<Subscription>,
}

/// Returns the authenticated caller's profile
///
/// The identity comes only from the verified token; there is no way to ask
/// for someone else's profile here.
pub async fn me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<MeResponse>> {
    // A token can outlive its account.
    let user = state
        .users
        .find_user_by_id(auth.user_id)
        .await?
        .ok_or_else(ApiError::unauthenticated)?;

    let subscription = state.ledger.current_entitlement(auth.user_id).await?;

    Ok(Json(MeResponse {
        user: user.into(),
        subscription,
    }))
}
