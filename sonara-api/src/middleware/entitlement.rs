//! Entitlement layer for premium routes
//!
//! Must run after [`super::session::require_session`]. A caller without a
//! live trial or paid subscription gets 403.

use crate::{app::AppState, error::ApiError};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use sonara_shared::auth::middleware::AuthContext;

pub async fn require_entitlement(
    State(state): State<AppState>,
    auth: AuthContext,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.gate.has_access(auth.user_id).await? {
        tracing::debug!(user_id = auth.user_id, path = %req.uri().path(), "Premium access denied");
        return Err(ApiError::Forbidden(
            "An active subscription is required".to_string(),
        ));
    }

    Ok(next.run(req).await)
}
