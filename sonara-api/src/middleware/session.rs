//! Session layer
//!
//! Verifies `Authorization: Bearer <access token>` and inserts the resulting
//! [`AuthContext`] into the request extensions. Every failure is the same 401.

use crate::{app::AppState, error::ApiError};
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use sonara_shared::auth::middleware::{authenticate, AuthContext};

pub async fn require_session(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth: AuthContext = authenticate(req.headers().get(AUTHORIZATION), &state.tokens)?;
    req.extensions_mut().insert(auth);

    Ok(next.run(req).await)
}
