/// Subscription endpoints
///
/// - `GET  /v1/subscriptions` - Subscription history, newest first
/// - `POST /v1/subscriptions` - Purchase a plan, replacing any current one
/// - `POST /v1/subscriptions/trial` - Start a free trial
/// - `POST /v1/subscriptions/cancel` - Cancel the current subscription
/// - `GET  /v1/subscriptions/me` - Current entitlement
///
/// Plans are `basic`, `pro` and `family`; anything else is a 422.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use sonara_shared::{
    auth::middleware::AuthContext,
    models::subscription::{Plan, Subscription},
};

/// Body of purchase and trial requests
#[derive(Debug, Deserialize)]
pub struct PlanRequest {
    pub plan: String,
}

impl PlanRequest {
    pub(crate) fn parse_plan(&self) -> ApiResult<Plan> {
        parse_plan(&self.plan)
    }
}

pub(crate) fn parse_plan(raw: &str) -> ApiResult<Plan> {
    raw.parse()
        .map_err(|_| ApiError::invalid_field("plan", "Plan must be one of: basic, pro, family"))
}

/// Cancel response
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    /// False when there was nothing to cancel
    pub canceled: bool,
    pub subscription: Option<Subscription>,
}

/// Current entitlement response
#[derive(Debug, Serialize)]
pub struct CurrentSubscriptionResponse {
    pub has_active_subscription: bool,
    pub subscription: Option<Subscription>,
}

/// Purchases `plan`
///
/// Any live trial or subscription is canceled in the same step.
pub async fn purchase(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<PlanRequest>,
) -> ApiResult<(StatusCode, Json<Subscription>)> {
    let plan = req.parse_plan()?;
    let subscription = state.ledger.purchase(auth.user_id, plan).await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

/// Starts a trial of `plan`
///
/// # Errors
///
/// - `409 Conflict`: A trial or subscription is already live
pub async fn start_trial(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<PlanRequest>,
) -> ApiResult<(StatusCode, Json<Subscription>)> {
    let plan = req.parse_plan()?;
    let subscription = state.ledger.start_trial(auth.user_id, plan).await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

/// Cancels the live subscription; succeeds with `canceled: false` if none
pub async fn cancel(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<CancelResponse>> {
    let subscription = state.ledger.cancel(auth.user_id).await?;
    Ok(Json(CancelResponse {
        canceled: subscription.is_some(),
        subscription,
    }))
}

pub async fn current(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<CurrentSubscriptionResponse>> {
    let subscription = state.ledger.current_entitlement(auth.user_id).await?;
    Ok(Json(CurrentSubscriptionResponse {
        has_active_subscription: subscription.is_some(),
        subscription,
    }))
}

pub async fn history(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<Vec<Subscription>>> {
    Ok(Json(state.ledger.history(auth.user_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plan() {
        assert_eq!(parse_plan("pro").unwrap(), Plan::Pro);
        assert!(matches!(parse_plan("platinum"), Err(ApiError::ValidationError(_))));
        assert!(matches!(parse_plan(""), Err(ApiError::ValidationError(_))));
    }
}
