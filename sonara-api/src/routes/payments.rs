/// Payment endpoints
///
/// - `POST /v1/payments` - Record a pending payment (session required)
/// - `POST /v1/payments/callback` - Provider callback (public)
///
/// # Callback contract
///
/// ```text
/// POST /v1/payments/callback
///
/// { "paymentId": "<provider ref>", "status": "succeeded", "userId": 42, ... }
/// ```
///
/// | Case                                  | Response                     |
/// |---------------------------------------|------------------------------|
/// | pending → succeeded                   | 200 `activated`              |
/// | pending → failed                      | 200 `failed`                 |
/// | already resolved (redelivery)         | 200 `already_resolved`       |
/// | status not `succeeded`/`failed`       | 400 `unknown_status`         |
/// | no such payment for that user         | 404 `not_found`              |
/// | recorded, activation not yet possible | 503 `service_unavailable`    |
///
/// The whole request body is stored with the payment.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    routes::subscriptions::parse_plan,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sonara_shared::{
    auth::middleware::AuthContext,
    billing::CallbackOutcome,
    models::{
        payment::{Payment, PaymentStatus},
        subscription::{Plan, Subscription},
    },
    UserId,
};

/// Create payment request
#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub plan: String,

    /// Amount in minor currency units
    pub amount: i64,
}

/// Create payment response
#[derive(Debug, Serialize)]
pub struct CreatePaymentResponse {
    pub payment_id: i64,
    pub provider_ref: String,
    pub plan: Plan,
    pub amount: i64,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,

    /// Where the client completes the payment
    pub checkout_url: String,
}

/// Fields of the provider callback this service reads
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackRequest {
    /// Provider reference returned by `POST /v1/payments`
    pub payment_id: String,
    pub status: String,
    pub user_id: UserId,
}

/// Callback response
#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    /// "activated", "failed" or "already_resolved"
    pub result: &'static str,
    pub payment_id: i64,
    pub status: PaymentStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<Subscription>,
}

impl From<CallbackOutcome> for CallbackResponse {
    fn from(outcome: CallbackOutcome) -> Self {
        match outcome {
            CallbackOutcome::Activated {
                payment_id,
                subscription,
            } => Self {
                result: "activated",
                payment_id,
                status: PaymentStatus::Succeeded,
                subscription: Some(subscription),
            },
            CallbackOutcome::Failed { payment_id } => Self {
                result: "failed",
                payment_id,
                status: PaymentStatus::Failed,
                subscription: None,
            },
            CallbackOutcome::AlreadyResolved { payment_id, status } => Self {
                result: "already_resolved",
                payment_id,
                status,
                subscription: None,
            },
        }
    }
}

/// Records a pending payment for the caller
///
/// # Errors
///
/// - `422 Unprocessable Entity`: Unknown plan or non-positive amount
pub async fn create_payment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreatePaymentRequest>,
) -> ApiResult<(StatusCode, Json<CreatePaymentResponse>)> {
    let plan = parse_plan(&req.plan)?;
    let payment: Payment = state
        .reconciler
        .record_pending_payment(auth.user_id, plan, req.amount)
        .await?;

    let checkout_url = format!(
        "{}/{}",
        state.config.billing.checkout_base_url.trim_end_matches('/'),
        payment.provider_ref
    );

    Ok((
        StatusCode::CREATED,
        Json(CreatePaymentResponse {
            payment_id: payment.id,
            provider_ref: payment.provider_ref,
            plan: payment.plan,
            amount: payment.amount,
            status: payment.status,
            created_at: payment.created_at,
            checkout_url,
        }),
    ))
}

/// Applies a provider callback
///
/// # Errors
///
/// - `400 Bad Request`: Body is not JSON or lacks a required field
pub async fn callback(
    State(state): State<AppState>,
    payload: Result<Json<JsonValue>, JsonRejection>,
) -> ApiResult<Json<CallbackResponse>> {
    let Json(body) = payload
        .map_err(|e| ApiError::BadRequest(format!("Invalid callback body: {}", e.body_text())))?;
    let req: CallbackRequest = serde_json::from_value(body.clone())
        .map_err(|e| ApiError::BadRequest(format!("Invalid callback body: {}", e)))?;

    tracing::info!(
        provider_ref = %req.payment_id,
        status = %req.status,
        user_id = req.user_id,
        "Payment callback received"
    );

    let outcome = state
        .reconciler
        .apply_callback(&req.payment_id, &req.status, body, req.user_id)
        .await?;

    Ok(Json(outcome.into()))
}
