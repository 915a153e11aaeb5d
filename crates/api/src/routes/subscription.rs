//! Subscription and pricing endpoints
//!
//! Quotes are recomputed on demand and never cached server-side; the same
//! pure pricing call backs plan selection and upgrade submission, so the
//! displayed total and the submitted total cannot drift apart.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use slicevm_billing::{
    pricing, BillingError, Plan, SubscriptionRepo, SubscriptionState, UpgradeOutcome,
};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct QuoteRequest {
    pub plan_id: String,
    /// Accepted as a JSON number so a fractional quantity can be rejected
    /// with a proper error instead of a deserialization failure
    pub quantity: f64,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionStatusResponse {
    pub plan_id: Option<String>,
    pub vm_count: i32,
    pub expires_at: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    pub state: SubscriptionState,
}

/// Reject non-integer and out-of-range quantities before they reach the core
fn integral_quantity(raw: f64) -> Result<i64, BillingError> {
    if !raw.is_finite() || raw.fract() != 0.0 || raw.abs() > i64::MAX as f64 {
        return Err(BillingError::InvalidQuantity(raw));
    }
    Ok(raw as i64)
}

/// GET /api/plans
pub async fn list_plans(State(state): State<AppState>) -> Json<Vec<Plan>> {
    Json(state.catalog.plans().to_vec())
}

/// POST /api/quote
pub async fn post_quote(
    State(state): State<AppState>,
    Json(req): Json<QuoteRequest>,
) -> ApiResult<Json<slicevm_billing::Quote>> {
    let quantity = integral_quantity(req.quantity)?;
    let quote = pricing::quote(&state.catalog, &req.plan_id, quantity)?;
    Ok(Json(quote))
}

/// GET /api/accounts/{account_id}/subscription
pub async fn get_subscription_status(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> ApiResult<Json<SubscriptionStatusResponse>> {
    status_response(&state, account_id).await.map(Json)
}

async fn status_response(
    state: &AppState,
    account_id: Uuid,
) -> ApiResult<SubscriptionStatusResponse> {
    let account = state.store.account_billing(account_id).await?;
    let sub = account.subscription;
    let classified = SubscriptionState::classify(&sub, OffsetDateTime::now_utc());

    Ok(SubscriptionStatusResponse {
        plan_id: sub.plan_id,
        vm_count: sub.vm_count,
        expires_at: sub.expires_at,
        cancel_at_period_end: sub.cancel_at_period_end,
        state: classified,
    })
}

/// POST /api/accounts/{account_id}/subscription
pub async fn post_subscribe_or_upgrade(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Json(req): Json<QuoteRequest>,
) -> ApiResult<Json<UpgradeOutcome>> {
    let quantity = integral_quantity(req.quantity)?;
    let outcome = state
        .orchestrator
        .subscribe_or_upgrade(account_id, &req.plan_id, quantity)
        .await?;
    Ok(Json(outcome))
}

/// POST /api/accounts/{account_id}/subscription/cancel
pub async fn post_cancel(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> ApiResult<Json<SubscriptionStatusResponse>> {
    state.orchestrator.cancel(account_id).await?;
    status_response(&state, account_id).await.map(Json)
}

/// POST /api/accounts/{account_id}/subscription/reactivate
pub async fn post_reactivate(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> ApiResult<Json<SubscriptionStatusResponse>> {
    state.orchestrator.reactivate(account_id).await?;
    status_response(&state, account_id).await.map(Json)
}
