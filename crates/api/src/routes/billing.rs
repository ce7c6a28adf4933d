//! Billing routes: checkout, confirmation, Stripe webhook and entitlement

use axum::{
    extract::{Extension, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use sitecraft_billing::{
    CheckoutRequest, CheckoutResponse, ConfirmOutcome, EntitlementSummary, PlanConfig,
    WebhookAck,
};
use sitecraft_shared::AuthenticatedUser;

use crate::{error::ApiError, state::AppState};

/// Header Stripe signs webhook deliveries with
pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub session_id: String,
}

/// Start a one-off checkout for a plan
pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let billing = state.billing()?;
    let response = billing.checkout.initiate(&user, &req.plan).await?;
    Ok(Json(response))
}

/// Called by the client after the provider redirects back
pub async fn confirm_checkout(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<ConfirmRequest>,
) -> Result<Json<ConfirmOutcome>, ApiError> {
    let billing = state.billing()?;
    let outcome = billing
        .reconciler
        .confirm_checkout(&user, &req.session_id)
        .await?;
    Ok(Json(outcome))
}

/// Stripe webhook (public, signature-verified)
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookAck>, ApiError> {
    tracing::info!(body_len = body.len(), "Stripe webhook received");

    let billing = state.billing()?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Stripe webhook missing signature header");
            ApiError::BadRequest("Missing Stripe signature".to_string())
        })?;

    let ack = billing
        .reconciler
        .handle_webhook(&body, signature)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "Stripe webhook rejected");
            ApiError::from(e)
        })?;

    Ok(Json(ack))
}

/// Current plan, limits and usage
pub async fn get_entitlement(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<EntitlementSummary>, ApiError> {
    Ok(Json(state.entitlements.gate.summary(user.user_id).await?))
}

/// Public plan listing for the pricing page
pub async fn list_plans(State(state): State<AppState>) -> Result<Json<Vec<PlanConfig>>, ApiError> {
    Ok(Json(state.entitlements.plans.list().await?))
}
