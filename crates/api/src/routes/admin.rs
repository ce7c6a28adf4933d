//! Platform admin routes: plan catalog and refunds

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use sitecraft_billing::{PlanConfig, PlanUpdate, RefundOutcome};
use sitecraft_shared::AuthenticatedUser;

use crate::{error::ApiError, state::AppState};

pub async fn list_plans(State(state): State<AppState>) -> Result<Json<Vec<PlanConfig>>, ApiError> {
    Ok(Json(state.entitlements.plans.list().await?))
}

pub async fn get_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
) -> Result<Json<PlanConfig>, ApiError> {
    state
        .entitlements
        .plans
        .get(&plan_id)
        .await
        .map(Json)
        .ok_or(ApiError::NotFound)
}

/// Create or replace a plan; visible to checkout and the gate immediately
pub async fn update_plan(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthenticatedUser>,
    Path(plan_id): Path<String>,
    Json(update): Json<PlanUpdate>,
) -> Result<Json<PlanConfig>, ApiError> {
    let plan = state.entitlements.plans.update(&plan_id, update).await?;

    tracing::info!(
        admin_id = %admin.user_id,
        plan = %plan.id,
        price_cents = plan.price_cents,
        site_limit = plan.site_limit,
        "Plan updated"
    );

    Ok(Json(plan))
}

/// Drop the plan cache so the next read goes to storage
pub async fn reload_plans(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthenticatedUser>,
) -> Result<StatusCode, ApiError> {
    state.entitlements.plans.reload();
    tracing::info!(admin_id = %admin.user_id, "Plan cache reloaded");
    Ok(StatusCode::NO_CONTENT)
}

/// Record a refund issued at the provider
pub async fn refund_payment(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthenticatedUser>,
    Path(session_id): Path<String>,
) -> Result<Json<RefundOutcome>, ApiError> {
    let billing = state.billing()?;
    let outcome = billing.reconciler.record_refund(&session_id).await?;

    tracing::info!(
        admin_id = %admin.user_id,
        session_id = %session_id,
        applied = outcome.applied,
        plan_reverted = outcome.plan_reverted,
        "Refund recorded"
    );

    Ok(Json(outcome))
}
