//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sitecraft_billing::BillingError;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Authentication required")]
    Unauthorized,
    #[error("Insufficient permissions")]
    Forbidden,

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // Resource errors
    #[error("Resource not found")]
    NotFound,
    #[error("Resource already exists")]
    Conflict(String),

    // Billing errors
    #[error("Plan limit exceeded for plan {0}")]
    PlanLimitExceeded(String),
    #[error("Billing is disabled")]
    BillingDisabled,

    // Internal errors
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
    #[error("Service unavailable")]
    ServiceUnavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Authentication
            ApiError::InvalidToken => (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", self.to_string()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN", self.to_string()),

            // Validation
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),

            // Resources
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),

            // Billing
            ApiError::PlanLimitExceeded(plan) => (
                StatusCode::FORBIDDEN,
                "PLAN_LIMIT_EXCEEDED",
                format!("Your current plan ({plan}) does not allow creating more of this resource."),
            ),
            ApiError::BillingDisabled => (StatusCode::SERVICE_UNAVAILABLE, "BILLING_DISABLED", self.to_string()),

            // Internal
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR", "Database error".to_string()),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", self.to_string()),
            ApiError::ServiceUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", self.to_string()),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound,
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    // PostgreSQL unique violation
                    if code == "23505" {
                        return ApiError::Conflict("Resource already exists".to_string());
                    }
                }
                ApiError::Database(db_err.to_string())
            }
            _ => ApiError::Database(err.to_string()),
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InvalidPlan(plan) => ApiError::Validation(format!("Unknown plan: {plan}")),
            BillingError::NotBillable(plan) => {
                ApiError::Validation(format!("Plan {plan} does not require payment"))
            }
            BillingError::Validation(msg) => ApiError::Validation(msg),
            BillingError::SignatureInvalid => {
                ApiError::BadRequest("Webhook signature verification failed".to_string())
            }
            BillingError::MalformedEvent(msg) => ApiError::BadRequest(format!("Malformed event: {msg}")),
            BillingError::Forbidden(_) => ApiError::Forbidden,
            BillingError::PaymentNotFound(_) => ApiError::NotFound,
            BillingError::PlanLimitExceeded(plan) => ApiError::PlanLimitExceeded(plan),
            BillingError::InvalidTransition(msg) => ApiError::Conflict(msg),
            BillingError::Transient(msg) => {
                tracing::warn!(error = %msg, "Transient billing failure");
                ApiError::ServiceUnavailable
            }
            BillingError::StripeApi(msg) => {
                tracing::error!(error = %msg, "Stripe API error");
                ApiError::ServiceUnavailable
            }
            err @ BillingError::PersistenceFailed { .. } => {
                tracing::error!(error = %err, "Checkout persistence failed");
                ApiError::Internal
            }
            BillingError::Database(msg) => ApiError::Database(msg),
            BillingError::Config(msg) => {
                tracing::error!(error = %msg, "Billing misconfigured");
                ApiError::Internal
            }
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
