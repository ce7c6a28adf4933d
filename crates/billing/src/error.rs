//! Billing error types

use sitecraft_shared::SharedError;
use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Unknown plan: {0}")]
    InvalidPlan(String),

    #[error("Plan is not billable: {0}")]
    NotBillable(String),

    #[error("Checkout session {session_id} was created but could not be recorded: {reason}")]
    PersistenceFailed { session_id: String, reason: String },

    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Plan limit exceeded for plan {0}")]
    PlanLimitExceeded(String),

    #[error("Invalid payment transition: {0}")]
    InvalidTransition(String),

    #[error("Webhook signature verification failed")]
    SignatureInvalid,

    #[error("Malformed webhook event: {0}")]
    MalformedEvent(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Temporary failure, safe to retry: {0}")]
    Transient(String),

    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BillingError {
    /// Whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::Database(_) | Self::StripeApi(_)
        )
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        match err {
            // Unknown session ids and bad parameters are the caller's fault, not an outage
            stripe::StripeError::Stripe(req) if req.error_type == stripe::ErrorType::InvalidRequest => {
                BillingError::Validation(
                    req.message
                        .unwrap_or_else(|| "invalid request to payment provider".to_string()),
                )
            }
            other => BillingError::StripeApi(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<SharedError> for BillingError {
    fn from(err: SharedError) -> Self {
        match err {
            SharedError::Validation(msg) => BillingError::Validation(msg),
            other => BillingError::Database(other.to_string()),
        }
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
