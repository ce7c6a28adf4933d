//! Payment provider boundary
//!
//! Everything the reconciliation core needs from an external checkout
//! provider. The Stripe implementation lives in [`crate::stripe_provider`];
//! tests substitute their own.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sitecraft_shared::{PaymentStatus, UserId};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Metadata keys written on every checkout session
pub const METADATA_USER_ID: &str = "user_id";
pub const METADATA_PLAN: &str = "plan";

/// Payment status as the provider reports it for a checkout session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderPaymentStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
    #[serde(other)]
    Unknown,
}

impl ProviderPaymentStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "paid" => Self::Paid,
            "unpaid" => Self::Unpaid,
            "no_payment_required" => Self::NoPaymentRequired,
            _ => Self::Unknown,
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, Self::Paid)
    }
}

/// Everything needed to open a one-off checkout session
#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    pub user_id: UserId,
    pub plan_id: String,
    pub product_name: String,
    pub amount_cents: i64,
    pub currency: String,
}

impl CheckoutSessionRequest {
    pub fn metadata(&self) -> HashMap<String, String> {
        HashMap::from([
            (METADATA_USER_ID.to_string(), self.user_id.to_string()),
            (METADATA_PLAN.to_string(), self.plan_id.clone()),
        ])
    }
}

/// Result of creating a checkout session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSession {
    pub session_id: String,
    pub checkout_url: String,
}

/// Provider view of a checkout session
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub payment_status: ProviderPaymentStatus,
    pub metadata: HashMap<String, String>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    pub created: Option<OffsetDateTime>,
}

impl SessionSnapshot {
    /// The user recorded on the session at creation time
    pub fn metadata_user(&self) -> Option<UserId> {
        self.metadata
            .get(METADATA_USER_ID)
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .map(UserId)
    }

    pub fn metadata_plan(&self) -> Option<&str> {
        self.metadata
            .get(METADATA_PLAN)
            .map(String::as_str)
            .filter(|p| !p.is_empty())
    }
}

/// A verified webhook event, reduced to what reconciliation consumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEvent {
    pub id: String,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// `checkout.session.completed`
    CheckoutCompleted {
        session_id: String,
        payment_status: ProviderPaymentStatus,
    },
    /// `checkout.session.async_payment_succeeded`
    AsyncPaymentSucceeded {
        session_id: String,
        payment_status: ProviderPaymentStatus,
    },
    /// `checkout.session.async_payment_failed`
    AsyncPaymentFailed { session_id: String },
    /// Any other event type; acknowledged and ignored
    Other(String),
}

impl EventKind {
    /// Session id and the ledger status this event asks for.
    ///
    /// `None` for events reconciliation ignores.
    pub fn reconciliation_target(&self) -> Option<(&str, PaymentStatus)> {
        match self {
            Self::AsyncPaymentFailed { session_id } => Some((session_id, PaymentStatus::Failed)),
            Self::CheckoutCompleted {
                session_id,
                payment_status,
            }
            | Self::AsyncPaymentSucceeded {
                session_id,
                payment_status,
            } => {
                let target = if payment_status.is_paid() {
                    PaymentStatus::Paid
                } else {
                    PaymentStatus::Pending
                };
                Some((session_id, target))
            }
            Self::Other(_) => None,
        }
    }
}

/// External checkout provider
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Provider name stored alongside the session id
    fn name(&self) -> &'static str;

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> BillingResult<CreatedSession>;

    async fn get_session(&self, session_id: &str) -> BillingResult<SessionSnapshot>;

    /// Authenticate and parse a webhook delivery
    fn verify_webhook(&self, raw_body: &str, signature_header: &str) -> BillingResult<ProviderEvent>;

    /// Checkout sessions created at or after `since`, newest first
    async fn list_recent_sessions(&self, since: OffsetDateTime) -> BillingResult<Vec<SessionSnapshot>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_unpaid_targets_pending() {
        let kind = EventKind::CheckoutCompleted {
            session_id: "cs_1".into(),
            payment_status: ProviderPaymentStatus::Unpaid,
        };
        assert_eq!(kind.reconciliation_target(), Some(("cs_1", PaymentStatus::Pending)));
    }

    #[test]
    fn test_async_outcomes() {
        let ok = EventKind::AsyncPaymentSucceeded {
            session_id: "cs_2".into(),
            payment_status: ProviderPaymentStatus::Paid,
        };
        assert_eq!(ok.reconciliation_target(), Some(("cs_2", PaymentStatus::Paid)));

        let failed = EventKind::AsyncPaymentFailed {
            session_id: "cs_3".into(),
        };
        assert_eq!(failed.reconciliation_target(), Some(("cs_3", PaymentStatus::Failed)));

        assert_eq!(EventKind::Other("invoice.paid".into()).reconciliation_target(), None);
    }

    #[test]
    fn test_metadata_user_requires_uuid() {
        let user = UserId::new();
        let mut snapshot = SessionSnapshot {
            session_id: "cs_4".into(),
            payment_status: ProviderPaymentStatus::Paid,
            metadata: HashMap::from([(METADATA_USER_ID.to_string(), user.to_string())]),
            amount_total: Some(9900),
            currency: Some("brl".into()),
            created: None,
        };
        assert_eq!(snapshot.metadata_user(), Some(user));
        assert_eq!(snapshot.metadata_plan(), None);

        snapshot
            .metadata
            .insert(METADATA_USER_ID.to_string(), "not-a-uuid".into());
        assert_eq!(snapshot.metadata_user(), None);
    }
}
