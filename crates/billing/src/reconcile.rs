//! Payment reconciliation
//!
//! Two independent triggers settle the same payment record: the provider's
//! webhook and the client's confirm poll. Both funnel into
//! [`PaymentLedger::apply_transition`], so whichever arrives first applies the
//! transition and the other observes the settled row and does nothing.

use std::sync::Arc;

use serde::Serialize;
use sitecraft_shared::{AuthenticatedUser, PaymentStatus};

use crate::error::{BillingError, BillingResult};
use crate::ledger::{PaymentLedger, PaymentRecord, SessionKey, TransitionOutcome};
use crate::plans::FALLBACK_PLAN_ID;
use crate::provider::PaymentProvider;

/// What a webhook delivery did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// Record moved to `status`
    Applied { status: PaymentStatus },
    /// Record was already settled; nothing written
    AlreadySettled { status: PaymentStatus },
    /// No local record for the session
    UnknownSession,
    /// Event carries no status change (payment still processing)
    NoChange,
    /// Event type reconciliation does not handle
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookAck {
    pub event_id: String,
    #[serde(flatten)]
    pub outcome: WebhookOutcome,
}

/// Authoritative status returned to a polling client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmOutcome {
    pub status: PaymentStatus,
    pub plan: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefundOutcome {
    pub record: PaymentRecord,
    /// False when the record was already refunded
    pub applied: bool,
    /// Whether the user was moved back to the fallback plan
    pub plan_reverted: bool,
}

pub struct ReconciliationEngine {
    ledger: Arc<dyn PaymentLedger>,
    provider: Arc<dyn PaymentProvider>,
}

impl ReconciliationEngine {
    pub fn new(ledger: Arc<dyn PaymentLedger>, provider: Arc<dyn PaymentProvider>) -> Self {
        Self { ledger, provider }
    }

    fn key(&self, session_id: &str) -> SessionKey {
        SessionKey::new(self.provider.name(), session_id)
    }

    /// Webhook entry.
    ///
    /// Only signature and parse failures are errors the sender sees as 4xx.
    /// Transient storage failures surface so the sender retries; every other
    /// outcome is acknowledged.
    pub async fn handle_webhook(&self, raw_body: &str, signature_header: &str) -> BillingResult<WebhookAck> {
        let event = self.provider.verify_webhook(raw_body, signature_header)?;

        let Some((session_id, target)) = event.kind.reconciliation_target() else {
            tracing::debug!(event_id = %event.id, kind = ?event.kind, "Ignoring webhook event");
            return Ok(WebhookAck {
                event_id: event.id,
                outcome: WebhookOutcome::Ignored,
            });
        };

        if target == PaymentStatus::Pending {
            tracing::info!(
                event_id = %event.id,
                session_id = %session_id,
                "Checkout completed but payment still processing"
            );
            return Ok(WebhookAck {
                event_id: event.id.clone(),
                outcome: WebhookOutcome::NoChange,
            });
        }

        let key = self.key(session_id);
        let outcome = match self
            .ledger
            .apply_transition(&key, target, FALLBACK_PLAN_ID)
            .await?
        {
            TransitionOutcome::Applied { record, .. } => WebhookOutcome::Applied {
                status: record.status,
            },
            TransitionOutcome::Unchanged { record } => WebhookOutcome::AlreadySettled {
                status: record.status,
            },
            TransitionOutcome::NotFound => {
                tracing::warn!(
                    event_id = %event.id,
                    session_id = %session_id,
                    "Webhook for unknown checkout session"
                );
                WebhookOutcome::UnknownSession
            }
        };

        tracing::info!(
            event_id = %event.id,
            session_id = %session_id,
            target = %target,
            outcome = ?outcome,
            "Webhook reconciled"
        );

        Ok(WebhookAck {
            event_id: event.id,
            outcome,
        })
    }

    /// Confirm entry: the client asks for the current status of its session
    pub async fn confirm_checkout(
        &self,
        principal: &AuthenticatedUser,
        session_id: &str,
    ) -> BillingResult<ConfirmOutcome> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(BillingError::Validation("session_id is required".to_string()));
        }
        let key = self.key(session_id);

        let record = self
            .ledger
            .find_by_session(&key)
            .await?
            .ok_or_else(|| BillingError::PaymentNotFound(session_id.to_string()))?;

        if record.user_id != principal.user_id {
            tracing::warn!(
                session_id = %session_id,
                caller = %principal.user_id,
                owner = %record.user_id,
                status = %record.status,
                "Confirm attempted on a session owned by another user"
            );
            return Err(BillingError::Forbidden(
                "checkout session belongs to another user".to_string(),
            ));
        }

        if record.status.is_terminal() {
            return Ok(ConfirmOutcome {
                status: record.status,
                plan: record.plan,
            });
        }

        // No lock is held across the provider round trip
        let snapshot = self.provider.get_session(session_id).await?;

        // Ownership was settled by the ledger row; metadata can only contradict it
        if snapshot
            .metadata_user()
            .is_some_and(|owner| owner != principal.user_id)
        {
            tracing::warn!(
                session_id = %session_id,
                caller = %principal.user_id,
                metadata_user = ?snapshot.metadata_user(),
                "Provider session metadata does not match caller"
            );
            return Err(BillingError::Forbidden(
                "checkout session belongs to another user".to_string(),
            ));
        }

        if !snapshot.payment_status.is_paid() {
            return Ok(ConfirmOutcome {
                status: record.status,
                plan: record.plan,
            });
        }

        match self
            .ledger
            .apply_transition(&key, PaymentStatus::Paid, FALLBACK_PLAN_ID)
            .await?
        {
            TransitionOutcome::Applied { record, .. } => {
                tracing::info!(
                    session_id = %session_id,
                    user_id = %principal.user_id,
                    plan = %record.plan,
                    "Payment confirmed by client"
                );
                Ok(ConfirmOutcome {
                    status: record.status,
                    plan: record.plan,
                })
            }
            TransitionOutcome::Unchanged { record } => Ok(ConfirmOutcome {
                status: record.status,
                plan: record.plan,
            }),
            TransitionOutcome::NotFound => Err(BillingError::PaymentNotFound(session_id.to_string())),
        }
    }

    /// Administrative refund: `paid -> refunded`, reverting the user's plan if it still matches
    pub async fn record_refund(&self, session_id: &str) -> BillingResult<RefundOutcome> {
        let key = self.key(session_id.trim());

        match self
            .ledger
            .apply_transition(&key, PaymentStatus::Refunded, FALLBACK_PLAN_ID)
            .await?
        {
            TransitionOutcome::Applied {
                record,
                plan_changed,
                ..
            } => {
                tracing::info!(
                    session_id = %key.session_id,
                    user_id = %record.user_id,
                    plan = %record.plan,
                    plan_reverted = plan_changed,
                    "Payment refunded"
                );
                Ok(RefundOutcome {
                    record,
                    applied: true,
                    plan_reverted: plan_changed,
                })
            }
            TransitionOutcome::Unchanged { record } => Ok(RefundOutcome {
                record,
                applied: false,
                plan_reverted: false,
            }),
            TransitionOutcome::NotFound => Err(BillingError::PaymentNotFound(key.session_id)),
        }
    }
}
