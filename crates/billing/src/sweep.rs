//! Orphaned checkout session sweep
//!
//! A checkout session can exist at the provider with no ledger row when the
//! insert after session creation failed. The sweep walks recent provider
//! sessions, adopts any carrying our metadata that are missing locally, and
//! settles paid sessions whose rows are still `pending`.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sitecraft_shared::PaymentStatus;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::ledger::{NewPaymentRecord, PaymentLedger, SessionKey, TransitionOutcome};
use crate::plans::FALLBACK_PLAN_ID;
use crate::provider::{PaymentProvider, SessionSnapshot};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Provider sessions inspected
    pub scanned: usize,
    /// Sessions inserted as new `pending` rows
    pub adopted: usize,
    /// Rows moved to `paid` by this sweep
    pub settled: usize,
    /// Sessions skipped because of an error
    pub failed: usize,
}

pub struct OrphanSweeper {
    provider: Arc<dyn PaymentProvider>,
    ledger: Arc<dyn PaymentLedger>,
    currency: String,
}

impl OrphanSweeper {
    pub fn new(
        provider: Arc<dyn PaymentProvider>,
        ledger: Arc<dyn PaymentLedger>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            ledger,
            currency: currency.into(),
        }
    }

    /// Reconcile provider sessions created within the last `window`
    pub async fn sweep(&self, window: Duration) -> BillingResult<SweepReport> {
        let since = time::Duration::try_from(window)
            .ok()
            .and_then(|w| OffsetDateTime::now_utc().checked_sub(w))
            .ok_or_else(|| {
                BillingError::Validation(format!(
                    "sweep window of {}s is out of range",
                    window.as_secs()
                ))
            })?;
        let sessions = self.provider.list_recent_sessions(since).await?;
        let mut report = SweepReport::default();

        for session in sessions {
            report.scanned += 1;
            if let Err(e) = self.reconcile_session(&session, &mut report).await {
                report.failed += 1;
                tracing::warn!(
                    session_id = %session.session_id,
                    error = %e,
                    "Failed to reconcile checkout session during sweep"
                );
            }
        }

        tracing::info!(
            scanned = report.scanned,
            adopted = report.adopted,
            settled = report.settled,
            failed = report.failed,
            "Orphan sweep finished"
        );
        Ok(report)
    }

    async fn reconcile_session(&self, session: &SessionSnapshot, report: &mut SweepReport) -> BillingResult<()> {
        // Sessions without our metadata were not created by checkout
        let (Some(user_id), Some(plan)) = (session.metadata_user(), session.metadata_plan()) else {
            return Ok(());
        };
        let key = SessionKey::new(self.provider.name(), session.session_id.clone());

        let existing = self.ledger.find_by_session(&key).await?;
        let status = match existing {
            Some(record) => record.status,
            None => {
                let adopted = self
                    .ledger
                    .insert_pending(NewPaymentRecord {
                        user_id,
                        plan: plan.to_string(),
                        key: key.clone(),
                        amount_cents: session.amount_total.unwrap_or(0),
                        currency: session
                            .currency
                            .clone()
                            .unwrap_or_else(|| self.currency.clone()),
                    })
                    .await?;
                if adopted.is_some() {
                    report.adopted += 1;
                    tracing::info!(
                        session_id = %key.session_id,
                        user_id = %user_id,
                        plan = %plan,
                        "Adopted orphaned checkout session"
                    );
                }
                PaymentStatus::Pending
            }
        };

        if status == PaymentStatus::Pending && session.payment_status.is_paid() {
            if let TransitionOutcome::Applied { .. } = self
                .ledger
                .apply_transition(&key, PaymentStatus::Paid, FALLBACK_PLAN_ID)
                .await?
            {
                report.settled += 1;
            }
        }

        Ok(())
    }
}
