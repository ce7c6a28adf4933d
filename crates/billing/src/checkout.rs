//! Checkout initiation

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sitecraft_shared::AuthenticatedUser;

use crate::error::{BillingError, BillingResult};
use crate::ledger::{NewPaymentRecord, PaymentLedger, SessionKey};
use crate::plans::{normalize_plan_id, PlanCatalog};
use crate::provider::{CheckoutSessionRequest, PaymentProvider};

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub plan: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub checkout_url: String,
}

/// Opens provider checkout sessions and records them as `pending`
pub struct CheckoutService {
    provider: Arc<dyn PaymentProvider>,
    ledger: Arc<dyn PaymentLedger>,
    plans: Arc<PlanCatalog>,
    currency: String,
}

impl CheckoutService {
    pub fn new(
        provider: Arc<dyn PaymentProvider>,
        ledger: Arc<dyn PaymentLedger>,
        plans: Arc<PlanCatalog>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            ledger,
            plans,
            currency: currency.into(),
        }
    }

    /// Start a one-off payment for `plan_id`
    pub async fn initiate(
        &self,
        principal: &AuthenticatedUser,
        plan_id: &str,
    ) -> BillingResult<CheckoutResponse> {
        let plan_id = normalize_plan_id(plan_id);
        let plan = self
            .plans
            .get(&plan_id)
            .await
            .ok_or_else(|| BillingError::InvalidPlan(plan_id.clone()))?;

        if !plan.is_billable() {
            return Err(BillingError::NotBillable(plan.id));
        }

        let request = CheckoutSessionRequest {
            user_id: principal.user_id,
            plan_id: plan.id.clone(),
            product_name: format!("Sitecraft {} plan", plan.name),
            amount_cents: plan.price_cents,
            currency: self.currency.clone(),
        };

        let session = self.provider.create_checkout_session(&request).await?;
        let key = SessionKey::new(self.provider.name(), session.session_id.clone());

        let inserted = self
            .ledger
            .insert_pending(NewPaymentRecord {
                user_id: principal.user_id,
                plan: plan.id.clone(),
                key: key.clone(),
                amount_cents: plan.price_cents,
                currency: self.currency.clone(),
            })
            .await;

        match inserted {
            Ok(Some(_)) => {}
            Ok(None) => {
                // A session id the provider just minted should never already exist
                tracing::error!(
                    session_id = %key.session_id,
                    user_id = %principal.user_id,
                    "Checkout session already recorded"
                );
                return Err(BillingError::PersistenceFailed {
                    session_id: key.session_id,
                    reason: "session already recorded".to_string(),
                });
            }
            Err(e) => {
                tracing::error!(
                    session_id = %key.session_id,
                    user_id = %principal.user_id,
                    plan = %plan.id,
                    error = %e,
                    "Checkout session created but not recorded; left for the orphan sweep"
                );
                return Err(BillingError::PersistenceFailed {
                    session_id: key.session_id,
                    reason: e.to_string(),
                });
            }
        }

        tracing::info!(
            user_id = %principal.user_id,
            session_id = %key.session_id,
            plan = %plan.id,
            amount_cents = plan.price_cents,
            "Created checkout session"
        );

        Ok(CheckoutResponse {
            session_id: session.session_id,
            checkout_url: session.checkout_url,
        })
    }
}
