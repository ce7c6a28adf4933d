// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Sitecraft Billing Module
//!
//! Payment reconciliation and plan entitlement for Sitecraft.
//!
//! ## Features
//!
//! - **Checkout**: One-off Stripe checkout sessions recorded as `pending` payments
//! - **Reconciliation**: Webhook and client-confirm entry points that settle a payment exactly once
//! - **Refunds**: Administrative `paid -> refunded` with plan revert
//! - **Plan Catalog**: Cached, admin-editable plans with built-in defaults
//! - **Entitlement Gate**: Site and page limits enforced from the user's current plan
//! - **Orphan Sweep**: Adopts provider sessions that never made it into the ledger

pub mod checkout;
pub mod client;
pub mod entitlement;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod plans;
pub mod provider;
pub mod reconcile;
pub mod stripe_provider;
pub mod sweep;
pub mod webhook;

use std::sync::Arc;

use sqlx::PgPool;

// Checkout
pub use checkout::{CheckoutRequest, CheckoutResponse, CheckoutService};

// Client
pub use client::{StripeClient, StripeConfig};

// Entitlement
pub use entitlement::{
    EntitlementGate, EntitlementSummary, Entitlements, PgResourceCounter, ResourceClass,
    ResourceCounter,
};

// Error
pub use error::{BillingError, BillingResult};

// Ledger
pub use ledger::{
    NewPaymentRecord, PaymentLedger, PaymentRecord, PgPaymentLedger, SessionKey,
    TransitionOutcome,
};

// Memory
pub use memory::InMemoryStore;

// Plans
pub use plans::{
    normalize_plan_id, PgPlanStore, PlanCatalog, PlanConfig, PlanDefaults, PlanStore, PlanUpdate,
};

// Provider
pub use provider::{PaymentProvider, ProviderEvent, ProviderPaymentStatus, SessionSnapshot};
pub use stripe_provider::StripeProvider;

// Reconciliation
pub use reconcile::{
    ConfirmOutcome, ReconciliationEngine, RefundOutcome, WebhookAck, WebhookOutcome,
};

// Sweep
pub use sweep::{OrphanSweeper, SweepReport};

/// Storage and provider collaborators for [`BillingService`]
pub struct BillingParts {
    pub provider: Arc<dyn PaymentProvider>,
    pub ledger: Arc<dyn PaymentLedger>,
    /// Shared with the API so limits hold whether or not billing is enabled
    pub entitlements: Entitlements,
    pub currency: String,
}

/// Combined billing service
pub struct BillingService {
    pub checkout: CheckoutService,
    pub reconciler: ReconciliationEngine,
    pub entitlement: Arc<EntitlementGate>,
    pub plans: Arc<PlanCatalog>,
    pub sweeper: OrphanSweeper,
}

impl BillingService {
    /// Postgres-backed service talking to Stripe
    pub fn new(config: StripeConfig, pool: PgPool, entitlements: Entitlements) -> Self {
        let currency = config.currency.clone();
        let stripe = StripeClient::new(config);

        Self::with_parts(BillingParts {
            provider: Arc::new(StripeProvider::new(stripe)),
            ledger: Arc::new(PgPaymentLedger::new(pool)),
            entitlements,
            currency,
        })
    }

    /// Create from environment variables
    pub fn from_env(pool: PgPool, entitlements: Entitlements) -> BillingResult<Self> {
        let config = StripeConfig::from_env()?;
        Ok(Self::new(config, pool, entitlements))
    }

    pub fn with_parts(parts: BillingParts) -> Self {
        let Entitlements { plans, gate } = parts.entitlements;

        Self {
            checkout: CheckoutService::new(
                parts.provider.clone(),
                parts.ledger.clone(),
                plans.clone(),
                parts.currency.clone(),
            ),
            reconciler: ReconciliationEngine::new(parts.ledger.clone(), parts.provider.clone()),
            entitlement: gate,
            sweeper: OrphanSweeper::new(parts.provider, parts.ledger, parts.currency),
            plans,
        }
    }
}
