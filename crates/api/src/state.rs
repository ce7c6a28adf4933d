//! Shared application state

use std::sync::Arc;

use sitecraft_billing::{BillingService, Entitlements};
use sqlx::PgPool;

use crate::{auth::JwtManager, config::Config, error::ApiError};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub jwt: Arc<JwtManager>,
    /// Plan catalog and limits, present in every deployment
    pub entitlements: Entitlements,
    /// `None` when billing is disabled or Stripe is not configured
    pub billing: Option<Arc<BillingService>>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: Config,
        entitlements: Entitlements,
        billing: Option<Arc<BillingService>>,
    ) -> Self {
        let jwt = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);
        Self {
            pool,
            config: Arc::new(config),
            jwt: Arc::new(jwt),
            entitlements,
            billing,
        }
    }

    /// Billing service, or `BillingDisabled` for deployments without it
    pub fn billing(&self) -> Result<&Arc<BillingService>, ApiError> {
        self.billing.as_ref().ok_or(ApiError::BillingDisabled)
    }
}
