//! Stripe client configuration

use std::time::Duration;

use stripe::Client;

use crate::error::{BillingError, BillingResult};

/// Default bound on a single provider round trip
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for Stripe billing
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Stripe secret API key
    pub secret_key: String,
    /// Stripe webhook signing secret (`whsec_...`)
    pub webhook_secret: String,
    /// Redirect after a completed checkout; `?session_id=...` is appended
    pub success_url: String,
    /// Redirect after an abandoned checkout
    pub cancel_url: String,
    /// ISO currency code charged for every plan (lowercase)
    pub currency: String,
    /// Upper bound for each Stripe API call
    pub provider_timeout: Duration,
}

impl StripeConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let provider_timeout = match std::env::var("STRIPE_TIMEOUT_SECS") {
            Ok(raw) => raw
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| BillingError::Config(format!("STRIPE_TIMEOUT_SECS is not a number: {raw}")))?,
            Err(_) => DEFAULT_PROVIDER_TIMEOUT,
        };

        Ok(Self {
            secret_key: std::env::var("STRIPE_SECRET_KEY")
                .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?,
            webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
                .map_err(|_| BillingError::Config("STRIPE_WEBHOOK_SECRET not set".to_string()))?,
            success_url: std::env::var("STRIPE_SUCCESS_URL")
                .unwrap_or_else(|_| "http://localhost:3000/payment-success".to_string()),
            cancel_url: std::env::var("STRIPE_CANCEL_URL")
                .unwrap_or_else(|_| "http://localhost:3000/payment-cancel".to_string()),
            currency: std::env::var("BILLING_CURRENCY")
                .map(|c| c.trim().to_lowercase())
                .unwrap_or_else(|_| "brl".to_string()),
            provider_timeout,
        })
    }

    /// Success redirect with Stripe's session placeholder
    pub fn success_url_with_session(&self) -> String {
        let separator = if self.success_url.contains('?') { '&' } else { '?' };
        format!("{}{}session_id={{CHECKOUT_SESSION_ID}}", self.success_url, separator)
    }
}

/// Stripe billing client
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    /// Create a new Stripe client from config
    pub fn new(config: StripeConfig) -> Self {
        let client = Client::new(&config.secret_key);
        Self { client, config }
    }

    /// Create a new Stripe client from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let config = StripeConfig::from_env()?;
        Ok(Self::new(config))
    }

    /// Get the inner Stripe client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the config
    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}
