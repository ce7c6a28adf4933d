//! Stripe-backed [`PaymentProvider`]

use std::future::Future;

use async_trait::async_trait;
use stripe::{
    CheckoutSession, CheckoutSessionMode, CheckoutSessionPaymentStatus, CreateCheckoutSession,
    CreateCheckoutSessionLineItems, CreateCheckoutSessionLineItemsPriceData,
    CreateCheckoutSessionLineItemsPriceDataProductData, ListCheckoutSessions,
};
use time::OffsetDateTime;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::provider::{
    CheckoutSessionRequest, CreatedSession, PaymentProvider, ProviderEvent, ProviderPaymentStatus,
    SessionSnapshot,
};
use crate::webhook;

/// Page size when walking recent checkout sessions
const LIST_PAGE_SIZE: u64 = 100;
/// Hard stop for a single listing pass
const LIST_MAX_PAGES: usize = 20;

pub struct StripeProvider {
    stripe: StripeClient,
}

impl StripeProvider {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }

    /// Run a Stripe call under the configured timeout
    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> BillingResult<T>
    where
        F: Future<Output = Result<T, stripe::StripeError>>,
    {
        match tokio::time::timeout(self.stripe.config().provider_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::error!(operation = op, error = %e, "Stripe call failed");
                Err(BillingError::from(e))
            }
            Err(_) => {
                tracing::error!(operation = op, "Stripe call timed out");
                Err(BillingError::Transient(format!("Stripe {op} timed out")))
            }
        }
    }
}

fn snapshot(session: CheckoutSession) -> SessionSnapshot {
    let payment_status = match session.payment_status {
        CheckoutSessionPaymentStatus::Paid => ProviderPaymentStatus::Paid,
        CheckoutSessionPaymentStatus::Unpaid => ProviderPaymentStatus::Unpaid,
        CheckoutSessionPaymentStatus::NoPaymentRequired => ProviderPaymentStatus::NoPaymentRequired,
    };

    SessionSnapshot {
        session_id: session.id.to_string(),
        payment_status,
        metadata: session.metadata.unwrap_or_default(),
        amount_total: session.amount_total,
        currency: session.currency.map(|c| c.to_string()),
        created: OffsetDateTime::from_unix_timestamp(session.created).ok(),
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn name(&self) -> &'static str {
        "stripe"
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> BillingResult<CreatedSession> {
        let config = self.stripe.config();
        let currency = request
            .currency
            .parse::<stripe::Currency>()
            .map_err(|_| BillingError::Config(format!("Unsupported currency: {}", request.currency)))?;
        let success_url = config.success_url_with_session();
        let user_id = request.user_id.to_string();

        let line_item = CreateCheckoutSessionLineItems {
            price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                currency,
                unit_amount: Some(request.amount_cents),
                product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                    name: request.product_name.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            quantity: Some(1),
            ..Default::default()
        };

        let params = CreateCheckoutSession {
            mode: Some(CheckoutSessionMode::Payment),
            line_items: Some(vec![line_item]),
            success_url: Some(&success_url),
            cancel_url: Some(&config.cancel_url),
            client_reference_id: Some(&user_id),
            metadata: Some(request.metadata()),
            ..Default::default()
        };

        let session = self
            .bounded(
                "checkout.create",
                CheckoutSession::create(self.stripe.inner(), params),
            )
            .await?;

        let checkout_url = session.url.clone().ok_or_else(|| {
            BillingError::StripeApi(format!("Checkout session {} has no url", session.id))
        })?;

        Ok(CreatedSession {
            session_id: session.id.to_string(),
            checkout_url,
        })
    }

    async fn get_session(&self, session_id: &str) -> BillingResult<SessionSnapshot> {
        let id = session_id
            .parse::<stripe::CheckoutSessionId>()
            .map_err(|e| BillingError::Validation(format!("Invalid session ID: {}", e)))?;

        let session = self
            .bounded(
                "checkout.retrieve",
                CheckoutSession::retrieve(self.stripe.inner(), &id, &[]),
            )
            .await?;

        Ok(snapshot(session))
    }

    fn verify_webhook(&self, raw_body: &str, signature_header: &str) -> BillingResult<ProviderEvent> {
        webhook::construct_event(
            raw_body,
            signature_header,
            &self.stripe.config().webhook_secret,
        )
    }

    async fn list_recent_sessions(&self, since: OffsetDateTime) -> BillingResult<Vec<SessionSnapshot>> {
        let since_unix = since.unix_timestamp();
        let mut out = Vec::new();
        let mut starting_after: Option<stripe::CheckoutSessionId> = None;

        // Stripe lists newest first; stop at the first page that crosses `since`
        for _ in 0..LIST_MAX_PAGES {
            let mut params = ListCheckoutSessions::new();
            params.limit = Some(LIST_PAGE_SIZE);
            params.starting_after = starting_after.take();

            let page = self
                .bounded(
                    "checkout.list",
                    CheckoutSession::list(self.stripe.inner(), &params),
                )
                .await?;

            let mut crossed = false;
            let mut last_id = None;
            for session in page.data {
                last_id = Some(session.id.clone());
                if session.created < since_unix {
                    crossed = true;
                    break;
                }
                out.push(snapshot(session));
            }

            if crossed || !page.has_more {
                break;
            }
            match last_id {
                Some(id) => starting_after = Some(id),
                None => break,
            }
        }

        tracing::debug!(count = out.len(), since = since_unix, "Listed recent checkout sessions");
        Ok(out)
    }
}
