//! Shared test fixtures: a scripted payment provider and an in-memory billing stack

#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sitecraft_billing::error::{BillingError, BillingResult};
use sitecraft_billing::plans::PlanDefaults;
use sitecraft_billing::provider::{
    CheckoutSessionRequest, CreatedSession, ProviderEvent, METADATA_PLAN, METADATA_USER_ID,
};
use sitecraft_billing::webhook;
use sitecraft_billing::{
    BillingParts, BillingService, Entitlements, InMemoryStore, PaymentProvider,
    ProviderPaymentStatus, SessionSnapshot,
};
use sitecraft_shared::{AuthenticatedUser, PlatformRole, UserId};
use time::OffsetDateTime;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Provider double: sessions live in a map the test can edit
#[derive(Default)]
pub struct MockProvider {
    sessions: Mutex<HashMap<String, SessionSnapshot>>,
    next_id: AtomicUsize,
    pub get_calls: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_payment_status(&self, session_id: &str, status: ProviderPaymentStatus) {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(session_id).expect("unknown session");
        session.payment_status = status;
    }

    pub fn set_metadata_user(&self, session_id: &str, user_id: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(session_id).expect("unknown session");
        session
            .metadata
            .insert(METADATA_USER_ID.to_string(), user_id.to_string());
    }

    pub fn clear_metadata_user(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(session_id).expect("unknown session");
        session.metadata.remove(METADATA_USER_ID);
    }

    /// Drop a session, as if it was created under another Stripe account
    pub fn forget_session(&self, session_id: &str) {
        self.sessions.lock().unwrap().remove(session_id);
    }

    /// A session that exists at the provider but was never recorded locally
    pub fn add_external_session(
        &self,
        user_id: UserId,
        plan: &str,
        amount_cents: i64,
        status: ProviderPaymentStatus,
    ) -> String {
        let session_id = self.mint_id();
        self.sessions.lock().unwrap().insert(
            session_id.clone(),
            SessionSnapshot {
                session_id: session_id.clone(),
                payment_status: status,
                metadata: HashMap::from([
                    (METADATA_USER_ID.to_string(), user_id.to_string()),
                    (METADATA_PLAN.to_string(), plan.to_string()),
                ]),
                amount_total: Some(amount_cents),
                currency: Some("brl".to_string()),
                created: Some(OffsetDateTime::now_utc()),
            },
        );
        session_id
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    fn mint_id(&self) -> String {
        format!("cs_test_{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl PaymentProvider for MockProvider {
    fn name(&self) -> &'static str {
        "stripe"
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> BillingResult<CreatedSession> {
        let session_id = self.mint_id();
        self.sessions.lock().unwrap().insert(
            session_id.clone(),
            SessionSnapshot {
                session_id: session_id.clone(),
                payment_status: ProviderPaymentStatus::Unpaid,
                metadata: request.metadata(),
                amount_total: Some(request.amount_cents),
                currency: Some(request.currency.clone()),
                created: Some(OffsetDateTime::now_utc()),
            },
        );
        Ok(CreatedSession {
            checkout_url: format!("https://checkout.test/{session_id}"),
            session_id,
        })
    }

    async fn get_session(&self, session_id: &str) -> BillingResult<SessionSnapshot> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| BillingError::Validation(format!("No such checkout session: {session_id}")))
    }

    fn verify_webhook(&self, raw_body: &str, signature_header: &str) -> BillingResult<ProviderEvent> {
        webhook::construct_event(raw_body, signature_header, WEBHOOK_SECRET)
    }

    async fn list_recent_sessions(&self, since: OffsetDateTime) -> BillingResult<Vec<SessionSnapshot>> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.created.map_or(false, |c| c >= since))
            .cloned()
            .collect())
    }
}

/// Signed webhook body and `Stripe-Signature` header
pub fn signed_event(event_type: &str, session_id: &str, payment_status: &str) -> (String, String) {
    let body = serde_json::json!({
        "id": format!("evt_{}_{}", session_id, event_type),
        "object": "event",
        "type": event_type,
        "created": OffsetDateTime::now_utc().unix_timestamp(),
        "data": { "object": {
            "id": session_id,
            "object": "checkout.session",
            "payment_status": payment_status,
        }}
    })
    .to_string();
    let header = webhook::sign_payload(&body, WEBHOOK_SECRET, OffsetDateTime::now_utc().unix_timestamp())
        .expect("sign");
    (body, header)
}

pub fn completed_paid(session_id: &str) -> (String, String) {
    signed_event(webhook::EVENT_CHECKOUT_COMPLETED, session_id, "paid")
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub provider: Arc<MockProvider>,
    pub billing: Arc<BillingService>,
}

impl Harness {
    pub async fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(MockProvider::new());
        let billing = BillingService::with_parts(BillingParts {
            provider: provider.clone(),
            ledger: store.clone(),
            entitlements: Entitlements::new(store.clone(), store.clone(), PlanDefaults::default()),
            currency: "brl".to_string(),
        });
        billing.plans.seed_defaults().await.expect("seed plans");

        Self {
            store,
            provider,
            billing: Arc::new(billing),
        }
    }

    /// A user row on `plan`, and the principal the session layer would produce
    pub fn user(&self, plan: &str) -> AuthenticatedUser {
        let user_id = UserId::new();
        self.store.add_user(user_id, plan).unwrap();
        AuthenticatedUser::new(user_id, format!("{user_id}@example.com"), PlatformRole::User)
    }

    pub fn plan_of(&self, user: &AuthenticatedUser) -> String {
        self.store.user_plan(user.user_id).unwrap().expect("user exists")
    }
}
