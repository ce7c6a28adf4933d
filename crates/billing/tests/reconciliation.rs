//! Checkout and reconciliation behaviour against the in-memory ledger
//!
//! ## Running Tests
//! ```bash
//! cargo test -p sitecraft-billing --test reconciliation
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::time::Duration;

use common::{completed_paid, signed_event, Harness};
use sitecraft_billing::ledger::SessionKey;
use sitecraft_billing::webhook::{
    sign_payload, EVENT_ASYNC_PAYMENT_FAILED, EVENT_ASYNC_PAYMENT_SUCCEEDED, EVENT_CHECKOUT_COMPLETED,
};
use sitecraft_billing::{BillingError, PaymentLedger, ProviderPaymentStatus, WebhookOutcome};
use sitecraft_shared::{AuthenticatedUser, PaymentStatus, PlatformRole, UserId};

async fn status_of(h: &Harness, session_id: &str) -> PaymentStatus {
    h.store
        .find_by_session(&SessionKey::new("stripe", session_id))
        .await
        .unwrap()
        .expect("record exists")
        .status
}

// ============================================================================
// Checkout
// ============================================================================

#[tokio::test]
async fn checkout_records_pending_payment() {
    let h = Harness::new().await;
    let user = h.user("free");

    let response = h.billing.checkout.initiate(&user, "pro").await.unwrap();
    assert!(response.checkout_url.contains(&response.session_id));

    let record = h
        .store
        .find_by_session(&SessionKey::new("stripe", &response.session_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, PaymentStatus::Pending);
    assert_eq!(record.user_id, user.user_id);
    assert_eq!(record.plan, "pro");
    assert_eq!(record.amount_cents, 9900);
    assert_eq!(record.currency, "brl");
}

#[tokio::test]
async fn checkout_rejects_unknown_and_free_plans() {
    let h = Harness::new().await;
    let user = h.user("free");

    assert!(matches!(
        h.billing.checkout.initiate(&user, "platinum").await,
        Err(BillingError::InvalidPlan(_))
    ));
    assert!(matches!(
        h.billing.checkout.initiate(&user, "free").await,
        Err(BillingError::NotBillable(_))
    ));
    assert_eq!(h.provider.session_count(), 0);
    assert_eq!(h.store.payment_count().unwrap(), 0);
}

#[tokio::test]
async fn checkout_reports_persistence_failure_after_session_creation() {
    let h = Harness::new().await;
    let user = h.user("free");
    h.store.fail_inserts(true);

    let err = h.billing.checkout.initiate(&user, "business").await.unwrap_err();
    assert!(matches!(err, BillingError::PersistenceFailed { .. }));
    // Session exists at the provider with no local row
    assert_eq!(h.provider.session_count(), 1);
    assert_eq!(h.store.payment_count().unwrap(), 0);
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn scenario_a_paid_webhook_upgrades_plan() {
    let h = Harness::new().await;
    let user = h.user("free");
    let session = h.billing.checkout.initiate(&user, "pro").await.unwrap().session_id;

    let (body, sig) = completed_paid(&session);
    let ack = h.billing.reconciler.handle_webhook(&body, &sig).await.unwrap();

    assert_eq!(
        ack.outcome,
        WebhookOutcome::Applied {
            status: PaymentStatus::Paid
        }
    );
    assert_eq!(status_of(&h, &session).await, PaymentStatus::Paid);
    assert_eq!(h.plan_of(&user), "pro");
}

#[tokio::test]
async fn scenario_b_duplicate_webhook_is_noop() {
    let h = Harness::new().await;
    let user = h.user("free");
    let session = h.billing.checkout.initiate(&user, "pro").await.unwrap().session_id;

    let (body, sig) = completed_paid(&session);
    h.billing.reconciler.handle_webhook(&body, &sig).await.unwrap();
    let second = h.billing.reconciler.handle_webhook(&body, &sig).await.unwrap();

    assert_eq!(
        second.outcome,
        WebhookOutcome::AlreadySettled {
            status: PaymentStatus::Paid
        }
    );
    assert_eq!(h.store.status_writes().unwrap(), 1);
    assert_eq!(h.store.plan_writes().unwrap(), 1);
}

#[tokio::test]
async fn scenario_c_confirm_while_processing_stays_pending() {
    let h = Harness::new().await;
    let user = h.user("free");
    let session = h.billing.checkout.initiate(&user, "pro").await.unwrap().session_id;

    let outcome = h.billing.reconciler.confirm_checkout(&user, &session).await.unwrap();

    assert_eq!(outcome.status, PaymentStatus::Pending);
    assert_eq!(outcome.plan, "pro");
    assert_eq!(h.plan_of(&user), "free");
    assert_eq!(h.store.status_writes().unwrap(), 0);
}

#[tokio::test]
async fn scenario_d_confirm_by_other_user_is_forbidden() {
    let h = Harness::new().await;
    let owner = h.user("free");
    let intruder = h.user("free");
    let session = h.billing.checkout.initiate(&owner, "pro").await.unwrap().session_id;
    h.provider.set_payment_status(&session, ProviderPaymentStatus::Paid);

    assert!(matches!(
        h.billing.reconciler.confirm_checkout(&intruder, &session).await,
        Err(BillingError::Forbidden(_))
    ));
    assert_eq!(status_of(&h, &session).await, PaymentStatus::Pending);
    assert_eq!(h.plan_of(&intruder), "free");
    assert_eq!(h.provider.get_calls(), 0);

    // Still forbidden once the payment has settled
    h.billing.reconciler.confirm_checkout(&owner, &session).await.unwrap();
    assert!(matches!(
        h.billing.reconciler.confirm_checkout(&intruder, &session).await,
        Err(BillingError::Forbidden(_))
    ));
}

// ============================================================================
// Confirm entry
// ============================================================================

#[tokio::test]
async fn confirm_applies_paid_from_provider() {
    let h = Harness::new().await;
    let user = h.user("free");
    let session = h.billing.checkout.initiate(&user, "business").await.unwrap().session_id;
    h.provider.set_payment_status(&session, ProviderPaymentStatus::Paid);

    let outcome = h.billing.reconciler.confirm_checkout(&user, &session).await.unwrap();

    assert_eq!(outcome.status, PaymentStatus::Paid);
    assert_eq!(outcome.plan, "business");
    assert_eq!(h.plan_of(&user), "business");
}

#[tokio::test]
async fn confirm_after_settlement_skips_provider() {
    let h = Harness::new().await;
    let user = h.user("free");
    let session = h.billing.checkout.initiate(&user, "pro").await.unwrap().session_id;
    let (body, sig) = completed_paid(&session);
    h.billing.reconciler.handle_webhook(&body, &sig).await.unwrap();

    for _ in 0..3 {
        let outcome = h.billing.reconciler.confirm_checkout(&user, &session).await.unwrap();
        assert_eq!(outcome.status, PaymentStatus::Paid);
    }
    assert_eq!(h.provider.get_calls(), 0);
    assert_eq!(h.store.status_writes().unwrap(), 1);
}

#[tokio::test]
async fn confirm_unknown_session_is_not_found() {
    let h = Harness::new().await;
    let user = h.user("free");

    assert!(matches!(
        h.billing.reconciler.confirm_checkout(&user, "cs_missing").await,
        Err(BillingError::PaymentNotFound(_))
    ));
}

#[tokio::test]
async fn confirm_rejects_provider_metadata_mismatch() {
    let h = Harness::new().await;
    let user = h.user("free");
    let session = h.billing.checkout.initiate(&user, "pro").await.unwrap().session_id;
    h.provider.set_payment_status(&session, ProviderPaymentStatus::Paid);
    h.provider.set_metadata_user(&session, &UserId::new().to_string());

    assert!(matches!(
        h.billing.reconciler.confirm_checkout(&user, &session).await,
        Err(BillingError::Forbidden(_))
    ));
    assert_eq!(status_of(&h, &session).await, PaymentStatus::Pending);
    assert_eq!(h.plan_of(&user), "free");
}

#[tokio::test]
async fn confirm_without_provider_metadata_uses_ledger_owner() {
    let h = Harness::new().await;
    let user = h.user("free");
    let session = h.billing.checkout.initiate(&user, "pro").await.unwrap().session_id;
    h.provider.set_payment_status(&session, ProviderPaymentStatus::Paid);
    h.provider.clear_metadata_user(&session);

    let outcome = h.billing.reconciler.confirm_checkout(&user, &session).await.unwrap();

    assert_eq!(outcome.status, PaymentStatus::Paid);
    assert_eq!(h.plan_of(&user), "pro");

    // A different caller is still stopped by the ledger owner check
    let other = h.user("free");
    assert!(matches!(
        h.billing.reconciler.confirm_checkout(&other, &session).await,
        Err(BillingError::Forbidden(_))
    ));
}

#[tokio::test]
async fn confirm_of_session_unknown_to_provider_is_invalid() {
    let h = Harness::new().await;
    let user = h.user("free");
    let session = h.billing.checkout.initiate(&user, "pro").await.unwrap().session_id;
    h.provider.forget_session(&session);

    let result = h.billing.reconciler.confirm_checkout(&user, &session).await;

    assert!(matches!(result, Err(BillingError::Validation(_))), "{result:?}");
    assert_eq!(status_of(&h, &session).await, PaymentStatus::Pending);
    assert_eq!(h.plan_of(&user), "free");
}

#[tokio::test]
async fn failed_plan_write_rolls_back_and_redelivery_settles() {
    let h = Harness::new().await;
    let user = h.user("free");
    let session = h.billing.checkout.initiate(&user, "pro").await.unwrap().session_id;
    let (body, sig) = completed_paid(&session);

    h.store.fail_plan_writes(true);
    let err = h.billing.reconciler.handle_webhook(&body, &sig).await.unwrap_err();
    assert!(err.is_retryable(), "{err:?}");
    assert_eq!(status_of(&h, &session).await, PaymentStatus::Pending);
    assert_eq!(h.plan_of(&user), "free");
    assert_eq!(h.store.status_writes().unwrap(), 0);

    // Stripe retries the delivery once storage recovers
    h.store.fail_plan_writes(false);
    let ack = h.billing.reconciler.handle_webhook(&body, &sig).await.unwrap();
    assert_eq!(
        ack.outcome,
        WebhookOutcome::Applied {
            status: PaymentStatus::Paid
        }
    );
    assert_eq!(h.plan_of(&user), "pro");
    assert_eq!(h.store.plan_writes().unwrap(), 1);
}

// ============================================================================
// Webhook entry
// ============================================================================

#[tokio::test]
async fn webhook_replay_produces_acks_without_writes() {
    let h = Harness::new().await;
    let user = h.user("free");
    let session = h.billing.checkout.initiate(&user, "enterprise").await.unwrap().session_id;
    let (body, sig) = completed_paid(&session);
    h.billing.reconciler.handle_webhook(&body, &sig).await.unwrap();

    for _ in 0..10 {
        let ack = h.billing.reconciler.handle_webhook(&body, &sig).await.unwrap();
        assert!(matches!(ack.outcome, WebhookOutcome::AlreadySettled { .. }));
    }
    assert_eq!(h.store.status_writes().unwrap(), 1);
    assert_eq!(h.store.plan_writes().unwrap(), 1);
    assert_eq!(h.plan_of(&user), "enterprise");
}

#[tokio::test]
async fn webhook_for_unknown_session_is_acknowledged() {
    let h = Harness::new().await;
    let (body, sig) = completed_paid("cs_never_recorded");

    let ack = h.billing.reconciler.handle_webhook(&body, &sig).await.unwrap();
    assert_eq!(ack.outcome, WebhookOutcome::UnknownSession);
}

#[tokio::test]
async fn webhook_with_bad_signature_never_reaches_ledger() {
    let h = Harness::new().await;
    let user = h.user("free");
    let session = h.billing.checkout.initiate(&user, "pro").await.unwrap().session_id;
    let (body, _) = completed_paid(&session);
    let forged = sign_payload(&body, "whsec_attacker", time::OffsetDateTime::now_utc().unix_timestamp()).unwrap();

    assert!(matches!(
        h.billing.reconciler.handle_webhook(&body, &forged).await,
        Err(BillingError::SignatureInvalid)
    ));
    assert_eq!(status_of(&h, &session).await, PaymentStatus::Pending);
    assert_eq!(h.plan_of(&user), "free");
}

#[tokio::test]
async fn webhook_with_unparseable_body_is_malformed() {
    let h = Harness::new().await;
    let body = r#"{"id":"evt_x","type":"checkout.session.completed","data":{"object":{}}}"#;
    let sig = sign_payload(body, common::WEBHOOK_SECRET, time::OffsetDateTime::now_utc().unix_timestamp()).unwrap();

    assert!(matches!(
        h.billing.reconciler.handle_webhook(body, &sig).await,
        Err(BillingError::MalformedEvent(_))
    ));
}

#[tokio::test]
async fn completed_but_unpaid_webhook_changes_nothing() {
    let h = Harness::new().await;
    let user = h.user("free");
    let session = h.billing.checkout.initiate(&user, "pro").await.unwrap().session_id;

    let (body, sig) = signed_event(EVENT_CHECKOUT_COMPLETED, &session, "unpaid");
    let ack = h.billing.reconciler.handle_webhook(&body, &sig).await.unwrap();

    assert_eq!(ack.outcome, WebhookOutcome::NoChange);
    assert_eq!(status_of(&h, &session).await, PaymentStatus::Pending);
}

#[tokio::test]
async fn async_failure_is_terminal() {
    let h = Harness::new().await;
    let user = h.user("free");
    let session = h.billing.checkout.initiate(&user, "pro").await.unwrap().session_id;

    let (body, sig) = signed_event(EVENT_ASYNC_PAYMENT_FAILED, &session, "unpaid");
    let ack = h.billing.reconciler.handle_webhook(&body, &sig).await.unwrap();
    assert_eq!(
        ack.outcome,
        WebhookOutcome::Applied {
            status: PaymentStatus::Failed
        }
    );

    // A late success does not resurrect a failed payment
    let (body, sig) = signed_event(EVENT_ASYNC_PAYMENT_SUCCEEDED, &session, "paid");
    let ack = h.billing.reconciler.handle_webhook(&body, &sig).await.unwrap();
    assert_eq!(
        ack.outcome,
        WebhookOutcome::AlreadySettled {
            status: PaymentStatus::Failed
        }
    );
    assert_eq!(h.plan_of(&user), "free");
}

#[tokio::test]
async fn unrelated_event_types_are_ignored() {
    let h = Harness::new().await;
    let (body, sig) = signed_event("invoice.paid", "in_123", "paid");

    let ack = h.billing.reconciler.handle_webhook(&body, &sig).await.unwrap();
    assert_eq!(ack.outcome, WebhookOutcome::Ignored);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_webhooks_and_confirms_settle_once() {
    let h = Harness::new().await;
    let user = h.user("free");
    let session = h.billing.checkout.initiate(&user, "pro").await.unwrap().session_id;
    h.provider.set_payment_status(&session, ProviderPaymentStatus::Paid);
    let (body, sig) = completed_paid(&session);

    let mut handles = Vec::new();
    for i in 0..16 {
        let billing = h.billing.clone();
        let (body, sig, session, user) = (body.clone(), sig.clone(), session.clone(), user.clone());
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                billing.reconciler.handle_webhook(&body, &sig).await.map(|_| ())
            } else {
                billing
                    .reconciler
                    .confirm_checkout(&user, &session)
                    .await
                    .map(|outcome| assert_eq!(outcome.status, PaymentStatus::Paid))
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(status_of(&h, &session).await, PaymentStatus::Paid);
    assert_eq!(h.store.status_writes().unwrap(), 1);
    assert_eq!(h.store.plan_writes().unwrap(), 1);
    assert_eq!(h.plan_of(&user), "pro");
}

// ============================================================================
// Refunds
// ============================================================================

#[tokio::test]
async fn refund_reverts_plan_and_is_idempotent() {
    let h = Harness::new().await;
    let user = h.user("free");
    let session = h.billing.checkout.initiate(&user, "pro").await.unwrap().session_id;
    let (body, sig) = completed_paid(&session);
    h.billing.reconciler.handle_webhook(&body, &sig).await.unwrap();

    let first = h.billing.reconciler.record_refund(&session).await.unwrap();
    assert!(first.applied);
    assert!(first.plan_reverted);
    assert_eq!(first.record.status, PaymentStatus::Refunded);
    assert_eq!(h.plan_of(&user), "free");

    let second = h.billing.reconciler.record_refund(&session).await.unwrap();
    assert!(!second.applied);
    assert_eq!(h.store.status_writes().unwrap(), 2);

    // Refunded payments stay refunded
    h.billing.reconciler.handle_webhook(&body, &sig).await.unwrap();
    assert_eq!(status_of(&h, &session).await, PaymentStatus::Refunded);
    assert_eq!(h.plan_of(&user), "free");
}

#[tokio::test]
async fn refund_keeps_plan_bought_later() {
    let h = Harness::new().await;
    let user = h.user("free");
    let first = h.billing.checkout.initiate(&user, "business").await.unwrap().session_id;
    let second = h.billing.checkout.initiate(&user, "enterprise").await.unwrap().session_id;
    for session in [&first, &second] {
        let (body, sig) = completed_paid(session);
        h.billing.reconciler.handle_webhook(&body, &sig).await.unwrap();
    }
    assert_eq!(h.plan_of(&user), "enterprise");

    let outcome = h.billing.reconciler.record_refund(&first).await.unwrap();
    assert!(outcome.applied);
    assert!(!outcome.plan_reverted);
    assert_eq!(h.plan_of(&user), "enterprise");
}

#[tokio::test]
async fn refund_of_unpaid_payment_is_rejected() {
    let h = Harness::new().await;
    let user = h.user("free");
    let session = h.billing.checkout.initiate(&user, "pro").await.unwrap().session_id;

    assert!(matches!(
        h.billing.reconciler.record_refund(&session).await,
        Err(BillingError::InvalidTransition(_))
    ));
    assert!(matches!(
        h.billing.reconciler.record_refund("cs_missing").await,
        Err(BillingError::PaymentNotFound(_))
    ));
    assert_eq!(status_of(&h, &session).await, PaymentStatus::Pending);
}

// ============================================================================
// Orphan sweep
// ============================================================================

#[tokio::test]
async fn sweep_adopts_orphaned_session_once() {
    let h = Harness::new().await;
    let user = h.user("free");
    h.store.fail_inserts(true);
    assert!(h.billing.checkout.initiate(&user, "pro").await.is_err());
    h.store.fail_inserts(false);

    let report = h.billing.sweeper.sweep(Duration::from_secs(3600)).await.unwrap();
    assert_eq!((report.scanned, report.adopted, report.settled), (1, 1, 0));
    assert_eq!(h.store.payment_count().unwrap(), 1);

    let again = h.billing.sweeper.sweep(Duration::from_secs(3600)).await.unwrap();
    assert_eq!(again.adopted, 0);
    assert_eq!(h.store.payment_count().unwrap(), 1);
}

#[tokio::test]
async fn sweep_settles_paid_orphan() {
    let h = Harness::new().await;
    let user = h.user("free");
    let session = h
        .provider
        .add_external_session(user.user_id, "business", 4900, ProviderPaymentStatus::Paid);

    let report = h.billing.sweeper.sweep(Duration::from_secs(3600)).await.unwrap();

    assert_eq!((report.adopted, report.settled), (1, 1));
    assert_eq!(status_of(&h, &session).await, PaymentStatus::Paid);
    assert_eq!(h.plan_of(&user), "business");

    // The webhook arriving afterwards is a replay
    let (body, sig) = completed_paid(&session);
    let ack = h.billing.reconciler.handle_webhook(&body, &sig).await.unwrap();
    assert!(matches!(ack.outcome, WebhookOutcome::AlreadySettled { .. }));
    assert_eq!(h.store.plan_writes().unwrap(), 1);
}

#[tokio::test]
async fn sweep_rejects_window_beyond_time_range() {
    let h = Harness::new().await;

    assert!(matches!(
        h.billing.sweeper.sweep(Duration::MAX).await,
        Err(BillingError::Validation(_))
    ));
    assert!(matches!(
        h.billing.sweeper.sweep(Duration::from_secs(u64::MAX / 2)).await,
        Err(BillingError::Validation(_))
    ));
}

#[tokio::test]
async fn sweep_ignores_sessions_without_metadata() {
    let h = Harness::new().await;
    let stranger = AuthenticatedUser::new(UserId::new(), "x@example.com", PlatformRole::User);
    let session = h
        .provider
        .add_external_session(stranger.user_id, "pro", 9900, ProviderPaymentStatus::Paid);
    h.provider.set_metadata_user(&session, "not-a-uuid");

    let report = h.billing.sweeper.sweep(Duration::from_secs(3600)).await.unwrap();
    assert_eq!((report.scanned, report.adopted), (1, 0));
    assert_eq!(h.store.payment_count().unwrap(), 0);
}
