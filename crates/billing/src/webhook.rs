//! Stripe webhook signature verification and event parsing
//!
//! Verification is done by hand rather than through `stripe::Webhook` so that
//! events from newer API versions still parse; only the checkout-session
//! fields reconciliation needs are decoded.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::error::{BillingError, BillingResult};
use crate::provider::{EventKind, ProviderEvent, ProviderPaymentStatus};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age (and clock skew) of a signed delivery, in seconds
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

pub const EVENT_CHECKOUT_COMPLETED: &str = "checkout.session.completed";
pub const EVENT_ASYNC_PAYMENT_SUCCEEDED: &str = "checkout.session.async_payment_succeeded";
pub const EVENT_ASYNC_PAYMENT_FAILED: &str = "checkout.session.async_payment_failed";

/// Verify a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=...]`) against the raw body
pub fn verify_signature(
    payload: &str,
    header: &str,
    secret: &str,
    now_unix: i64,
    tolerance_secs: i64,
) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        if let Some((key, value)) = part.trim().split_once('=') {
            match key {
                "t" => timestamp = value.parse().ok(),
                "v1" => signatures.push(value),
                _ => {}
            }
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::warn!("Missing timestamp in signature header");
        BillingError::SignatureInvalid
    })?;

    if signatures.is_empty() {
        tracing::warn!("Missing v1 signature in signature header");
        return Err(BillingError::SignatureInvalid);
    }

    if (now_unix - timestamp).abs() > tolerance_secs {
        tracing::warn!(
            timestamp = timestamp,
            now = now_unix,
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::SignatureInvalid);
    }

    let signed_payload = format!("{}.{}", timestamp, payload);

    for candidate in signatures {
        let Ok(expected) = hex::decode(candidate) else {
            continue;
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| BillingError::Config("Invalid webhook secret".to_string()))?;
        mac.update(signed_payload.as_bytes());
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }

    tracing::warn!("Webhook signature mismatch");
    Err(BillingError::SignatureInvalid)
}

/// Produce a `Stripe-Signature` header for `payload`, as Stripe would
pub fn sign_payload(payload: &str, secret: &str, timestamp: i64) -> BillingResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::Config("Invalid webhook secret".to_string()))?;
    mac.update(format!("{}.{}", timestamp, payload).as_bytes());
    Ok(format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    ))
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    type_: String,
    #[serde(default)]
    data: Option<RawEventData>,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RawCheckoutSession {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
}

/// Parse a verified body into a [`ProviderEvent`]
pub fn parse_event(payload: &str) -> BillingResult<ProviderEvent> {
    let raw: RawEvent = serde_json::from_str(payload).map_err(|e| {
        tracing::warn!(parse_error = %e, "Failed to parse webhook event JSON");
        BillingError::MalformedEvent(e.to_string())
    })?;

    let kind = match raw.type_.as_str() {
        EVENT_CHECKOUT_COMPLETED | EVENT_ASYNC_PAYMENT_SUCCEEDED | EVENT_ASYNC_PAYMENT_FAILED => {
            let session = checkout_session(&raw)?;
            let session_id = session
                .id
                .filter(|id| !id.is_empty())
                .ok_or_else(|| BillingError::MalformedEvent(format!("{} without session id", raw.type_)))?;
            let payment_status = session
                .payment_status
                .as_deref()
                .map(ProviderPaymentStatus::parse)
                .unwrap_or(ProviderPaymentStatus::Unknown);

            match raw.type_.as_str() {
                EVENT_CHECKOUT_COMPLETED => EventKind::CheckoutCompleted {
                    session_id,
                    payment_status,
                },
                EVENT_ASYNC_PAYMENT_SUCCEEDED => EventKind::AsyncPaymentSucceeded {
                    session_id,
                    payment_status,
                },
                _ => EventKind::AsyncPaymentFailed { session_id },
            }
        }
        other => EventKind::Other(other.to_string()),
    };

    Ok(ProviderEvent { id: raw.id, kind })
}

fn checkout_session(raw: &RawEvent) -> BillingResult<RawCheckoutSession> {
    let object = raw
        .data
        .as_ref()
        .map(|d| d.object.clone())
        .ok_or_else(|| BillingError::MalformedEvent(format!("{} without data.object", raw.type_)))?;
    serde_json::from_value(object).map_err(|e| BillingError::MalformedEvent(e.to_string()))
}

/// Verify then parse, using the current wall clock
pub fn construct_event(payload: &str, header: &str, secret: &str) -> BillingResult<ProviderEvent> {
    let now = time::OffsetDateTime::now_utc().unix_timestamp();
    verify_signature(payload, header, secret, now, SIGNATURE_TOLERANCE_SECS)?;
    parse_event(payload)
}
