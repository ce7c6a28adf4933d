//! Payment ledger
//!
//! One row per provider checkout session, keyed by `(provider, provider_session_id)`.
//! Every status change goes through [`PaymentLedger::apply_transition`], which
//! locks the row, re-reads its status and applies the change at most once. The
//! user's plan is written in the same transaction as the status.

use async_trait::async_trait;
use serde::Serialize;
use sitecraft_shared::{PaymentStatus, UserId};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Identity of a checkout session at a provider
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub provider: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(provider: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            session_id: session_id.into(),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.session_id)
    }
}

/// One purchase attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub user_id: UserId,
    pub plan: String,
    pub provider: String,
    pub provider_session_id: String,
    pub status: PaymentStatus,
    pub amount_cents: i64,
    pub currency: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for PaymentRecord {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: UserId(row.try_get("user_id")?),
            plan: row.try_get("plan")?,
            provider: row.try_get("provider")?,
            provider_session_id: row.try_get("provider_session_id")?,
            status: status.parse().map_err(|e| sqlx::Error::ColumnDecode {
                index: "status".to_string(),
                source: Box::new(e),
            })?,
            amount_cents: row.try_get("amount_cents")?,
            currency: row.try_get("currency")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Fields of a new `pending` record
#[derive(Debug, Clone)]
pub struct NewPaymentRecord {
    pub user_id: UserId,
    pub plan: String,
    pub key: SessionKey,
    pub amount_cents: i64,
    pub currency: String,
}

/// What a requested status change amounts to, given the current status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Apply,
    NoOp,
    Reject,
}

/// The payment state machine.
///
/// `pending -> paid | failed`, `paid -> refunded`. Anything else either does
/// nothing (replays, regressions of terminal states) or is rejected (refunding
/// a payment that never completed).
pub fn decide_transition(current: PaymentStatus, target: PaymentStatus) -> Transition {
    use PaymentStatus::*;
    match (current, target) {
        (Pending, Paid) | (Pending, Failed) | (Paid, Refunded) => Transition::Apply,
        (Pending, Refunded) | (Failed, Refunded) => Transition::Reject,
        _ => Transition::NoOp,
    }
}

/// Change to `users.plan` that accompanies an applied transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanEffect {
    None,
    Grant(String),
    /// Revert to `to`, only if the user is still on `from`
    Revert { from: String, to: String },
}

pub fn plan_effect(record: &PaymentRecord, target: PaymentStatus, fallback_plan: &str) -> PlanEffect {
    match target {
        PaymentStatus::Paid => PlanEffect::Grant(record.plan.clone()),
        PaymentStatus::Refunded => PlanEffect::Revert {
            from: record.plan.clone(),
            to: fallback_plan.to_string(),
        },
        _ => PlanEffect::None,
    }
}

/// Result of [`PaymentLedger::apply_transition`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Status written (and the plan effect, if any)
    Applied {
        previous: PaymentStatus,
        record: PaymentRecord,
        plan_changed: bool,
    },
    /// Nothing written; record as found under the lock
    Unchanged { record: PaymentRecord },
    NotFound,
}

impl TransitionOutcome {
    pub fn record(&self) -> Option<&PaymentRecord> {
        match self {
            Self::Applied { record, .. } | Self::Unchanged { record } => Some(record),
            Self::NotFound => None,
        }
    }
}

/// Durable store of payment records
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    /// Insert a `pending` record. `None` if the session key already exists.
    async fn insert_pending(&self, new: NewPaymentRecord) -> BillingResult<Option<PaymentRecord>>;

    /// Unlocked read
    async fn find_by_session(&self, key: &SessionKey) -> BillingResult<Option<PaymentRecord>>;

    /// Lock the record, re-check its status and apply `target` at most once.
    ///
    /// `fallback_plan` is where a refunded user lands if they are still on the
    /// refunded plan.
    async fn apply_transition(
        &self,
        key: &SessionKey,
        target: PaymentStatus,
        fallback_plan: &str,
    ) -> BillingResult<TransitionOutcome>;
}

/// Postgres ledger
pub struct PgPaymentLedger {
    pool: PgPool,
}

impl PgPaymentLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const PAYMENT_COLUMNS: &str = "id, user_id, plan, provider, provider_session_id, status, \
                               amount_cents, currency, created_at, updated_at";

fn transient(e: sqlx::Error) -> BillingError {
    BillingError::Transient(e.to_string())
}

#[async_trait]
impl PaymentLedger for PgPaymentLedger {
    async fn insert_pending(&self, new: NewPaymentRecord) -> BillingResult<Option<PaymentRecord>> {
        let record: Option<PaymentRecord> = sqlx::query_as(&format!(
            r#"
            INSERT INTO payments (user_id, plan, provider, provider_session_id, status, amount_cents, currency)
            VALUES ($1, $2, $3, $4, 'pending', $5, $6)
            ON CONFLICT (provider, provider_session_id) DO NOTHING
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(new.user_id.0)
        .bind(&new.plan)
        .bind(&new.key.provider)
        .bind(&new.key.session_id)
        .bind(new.amount_cents)
        .bind(&new.currency)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn find_by_session(&self, key: &SessionKey) -> BillingResult<Option<PaymentRecord>> {
        let record: Option<PaymentRecord> = sqlx::query_as(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE provider = $1 AND provider_session_id = $2"
        ))
        .bind(&key.provider)
        .bind(&key.session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn apply_transition(
        &self,
        key: &SessionKey,
        target: PaymentStatus,
        fallback_plan: &str,
    ) -> BillingResult<TransitionOutcome> {
        // Dropping `tx` on any early return rolls back
        let mut tx = self.pool.begin().await.map_err(transient)?;

        let current: Option<PaymentRecord> = sqlx::query_as(&format!(
            r#"
            SELECT {PAYMENT_COLUMNS} FROM payments
            WHERE provider = $1 AND provider_session_id = $2
            FOR UPDATE
            "#
        ))
        .bind(&key.provider)
        .bind(&key.session_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(transient)?;

        let Some(current) = current else {
            return Ok(TransitionOutcome::NotFound);
        };

        match decide_transition(current.status, target) {
            Transition::NoOp => return Ok(TransitionOutcome::Unchanged { record: current }),
            Transition::Reject => {
                return Err(BillingError::InvalidTransition(format!(
                    "{} -> {} for session {}",
                    current.status, target, key
                )))
            }
            Transition::Apply => {}
        }

        let updated: PaymentRecord = sqlx::query_as(&format!(
            r#"
            UPDATE payments SET status = $1, updated_at = NOW()
            WHERE id = $2
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(target.as_str())
        .bind(current.id)
        .fetch_one(&mut *tx)
        .await
        .map_err(transient)?;

        let plan_changed = match plan_effect(&current, target, fallback_plan) {
            PlanEffect::None => false,
            PlanEffect::Grant(plan) => {
                let result = sqlx::query("UPDATE users SET plan = $1, updated_at = NOW() WHERE id = $2")
                    .bind(&plan)
                    .bind(current.user_id.0)
                    .execute(&mut *tx)
                    .await
                    .map_err(transient)?;
                if result.rows_affected() == 0 {
                    tracing::warn!(
                        user_id = %current.user_id,
                        session_id = %key.session_id,
                        "Paid session belongs to a user that no longer exists"
                    );
                }
                result.rows_affected() > 0
            }
            PlanEffect::Revert { from, to } => {
                let result = sqlx::query(
                    "UPDATE users SET plan = $1, updated_at = NOW() WHERE id = $2 AND plan = $3",
                )
                .bind(&to)
                .bind(current.user_id.0)
                .bind(&from)
                .execute(&mut *tx)
                .await
                .map_err(transient)?;
                result.rows_affected() > 0
            }
        };

        tx.commit().await.map_err(transient)?;

        tracing::info!(
            session_id = %key.session_id,
            user_id = %current.user_id,
            from = %current.status,
            to = %target,
            plan = %current.plan,
            plan_changed = plan_changed,
            "Payment transition applied"
        );

        Ok(TransitionOutcome::Applied {
            previous: current.status,
            record: updated,
            plan_changed,
        })
    }
}
