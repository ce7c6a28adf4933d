//! In-memory implementations of the billing storage traits.
//!
//! One mutex guards every table, which gives the same "re-check under
//! exclusivity, act once" behaviour as the Postgres row lock. Used by tests
//! and local runs without a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use sitecraft_shared::{PaymentStatus, TenantId, UserId};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::entitlement::ResourceCounter;
use crate::error::{BillingError, BillingResult};
use crate::ledger::{
    decide_transition, plan_effect, NewPaymentRecord, PaymentLedger, PaymentRecord, PlanEffect,
    SessionKey, Transition, TransitionOutcome,
};
use crate::plans::{PlanConfig, PlanStore};

#[derive(Default)]
struct Tables {
    payments: HashMap<SessionKey, PaymentRecord>,
    users: HashMap<UserId, String>,
    plans: HashMap<String, PlanConfig>,
    site_owners: Vec<(TenantId, UserId)>,
    pages: HashMap<TenantId, i64>,
    status_writes: usize,
    plan_writes: usize,
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    fail_inserts: AtomicBool,
    fail_plan_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> BillingResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| BillingError::Transient("in-memory store poisoned".to_string()))
    }

    pub fn add_user(&self, user_id: UserId, plan: &str) -> BillingResult<()> {
        self.lock()?.users.insert(user_id, plan.to_string());
        Ok(())
    }

    pub fn add_owned_site(&self, user_id: UserId) -> BillingResult<TenantId> {
        let tenant_id = TenantId::new();
        self.lock()?.site_owners.push((tenant_id, user_id));
        Ok(tenant_id)
    }

    pub fn add_page(&self, tenant_id: TenantId) -> BillingResult<()> {
        *self.lock()?.pages.entry(tenant_id).or_insert(0) += 1;
        Ok(())
    }

    pub fn user_plan(&self, user_id: UserId) -> BillingResult<Option<String>> {
        Ok(self.lock()?.users.get(&user_id).cloned())
    }

    /// Number of payment status writes so far
    pub fn status_writes(&self) -> BillingResult<usize> {
        Ok(self.lock()?.status_writes)
    }

    /// Number of `users.plan` writes so far
    pub fn plan_writes(&self) -> BillingResult<usize> {
        Ok(self.lock()?.plan_writes)
    }

    pub fn payment_count(&self) -> BillingResult<usize> {
        Ok(self.lock()?.payments.len())
    }

    /// Make subsequent `insert_pending` calls fail
    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Make the `users.plan` write inside a transition fail after the status
    /// change was staged. Nothing from that transition is kept.
    pub fn fail_plan_writes(&self, fail: bool) {
        self.fail_plan_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentLedger for InMemoryStore {
    async fn insert_pending(&self, new: NewPaymentRecord) -> BillingResult<Option<PaymentRecord>> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(BillingError::Database("insert rejected".to_string()));
        }

        let mut tables = self.lock()?;
        if tables.payments.contains_key(&new.key) {
            return Ok(None);
        }

        let now = OffsetDateTime::now_utc();
        let record = PaymentRecord {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            plan: new.plan,
            provider: new.key.provider.clone(),
            provider_session_id: new.key.session_id.clone(),
            status: PaymentStatus::Pending,
            amount_cents: new.amount_cents,
            currency: new.currency,
            created_at: now,
            updated_at: now,
        };
        tables.payments.insert(new.key, record.clone());
        Ok(Some(record))
    }

    async fn find_by_session(&self, key: &SessionKey) -> BillingResult<Option<PaymentRecord>> {
        Ok(self.lock()?.payments.get(key).cloned())
    }

    async fn apply_transition(
        &self,
        key: &SessionKey,
        target: PaymentStatus,
        fallback_plan: &str,
    ) -> BillingResult<TransitionOutcome> {
        let mut tables = self.lock()?;

        let Some(current) = tables.payments.get(key).cloned() else {
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

        let mut updated = current.clone();
        updated.status = target;
        updated.updated_at = OffsetDateTime::now_utc();

        // Staged like a transaction: both writes land together or neither does
        let user_plan = tables.users.get(&current.user_id);
        let new_plan = match plan_effect(&current, target, fallback_plan) {
            PlanEffect::None => None,
            PlanEffect::Grant(plan) => user_plan.map(|_| plan),
            PlanEffect::Revert { from, to } => user_plan.filter(|p| **p == from).map(|_| to),
        };

        if new_plan.is_some() && self.fail_plan_writes.load(Ordering::SeqCst) {
            return Err(BillingError::Database("plan update rejected".to_string()));
        }

        let plan_changed = new_plan.is_some();
        if let Some(plan) = new_plan {
            tables.users.insert(current.user_id, plan);
            tables.plan_writes += 1;
        }
        tables.payments.insert(key.clone(), updated.clone());
        tables.status_writes += 1;

        Ok(TransitionOutcome::Applied {
            previous: current.status,
            record: updated,
            plan_changed,
        })
    }
}

#[async_trait]
impl PlanStore for InMemoryStore {
    async fn get(&self, id: &str) -> BillingResult<Option<PlanConfig>> {
        Ok(self.lock()?.plans.get(id).cloned())
    }

    async fn list(&self) -> BillingResult<Vec<PlanConfig>> {
        let mut plans: Vec<PlanConfig> = self.lock()?.plans.values().cloned().collect();
        plans.sort_by(|a, b| a.price_cents.cmp(&b.price_cents).then_with(|| a.id.cmp(&b.id)));
        Ok(plans)
    }

    async fn upsert(&self, plan: &PlanConfig) -> BillingResult<PlanConfig> {
        self.lock()?.plans.insert(plan.id.clone(), plan.clone());
        Ok(plan.clone())
    }

    async fn insert_if_missing(&self, plan: &PlanConfig) -> BillingResult<bool> {
        let mut tables = self.lock()?;
        if tables.plans.contains_key(&plan.id) {
            return Ok(false);
        }
        tables.plans.insert(plan.id.clone(), plan.clone());
        Ok(true)
    }
}

#[async_trait]
impl ResourceCounter for InMemoryStore {
    async fn current_plan(&self, user_id: UserId) -> BillingResult<Option<String>> {
        self.user_plan(user_id)
    }

    async fn count_owned_sites(&self, user_id: UserId) -> BillingResult<i64> {
        let count = self
            .lock()?
            .site_owners
            .iter()
            .filter(|(_, owner)| *owner == user_id)
            .count();
        Ok(count as i64)
    }

    async fn count_pages(&self, tenant_id: TenantId) -> BillingResult<i64> {
        Ok(self.lock()?.pages.get(&tenant_id).copied().unwrap_or(0))
    }
}
