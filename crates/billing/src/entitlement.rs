//! Entitlement gate
//!
//! Answers "may this user create one more of this resource right now?". The
//! plan is read from the user row on every check, never from the session
//! token, so a payment settled a moment ago is honoured immediately.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use sitecraft_shared::{TenantId, UserId};
use sqlx::PgPool;

use crate::error::{BillingError, BillingResult};
use crate::plans::{PgPlanStore, PlanCatalog, PlanConfig, PlanDefaults, PlanStore, FALLBACK_PLAN_ID};

/// Resource a creation request is about to add
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
    Site,
    Page { tenant_id: TenantId },
}

/// Live resource counts and the user's current plan
#[async_trait]
pub trait ResourceCounter: Send + Sync {
    /// `None` when the user does not exist
    async fn current_plan(&self, user_id: UserId) -> BillingResult<Option<String>>;

    /// Tenants the user holds the `owner` role on
    async fn count_owned_sites(&self, user_id: UserId) -> BillingResult<i64>;

    async fn count_pages(&self, tenant_id: TenantId) -> BillingResult<i64>;
}

pub struct PgResourceCounter {
    pool: PgPool,
}

impl PgResourceCounter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceCounter for PgResourceCounter {
    async fn current_plan(&self, user_id: UserId) -> BillingResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT plan FROM users WHERE id = $1")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(plan,)| plan))
    }

    async fn count_owned_sites(&self, user_id: UserId) -> BillingResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM tenant_users tu
            JOIN tenants t ON t.id = tu.tenant_id
            WHERE tu.user_id = $1 AND tu.role = 'owner'
            "#,
        )
        .bind(user_id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn count_pages(&self, tenant_id: TenantId) -> BillingResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pages WHERE tenant_id = $1")
            .bind(tenant_id.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// Plan, limits and usage for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntitlementSummary {
    pub plan: String,
    pub plan_name: String,
    pub site_limit: i32,
    pub page_limit: i32,
    pub sites_owned: i64,
    pub can_create_site: bool,
}

pub struct EntitlementGate {
    counter: Arc<dyn ResourceCounter>,
    plans: Arc<PlanCatalog>,
}

impl EntitlementGate {
    pub fn new(counter: Arc<dyn ResourceCounter>, plans: Arc<PlanCatalog>) -> Self {
        Self { counter, plans }
    }

    /// Plan id and resolved config. Unknown ids resolve to `None`.
    async fn resolve(&self, user_id: UserId) -> BillingResult<(String, Option<PlanConfig>)> {
        let plan_id = self
            .counter
            .current_plan(user_id)
            .await?
            .unwrap_or_else(|| FALLBACK_PLAN_ID.to_string());
        let plan = self.plans.get(&plan_id).await;
        Ok((plan_id, plan))
    }

    /// Pure precondition: no writes. `PlanLimitExceeded` carries the blocking plan id.
    pub async fn check(&self, user_id: UserId, resource: ResourceClass) -> BillingResult<()> {
        let (plan_id, plan) = self.resolve(user_id).await?;

        // Unknown plan means limit 0
        let limit = match (&plan, resource) {
            (Some(p), ResourceClass::Site) => p.site_limit,
            (Some(p), ResourceClass::Page { .. }) => p.page_limit,
            (None, _) => 0,
        };

        if limit <= 0 {
            tracing::info!(
                user_id = %user_id,
                plan = %plan_id,
                resource = ?resource,
                "Plan does not allow resource creation"
            );
            return Err(BillingError::PlanLimitExceeded(plan_id));
        }

        let count = match resource {
            ResourceClass::Site => self.counter.count_owned_sites(user_id).await?,
            ResourceClass::Page { tenant_id } => self.counter.count_pages(tenant_id).await?,
        };

        if count >= i64::from(limit) {
            tracing::info!(
                user_id = %user_id,
                plan = %plan_id,
                resource = ?resource,
                count = count,
                limit = limit,
                "Plan limit reached"
            );
            return Err(BillingError::PlanLimitExceeded(plan_id));
        }

        Ok(())
    }

    pub async fn summary(&self, user_id: UserId) -> BillingResult<EntitlementSummary> {
        let (plan_id, plan) = self.resolve(user_id).await?;
        let sites_owned = self.counter.count_owned_sites(user_id).await?;

        let (plan_name, site_limit, page_limit) = match plan {
            Some(p) => (p.name, p.site_limit, p.page_limit),
            None => (plan_id.clone(), 0, 0),
        };

        Ok(EntitlementSummary {
            plan: plan_id,
            plan_name,
            site_limit,
            page_limit,
            sites_owned,
            can_create_site: site_limit > 0 && sites_owned < i64::from(site_limit),
        })
    }
}

/// Plan catalog and gate, shared by every deployment.
///
/// Limits do not depend on a payment provider being configured, so this is
/// built on its own and handed to [`crate::BillingService`] when billing runs.
#[derive(Clone)]
pub struct Entitlements {
    pub plans: Arc<PlanCatalog>,
    pub gate: Arc<EntitlementGate>,
}

impl Entitlements {
    pub fn new(
        plan_store: Arc<dyn PlanStore>,
        counter: Arc<dyn ResourceCounter>,
        defaults: PlanDefaults,
    ) -> Self {
        let plans = Arc::new(PlanCatalog::new(plan_store, defaults));
        let gate = Arc::new(EntitlementGate::new(counter, plans.clone()));
        Self { plans, gate }
    }

    /// Postgres-backed catalog and counters with the built-in defaults
    pub fn from_pool(pool: PgPool) -> Self {
        Self::new(
            Arc::new(PgPlanStore::new(pool.clone())),
            Arc::new(PgResourceCounter::new(pool)),
            PlanDefaults::default(),
        )
    }
}
