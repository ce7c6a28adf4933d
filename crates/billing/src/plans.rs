//! Plan catalog
//!
//! Plans live in `plan_configs` and are seeded from [`PlanDefaults`] at
//! startup. Reads go through an in-process cache; admin updates write through
//! it, so a successful update is visible to the next checkout or entitlement
//! check in this process. Across processes the catalog is last-writer-wins.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::error::{BillingError, BillingResult};

/// Plan every user starts on, and falls back to after a refund
pub const FALLBACK_PLAN_ID: &str = "free";

/// Canonical form of a plan id: trimmed, lowercase
pub fn normalize_plan_id(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// A purchasable (or free) plan and the resources it allows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PlanConfig {
    pub id: String,
    pub name: String,
    pub price_cents: i64,
    pub description: String,
    pub features: Vec<String>,
    /// Sites a user may own
    pub site_limit: i32,
    /// Pages per site
    pub page_limit: i32,
}

impl PlanConfig {
    pub fn is_billable(&self) -> bool {
        self.price_cents > 0
    }
}

/// Admin edit of a plan
#[derive(Debug, Clone, Deserialize)]
pub struct PlanUpdate {
    pub name: String,
    pub price_cents: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub features: Vec<String>,
    pub site_limit: i32,
    /// Defaults to `site_limit`
    #[serde(default)]
    pub page_limit: Option<i32>,
}

impl PlanUpdate {
    fn into_config(self, plan_id: &str) -> BillingResult<PlanConfig> {
        let id = normalize_plan_id(plan_id);
        let name = self.name.trim();

        if id.is_empty() {
            return Err(BillingError::Validation("plan id is required".to_string()));
        }
        if name.is_empty() {
            return Err(BillingError::Validation("plan name is required".to_string()));
        }
        let page_limit = self.page_limit.unwrap_or(self.site_limit);
        if self.price_cents < 0 || self.site_limit < 0 || page_limit < 0 {
            return Err(BillingError::Validation(
                "price and limits must not be negative".to_string(),
            ));
        }

        Ok(PlanConfig {
            id,
            name: name.to_string(),
            price_cents: self.price_cents,
            description: self.description.trim().to_string(),
            features: self
                .features
                .into_iter()
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect(),
            site_limit: self.site_limit,
            page_limit,
        })
    }
}

/// Built-in plans, used to seed the store and when it has no row for them
#[derive(Debug, Clone)]
pub struct PlanDefaults {
    plans: Vec<PlanConfig>,
}

impl PlanDefaults {
    pub fn new(plans: Vec<PlanConfig>) -> Self {
        Self { plans }
    }

    pub fn get(&self, id: &str) -> Option<&PlanConfig> {
        self.plans.iter().find(|p| p.id == id)
    }

    pub fn all(&self) -> &[PlanConfig] {
        &self.plans
    }
}

fn plan(
    id: &str,
    name: &str,
    price_cents: i64,
    description: &str,
    features: &[&str],
    limit: i32,
) -> PlanConfig {
    PlanConfig {
        id: id.to_string(),
        name: name.to_string(),
        price_cents,
        description: description.to_string(),
        features: features.iter().map(|f| f.to_string()).collect(),
        site_limit: limit,
        page_limit: limit,
    }
}

impl Default for PlanDefaults {
    fn default() -> Self {
        Self::new(vec![
            plan(
                FALLBACK_PLAN_ID,
                "Free",
                0,
                "Free plan to try out pages and stores.",
                &["Basic editor", "Hosting included"],
                0,
            ),
            plan(
                "business",
                "Business",
                4900,
                "Get off the ground quickly.",
                &["1 site", "Basic templates", "Email support"],
                1,
            ),
            plan(
                "pro",
                "Pro",
                9900,
                "More room to grow.",
                &["Up to 10 sites", "All templates", "Priority support", "Advanced analytics"],
                10,
            ),
            plan(
                "enterprise",
                "Enterprise",
                19900,
                "High capacity for teams and operations.",
                &["Up to 50 sites", "Custom templates", "Dedicated API and integrations", "24/7 support"],
                50,
            ),
        ])
    }
}

/// Durable plan storage
#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn get(&self, id: &str) -> BillingResult<Option<PlanConfig>>;

    async fn list(&self) -> BillingResult<Vec<PlanConfig>>;

    async fn upsert(&self, plan: &PlanConfig) -> BillingResult<PlanConfig>;

    /// Returns whether a row was inserted
    async fn insert_if_missing(&self, plan: &PlanConfig) -> BillingResult<bool>;
}

pub struct PgPlanStore {
    pool: PgPool,
}

impl PgPlanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlanStore for PgPlanStore {
    async fn get(&self, id: &str) -> BillingResult<Option<PlanConfig>> {
        let plan: Option<PlanConfig> = sqlx::query_as(
            r#"
            SELECT id, name, price_cents, COALESCE(description, '') AS description,
                   features, site_limit, page_limit
            FROM plan_configs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(plan)
    }

    async fn list(&self) -> BillingResult<Vec<PlanConfig>> {
        let plans: Vec<PlanConfig> = sqlx::query_as(
            r#"
            SELECT id, name, price_cents, COALESCE(description, '') AS description,
                   features, site_limit, page_limit
            FROM plan_configs
            ORDER BY price_cents ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(plans)
    }

    async fn upsert(&self, plan: &PlanConfig) -> BillingResult<PlanConfig> {
        let saved: PlanConfig = sqlx::query_as(
            r#"
            INSERT INTO plan_configs (id, name, price_cents, description, features, site_limit, page_limit)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                price_cents = EXCLUDED.price_cents,
                description = EXCLUDED.description,
                features = EXCLUDED.features,
                site_limit = EXCLUDED.site_limit,
                page_limit = EXCLUDED.page_limit,
                updated_at = NOW()
            RETURNING id, name, price_cents, COALESCE(description, '') AS description,
                      features, site_limit, page_limit
            "#,
        )
        .bind(&plan.id)
        .bind(&plan.name)
        .bind(plan.price_cents)
        .bind(&plan.description)
        .bind(&plan.features)
        .bind(plan.site_limit)
        .bind(plan.page_limit)
        .fetch_one(&self.pool)
        .await?;

        Ok(saved)
    }

    async fn insert_if_missing(&self, plan: &PlanConfig) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO plan_configs (id, name, price_cents, description, features, site_limit, page_limit)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&plan.id)
        .bind(&plan.name)
        .bind(plan.price_cents)
        .bind(&plan.description)
        .bind(&plan.features)
        .bind(plan.site_limit)
        .bind(plan.page_limit)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Cached view over a [`PlanStore`] with built-in fallbacks
pub struct PlanCatalog {
    store: Arc<dyn PlanStore>,
    defaults: PlanDefaults,
    cache: RwLock<HashMap<String, PlanConfig>>,
}

impl PlanCatalog {
    pub fn new(store: Arc<dyn PlanStore>, defaults: PlanDefaults) -> Self {
        Self {
            store,
            defaults,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn fallback_plan_id(&self) -> &'static str {
        FALLBACK_PLAN_ID
    }

    fn cached(&self, id: &str) -> Option<PlanConfig> {
        self.cache.read().ok().and_then(|c| c.get(id).cloned())
    }

    fn remember(&self, plan: &PlanConfig) {
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(plan.id.clone(), plan.clone());
        }
    }

    /// Resolve a plan id. `None` only for ids that are neither stored nor built in.
    pub async fn get(&self, id: &str) -> Option<PlanConfig> {
        let id = normalize_plan_id(id);
        let id = id.as_str();
        if let Some(plan) = self.cached(id) {
            return Some(plan);
        }

        match self.store.get(id).await {
            Ok(Some(plan)) => {
                self.remember(&plan);
                Some(plan)
            }
            Ok(None) => self.defaults.get(id).cloned(),
            Err(e) => {
                tracing::warn!(plan_id = %id, error = %e, "Plan lookup failed, using built-in defaults");
                self.defaults.get(id).cloned()
            }
        }
    }

    /// All plans, cheapest first. Built-in plans missing from the store are included.
    pub async fn list(&self) -> BillingResult<Vec<PlanConfig>> {
        let mut plans = self.store.list().await?;
        for default in self.defaults.all() {
            if !plans.iter().any(|p| p.id == default.id) {
                plans.push(default.clone());
            }
        }
        plans.sort_by(|a, b| a.price_cents.cmp(&b.price_cents).then_with(|| a.id.cmp(&b.id)));

        if let Ok(mut cache) = self.cache.write() {
            for plan in &plans {
                cache.insert(plan.id.clone(), plan.clone());
            }
        }
        Ok(plans)
    }

    /// Validate and upsert; the cached entry is replaced with the stored row
    pub async fn update(&self, plan_id: &str, update: PlanUpdate) -> BillingResult<PlanConfig> {
        let config = update.into_config(plan_id)?;
        let saved = self.store.upsert(&config).await?;
        self.remember(&saved);

        tracing::info!(
            plan_id = %saved.id,
            price_cents = saved.price_cents,
            site_limit = saved.site_limit,
            page_limit = saved.page_limit,
            "Plan updated"
        );
        Ok(saved)
    }

    /// Insert built-in plans that are not stored yet; existing rows are left alone
    pub async fn seed_defaults(&self) -> BillingResult<usize> {
        let mut inserted = 0;
        for plan in self.defaults.all() {
            if self.store.insert_if_missing(plan).await? {
                inserted += 1;
            }
        }
        if inserted > 0 {
            tracing::info!(inserted = inserted, "Seeded default plans");
        }
        Ok(inserted)
    }

    /// Drop cached plans so the next reads hit the store
    pub fn reload(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
        tracing::info!("Plan cache cleared");
    }
}
