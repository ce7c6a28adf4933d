//! Site and page creation against Postgres
//!
//! ## Running Tests
//! ```bash
//! export DATABASE_URL="postgres://localhost/sitecraft_test"
//! cargo test -p sitecraft-api --test pg_sites -- --ignored --test-threads=1
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use sitecraft_api::{create_router, AppState, Config};
use sitecraft_billing::{Entitlements, PlanUpdate};
use sitecraft_shared::{AdminEmails, PoolSettings};
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

const JWT_SECRET: &str = "pg-sites-test-secret-at-least-32-chars";
const ONE_PAGE_PLAN: &str = "one_page_test";

async fn setup() -> (PgPool, AppState, Router) {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for Postgres tests");
    let pool = sitecraft_shared::create_pool(&url, PoolSettings::default())
        .await
        .expect("Failed to connect to test database");
    sitecraft_shared::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    let entitlements = Entitlements::from_pool(pool.clone());
    entitlements.plans.seed_defaults().await.unwrap();
    entitlements
        .plans
        .update(
            ONE_PAGE_PLAN,
            PlanUpdate {
                name: "One Page".into(),
                price_cents: 100,
                description: String::new(),
                features: vec![],
                site_limit: 1,
                page_limit: Some(1),
            },
        )
        .await
        .unwrap();

    let config = Config {
        bind_address: "127.0.0.1:0".to_string(),
        cors_allowed_origins: Vec::new(),
        database_url: url,
        database_max_connections: 2,
        database_acquire_timeout: Duration::from_secs(5),
        jwt_secret: JWT_SECRET.to_string(),
        jwt_expiry_hours: 1,
        admin_emails: AdminEmails::default(),
        enable_billing: false,
    };

    let state = AppState::new(pool.clone(), config, entitlements, None);
    let router = create_router(state.clone());
    (pool, state, router)
}

async fn create_user(pool: &PgPool, state: &AppState, plan: &str) -> String {
    let id = Uuid::new_v4();
    let email = format!("{id}@example.com");
    sqlx::query("INSERT INTO users (id, email, plan) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(&email)
        .bind(plan)
        .execute(pool)
        .await
        .expect("insert user");
    state.jwt.generate_token(id, &email, "platform_user").unwrap()
}

async fn post_json(router: &Router, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
#[ignore] // Requires database
async fn test_page_limit_is_enforced_per_site() {
    let (pool, state, router) = setup().await;
    let owner = create_user(&pool, &state, ONE_PAGE_PLAN).await;
    let slug = format!("shop-{}", Uuid::new_v4().simple());

    let (status, site) = post_json(
        &router,
        "/api/v1/sites",
        &owner,
        json!({ "name": "Shop", "slug": slug }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{site}");
    assert_eq!(site["role"], "owner");
    let pages_uri = format!("/api/v1/sites/{}/pages", site["id"].as_str().unwrap());

    let (status, page) = post_json(&router, &pages_uri, &owner, json!({ "title": "Home" })).await;
    assert_eq!(status, StatusCode::CREATED, "{page}");
    assert_eq!(page["slug"], "home");

    let (status, body) = post_json(&router, &pages_uri, &owner, json!({ "title": "About" })).await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
    assert_eq!(body["error"]["code"], "PLAN_LIMIT_EXCEEDED");

    // Site limit of one is now used up as well
    let (status, body) = post_json(
        &router,
        "/api/v1/sites",
        &owner,
        json!({ "name": "Second", "slug": format!("second-{}", Uuid::new_v4().simple()) }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
    assert_eq!(body["error"]["code"], "PLAN_LIMIT_EXCEEDED");
}

#[tokio::test]
#[ignore] // Requires database
async fn test_pages_of_foreign_site_are_not_found() {
    let (pool, state, router) = setup().await;
    let owner = create_user(&pool, &state, ONE_PAGE_PLAN).await;
    let stranger = create_user(&pool, &state, "enterprise").await;

    let (status, site) = post_json(
        &router,
        "/api/v1/sites",
        &owner,
        json!({ "name": "Private", "slug": format!("private-{}", Uuid::new_v4().simple()) }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{site}");
    let pages_uri = format!("/api/v1/sites/{}/pages", site["id"].as_str().unwrap());

    let (status, body) = post_json(&router, &pages_uri, &stranger, json!({ "title": "Home" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND, "{body}");
}
