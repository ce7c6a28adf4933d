//! API routes

pub mod admin;
pub mod billing;
pub mod health;
pub mod sites;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};

use crate::{
    auth::{require_admin, require_auth},
    state::AppState,
};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Public API routes (no auth required) - under /api/v1
    let mut public_api_routes = Router::new().route("/plans", get(billing::list_plans));

    // Plan catalog administration works without a payment provider
    let mut admin_routes = Router::new()
        .route("/admin/plans", get(admin::list_plans))
        .route("/admin/plans/reload", post(admin::reload_plans))
        .route(
            "/admin/plans/:plan_id",
            get(admin::get_plan).put(admin::update_plan),
        );

    // Protected API routes (auth required) - under /api/v1
    let mut protected_api_routes = Router::new()
        .route("/sites", get(sites::list_sites).post(sites::create_site))
        .route("/sites/:tenant_id/pages", post(sites::create_page))
        .route("/billing/entitlement", get(billing::get_entitlement));

    // Payment routes only exist when the billing service was configured
    if state.billing.is_some() {
        // Stripe webhook (public, uses signature verification)
        public_api_routes = public_api_routes.route("/billing/webhook", post(billing::webhook));

        admin_routes = admin_routes.route(
            "/admin/payments/:session_id/refund",
            post(admin::refund_payment),
        );

        protected_api_routes = protected_api_routes
            .route("/billing/checkout", post(billing::create_checkout))
            .route("/billing/confirm", post(billing::confirm_checkout));
    }

    let protected_api_routes =
        protected_api_routes.merge(admin_routes.route_layer(middleware::from_fn(require_admin)));

    // Apply auth middleware to protected routes
    let protected_api_routes = protected_api_routes
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    // Combine API routes under /api/v1 prefix
    let api_v1_routes = Router::new()
        .merge(public_api_routes)
        .merge(protected_api_routes);

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", api_v1_routes)
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB global limit
        .with_state(state)
}
