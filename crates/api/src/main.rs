use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use sitecraft_api::{create_router, AppState, Config};
use sitecraft_billing::{BillingService, Entitlements};
use sitecraft_shared::PoolSettings;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,sitecraft_api=debug,sitecraft_billing=debug,tower_http=info".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
    }

    init_tracing();
    tracing::info!("Starting Sitecraft API server...");

    let config = Config::from_env()?;

    tracing::info!("Connecting to database...");
    let pool = sitecraft_shared::create_pool(
        &config.database_url,
        PoolSettings {
            max_connections: config.database_max_connections,
            acquire_timeout: config.database_acquire_timeout,
        },
    )
    .await?;

    tracing::info!("Running migrations...");
    sitecraft_shared::run_migrations(&pool).await?;

    // Limits apply in every deployment; only payments need Stripe
    let entitlements = Entitlements::from_pool(pool.clone());
    let inserted = entitlements.plans.seed_defaults().await?;
    tracing::info!(inserted, "Plan catalog seeded");

    let billing = if config.enable_billing {
        match BillingService::from_env(pool.clone(), entitlements.clone()) {
            Ok(service) => {
                tracing::info!("Billing enabled");
                Some(Arc::new(service))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Billing not configured, continuing without it");
                None
            }
        }
    } else {
        tracing::info!("Billing disabled by ENABLE_BILLING");
        None
    };

    let bind_address = config.bind_address.clone();
    let cors = cors_layer(&config);
    let state = AppState::new(pool, config, entitlements, billing);

    let app = create_router(state)
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!("Server listening on http://{}", bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
