use axum::{
    routing::{get, post},
    Router,
};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use property_pipeline::config::Config;
use property_pipeline::db::Database;
use property_pipeline::handlers::{self, AppState};
use property_pipeline::sources::SourceClients;

/// Main entry point.
///
/// Initializes tracing, configuration, the database pool, the external
/// source clients and the HTTP routes, then serves. The pipeline itself
/// only runs when triggered through POST /api/v1/pipeline/run.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "property_pipeline=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize database connection pool
    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");

    // External source clients, one set for the process lifetime
    let sources = SourceClients::new(&config)
        .map_err(|e| anyhow::anyhow!("Failed to initialize source clients: {}", e))?;
    tracing::info!("External source clients initialized");

    // Owner contact lookup cache (24 hour TTL)
    let contact_cache = Cache::builder()
        .time_to_live(Duration::from_secs(86400))
        .max_capacity(50_000)
        .build();
    tracing::info!("Owner contact cache initialized");

    let app_state = Arc::new(AppState {
        db: db.pool.clone(),
        config: config.clone(),
        sources,
        contact_cache,
    });

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .unwrap(),
    );

    // Build protected routes with security layers
    let protected_routes = Router::new()
        .route("/api/v1/permits", post(handlers::ingest_permits))
        .route("/api/v1/pipeline/run", post(handlers::run_pipeline))
        .route("/api/v1/properties", get(handlers::list_properties))
        .route("/api/v1/properties/:bbl", get(handlers::get_property))
        .route(
            "/api/v1/properties/:bbl/transactions",
            get(handlers::get_property_transactions),
        )
        .route(
            "/api/v1/owners/:name/contacts",
            get(handlers::get_owner_contacts),
        )
        .layer(
            ServiceBuilder::new()
                // Request size limit: 5MB max payload (prevents memory exhaustion)
                .layer(RequestBodyLimitLayer::new(5 * 1024 * 1024))
                // Rate limiting: 10 req/sec per IP, burst of 20
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Build final app with health check (bypasses rate limiting)
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
