use aqua_ops_api::backend_client::BackendClient;
use aqua_ops_api::config::Config;
use aqua_ops_api::db::Database;
use aqua_ops_api::handlers::{self, AppState};
use aqua_ops_api::wizard::{SystemClock, WizardMachine};
use aqua_ops_api::wizard_store::{MemoryWizardStore, PgWizardStore, WizardStore};
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Picks the wizard store: Postgres when a database is configured, memory otherwise.
async fn build_wizard_store(config: &Config) -> anyhow::Result<Arc<dyn WizardStore>> {
    let Some(ref database_url) = config.database_url else {
        return Ok(Arc::new(MemoryWizardStore::default()));
    };

    let db = Database::connect(database_url).await?;
    tracing::info!("Database connection pool established");

    let store = PgWizardStore::new(db.pool);
    store
        .ensure_schema()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to prepare wizard storage: {}", e))?;

    // Snapshots this old can never be resumed
    let cutoff = chrono::Utc::now() - config.wizard_ttl();
    match store.purge_older_than(cutoff).await {
        Ok(purged) => tracing::info!("Purged {} stale wizard session(s)", purged),
        Err(e) => tracing::warn!("Could not purge stale wizard sessions: {}", e),
    }

    Ok(Arc::new(store))
}

/// Main entry point for the application.
///
/// Initializes tracing, configuration, the backend client and wizard storage, then serves
/// the HTTP API with body-size limits, per-IP rate limiting and CORS.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aqua_ops_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let backend = BackendClient::new(&config)
        .map_err(|e| anyhow::anyhow!("Failed to initialize backend client: {}", e))?;
    tracing::info!("✓ Backend client initialized: {}", config.backend_url);

    let store = build_wizard_store(&config).await?;
    let wizard = WizardMachine::new(store, Arc::new(SystemClock), config.wizard_ttl());
    tracing::info!(
        "Wizard sessions expire after {} minute(s)",
        config.wizard_ttl_minutes
    );

    let app_state = Arc::new(AppState {
        config: config.clone(),
        backend,
        wizard,
    });

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    let protected_routes = aqua_ops_api::api::routes().layer(GovernorLayer {
        config: governor_conf,
    });

    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
