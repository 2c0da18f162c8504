//! Qualtrics ETL Gateway
//!
//! The HTTP entry point for the ETL service. Handles:
//! - Request routing for the extract/transform/load/pipeline endpoints
//! - The uniform response envelope
//! - Observability (logging, metrics, tracing)

mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use qualtrics_etl_common::{
    config::AppConfig,
    db::DbPool,
    metrics,
    qualtrics::{QualtricsApi, QualtricsClient},
    storage::ExtractStore,
};
use qualtrics_etl_pipeline::{ExtractionService, PipelineCoordinator, PollPolicy};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DbPool,
    pub qualtrics: Arc<dyn QualtricsApi>,
    pub store: ExtractStore,
}

impl AppState {
    /// Build the extraction orchestrator for one request
    pub fn extraction(&self) -> ExtractionService {
        ExtractionService::new(
            qualtrics_etl_common::db::Repository::new(self.db.clone()),
            self.qualtrics.clone(),
            self.store.clone(),
            PollPolicy::from_config(&self.config.qualtrics),
        )
    }

    /// Build the pipeline coordinator for one request
    pub fn coordinator(&self) -> PipelineCoordinator {
        PipelineCoordinator::new(
            self.db.clone(),
            self.qualtrics.clone(),
            self.store.clone(),
            PollPolicy::from_config(&self.config.qualtrics),
        )
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;

    // Initialize tracing at the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    if config.observability.json_logging {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!(
        "Starting Qualtrics ETL Gateway v{}",
        qualtrics_etl_common::VERSION
    );

    let config = Arc::new(config);

    // Initialize metrics
    metrics::register_metrics();

    // Extract files land here
    tokio::fs::create_dir_all(&config.storage.data_dir).await?;

    // Initialize database connection and verify reachability
    let db = DbPool::new(&config.database).await?;
    db.ping().await?;

    let state = AppState {
        qualtrics: Arc::new(QualtricsClient::new(&config.qualtrics)),
        store: ExtractStore::new(&config.storage),
        config: config.clone(),
        db,
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // API routes
    let api_routes = Router::new()
        .route("/extract-data", post(handlers::etl::extract_data))
        .route(
            "/extract-definitions",
            post(handlers::etl::extract_definitions),
        )
        .route(
            "/transform-and-load",
            post(handlers::etl::transform_and_load),
        )
        .route("/full-pipeline", post(handlers::etl::full_pipeline))
        .route("/status", get(handlers::status::status));

    // Compose the app
    Router::new()
        .nest("/api", api_routes)
        .route("/health", get(handlers::health::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
