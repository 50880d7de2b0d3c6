//! Mobilize API Server

use clap::Parser;
use mobilize_api::{AppState, routes};
use mobilize_clients::collaborators_from_config;
use mobilize_config::load_system_config;
use mobilize_db::{InMemoryJobStore, JobStore, PgJobStore, create_pool, run_migrations};
use mobilize_orchestrator::WorkerPool;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mobilize-server")]
#[command(about = "Build job orchestrator for web-to-mobile conversions")]
#[command(version)]
struct Args {
    /// Path to the KDL configuration file
    #[arg(long, env = "MOBILIZE_CONFIG", default_value = "mobilize.kdl")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("MOBILIZE_LOG_FORMAT").is_ok_and(|f| f == "json") {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = load_system_config(&args.config)?;

    let store: Arc<dyn JobStore> = match &config.database {
        Some(db) => {
            info!("Connecting to database...");
            let pool = create_pool(&db.url, db.max_connections).await?;
            run_migrations(&pool).await?;
            info!("Database connected");
            Arc::new(PgJobStore::new(pool))
        }
        None => {
            warn!("No database configured, jobs are kept in memory and lost on restart");
            Arc::new(InMemoryJobStore::new())
        }
    };

    let collaborators = collaborators_from_config(&config);
    info!(?collaborators, "Collaborators configured");

    let callback_secret = config.compile.as_ref().and_then(|c| c.callback_secret());
    let state = AppState::new(store, collaborators, config.orchestrator.clone())
        .with_callback_secret(callback_secret)
        .with_max_body_bytes(config.server.max_body_bytes);

    let workers = WorkerPool::new(state.orchestrator.clone()).spawn();
    info!(workers = workers.len(), "Workers started");

    // Build router
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!("Starting server on {}", config.server.bind);
    let listener = TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
