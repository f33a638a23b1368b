//! F1 Race Winner Prediction
//!
//! Leakage-free feature pipeline, random-forest training with an atomic model
//! registry, and a REST API / CLI for per-race win probabilities.

mod cli;
mod config;
mod dataset;
mod error;
mod features;
mod metrics;
mod model;
mod pipeline;
mod predictor;
mod registry;
mod routes;
mod storage;
mod trainer;
mod types;

use axum::{routing::get, routing::post, Router};
use clap::Parser;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::predictor::Predictor;
use crate::registry::ModelRegistry;
use crate::routes::AppState;
use crate::storage::RaceRepository;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout stays free for command output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "f1_predict=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = AppConfig::load_from(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { host, port } => run_server(config, host, port).await,
        Commands::Ingest {
            dir,
            no_cache,
            refresh,
        } => cli::run_ingest(&config, dir, no_cache, refresh).await,
        Commands::Features {
            race,
            window,
            format,
        } => cli::run_features(&config, race, window, format).await,
        Commands::Train {
            window,
            ensemble_size,
            seed,
            max_depth,
            test_fraction,
            timeout,
            dry_run,
            format,
        } => {
            cli::run_train(
                &config,
                window,
                ensemble_size,
                seed,
                max_depth,
                test_fraction,
                timeout,
                dry_run,
                format,
            )
            .await
        }
        Commands::Predict {
            input,
            features,
            format,
        } => cli::run_predict(&config, input, features, format).await,
        Commands::Schema { format } => cli::run_schema(&config, format).await,
        Commands::Rollback { version } => cli::run_rollback(&config, version).await,
    }
}

/// Run the API server.
async fn run_server(
    mut config: AppConfig,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    // Override with CLI args
    if let Some(h) = host {
        config.server.host = h;
    }
    if let Some(p) = port {
        config.server.port = p;
    }

    tracing::info!("Configuration loaded");
    tracing::info!("Registry: {}", config.registry.dir.display());
    tracing::info!("Database: {}", config.storage.db_path.display());

    // Load model; the server starts unhealthy when none is published yet
    let predictor = Predictor::open(ModelRegistry::new(&config.registry.dir)?)?;
    let repository = RaceRepository::new(&config.storage.db_path)?;

    // Create application state
    let state = Arc::new(AppState {
        predictor,
        repository: Mutex::new(repository),
    });

    // Build router
    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/model/info", get(routes::model_info))
        .route("/model/reload", post(routes::reload))
        .route("/predict", post(routes::predict))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Start server
    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
