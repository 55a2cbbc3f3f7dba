//! mealscan-ai - Meal Photo Analysis Microservice
//!
//! Turns one or more photos of a meal into a nutrition report by chaining
//! three calls to a multimodal inference service, streaming each stage's
//! result to the client as it completes.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mealscan_ai::config::{resolve_api_key, ServiceConfig, ServicePaths};
use mealscan_ai::services::retention::SWEEP_PERIOD;
use mealscan_ai::services::{GeminiClient, RetentionSweeper};
use mealscan_ai::AppState;
use mealscan_common::config::{default_config_path, load_toml_config, RootFolderResolver};

const MODULE_NAME: &str = "mealscan-ai";

#[derive(Debug, Parser)]
#[command(name = "mealscan-ai", version, about = "Meal photo analysis service")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, env = "MEALSCAN_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder for uploads, partial records and the database
    #[arg(long)]
    root_folder: Option<PathBuf>,

    /// Listen address, overrides `bind_addr`
    #[arg(long, env = "MEALSCAN_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(|| default_config_path(MODULE_NAME));
    let config: ServiceConfig = match &config_path {
        Some(path) => load_toml_config(path)?,
        None => ServiceConfig::default(),
    };
    config.validate()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        "Starting {} v{} (git {}, built {}, {})",
        MODULE_NAME,
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    if let Some(path) = &config_path {
        info!("Config: {}", path.display());
    }

    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(args.root_folder.clone())
        .with_toml_value(config.root_folder.clone())
        .resolve();
    let paths = ServicePaths::under(root_folder);
    paths.ensure_directories()?;

    info!("Database: {}", paths.database_path.display());
    let db_pool = mealscan_ai::db::init_database_pool(&paths.database_path)
        .await
        .context("Failed to open database")?;

    let api_key = resolve_api_key(&config.inference);
    let inference = Arc::new(GeminiClient::new(&config.inference, api_key)?);
    info!(
        "Inference: {} (key configured: {})",
        config.inference.base_url,
        inference.is_configured()
    );

    let bind_addr = args.bind.clone().unwrap_or_else(|| config.bind_addr.clone());
    let retention = config.retention();
    let state = AppState::new(db_pool.clone(), config, &paths, inference);

    match retention {
        Some(window) => {
            info!("Retention: {} days", window.num_days());
            RetentionSweeper::new(
                db_pool,
                state.partials.clone(),
                state.uploads.clone(),
                window,
            )
            .spawn(SWEEP_PERIOD);
        }
        None => warn!("Retention disabled: jobs, partial records and history are kept forever"),
    }

    let app = mealscan_ai::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!("Listening on http://{}", bind_addr);
    info!("Health check: http://{}/health", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
