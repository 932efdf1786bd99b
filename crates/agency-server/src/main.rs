//! Agency CRM Server
//!
//! Serves the agency dashboard API and the public form endpoints. Storage is
//! the hosted Supabase database in production, or an embedded SQLite file.

use agency_server::{
    app,
    config::{Config, LogFormat, StorageBackend},
    services::AuthService,
    storage, AppState,
};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Set up panic hook to log crashes
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()));
        let payload = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        eprintln!("[PANIC] at {:?}: {}", location, payload);
        tracing::error!("PANIC at {:?}: {}", location, payload);
    }));

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[FATAL] Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_tracing(config.log_format) {
        eprintln!("[FATAL] Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!("Starting Agency CRM Server v{}", env!("CARGO_PKG_VERSION"));
    info!("PID: {}", std::process::id());

    if let Err(e) = run_server(config).await {
        error!("Server failed: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    }
    .map_err(|e| anyhow::anyhow!("{}", e))
}

async fn run_server(config: Config) -> Result<()> {
    if config.uses_default_jwt_secret() {
        warn!("AGENCY_JWT_SECRET not set, using default (insecure for production)");
    }
    info!(
        "Config loaded: bind={}, storage={}, dedup_ttl={:?}",
        config.bind_address,
        storage_label(&config),
        config.dedup_ttl
    );

    let store = storage::connect(&config.storage)
        .await
        .context("Failed to initialize storage")?;
    info!("Storage initialized");

    let auth_service = AuthService::new(config.jwt_secret.clone(), config.jwt_audience.clone());
    let state = AppState::new(store, auth_service, config.dedup_ttl);
    let app = app(state, &config.cors_allowed_origins);

    let addr: SocketAddr = config
        .bind_address
        .parse()
        .context("Failed to parse bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!("Server listening on {}", addr);
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn storage_label(config: &Config) -> &'static str {
    match config.storage {
        StorageBackend::Sqlite { .. } => "sqlite",
        StorageBackend::Supabase { .. } => "supabase",
    }
}
