use anyhow::Result;
use axum::Router;
use std::{fs, io::ErrorKind, net::SocketAddr, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use state::{AppState, Backend};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting image-proxy with config: {:?}", cfg);

    // --- Storage runtime ---
    let backend = if cfg.storage_enabled() {
        if !Path::new(&cfg.storage_dir).exists() {
            fs::create_dir_all(&cfg.storage_dir)?;
            tracing::info!("Created storage directory at {}", cfg.storage_dir);
        }

        let db = Arc::new(db::connect(&cfg.database_url).await?);

        // Schema statements are idempotent, so every boot applies them.
        db::run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        if migrate {
            return Ok(()); // exit after migration
        }

        Some(Backend::new(db, &cfg)?)
    } else {
        if migrate {
            anyhow::bail!("--migrate requires a database URL and storage directory");
        }
        tracing::warn!("Storage runtime not configured; upload endpoints will answer 501");
        None
    };

    let state = AppState {
        backend,
        max_body_size: cfg.max_body_size,
        trust_proxy: cfg.trust_proxy,
    };

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
