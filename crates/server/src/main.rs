use std::sync::Arc;

use anyhow::Context;
use db::DBService;
use server::{AppState, routes};
use services::services::{backend::PgCustomerBackend, config::PortalConfig};
use tracing::info;
use utils::logging::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("info,sqlx=warn");

    let config = PortalConfig::from_env().context("invalid configuration")?;
    let db = DBService::new(&config.database_url, config.db_max_connections)
        .await
        .context("failed to connect to the database")?;

    let bind_addr = config.bind_addr;
    let state = AppState::new(config, Arc::new(PgCustomerBackend::new(db)));
    state
        .reload()
        .await
        .context("failed to load customer records")?;

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, "Customer portal listening");

    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down");
    }
}
