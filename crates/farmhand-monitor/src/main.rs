//! Farmhand monitor binary entry point.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use farmhand_monitor::{AppState, MonitorConfig, create_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "farmhand_monitor=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = MonitorConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let bind_addr = config.bind_address;

    let store = Arc::new(config.open_store()?);
    match &config.database {
        Some(path) => tracing::info!("Opened event store at {}", path.display()),
        None => tracing::info!("Initialized in-memory event store"),
    }

    let state = Arc::new(AppState::new(config, store));
    let app = create_router(state);

    tracing::info!("Starting Farmhand monitor at http://{}", bind_addr);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
