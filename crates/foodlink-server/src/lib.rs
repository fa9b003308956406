pub mod app;
pub mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use foodlink_db::Database;
use foodlink_engine::expiry::run_expiry_sweeper;
use foodlink_engine::{Engine, SessionGate};
use foodlink_gateway::Dispatcher;

use crate::config::Config;

/// Wire store, directory and engine together.
pub fn build_engine(config: &Config, db: Arc<Database>, dispatcher: Dispatcher) -> Engine {
    Engine::new(
        db,
        Arc::new(dispatcher),
        SessionGate::new(&config.jwt_secret, config.token_ttl_hours),
        config.engine_settings(),
    )
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let db = Arc::new(Database::open(&config.db_path)?);
    let dispatcher = Dispatcher::new();
    let engine = build_engine(&config, db, dispatcher);

    tokio::spawn(run_expiry_sweeper(engine.clone(), config.expiry_sweep_secs));

    let app = app::build_router(engine, config.gateway_config());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Foodlink server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Foodlink server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
