use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, routing::get};
use ember_proxy::ProxyClient;
use tracing_subscriber::prelude::*;

mod config;
mod error;
mod handlers;
mod port_pool;
mod provision;
mod snapshot;
mod supervisor;
mod world_download;
mod world_store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(config::AgentConfig::from_env());

    // Ensure the data root exists early so workdirs and logs are stable.
    std::fs::create_dir_all(&config.data_root)?;
    let log_dir = config.data_root.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "agent.log");
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_ansi(true),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();
    let _file_guard = file_guard;

    if config.store.is_none() {
        tracing::warn!("EMBER_STORE_URL/EMBER_STORE_TOKEN not set; save-instance will be rejected");
    }

    let supervisor = supervisor::Supervisor::new(config.clone());
    let proxy = ProxyClient::new(&config.proxy_url);
    let store = config.store.as_ref().map(|s| Arc::new(world_store::WorldStore::new(s)));
    let state = handlers::AppState {
        supervisor,
        proxy,
        store,
        config: config.clone(),
    };

    let app = Router::new()
        .route("/system", get(handlers::system))
        .route("/start-server", get(handlers::start_server))
        .route("/stop-server", get(handlers::stop_server))
        .route(
            "/save-instance",
            get(handlers::save_instance).post(handlers::save_instance),
        )
        .route(
            "/restart-instance",
            get(handlers::restart_instance).post(handlers::restart_instance),
        )
        .with_state(state);

    let addr: SocketAddr = ([0, 0, 0, 0], config.listen_port).into();
    tracing::info!(%addr, "ember-agent HTTP listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
