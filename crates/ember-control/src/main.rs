use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post},
};
use ember_proxy::ProxyClient;

mod config;
mod error;
mod handlers;
mod placement;
mod poller;
mod reaper;
mod reconcile;
mod registry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Arc::new(config::ControlConfig::from_env());
    let registry = Arc::new(registry::Registry::load(&config.registry_path)?);
    let proxy = ProxyClient::new(&config.proxy_url);
    let poller = Arc::new(poller::FleetPoller::new(registry.clone(), proxy.clone()));

    let reconciler = Arc::new(reconcile::Reconciler::new(poller.clone(), proxy.clone()));
    reconciler.spawn_lobby_loop(config.fallback_instance.clone());
    reaper::Reaper::new(
        poller.clone(),
        proxy.clone(),
        config.fallback_instance.clone(),
    )
    .spawn();

    let state = handlers::AppState {
        registry,
        poller,
        reconciler,
        proxy,
        config: config.clone(),
        http: reqwest::Client::new(),
    };

    let app = Router::new()
        .route("/status", get(handlers::status))
        .route("/create_im", post(handlers::create_im))
        .route("/delete_im", delete(handlers::delete_im))
        .route("/move", post(handlers::move_player))
        .route("/move_all", post(handlers::move_all))
        .route("/action", post(handlers::action))
        .with_state(state);

    let addr: SocketAddr = ([0, 0, 0, 0], config.listen_port).into();
    tracing::info!(%addr, "ember-control HTTP listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
