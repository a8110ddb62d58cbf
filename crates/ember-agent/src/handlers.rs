//! HTTP surface of the instance manager.
//!
//! `/system` reports load and the live instance list; `/start-server` and
//! `/stop-server` drive plain lifecycle; `/save-instance` and
//! `/restart-instance` run the full evacuation + stop (+ snapshot) + restart
//! + return-players cycle.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Query, State};
use ember_proxy::ProxyClient;
use ember_types::SystemInfo;
use serde::Deserialize;

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::snapshot;
use crate::supervisor::Supervisor;
use crate::world_store::WorldStore;

#[derive(Clone)]
pub struct AppState {
    pub supervisor: Supervisor,
    pub proxy: ProxyClient,
    pub store: Option<Arc<WorldStore>>,
    pub config: Arc<AgentConfig>,
}

#[derive(Debug, Deserialize)]
pub struct NameQuery {
    name: Option<String>,
}

impl NameQuery {
    fn require(&self) -> Result<&str, AgentError> {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or(AgentError::MissingParam("name"))
    }
}

pub async fn system(State(state): State<AppState>) -> Json<SystemInfo> {
    let mut info = ember_types::system::sample().await;
    info.instances = state.supervisor.instances().await;
    Json(info)
}

pub async fn start_server(
    State(state): State<AppState>,
    Query(q): Query<NameQuery>,
) -> Result<String, AgentError> {
    let name = q.require()?;
    let port = state.supervisor.start(name).await?;
    Ok(format!("Server '{name}' started on port {port}"))
}

pub async fn stop_server(
    State(state): State<AppState>,
    Query(q): Query<NameQuery>,
) -> Result<String, AgentError> {
    let name = q.require()?;
    state.supervisor.stop(name).await?;
    Ok(format!("Server '{name}' stopped"))
}

pub async fn save_instance(
    State(state): State<AppState>,
    Query(q): Query<NameQuery>,
) -> Result<String, AgentError> {
    let name = q.require()?;
    run_cycle(&state, name, true).await
}

pub async fn restart_instance(
    State(state): State<AppState>,
    Query(q): Query<NameQuery>,
) -> Result<String, AgentError> {
    let name = q.require()?;
    run_cycle(&state, name, false).await
}

/// Evacuate, stop, optionally snapshot, restart on the same port and
/// workdir, then best-effort move the evacuated players back.
async fn run_cycle(state: &AppState, name: &str, with_snapshot: bool) -> Result<String, AgentError> {
    // Evacuation is fail-fast: if the proxy can't move players away we leave
    // the instance untouched.
    let destination = state.config.fallback_instance.as_str();
    let destination = (destination != name).then_some(destination);
    let reason = (!with_snapshot).then_some("Server is restarting..");
    let moved = state
        .proxy
        .move_from_to(name, destination, reason)
        .await?
        .moved_players;
    tracing::info!(instance = name, players = moved.len(), "players evacuated");

    let (_, workdir) = state.supervisor.begin_restart(name).await?;

    if with_snapshot && !workdir.join("world").is_dir() {
        state.supervisor.cancel_restart(name).await;
        return Err(AgentError::BadRequest(format!(
            "World directory does not exist: {}",
            workdir.join("world").display()
        )));
    }

    if let Err(e) = state.supervisor.stop_held(name).await {
        state.supervisor.abandon(name).await;
        return Err(e);
    }

    if with_snapshot {
        let Some(store) = &state.store else {
            state.supervisor.abandon(name).await;
            return Err(AgentError::SnapshotPublish(anyhow::anyhow!(
                "content store is not configured"
            )));
        };
        if let Err(e) = snapshot::snapshot_and_publish(store, name, &workdir).await {
            state.supervisor.abandon(name).await;
            return Err(AgentError::SnapshotPublish(e));
        }
    }

    let port = state.supervisor.restart_held(name).await?;

    // Returning players is best-effort; a failure here never fails the cycle.
    if !moved.is_empty() {
        tokio::time::sleep(Duration::from_secs(1)).await;
        if let Err(e) = state.proxy.move_list_to(&moved, name).await {
            tracing::warn!(instance = name, error = %e, "failed to move players back");
        } else {
            tracing::info!(instance = name, players = moved.len(), "players moved back");
        }
    }

    Ok(if with_snapshot {
        format!("World saved to {name}.zip and server restarted on port {port}")
    } else {
        format!("Server '{name}' restarted on port {port}")
    })
}
