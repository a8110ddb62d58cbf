//! HTTP surface of the orchestrator.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use ember_proxy::ProxyClient;
use ember_types::FleetSummary;
use serde::Deserialize;

use crate::config::ControlConfig;
use crate::error::ControlError;
use crate::poller::FleetPoller;
use crate::reconcile::Reconciler;
use crate::registry::{NodeEntry, Registry};

/// Timeout for forwarding an action to a node; restarts wait for the child's
/// full readiness cycle on the far side.
const ACTION_FORWARD_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub poller: Arc<FleetPoller>,
    pub reconciler: Arc<Reconciler>,
    pub proxy: ProxyClient,
    pub config: Arc<ControlConfig>,
    pub http: reqwest::Client,
}

fn require(value: &str, what: &str) -> Result<(), ControlError> {
    if value.trim().is_empty() {
        return Err(ControlError::BadRequest(format!("'{what}' is required")));
    }
    Ok(())
}

pub async fn status(State(state): State<AppState>) -> Json<FleetSummary> {
    Json(state.poller.summary().await)
}

#[derive(Debug, Deserialize)]
pub struct NodeBody {
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub name: String,
}

pub async fn create_im(
    State(state): State<AppState>,
    Json(body): Json<NodeBody>,
) -> Result<impl IntoResponse, ControlError> {
    require(&body.domain, "domain")?;
    require(&body.name, "name")?;

    state.registry.add(NodeEntry {
        domain: body.domain.clone(),
        name: body.name.clone(),
    })?;
    tracing::info!(name = %body.name, domain = %body.domain, "instance manager registered");

    Ok((
        StatusCode::CREATED,
        format!("Instance manager '{}' created", body.name),
    ))
}

pub async fn delete_im(
    State(state): State<AppState>,
    Json(body): Json<NodeBody>,
) -> Result<String, ControlError> {
    require(&body.domain, "domain")?;
    require(&body.name, "name")?;

    if !state.registry.remove(&body.domain, &body.name)? {
        return Err(ControlError::NotFound("Instance manager not found".into()));
    }
    tracing::info!(name = %body.name, "instance manager deleted");
    Ok(format!("Instance manager '{}' deleted", body.name))
}

#[derive(Debug, Deserialize)]
pub struct MoveBody {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub server: String,
}

/// Move one player to `server`, creating the instance first if needed.
pub async fn move_player(
    State(state): State<AppState>,
    Json(body): Json<MoveBody>,
) -> Result<String, ControlError> {
    require(&body.name, "name")?;
    require(&body.server, "server")?;

    state.reconciler.ensure_instance(&body.server).await?;
    state.proxy.move_to(&body.name, &body.server).await?;

    Ok(format!("Moved player {} to server {}", body.name, body.server))
}

#[derive(Debug, Deserialize)]
pub struct MoveAllBody {
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub destination: String,
}

/// Move every player off `origin` toward `destination`.
pub async fn move_all(
    State(state): State<AppState>,
    Json(body): Json<MoveAllBody>,
) -> Result<String, ControlError> {
    require(&body.origin, "origin")?;
    require(&body.destination, "destination")?;

    state.reconciler.ensure_instance(&body.origin).await?;
    state
        .proxy
        .move_from_to(&body.origin, Some(&body.destination), None)
        .await?;

    Ok(format!(
        "Moved players from {} to server {}",
        body.origin, body.destination
    ))
}

#[derive(Debug, Deserialize)]
pub struct ActionBody {
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub action: String,
}

/// Forward a save/restart action to the named node.
pub async fn action(
    State(state): State<AppState>,
    Json(body): Json<ActionBody>,
) -> Result<Json<serde_json::Value>, ControlError> {
    require(&body.domain, "domain")?;
    require(&body.name, "name")?;

    let endpoint = match body.action.as_str() {
        // A plugin update takes effect through a restart, which re-copies
        // the payload into the workdir.
        "restart" | "pluginUpdate" => "/restart-instance",
        "save" => "/save-instance",
        _ => {
            return Err(ControlError::BadRequest(format!(
                "invalid action '{}'",
                body.action
            )));
        }
    };

    let url = format!("http://{}{endpoint}?name={}", body.domain, body.name);
    tracing::info!(domain = %body.domain, instance = %body.name, action = %body.action, "forwarding action");

    let resp = state
        .http
        .post(&url)
        .timeout(ACTION_FORWARD_TIMEOUT)
        .send()
        .await
        .map_err(|e| {
            ControlError::NodeGateway(format!("failed to contact node {}: {e}", body.domain))
        })?;
    if !resp.status().is_success() {
        return Err(ControlError::NodeGateway(format!(
            "node returned: {}",
            resp.status()
        )));
    }

    Ok(Json(serde_json::json!({
        "message": "action forwarded successfully"
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state(dir: &tempfile::TempDir) -> AppState {
        let registry = Arc::new(Registry::load(dir.path().join("nodes.json")).unwrap());
        let proxy = ProxyClient::new("http://127.0.0.1:1");
        let poller = Arc::new(FleetPoller::new(registry.clone(), proxy.clone()));
        let reconciler = Arc::new(Reconciler::new(poller.clone(), proxy.clone()));
        AppState {
            registry,
            poller,
            reconciler,
            proxy,
            config: Arc::new(ControlConfig::from_env()),
            http: reqwest::Client::new(),
        }
    }

    fn node_body(domain: &str, name: &str) -> NodeBody {
        NodeBody {
            domain: domain.to_string(),
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn create_im_requires_domain_and_name() {
        let dir = tempfile::tempdir().unwrap();
        let resp = create_im(State(test_state(&dir)), Json(node_body("", "m1")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_then_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);

        let resp = create_im(State(state.clone()), Json(node_body("n1:8000", "m1")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(state.registry.list().len(), 1);

        let resp = delete_im(State(state.clone()), Json(node_body("n1:8000", "m1")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(state.registry.list().is_empty());
    }

    #[tokio::test]
    async fn delete_of_unknown_node_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let resp = delete_im(State(test_state(&dir)), Json(node_body("n1:8000", "ghost")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn move_requires_both_fields() {
        let dir = tempfile::tempdir().unwrap();
        let body = MoveBody {
            name: "p1".into(),
            server: "".into(),
        };
        let resp = move_player(State(test_state(&dir)), Json(body))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn action_rejects_unknown_actions() {
        let dir = tempfile::tempdir().unwrap();
        let body = ActionBody {
            domain: "n1:8000".into(),
            name: "alpha".into(),
            action: "explode".into(),
        };
        let resp = action(State(test_state(&dir)), Json(body))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn action_requires_domain_and_name() {
        let dir = tempfile::tempdir().unwrap();
        let body = ActionBody {
            domain: "".into(),
            name: "alpha".into(),
            action: "save".into(),
        };
        let resp = action(State(test_state(&dir)), Json(body))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
