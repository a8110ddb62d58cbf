//! Agent operation errors and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ember_proxy::ProxyError;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Missing '{0}' query parameter")]
    MissingParam(&'static str),
    #[error("{0}")]
    BadRequest(String),
    #[error("Server '{0}' already running")]
    AlreadyExists(String),
    #[error("Server '{0}' not found")]
    NotFound(String),
    #[error("Failed to set up server directory: {0:#}")]
    Provisioning(anyhow::Error),
    #[error("Server '{0}' start timed out")]
    StartTimeout(String),
    #[error("Failed to stop server '{name}': {reason}")]
    StopFailure { name: String, reason: String },
    #[error("Failed to publish world snapshot: {0:#}")]
    SnapshotPublish(anyhow::Error),
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    #[error("{0:#}")]
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Internal(err)
    }
}

impl AgentError {
    fn status(&self) -> StatusCode {
        match self {
            AgentError::MissingParam(_) | AgentError::BadRequest(_) | AgentError::AlreadyExists(_) => {
                StatusCode::BAD_REQUEST
            }
            AgentError::NotFound(_) => StatusCode::NOT_FOUND,
            AgentError::StartTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AgentError::Proxy(_) => StatusCode::BAD_GATEWAY,
            AgentError::Provisioning(_)
            | AgentError::StopFailure { .. }
            | AgentError::SnapshotPublish(_)
            | AgentError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, self.to_string()).into_response()
    }
}
