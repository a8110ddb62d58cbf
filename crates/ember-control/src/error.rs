//! Orchestrator operation errors and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ember_proxy::ProxyError;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    /// A node request (start/stop/action forward) failed or returned non-2xx.
    #[error("{0}")]
    NodeGateway(String),
    #[error("No online instance managers available to start server")]
    NoCapacity,
    #[error("{0}")]
    ReconcileLost(String),
    #[error("Instance '{name}' has an unhandled status: '{status}'")]
    UnexpectedStatus { name: String, status: String },
    #[error("{0:#}")]
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ControlError {
    fn from(err: anyhow::Error) -> Self {
        ControlError::Internal(err)
    }
}

impl ControlError {
    fn status(&self) -> StatusCode {
        match self {
            ControlError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ControlError::NotFound(_) => StatusCode::NOT_FOUND,
            ControlError::Proxy(_) | ControlError::NodeGateway(_) => StatusCode::BAD_GATEWAY,
            ControlError::NoCapacity => StatusCode::SERVICE_UNAVAILABLE,
            ControlError::ReconcileLost(_)
            | ControlError::UnexpectedStatus { .. }
            | ControlError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_contract() {
        assert_eq!(
            ControlError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ControlError::NotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ControlError::NodeGateway("x".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(ControlError::NoCapacity.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            ControlError::ReconcileLost("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
