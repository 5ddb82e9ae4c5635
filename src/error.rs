//! Crate-wide error type and its HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Every error kind the supervisor's public operations can return.
///
/// Variants mirror the error-kind catalog of the control plane's error
/// handling design: callers match on `kind()` rather than on the display
/// string, which stays stable across wording changes.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("instance '{0}' not found")]
    NotFound(String),

    #[error("instance '{0}' already exists")]
    NameInUse(String),

    #[error("instance '{0}' is busy: {1}")]
    Busy(String, String),

    #[error("instance '{0}' is already running")]
    AlreadyRunning(String),

    #[error("instance '{0}' is not running")]
    NotRunning(String),

    #[error("running-instance capacity exhausted")]
    CapacityExhausted,

    #[error("no ports available in the configured range")]
    NoPortsAvailable,

    #[error("failed to spawn instance '{0}': {1}")]
    Spawn(String, String),

    #[error("instance '{0}' did not become healthy in time")]
    HealthTimeout(String),

    #[error("on-demand start of '{0}' timed out")]
    OnDemandTimeout(String),

    #[error("instance '{0}' is shutting down")]
    ShuttingDown(String),

    #[error("remote node '{0}' unreachable: {1}")]
    RemoteUnreachable(String, String),

    #[error("operation not supported for remote instances")]
    RemoteNotSupported,

    #[error("internal error: {0}")]
    Internal(String),
}

impl SupervisorError {
    /// Lowercase wire tag used in the JSON error body and in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            SupervisorError::Validation(_) => "validation",
            SupervisorError::NotFound(_) => "not_found",
            SupervisorError::NameInUse(_) => "name_in_use",
            SupervisorError::Busy(_, _) => "busy",
            SupervisorError::AlreadyRunning(_) => "already_running",
            SupervisorError::NotRunning(_) => "not_running",
            SupervisorError::CapacityExhausted => "capacity_exhausted",
            SupervisorError::NoPortsAvailable => "no_ports_available",
            SupervisorError::Spawn(_, _) => "spawn",
            SupervisorError::HealthTimeout(_) => "health_timeout",
            SupervisorError::OnDemandTimeout(_) => "on_demand_timeout",
            SupervisorError::ShuttingDown(_) => "shutting_down",
            SupervisorError::RemoteUnreachable(_, _) => "remote_unreachable",
            SupervisorError::RemoteNotSupported => "remote_not_supported",
            SupervisorError::Internal(_) => "internal",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            SupervisorError::Validation(_) => StatusCode::BAD_REQUEST,
            SupervisorError::NotFound(_) => StatusCode::NOT_FOUND,
            SupervisorError::NameInUse(_) => StatusCode::CONFLICT,
            SupervisorError::Busy(_, _) => StatusCode::CONFLICT,
            SupervisorError::AlreadyRunning(_) => StatusCode::CONFLICT,
            SupervisorError::NotRunning(_) => StatusCode::CONFLICT,
            SupervisorError::CapacityExhausted => StatusCode::CONFLICT,
            SupervisorError::NoPortsAvailable => StatusCode::CONFLICT,
            SupervisorError::Spawn(_, _) => StatusCode::INTERNAL_SERVER_ERROR,
            SupervisorError::HealthTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            SupervisorError::OnDemandTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            SupervisorError::ShuttingDown(_) => StatusCode::SERVICE_UNAVAILABLE,
            SupervisorError::RemoteUnreachable(_, _) => StatusCode::SERVICE_UNAVAILABLE,
            SupervisorError::RemoteNotSupported => StatusCode::BAD_REQUEST,
            SupervisorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SupervisorError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": true,
            "kind": self.kind(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
