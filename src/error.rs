use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::services::{
    config_store::ConfigError,
    console_pool::ConsoleError,
    identity::IdentityError,
    reconciler::{ApplyError, ReloadError},
};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// A game server or the data directory could not be reached.
    #[error("unavailable: {0}")]
    Unavailable(String),
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidState(message) => AppError::Conflict(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::Unavailable(message) => AppError::ServiceUnavailable(message),
            ServiceError::Timeout => AppError::ServiceUnavailable("operation timed out".into()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

impl From<ConfigError> for ServiceError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Invalid(_) => ServiceError::InvalidInput(err.to_string()),
            ConfigError::Persistence(source) => ServiceError::Unavailable(source.to_string()),
        }
    }
}

impl From<ReloadError> for ServiceError {
    fn from(err: ReloadError) -> Self {
        match err {
            ReloadError::AlreadyReloading => {
                ServiceError::InvalidState("a reload is already in progress".into())
            }
            ReloadError::Config(source) => source.into(),
            ReloadError::Apply(ApplyError::IngressRestart(source)) => ServiceError::Unavailable(
                format!("ingress restart failed, previous configuration kept: {source}"),
            ),
        }
    }
}

impl From<IdentityError> for ServiceError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::PlayerNotFound(_) => ServiceError::NotFound(err.to_string()),
            IdentityError::IncompleteJoin { .. } => ServiceError::InvalidInput(err.to_string()),
            IdentityError::Persist(source) => source.into(),
        }
    }
}

impl From<ConsoleError> for ServiceError {
    fn from(err: ConsoleError) -> Self {
        match err {
            ConsoleError::NotConfigured { .. } => ServiceError::NotFound(err.to_string()),
            ConsoleError::AlreadyConnecting { .. } => ServiceError::InvalidState(err.to_string()),
            ConsoleError::ConnectTimeout { .. } | ConsoleError::ResponseTimeout { .. } => {
                ServiceError::Timeout
            }
            ConsoleError::ConnectFailed { .. } | ConsoleError::SendFailed { .. } => {
                ServiceError::Unavailable(err.to_string())
            }
        }
    }
}
