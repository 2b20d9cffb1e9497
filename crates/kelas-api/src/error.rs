use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use kelas_forum::{ProvisionFailure, SendFailure, SubscribeError};
use kelas_types::api::ErrorBody;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl From<ProvisionFailure> for ApiError {
    fn from(e: ProvisionFailure) -> Self {
        match e {
            ProvisionFailure::InvalidName => Self::BadRequest(e.to_string()),
            ProvisionFailure::TenantConflict(_) => Self::Conflict(e.to_string()),
            other => Self::Internal(other.into()),
        }
    }
}

impl From<SendFailure> for ApiError {
    fn from(e: SendFailure) -> Self {
        match e {
            SendFailure::ChannelNotFound(_) => Self::NotFound(e.to_string()),
            SendFailure::Store(source) => Self::Internal(source),
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl From<SubscribeError> for ApiError {
    fn from(e: SubscribeError) -> Self {
        match e {
            SubscribeError::ChannelNotFound(_) => Self::NotFound(e.to_string()),
            SubscribeError::Store(source) => Self::Internal(source),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(e) => {
                tracing::error!("Internal server error: {:#}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(ErrorBody { error: self.to_string() });
        (status, body).into_response()
    }
}
