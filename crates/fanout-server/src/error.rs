use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use fanout_protocol::{DescriptionError, ErrorResponse};
use thiserror::Error;

use crate::sfu::PeerId;

/// Failures raised by the relay core
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Malformed session description: {0}")]
    MalformedInput(String),

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Track error: {0}")]
    Track(String),

    #[error("Track read failed: {0}")]
    TransportRead(String),

    #[error("Peer not found: {0}")]
    UnknownPeer(PeerId),

    #[error("Peer id already registered: {0}")]
    DuplicateId(PeerId),
}

impl From<DescriptionError> for RelayError {
    fn from(e: DescriptionError) -> Self {
        RelayError::MalformedInput(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    BadRequest(String),

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl From<RelayError> for AppError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::MalformedInput(msg) => AppError::BadRequest(msg),
            RelayError::UnknownPeer(id) => AppError::NotFound(format!("Peer not found: {id}")),
            RelayError::Negotiation(msg) => AppError::Negotiation(msg),
            other => AppError::Internal(other.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Negotiation(msg) => {
                tracing::warn!("Negotiation error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
