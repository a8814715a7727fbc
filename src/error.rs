//! Error taxonomy of the server side of the protocol.

use crate::types::{ErrorMessage, ErrorResponse};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("{0}")]
    PathForbidden(String),
    #[error("{0}")]
    RouteNotFound(String),
    #[error("{0}")]
    MethodNotAllowed(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    /// Platform-supplied rejection, passed through unchanged.
    #[error("({code}) {reason}")]
    Rejected { code: u16, reason: String },
    #[error("{0}")]
    Internal(String),
    #[error("{0}")]
    NotImplemented(String),
}

impl AuthError {
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::PathForbidden(_) => 403,
            Self::RouteNotFound(_) => 404,
            Self::MethodNotAllowed(_) => 405,
            Self::BadRequest(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::Rejected { code, .. } => *code,
            Self::Internal(_) => 500,
            Self::NotImplemented(_) => 501,
        }
    }

    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Rejected { reason, .. } => reason.clone(),
            other => other.to_string(),
        }
    }

    #[must_use]
    pub fn to_message(&self) -> ErrorMessage {
        ErrorMessage::new(self.code(), self.reason())
    }

    /// Map a token verification failure onto the taxonomy.
    #[must_use]
    pub fn from_token(err: &crate::token::Error) -> Self {
        if err.code() == 401 {
            Self::Unauthorized(err.to_string())
        } else {
            Self::BadRequest(err.to_string())
        }
    }
}

impl From<ErrorMessage> for AuthError {
    fn from(message: ErrorMessage) -> Self {
        Self::Rejected {
            code: message.code,
            reason: message.reason,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        // Authorizers may hand back any code; anything unusable becomes a 500.
        let status =
            StatusCode::from_u16(self.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse {
            error: self.to_message(),
        };
        (status, Json(body)).into_response()
    }
}
