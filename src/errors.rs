//! HTTP API error types.
//!
//! Every failure a handler can return is an [`ApiError`].  The enum
//! implements [`axum::response::IntoResponse`], rendering the JSON envelope
//! `{"success": false, "error": <code>, "message": <text>}` with the
//! matching status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{error, warn};

use crate::auth::TokenError;
use crate::session::SessionError;
use crate::storage::errors::{StorageError, StorageErrorKind};

/// Whether internal error details are sent to clients.
static EXPOSE_INTERNAL_DETAILS: AtomicBool = AtomicBool::new(false);

/// Send internal error details to clients.  Only for development.
pub fn set_expose_internal_details(expose: bool) {
    EXPOSE_INTERNAL_DETAILS.store(expose, Ordering::Relaxed);
}

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or missing request input.
    #[error("{0}")]
    Validation(String),

    /// Missing credentials, expired token, or rejected login.
    #[error("{0}")]
    Auth(String),

    /// A token that is malformed, forged, or of the wrong kind.
    #[error("{0}")]
    InvalidToken(String),

    /// The token is fine but its session record is gone.
    #[error("Session expired. Please log in again")]
    SessionExpired,

    /// A storage-service fault on an authenticated operation.
    #[error("{0}")]
    Storage(StorageError),

    /// Credential verification failed during login.
    #[error("{0}")]
    LoginFailed(StorageError),

    /// Catch-all for unexpected internal errors.
    #[error("Internal server error")]
    Server(#[from] anyhow::Error),
}

impl ApiError {
    pub fn code(&self) -> &str {
        match self {
            ApiError::Validation(_) => "ValidationError",
            ApiError::Auth(_) => "AuthError",
            ApiError::InvalidToken(_) => "InvalidToken",
            ApiError::SessionExpired => "SessionExpired",
            ApiError::Storage(e) | ApiError::LoginFailed(e) => e.code(),
            ApiError::Server(_) => "InternalError",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::InvalidToken(_) => StatusCode::FORBIDDEN,
            ApiError::SessionExpired => StatusCode::UNAUTHORIZED,
            ApiError::Storage(_) => StatusCode::BAD_REQUEST,
            ApiError::LoginFailed(_) => StatusCode::UNAUTHORIZED,
            ApiError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Server(e) if EXPOSE_INTERNAL_DETAILS.load(Ordering::Relaxed) => {
                format!("{e:#}")
            }
            other => other.to_string(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err.kind {
            // Rejected before any storage call: same class as a garde failure.
            StorageErrorKind::InvalidInput => ApiError::Validation(err.message),
            _ => ApiError::Storage(err),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => ApiError::Auth(err.to_string()),
            TokenError::Invalid | TokenError::WrongKind => ApiError::InvalidToken(err.to_string()),
            TokenError::Signing(msg) => ApiError::Server(anyhow::anyhow!(msg)),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Expired => ApiError::SessionExpired,
            SessionError::InvalidRegion(_) | SessionError::MissingField(_) => {
                ApiError::Validation(err.to_string())
            }
            SessionError::Storage(e) if e.kind == StorageErrorKind::InvalidInput => e.into(),
            SessionError::Storage(e) => ApiError::LoginFailed(e),
            SessionError::Token(e) => e.into(),
            SessionError::Crypto(e) => ApiError::Server(anyhow::Error::new(e).context("session secret")),
            SessionError::Store(e) => ApiError::Server(e.context("session store")),
        }
    }
}

impl From<garde::Report> for ApiError {
    fn from(report: garde::Report) -> Self {
        ApiError::Validation(report.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            ApiError::Server(e) => error!("Internal error: {:#}", e),
            ApiError::Auth(_) | ApiError::InvalidToken(_) | ApiError::LoginFailed(_) => {
                warn!("Rejected request: {}", self)
            }
            _ => {}
        }

        let body = json!({
            "success": false,
            "error": self.code(),
            "message": self.message(),
        });
        (status, Json(body)).into_response()
    }
}
