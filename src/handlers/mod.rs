//! HTTP handlers for the console API.
//!
//! Shared pieces live here: the success envelope, the validated JSON
//! extractor, and the session middleware that guards every route except
//! login, refresh, the region list and introspection.

pub mod auth;
pub mod bucket;
pub mod object;

use axum::async_trait;
use axum::extract::{FromRequest, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use crate::errors::ApiError;
use crate::session::Session;
use crate::storage::service::Credentials;
use crate::AppState;

// -- Success envelope ---------------------------------------------------------

/// `{"success": true, "data": ..., "message": ...}`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn data(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.into()),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

// -- Validated JSON -----------------------------------------------------------

/// JSON body that is deserialized and then checked with `garde`.  Both
/// failures become [`ApiError::Validation`].
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + garde::Validate<Context = ()>,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
        value.validate()?;
        Ok(Self(value))
    }
}

// -- Session middleware -------------------------------------------------------

/// The authenticated session, inserted into request extensions by
/// [`require_session`].
#[derive(Debug, Clone)]
pub struct AuthSession(pub Session);

impl AuthSession {
    pub fn id(&self) -> &str {
        &self.0.id
    }

    /// Storage identity of the session, secret decrypted.
    pub fn credentials(&self, state: &AppState) -> Result<Credentials, ApiError> {
        Ok(state.sessions.credentials(&self.0)?)
    }
}

/// Require a valid session token: missing token 401, invalid token 403,
/// expired token 401, vanished session 401 `SessionExpired`.
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = crate::auth::bearer_token(req.headers())
        .ok_or_else(|| ApiError::Auth("Access token required".to_string()))?
        .to_string();
    let session = state.sessions.authenticate(&token).await?;
    req.extensions_mut().insert(AuthSession(session));
    Ok(next.run(req).await)
}
