//! Session handlers: login, refresh, logout, identity, regions, and the
//! client-acknowledged operation counter.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ApiResponse, AuthSession, ValidatedJson};
use crate::auth::{bearer_token, mask_access_key};
use crate::errors::ApiError;
use crate::regions::Region;
use crate::AppState;

// -- Request / response bodies ------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[garde(length(min = 1, max = 128))]
    pub access_key: String,
    #[garde(length(min = 1, max = 256))]
    pub secret_key: String,
    /// Defaults to the configured default region.
    #[garde(skip)]
    pub region: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub access_key_masked: String,
    pub region: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    pub user: SessionUser,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub access_key_masked: String,
    pub region: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub active_operations: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveOperations {
    pub active_operations: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationsStatus {
    pub active_operations: u64,
    pub last_activity: DateTime<Utc>,
    pub session_valid: bool,
}

// -- Handlers -----------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    operation_id = "Login",
    responses(
        (status = 200, description = "Session created; token pair issued"),
        (status = 400, description = "Missing fields or unknown region"),
        (status = 401, description = "Credentials rejected by the storage service")
    )
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    ValidatedJson(body): ValidatedJson<LoginRequest>,
) -> Result<Response, ApiError> {
    let region = match body.region.as_deref().filter(|r| !r.is_empty()) {
        Some(region) => region.to_string(),
        None => state.regions.default_region().id.clone(),
    };

    let outcome = state
        .sessions
        .login(&body.access_key, &body.secret_key, &region)
        .await?;

    Ok(ApiResponse::data(LoginResponse {
        token: outcome.tokens.token,
        refresh_token: outcome.tokens.refresh_token,
        expires_in: outcome.tokens.expires_in,
        user: SessionUser {
            access_key_masked: mask_access_key(&outcome.session.access_key),
            region: outcome.session.region,
        },
    })
    .into_response())
}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    tag = "Auth",
    operation_id = "RefreshToken",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "New token pair"),
        (status = 401, description = "Missing or expired token, or session gone"),
        (status = 403, description = "Invalid token")
    )
)]
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let token = bearer_token(&headers)
        .ok_or_else(|| ApiError::Auth("Refresh token required".to_string()))?;
    let pair = state.sessions.refresh(token).await?;
    Ok(ApiResponse::data(pair).into_response())
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "Auth",
    operation_id = "Logout",
    security(("bearer" = [])),
    responses((status = 200, description = "Session destroyed"))
)]
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<AuthSession>,
) -> Result<Response, ApiError> {
    // Release operations the client never ended, counted at removal.
    if let Some(removed) = state.sessions.destroy(session.id()).await? {
        for _ in 0..removed.active_operations {
            state.operations.decrement();
        }
    }
    info!("Logout for {}", mask_access_key(&session.0.access_key));
    Ok(ApiResponse::message("Logged out").into_response())
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    operation_id = "CurrentSession",
    security(("bearer" = [])),
    responses((status = 200, description = "Current session"))
)]
pub async fn me(Extension(session): Extension<AuthSession>) -> Response {
    let s = session.0;
    ApiResponse::data(MeResponse {
        access_key_masked: mask_access_key(&s.access_key),
        region: s.region,
        created_at: s.created_at,
        last_activity: s.last_activity_at,
        active_operations: s.active_operations,
    })
    .into_response()
}

#[utoipa::path(
    get,
    path = "/auth/regions",
    tag = "Auth",
    operation_id = "ListRegions",
    responses((status = 200, description = "Selectable regions"))
)]
pub async fn regions(State(state): State<Arc<AppState>>) -> Response {
    let regions: Vec<Region> = state.regions.list_regions().to_vec();
    ApiResponse::data(regions).into_response()
}

/// The client reports that a long-running operation began.  Counts against
/// both the session and the process, so shutdown waits for it.
#[utoipa::path(
    post,
    path = "/auth/operation/start",
    tag = "Auth",
    operation_id = "OperationStart",
    security(("bearer" = [])),
    responses((status = 200, description = "Session operation count"))
)]
pub async fn operation_start(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<AuthSession>,
) -> Result<Response, ApiError> {
    let adjustment = state.sessions.increment_active(session.id()).await?;
    state.operations.increment();
    Ok(ApiResponse::data(ActiveOperations {
        active_operations: adjustment.current,
    })
    .into_response())
}

/// The client reports that an operation ended.  The process count only
/// drops when the session count actually did.
#[utoipa::path(
    post,
    path = "/auth/operation/end",
    tag = "Auth",
    operation_id = "OperationEnd",
    security(("bearer" = [])),
    responses((status = 200, description = "Session operation count"))
)]
pub async fn operation_end(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<AuthSession>,
) -> Result<Response, ApiError> {
    let adjustment = state.sessions.decrement_active(session.id()).await?;
    if adjustment.decreased() {
        state.operations.decrement();
    }
    Ok(ApiResponse::data(ActiveOperations {
        active_operations: adjustment.current,
    })
    .into_response())
}

#[utoipa::path(
    get,
    path = "/auth/operations/status",
    tag = "Auth",
    operation_id = "OperationsStatus",
    security(("bearer" = [])),
    responses((status = 200, description = "Session operation status"))
)]
pub async fn operations_status(Extension(session): Extension<AuthSession>) -> Response {
    ApiResponse::data(OperationsStatus {
        active_operations: session.0.active_operations,
        last_activity: session.0.last_activity_at,
        session_valid: true,
    })
    .into_response()
}
