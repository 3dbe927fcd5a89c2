//! Bucket handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use garde::Validate;
use serde::Deserialize;

use super::{ApiResponse, AuthSession, ValidatedJson};
use crate::errors::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBucketRequest {
    #[garde(length(min = 1, max = 63), pattern(r"^[a-z0-9.-]+$"))]
    pub name: String,
    /// Region to create the bucket in; the session's region when absent.
    #[garde(skip)]
    pub region: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteBucketQuery {
    #[serde(default)]
    pub force: bool,
}

#[utoipa::path(
    get,
    path = "/s3/buckets",
    tag = "Bucket",
    operation_id = "ListBuckets",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Buckets with object count and total size"),
        (status = 400, description = "Storage service error")
    )
)]
pub async fn list_buckets(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<AuthSession>,
) -> Result<Response, ApiError> {
    let creds = session.credentials(&state)?;
    let buckets = state.storage.list_buckets(&creds).await?;
    Ok(ApiResponse::data(buckets).into_response())
}

#[utoipa::path(
    post,
    path = "/s3/buckets",
    tag = "Bucket",
    operation_id = "CreateBucket",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Bucket created"),
        (status = 400, description = "Invalid name, unknown region, or name collision")
    )
)]
pub async fn create_bucket(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<AuthSession>,
    ValidatedJson(body): ValidatedJson<CreateBucketRequest>,
) -> Result<Response, ApiError> {
    let creds = session.credentials(&state)?;
    let created = state
        .storage
        .create_bucket(&creds, &body.name, body.region.as_deref())
        .await?;
    let message = format!("Bucket {} created", created.name);
    Ok(ApiResponse::data(created).with_message(message).into_response())
}

#[utoipa::path(
    delete,
    path = "/s3/buckets/{name}",
    tag = "Bucket",
    operation_id = "DeleteBucket",
    security(("bearer" = [])),
    params(
        ("name" = String, Path, description = "Bucket name"),
        ("force" = Option<bool>, Query, description = "Delete every object first")
    ),
    responses(
        (status = 200, description = "Bucket deleted"),
        (status = 400, description = "Bucket not empty or not found")
    )
)]
pub async fn delete_bucket(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<AuthSession>,
    Path(name): Path<String>,
    Query(query): Query<DeleteBucketQuery>,
) -> Result<Response, ApiError> {
    let creds = session.credentials(&state)?;
    let deletion = state
        .storage
        .delete_bucket(&creds, &name, query.force)
        .await?;
    let message = if query.force {
        format!(
            "Bucket {} deleted along with {} objects",
            deletion.name, deletion.objects_deleted
        )
    } else {
        format!("Bucket {} deleted", deletion.name)
    };
    Ok(ApiResponse::data(deletion).with_message(message).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str) -> CreateBucketRequest {
        CreateBucketRequest {
            name: name.to_string(),
            region: None,
        }
    }

    #[test]
    fn test_create_bucket_request_validation() {
        assert!(request("valid-bucket").validate().is_ok());
        assert!(request("my.bucket.123").validate().is_ok());
        assert!(request("").validate().is_err());
        assert!(request("UPPER").validate().is_err());
        assert!(request("under_score").validate().is_err());
        assert!(request(&"a".repeat(64)).validate().is_err());
    }

    #[test]
    fn test_delete_query_defaults_to_no_force() {
        let query: DeleteBucketQuery = serde_json::from_str("{}").unwrap();
        assert!(!query.force);
    }
}
