//! Object and folder handlers.

use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use bytes::Bytes;
use garde::Validate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ApiResponse, AuthSession, ValidatedJson};
use crate::errors::ApiError;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListObjectsQuery {
    /// Folder to list; the bucket root when absent.
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateFolderRequest {
    /// Parent folder; the bucket root when absent.
    #[garde(skip)]
    pub path: Option<String>,
    #[garde(length(min = 1, max = 1024), custom(no_slash))]
    pub folder_name: String,
}

fn no_slash(value: &str, _ctx: &()) -> garde::Result {
    if value.contains('/') {
        return Err(garde::Error::new("folder name must not contain '/'"));
    }
    Ok(())
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> ApiError {
    if err.status() == axum::http::StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::Validation("File exceeds the maximum upload size".to_string());
    }
    ApiError::Validation(err.body_text())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderCreated {
    pub key: String,
}

/// Join a folder path and a name into an object key.
fn join_key(path: &str, name: &str) -> String {
    let path = path.trim_matches('/');
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}/{name}")
    }
}

#[utoipa::path(
    get,
    path = "/s3/buckets/{name}/objects",
    tag = "Object",
    operation_id = "ListObjects",
    security(("bearer" = [])),
    params(
        ("name" = String, Path, description = "Bucket name"),
        ("path" = Option<String>, Query, description = "Folder to list")
    ),
    responses((status = 200, description = "Folders first, then files, direct children only"))
)]
pub async fn list_objects(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<AuthSession>,
    Path(name): Path<String>,
    Query(query): Query<ListObjectsQuery>,
) -> Result<Response, ApiError> {
    let creds = session.credentials(&state)?;
    let entries = state.storage.list_objects(&creds, &name, &query.path).await?;
    Ok(ApiResponse::data(entries).into_response())
}

/// Single-shot upload of one `file` field, optionally into the folder
/// named by a `path` field.
#[utoipa::path(
    post,
    path = "/s3/buckets/{name}/upload",
    tag = "Object",
    operation_id = "UploadObject",
    security(("bearer" = [])),
    params(("name" = String, Path, description = "Bucket name")),
    responses(
        (status = 200, description = "Object stored"),
        (status = 400, description = "No file, file too large, or storage error")
    )
)]
pub async fn upload_object(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<AuthSession>,
    Path(name): Path<String>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut folder = String::new();
    let mut file: Option<(String, Option<String>, Bytes)> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("path") => {
                folder = field.text().await.map_err(multipart_error)?;
            }
            Some("file") => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::Validation("Uploaded file has no name".to_string()))?;
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(multipart_error)?;
                file = Some((file_name, content_type, data));
            }
            other => debug!("Ignoring multipart field {:?}", other),
        }
    }

    let (file_name, content_type, data) =
        file.ok_or_else(|| ApiError::Validation("No file provided".to_string()))?;
    let key = join_key(&folder, &file_name);

    let creds = session.credentials(&state)?;
    let uploaded = state
        .storage
        .upload_object(&creds, &name, &key, data, content_type.as_deref())
        .await?;
    Ok(ApiResponse::data(uploaded).into_response())
}

#[utoipa::path(
    delete,
    path = "/s3/buckets/{name}/objects/{key}",
    tag = "Object",
    operation_id = "DeleteObject",
    security(("bearer" = [])),
    params(
        ("name" = String, Path, description = "Bucket name"),
        ("key" = String, Path, description = "URL-encoded object key")
    ),
    responses((status = 200, description = "Object deleted"))
)]
pub async fn delete_object(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<AuthSession>,
    Path((name, key)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let creds = session.credentials(&state)?;
    state.storage.delete_object(&creds, &name, &key).await?;
    Ok(ApiResponse::message(format!("Deleted {key}")).into_response())
}

#[utoipa::path(
    get,
    path = "/s3/buckets/{name}/objects/{key}/download",
    tag = "Object",
    operation_id = "GetDownloadUrl",
    security(("bearer" = [])),
    params(
        ("name" = String, Path, description = "Bucket name"),
        ("key" = String, Path, description = "URL-encoded object key")
    ),
    responses((status = 200, description = "Pre-signed URL valid for one hour"))
)]
pub async fn download_url(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<AuthSession>,
    Path((name, key)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let creds = session.credentials(&state)?;
    let url = state.storage.get_download_url(&creds, &name, &key).await?;
    Ok(ApiResponse::data(url).into_response())
}

#[utoipa::path(
    post,
    path = "/s3/buckets/{name}/folders",
    tag = "Object",
    operation_id = "CreateFolder",
    security(("bearer" = [])),
    params(("name" = String, Path, description = "Bucket name")),
    responses(
        (status = 200, description = "Folder marker created"),
        (status = 400, description = "Invalid folder name")
    )
)]
pub async fn create_folder(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<AuthSession>,
    Path(name): Path<String>,
    ValidatedJson(body): ValidatedJson<CreateFolderRequest>,
) -> Result<Response, ApiError> {
    let path = join_key(body.path.as_deref().unwrap_or(""), &body.folder_name);
    let creds = session.credentials(&state)?;
    let key = state.storage.create_folder(&creds, &name, &path).await?;
    Ok(ApiResponse::data(FolderCreated { key }).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_key() {
        assert_eq!(join_key("", "a.txt"), "a.txt");
        assert_eq!(join_key("/", "a.txt"), "a.txt");
        assert_eq!(join_key("docs", "a.txt"), "docs/a.txt");
        assert_eq!(join_key("/docs/2024/", "a.txt"), "docs/2024/a.txt");
    }

    #[test]
    fn test_folder_name_rejects_slash() {
        let ok = CreateFolderRequest {
            path: None,
            folder_name: "reports".to_string(),
        };
        assert!(ok.validate().is_ok());
        let bad = CreateFolderRequest {
            path: Some("a".to_string()),
            folder_name: "x/y".to_string(),
        };
        assert!(bad.validate().is_err());
        let empty = CreateFolderRequest {
            path: None,
            folder_name: String::new(),
        };
        assert!(empty.validate().is_err());
    }
}
