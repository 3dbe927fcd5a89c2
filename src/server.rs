//! Axum router construction.
//!
//! The [`app`] function wires every console endpoint to its handler and
//! returns a ready-to-serve [`axum::Router`].  Routes fall in three groups:
//! - public: login, refresh, the region list, introspection
//! - session-guarded `/auth/*`: logout, identity, operation accounting
//! - session-guarded `/s3/*`: bucket and object operations, each counted
//!   as an in-flight operation for the duration of the request

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::errors::{generate_request_id, set_expose_internal_details};
use crate::handlers::{auth, bucket, object, require_session, ApiResponse};
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::operations::track_operations;
use crate::shutdown::ShutdownState;
use crate::AppState;

// -- OpenAPI specification ----------------------------------------------------

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

/// OpenAPI documentation for the console API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "s3deck Console API",
        version = "0.1.0",
        description = "Management console backend for S3-compatible object storage"
    ),
    modifiers(&BearerAuth),
    paths(
        // Introspection
        health_check,
        operations_overview,
        // Sessions
        auth::login,
        auth::refresh,
        auth::logout,
        auth::me,
        auth::regions,
        auth::operation_start,
        auth::operation_end,
        auth::operations_status,
        // Buckets
        bucket::list_buckets,
        bucket::create_bucket,
        bucket::delete_bucket,
        // Objects
        object::list_objects,
        object::upload_object,
        object::delete_object,
        object::download_url,
        object::create_folder,
    ),
    tags(
        (name = "Health", description = "Liveness and shutdown state"),
        (name = "Auth", description = "Sessions and operation accounting"),
        (name = "Bucket", description = "Bucket operations"),
        (name = "Object", description = "Object and folder operations"),
    )
)]
pub struct ApiDoc;

/// Build the axum [`Router`] with every console route.
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    set_expose_internal_details(state.config.server.is_development());

    let storage_routes = Router::new()
        .route(
            "/s3/buckets",
            get(bucket::list_buckets).post(bucket::create_bucket),
        )
        .route("/s3/buckets/:name", delete(bucket::delete_bucket))
        .route("/s3/buckets/:name/objects", get(object::list_objects))
        .route(
            "/s3/buckets/:name/upload",
            post(object::upload_object)
                .layer(DefaultBodyLimit::max(state.config.server.max_upload_bytes)),
        )
        .route("/s3/buckets/:name/objects/:key", delete(object::delete_object))
        .route(
            "/s3/buckets/:name/objects/:key/download",
            get(object::download_url),
        )
        .route("/s3/buckets/:name/folders", post(object::create_folder));

    let protected = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route("/auth/operation/start", post(auth::operation_start))
        .route("/auth/operation/end", post(auth::operation_end))
        .route("/auth/operations/status", get(auth::operations_status))
        .merge(storage_routes)
        .route_layer(middleware::from_fn_with_state(state.clone(), require_session));

    let mut router = Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/regions", get(auth::regions))
        .route("/status/operations", get(operations_overview))
        .route("/openapi.json", get(openapi_json))
        .merge(protected);

    if state.config.observability.health_check {
        router = router.route("/health", get(health_check));
    }
    if state.config.observability.metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .with_state(state.clone())
        // Layer ordering: inner layers run first, outer layers wrap them.
        // track_operations is innermost so the count spans the handler.
        .layer(middleware::from_fn_with_state(
            state.operations.clone(),
            track_operations,
        ))
        .layer(middleware::from_fn(common_headers_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        // metrics_middleware is outermost (captures full request lifecycle).
        .layer(middleware::from_fn(metrics_middleware))
}

// -- Common headers middleware -----------------------------------------------

/// Adds `x-request-id` (unless already present) and `server` to every
/// response.
async fn common_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    if !headers.contains_key("x-request-id") {
        if let Ok(value) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert("x-request-id", value);
        }
    }
    headers.insert("server", HeaderValue::from_static("s3deck"));

    response
}

// -- Introspection handlers ---------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthBody {
    status: &'static str,
    active_operations: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OperationsOverview {
    active_operations: u64,
    active_sessions: usize,
    shutdown_state: &'static str,
}

fn state_label(state: ShutdownState) -> &'static str {
    match state {
        ShutdownState::Running => "running",
        ShutdownState::Draining => "draining",
        ShutdownState::Terminated => "terminated",
    }
}

/// Health check endpoint.  Reports 503 once shutdown has begun.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Serving"),
        (status = 503, description = "Draining for shutdown")
    )
)]
async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    let shutdown_state = state.shutdown.state();
    let status = if shutdown_state == ShutdownState::Running {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthBody {
            status: if status == StatusCode::OK { "ok" } else { state_label(shutdown_state) },
            active_operations: state.operations.current(),
        }),
    )
        .into_response()
}

/// Process-wide operation and session counts.
#[utoipa::path(
    get,
    path = "/status/operations",
    tag = "Health",
    responses((status = 200, description = "In-flight operations and shutdown state"))
)]
async fn operations_overview(State(state): State<Arc<AppState>>) -> Response {
    let active_sessions = state.sessions.session_count().await.unwrap_or(0);
    ApiResponse::data(OperationsOverview {
        active_operations: state.operations.current(),
        active_sessions,
        shutdown_state: state_label(state.shutdown.state()),
    })
    .into_response()
}

async fn openapi_json() -> Response {
    Json(ApiDoc::openapi()).into_response()
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, MemoryCredential};
    use crate::regions::RegionRegistry;
    use crate::storage::memory::MemoryStorage;
    use axum::body::Body;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const ACCESS_KEY: &str = "AKIAEXAMPLE00001";
    const SECRET_KEY: &str = "wJalrXUtnFEMI/K7MDENG";

    struct TestApp {
        router: Router,
        state: Arc<AppState>,
        storage: Arc<MemoryStorage>,
    }

    fn test_app() -> TestApp {
        let mut config = Config::default();
        config.storage.backend = "memory".to_string();
        config.storage.inter_bucket_delay_ms = 0;
        config.storage.memory_credentials = vec![MemoryCredential {
            access_key: ACCESS_KEY.to_string(),
            secret_key: SECRET_KEY.to_string(),
        }];
        let regions = Arc::new(RegionRegistry::from_config(&config.regions).unwrap());
        let storage = Arc::new(MemoryStorage::with_credentials([(ACCESS_KEY, SECRET_KEY)]));
        let state = Arc::new(AppState::new(config, regions, Arc::new(storage.clone())).unwrap());
        TestApp {
            router: app(state.clone()),
            state,
            storage,
        }
    }

    impl TestApp {
        async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
            let resp = self.router.clone().oneshot(req).await.unwrap();
            let status = resp.status();
            let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
                .await
                .unwrap();
            let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, body)
        }

        async fn login(&self, region: &str) -> (String, String) {
            let (status, body) = self
                .send(json_request(
                    "POST",
                    "/auth/login",
                    None,
                    json!({"accessKey": ACCESS_KEY, "secretKey": SECRET_KEY, "region": region}),
                ))
                .await;
            assert_eq!(status, StatusCode::OK, "{body}");
            (
                body["data"]["token"].as_str().unwrap().to_string(),
                body["data"]["refreshToken"].as_str().unwrap().to_string(),
            )
        }
    }

    fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    fn upload_request(uri: &str, token: &str, folder: &str, file_name: &str, data: &str) -> Request<Body> {
        let body = format!(
            "--BOUNDARY\r\n\
             Content-Disposition: form-data; name=\"path\"\r\n\r\n\
             {folder}\r\n\
             --BOUNDARY\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n\
             {data}\r\n\
             --BOUNDARY--\r\n"
        );
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("authorization", format!("Bearer {token}"))
            .header("content-type", "multipart/form-data; boundary=BOUNDARY")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_login_list_logout_replay() {
        let t = test_app();
        let (token, _) = t.login("eu-west-2").await;

        let (status, body) = t.send(request("GET", "/s3/buckets", Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"], json!([]));

        let (status, _) = t.send(request("POST", "/auth/logout", Some(&token))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = t.send(request("GET", "/s3/buckets", Some(&token))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "SessionExpired");
    }

    #[tokio::test]
    async fn test_login_response_shape() {
        let t = test_app();
        let (status, body) = t
            .send(json_request(
                "POST",
                "/auth/login",
                None,
                json!({"accessKey": ACCESS_KEY, "secretKey": SECRET_KEY, "region": "eu-west-2"}),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["expiresIn"], 28800);
        assert_eq!(body["data"]["user"]["accessKeyMasked"], "AKIA****0001");
        assert_eq!(body["data"]["user"]["region"], "eu-west-2");
    }

    #[tokio::test]
    async fn test_login_failures() {
        let t = test_app();
        let (status, body) = t
            .send(json_request(
                "POST",
                "/auth/login",
                None,
                json!({"accessKey": ACCESS_KEY, "secretKey": "nope", "region": "us-east-1"}),
            ))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "SignatureDoesNotMatch");

        let (status, _) = t
            .send(json_request(
                "POST",
                "/auth/login",
                None,
                json!({"accessKey": ACCESS_KEY, "secretKey": SECRET_KEY, "region": "mars-1"}),
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = t
            .send(json_request("POST", "/auth/login", None, json!({"accessKey": ""})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_token_checks() {
        let t = test_app();
        let (status, body) = t.send(request("GET", "/s3/buckets", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "AuthError");

        let (status, body) = t.send(request("GET", "/s3/buckets", Some("garbage"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "InvalidToken");

        let (_, refresh) = t.login("us-east-1").await;
        let (status, _) = t.send(request("GET", "/auth/me", Some(&refresh))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_refresh_issues_working_token() {
        let t = test_app();
        let (token, refresh) = t.login("us-east-1").await;

        let (status, body) = t.send(request("POST", "/auth/refresh", Some(&refresh))).await;
        assert_eq!(status, StatusCode::OK);
        let fresh = body["data"]["token"].as_str().unwrap().to_string();

        let (status, body) = t.send(request("GET", "/auth/me", Some(&fresh))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["region"], "us-east-1");

        t.send(request("POST", "/auth/logout", Some(&token))).await;
        let (status, body) = t.send(request("POST", "/auth/refresh", Some(&refresh))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "SessionExpired");
    }

    #[tokio::test]
    async fn test_bucket_and_object_workflow() {
        let t = test_app();
        let (token, _) = t.login("eu-west-2").await;

        let (status, body) = t
            .send(json_request("POST", "/s3/buckets", Some(&token), json!({"name": "stats"})))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["region"], "eu-west-2");

        let (status, body) = t
            .send(upload_request("/s3/buckets/stats/upload", &token, "docs", "a.bin", "0123456789"))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["key"], "docs/a.bin");
        assert_eq!(body["data"]["sizeBytes"], 10);

        let (status, body) = t
            .send(json_request(
                "POST",
                "/s3/buckets/stats/folders",
                Some(&token),
                json!({"folderName": "empty"}),
            ))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["key"], "empty/");

        let (_, body) = t.send(request("GET", "/s3/buckets", Some(&token))).await;
        assert_eq!(body["data"][0]["name"], "stats");
        assert_eq!(body["data"][0]["objectCount"], 1);
        assert_eq!(body["data"][0]["totalSizeBytes"], 10);

        let (_, body) = t
            .send(request("GET", "/s3/buckets/stats/objects", Some(&token)))
            .await;
        let names: Vec<&str> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["docs", "empty"]);

        let (_, body) = t
            .send(request("GET", "/s3/buckets/stats/objects?path=docs", Some(&token)))
            .await;
        assert_eq!(body["data"][0]["name"], "a.bin");
        assert_eq!(body["data"][0]["isFolder"], false);

        let (status, body) = t
            .send(request(
                "GET",
                "/s3/buckets/stats/objects/docs%2Fa.bin/download",
                Some(&token),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["expiresIn"], 3600);
        assert!(body["data"]["url"].as_str().unwrap().contains("docs/a.bin"));

        let (status, body) = t
            .send(request("DELETE", "/s3/buckets/stats", Some(&token)))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "BucketNotEmpty");

        let (status, body) = t
            .send(request("DELETE", "/s3/buckets/stats?force=true", Some(&token)))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["objectsDeleted"], 2);
        assert!(!t.storage.bucket_exists("stats"));
    }

    #[tokio::test]
    async fn test_delete_object_and_invalid_bucket_name() {
        let t = test_app();
        let (token, _) = t.login("us-east-1").await;

        let (status, body) = t
            .send(json_request("POST", "/s3/buckets", Some(&token), json!({"name": "Bad_Name"})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "ValidationError");

        let (status, body) = t
            .send(json_request(
                "POST",
                "/s3/buckets",
                Some(&token),
                json!({"name": "ok", "region": "mars-1"}),
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "ValidationError");
        assert_eq!(body["message"], "Unknown region: mars-1");

        let (status, body) = t
            .send(json_request(
                "POST",
                "/s3/buckets/x/folders",
                Some(&token),
                json!({"path": "a/..", "folderName": "b"}),
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "ValidationError");

        t.send(json_request("POST", "/s3/buckets", Some(&token), json!({"name": "files"})))
            .await;
        t.send(upload_request("/s3/buckets/files/upload", &token, "", "x.txt", "hi"))
            .await;
        assert_eq!(t.storage.object_count("files"), Some(1));

        let (status, _) = t
            .send(request("DELETE", "/s3/buckets/files/objects/x.txt", Some(&token)))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(t.storage.object_count("files"), Some(0));
    }

    #[tokio::test]
    async fn test_operation_start_end_adjusts_both_counters() {
        let t = test_app();
        let (token, _) = t.login("us-east-1").await;

        let (_, body) = t
            .send(request("POST", "/auth/operation/start", Some(&token)))
            .await;
        assert_eq!(body["data"]["activeOperations"], 1);
        assert_eq!(t.state.operations.current(), 1);

        let (_, body) = t
            .send(request("GET", "/auth/operations/status", Some(&token)))
            .await;
        assert_eq!(body["data"]["activeOperations"], 1);
        assert_eq!(body["data"]["sessionValid"], true);

        let (_, body) = t.send(request("POST", "/auth/operation/end", Some(&token))).await;
        assert_eq!(body["data"]["activeOperations"], 0);
        assert_eq!(t.state.operations.current(), 0);

        // An unmatched end never drags the process count below the
        // operations of other sessions.
        t.state.operations.increment();
        let (_, body) = t.send(request("POST", "/auth/operation/end", Some(&token))).await;
        assert_eq!(body["data"]["activeOperations"], 0);
        assert_eq!(t.state.operations.current(), 1);
    }

    #[tokio::test]
    async fn test_logout_releases_unended_operations() {
        let t = test_app();
        let (token, _) = t.login("us-east-1").await;
        t.send(request("POST", "/auth/operation/start", Some(&token))).await;
        t.send(request("POST", "/auth/operation/start", Some(&token))).await;
        assert_eq!(t.state.operations.current(), 2);

        t.send(request("POST", "/auth/logout", Some(&token))).await;
        assert_eq!(t.state.operations.current(), 0);
    }

    #[tokio::test]
    async fn test_logout_releases_operations_started_after_authentication() {
        let t = test_app();
        let (token, _) = t.login("us-east-1").await;
        let authenticated = t.state.sessions.authenticate(&token).await.unwrap();
        assert_eq!(authenticated.active_operations, 0);

        t.send(request("POST", "/auth/operation/start", Some(&token))).await;
        assert_eq!(t.state.operations.current(), 1);

        let resp = auth::logout(
            State(t.state.clone()),
            axum::Extension(crate::handlers::AuthSession(authenticated)),
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(t.state.sessions.session_count().await.unwrap(), 0);
        assert_eq!(t.state.operations.current(), 0);
    }

    #[tokio::test]
    async fn test_public_introspection() {
        let t = test_app();

        let (status, body) = t.send(request("GET", "/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = t.send(request("GET", "/auth/regions", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["id"], "us-east-1");

        let (_, body) = t.send(request("GET", "/status/operations", None)).await;
        assert_eq!(body["data"]["activeOperations"], 0);
        assert_eq!(body["data"]["shutdownState"], "running");

        let (status, body) = t.send(request("GET", "/openapi.json", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/s3/buckets"].is_object());

        t.state.shutdown.begin_drain();
        let (status, body) = t.send(request("GET", "/health", None)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "draining");
    }

    #[tokio::test]
    async fn test_responses_carry_request_id() {
        let t = test_app();
        let resp = t
            .router
            .clone()
            .oneshot(request("GET", "/auth/regions", None))
            .await
            .unwrap();
        assert_eq!(resp.headers()["server"], "s3deck");
        assert_eq!(resp.headers()["x-request-id"].len(), 16);
    }
}
