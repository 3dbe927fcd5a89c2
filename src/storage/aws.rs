//! S3 client backed by the AWS SDK for Rust.
//!
//! One [`S3ObjectStore`] is built per (access key, region) identity with
//! static credentials, the region's endpoint, path-style addressing and a
//! bounded operation timeout.  SDK faults are translated through
//! [`parse_storage_error`].

use std::sync::Arc;
use std::time::Duration;

use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::backend::{BucketInfo, ListObjectsRequest, ListPage, ObjectInfo, ObjectStore, StoreFuture};
use super::cache::{ClientFactory, ClientHandle};
use super::errors::{parse_storage_error, StorageError};
use crate::regions::RegionRegistry;

/// Region whose buckets must not carry a location constraint.
const US_EAST_1: &str = "us-east-1";

/// Object-store client that talks to a real S3-compatible service.
pub struct S3ObjectStore {
    client: Client,
    region: String,
}

impl S3ObjectStore {
    pub fn new(
        access_key: &str,
        secret_key: &str,
        region: &str,
        endpoint: &str,
        request_timeout: Duration,
    ) -> Self {
        let credentials = aws_sdk_s3::config::Credentials::new(
            access_key,
            secret_key,
            None, // session_token
            None, // expiry
            "s3deck-session",
        );
        let timeouts = aws_config::timeout::TimeoutConfig::builder()
            .operation_timeout(request_timeout)
            .build();

        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .force_path_style(true)
            .timeout_config(timeouts)
            .build();

        Self {
            client: Client::from_conf(config),
            region: region.to_string(),
        }
    }
}

/// Map an SDK error onto the storage error taxonomy.
fn map_sdk_error<E, R>(context: &str, err: SdkError<E, R>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    debug!("S3 {context} failed: {}", DisplayErrorContext(&err));
    if matches!(err, SdkError::TimeoutError(_)) {
        return parse_storage_error(Some("RequestTimeout"), "operation timed out");
    }
    let code = err.code().map(str::to_string);
    let message = match err.message() {
        Some(m) => m.to_string(),
        None => DisplayErrorContext(&err).to_string(),
    };
    parse_storage_error(code.as_deref(), &message)
}

fn to_chrono(ts: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts.secs(), ts.subsec_nanos())
}

impl ObjectStore for S3ObjectStore {
    fn list_buckets(&self) -> StoreFuture<'_, Vec<BucketInfo>> {
        Box::pin(async move {
            debug!("S3 list_buckets: region={}", self.region);
            let resp = self
                .client
                .list_buckets()
                .send()
                .await
                .map_err(|e| map_sdk_error("list_buckets", e))?;

            Ok(resp
                .buckets()
                .iter()
                .filter_map(|b| {
                    b.name().map(|name| BucketInfo {
                        name: name.to_string(),
                        created_at: b.creation_date().and_then(to_chrono),
                    })
                })
                .collect())
        })
    }

    fn list_objects(
        &self,
        bucket: &str,
        request: ListObjectsRequest,
    ) -> StoreFuture<'_, ListPage> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            debug!(
                "S3 list_objects_v2: bucket={} prefix={:?} token={}",
                bucket,
                request.prefix,
                request.continuation_token.is_some()
            );
            let resp = self
                .client
                .list_objects_v2()
                .bucket(&bucket)
                .set_prefix(request.prefix)
                .set_delimiter(request.delimiter)
                .set_continuation_token(request.continuation_token)
                .max_keys(request.max_keys)
                .send()
                .await
                .map_err(|e| map_sdk_error("list_objects_v2", e))?;

            let objects = resp
                .contents()
                .iter()
                .filter_map(|obj| {
                    obj.key().map(|key| ObjectInfo {
                        key: key.to_string(),
                        size: obj.size().unwrap_or(0).max(0) as u64,
                        last_modified: obj.last_modified().and_then(to_chrono),
                        etag: obj.e_tag().map(str::to_string),
                        storage_class: obj.storage_class().map(|c| c.as_str().to_string()),
                    })
                })
                .collect();

            let common_prefixes = resp
                .common_prefixes()
                .iter()
                .filter_map(|p| p.prefix().map(str::to_string))
                .collect();

            let next_continuation_token = if resp.is_truncated() == Some(true) {
                resp.next_continuation_token().map(str::to_string)
            } else {
                None
            };

            Ok(ListPage {
                objects,
                common_prefixes,
                next_continuation_token,
            })
        })
    }

    fn create_bucket(&self, bucket: &str, location: Option<&str>) -> StoreFuture<'_, ()> {
        let bucket = bucket.to_string();
        let location = location.map(str::to_string);
        Box::pin(async move {
            debug!("S3 create_bucket: bucket={} location={:?}", bucket, location);
            let configuration = location
                .filter(|l| l != US_EAST_1)
                .map(|l| {
                    CreateBucketConfiguration::builder()
                        .location_constraint(BucketLocationConstraint::from(l.as_str()))
                        .build()
                });

            self.client
                .create_bucket()
                .bucket(&bucket)
                .set_create_bucket_configuration(configuration)
                .send()
                .await
                .map_err(|e| map_sdk_error("create_bucket", e))?;
            Ok(())
        })
    }

    fn delete_bucket(&self, bucket: &str) -> StoreFuture<'_, ()> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            debug!("S3 delete_bucket: bucket={}", bucket);
            self.client
                .delete_bucket()
                .bucket(&bucket)
                .send()
                .await
                .map_err(|e| map_sdk_error("delete_bucket", e))?;
            Ok(())
        })
    }

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> StoreFuture<'_, Option<String>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        let content_type = content_type.map(str::to_string);
        Box::pin(async move {
            debug!(
                "S3 put_object: bucket={} key={} bytes={}",
                bucket,
                key,
                data.len()
            );
            let resp = self
                .client
                .put_object()
                .bucket(&bucket)
                .key(&key)
                .set_content_type(content_type)
                .body(ByteStream::from(data))
                .send()
                .await
                .map_err(|e| map_sdk_error("put_object", e))?;
            Ok(resp.e_tag().map(str::to_string))
        })
    }

    fn delete_object(&self, bucket: &str, key: &str) -> StoreFuture<'_, ()> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            debug!("S3 delete_object: bucket={} key={}", bucket, key);
            self.client
                .delete_object()
                .bucket(&bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| map_sdk_error("delete_object", e))?;
            Ok(())
        })
    }

    fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StoreFuture<'_, String> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let presigning = PresigningConfig::expires_in(expires_in)
                .map_err(|e| parse_storage_error(None, &e.to_string()))?;
            let request = self
                .client
                .get_object()
                .bucket(&bucket)
                .key(&key)
                .presigned(presigning)
                .await
                .map_err(|e| map_sdk_error("presign get_object", e))?;
            Ok(request.uri().to_string())
        })
    }
}

/// Builds [`S3ObjectStore`] handles for the client cache.
pub struct S3ClientFactory {
    regions: Arc<RegionRegistry>,
    endpoint_override: Option<String>,
    request_timeout: Duration,
}

impl S3ClientFactory {
    pub fn new(
        regions: Arc<RegionRegistry>,
        endpoint_override: Option<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            regions,
            endpoint_override,
            request_timeout,
        }
    }

    /// Endpoint a client for `region` is bound to.
    fn endpoint_for(&self, region: &str) -> String {
        match &self.endpoint_override {
            Some(endpoint) => endpoint.clone(),
            None => self.regions.resolve_endpoint(region).to_string(),
        }
    }
}

impl ClientFactory for S3ClientFactory {
    fn create(&self, access_key: &str, secret_key: &str, region: &str) -> ClientHandle {
        let endpoint = self.endpoint_for(region);
        debug!("Building S3 client: region={} endpoint={}", region, endpoint);
        Arc::new(S3ObjectStore::new(
            access_key,
            secret_key,
            region,
            &endpoint,
            self.request_timeout,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegionsConfig;

    fn factory(endpoint_override: Option<&str>) -> S3ClientFactory {
        let regions = Arc::new(RegionRegistry::from_config(&RegionsConfig::default()).unwrap());
        S3ClientFactory::new(
            regions,
            endpoint_override.map(str::to_string),
            Duration::from_secs(30),
        )
    }

    #[test]
    fn test_endpoint_follows_region() {
        let f = factory(None);
        assert_eq!(f.endpoint_for("eu-west-2"), "https://s3.eu-west-2.amazonaws.com");
        assert_eq!(f.endpoint_for("unknown"), "https://s3.us-east-1.amazonaws.com");
    }

    #[test]
    fn test_endpoint_override_wins() {
        let f = factory(Some("http://localhost:9000"));
        assert_eq!(f.endpoint_for("eu-west-2"), "http://localhost:9000");
    }

    #[test]
    fn test_to_chrono() {
        let ts = aws_sdk_s3::primitives::DateTime::from_secs(1_700_000_000);
        assert_eq!(to_chrono(&ts).unwrap().timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn test_client_construction_does_not_touch_network() {
        let f = factory(Some("http://127.0.0.1:1"));
        let _client = f.create("AKIAEXAMPLE", "secret", "us-east-1");
    }
}
