//! Abstract object-store client trait.
//!
//! Every storage-service client must implement [`ObjectStore`].  The trait
//! covers exactly the calls the console brokers: bucket listing and
//! lifecycle, paginated object listing, single-shot uploads, deletes, and
//! pre-signed download URLs.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use super::errors::StorageError;

/// Boxed future returned by [`ObjectStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// A bucket as reported by the service.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketInfo {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// A single listed object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub storage_class: Option<String>,
}

/// Parameters for one page of an object listing.
#[derive(Debug, Clone, Default)]
pub struct ListObjectsRequest {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub continuation_token: Option<String>,
    pub max_keys: i32,
}

/// One page of an object listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectInfo>,
    /// Rolled-up prefixes when a delimiter was given, each ending in it.
    pub common_prefixes: Vec<String>,
    /// Present when more pages follow.
    pub next_continuation_token: Option<String>,
}

/// Async object-store client contract.
///
/// Handles are bound to one identity (access key, secret, region) at
/// construction and are shared between requests, so implementations must
/// not keep per-call state.
pub trait ObjectStore: Send + Sync + 'static {
    /// List every bucket visible to the credentials.
    fn list_buckets(&self) -> StoreFuture<'_, Vec<BucketInfo>>;

    /// Fetch one page of a bucket's object listing.
    fn list_objects(&self, bucket: &str, request: ListObjectsRequest)
        -> StoreFuture<'_, ListPage>;

    /// Create a bucket, optionally pinned to a location constraint.
    fn create_bucket(&self, bucket: &str, location: Option<&str>) -> StoreFuture<'_, ()>;

    /// Delete an (empty) bucket.
    fn delete_bucket(&self, bucket: &str) -> StoreFuture<'_, ()>;

    /// Write an object in one request, returning its ETag if reported.
    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> StoreFuture<'_, Option<String>>;

    /// Delete a single object.
    fn delete_object(&self, bucket: &str, key: &str) -> StoreFuture<'_, ()>;

    /// Issue a pre-signed GET URL valid for `expires_in`.
    fn presign_get(&self, bucket: &str, key: &str, expires_in: Duration)
        -> StoreFuture<'_, String>;
}
