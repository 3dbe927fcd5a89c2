//! Storage operation layer.
//!
//! Bucket and object operations brokered on behalf of an authenticated
//! operator.  Every operation resolves a client through the
//! [`ClientCache`] and reports faults as [`StorageError`] values; nothing
//! here panics across the public boundary.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::backend::{ListObjectsRequest, ObjectInfo, ObjectStore};
use super::cache::{ClientCache, ClientHandle};
use super::errors::StorageError;
use crate::config::StorageConfig;
use crate::metrics;
use crate::regions::RegionRegistry;

/// Result type of every storage operation.
pub type StorageResult<T> = Result<T, StorageError>;

const DELIMITER: &str = "/";

/// The identity a storage call is made with.
#[derive(Clone)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: Zeroizing<String>,
    pub region: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &crate::auth::mask_access_key(&self.access_key))
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    pub fn new(access_key: &str, secret_key: &str, region: &str) -> Self {
        Self {
            access_key: access_key.to_string(),
            secret_key: Zeroizing::new(secret_key.to_string()),
            region: region.to_string(),
        }
    }
}

/// Tunables for the operation layer.
#[derive(Debug, Clone)]
pub struct OperationSettings {
    /// Time box for one bucket's statistics.
    pub stats_timeout: Duration,
    /// Pause between buckets while aggregating statistics.
    pub inter_bucket_delay: Duration,
    pub page_size: i32,
    pub presign_expiry: Duration,
}

impl OperationSettings {
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            stats_timeout: Duration::from_secs(config.stats_timeout_secs),
            inter_bucket_delay: Duration::from_millis(config.inter_bucket_delay_ms),
            page_size: config.page_size,
            presign_expiry: Duration::from_secs(config.presign_expiry_secs),
        }
    }
}

impl Default for OperationSettings {
    fn default() -> Self {
        Self::from_config(&StorageConfig::default())
    }
}

// -- Result types -------------------------------------------------------------

/// A bucket with aggregated object statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketSummary {
    pub name: String,
    pub creation_date: Option<DateTime<Utc>>,
    pub region: String,
    pub object_count: u64,
    pub total_size_bytes: u64,
}

/// One entry of a folder-style object listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectEntry {
    /// Full object key (for folders, the common prefix).
    pub key: String,
    /// Name relative to the listed prefix, without a trailing slash.
    pub name: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub size_bytes: u64,
    pub etag: Option<String>,
    pub storage_class: Option<String>,
    pub is_folder: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketCreated {
    pub name: String,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketDeletion {
    pub name: String,
    /// Objects removed while draining a force-deleted bucket.
    pub objects_deleted: u64,
    /// Objects whose delete failed during the drain.
    pub objects_failed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedObject {
    pub bucket: String,
    pub key: String,
    pub size_bytes: u64,
    pub etag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadUrl {
    pub url: String,
    pub expires_in: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct BucketStats {
    object_count: u64,
    total_size_bytes: u64,
}

// -- Input normalization ------------------------------------------------------

/// Bucket names accepted for creation: `^[a-z0-9.-]+$`.
pub fn validate_bucket_name(name: &str) -> StorageResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StorageError::invalid_input(
            "Bucket name may only contain lowercase letters, numbers, dots and hyphens",
        ))
    }
}

fn require_bucket(bucket: &str) -> StorageResult<()> {
    if bucket.is_empty() {
        return Err(StorageError::invalid_input("Bucket name is required"));
    }
    Ok(())
}

fn require_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::invalid_input("Object key is required"));
    }
    Ok(())
}

/// Listing prefix: no leading slash, and a trailing slash unless empty.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_start_matches('/');
    if trimmed.is_empty() || trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}

/// Turn one delimiter listing into direct-child entries of `prefix`.
///
/// Folders come from common prefixes; files are objects whose key has no
/// further `/` after the prefix.  The prefix itself is never an entry.
pub fn build_entries(prefix: &str, objects: Vec<ObjectInfo>, common_prefixes: Vec<String>) -> Vec<ObjectEntry> {
    let mut entries = Vec::with_capacity(objects.len() + common_prefixes.len());

    for common in common_prefixes {
        let Some(relative) = common.strip_prefix(prefix) else {
            continue;
        };
        let name = relative.trim_end_matches('/');
        if name.is_empty() || name.contains('/') {
            continue;
        }
        entries.push(ObjectEntry {
            name: name.to_string(),
            key: common.clone(),
            last_modified: None,
            size_bytes: 0,
            etag: None,
            storage_class: None,
            is_folder: true,
        });
    }

    for object in objects {
        let Some(relative) = object.key.strip_prefix(prefix) else {
            continue;
        };
        if relative.is_empty() || relative.contains('/') {
            continue;
        }
        entries.push(ObjectEntry {
            name: relative.to_string(),
            key: object.key.clone(),
            last_modified: object.last_modified,
            size_bytes: object.size,
            etag: object.etag,
            storage_class: object.storage_class,
            is_folder: false,
        });
    }

    entries
}

// -- Service ------------------------------------------------------------------

/// Executes bucket and object operations against the storage service.
pub struct StorageService {
    clients: Arc<ClientCache>,
    regions: Arc<RegionRegistry>,
    settings: OperationSettings,
}

impl StorageService {
    pub fn new(
        clients: Arc<ClientCache>,
        regions: Arc<RegionRegistry>,
        settings: OperationSettings,
    ) -> Self {
        Self {
            clients,
            regions,
            settings,
        }
    }

    pub fn clients(&self) -> &Arc<ClientCache> {
        &self.clients
    }

    fn client(&self, creds: &Credentials) -> ClientHandle {
        self.clients
            .get_client(&creds.access_key, &creds.secret_key, &creds.region)
    }

    /// List buckets with per-bucket object statistics.
    ///
    /// Statistics are computed one bucket at a time with a short pause in
    /// between.  A bucket whose statistics time out or fail reports zeros
    /// instead of failing the listing.
    pub async fn list_buckets(&self, creds: &Credentials) -> StorageResult<Vec<BucketSummary>> {
        let result = self.list_buckets_inner(creds).await;
        metrics::record_storage_operation("list_buckets", result.is_ok());
        result
    }

    async fn list_buckets_inner(&self, creds: &Credentials) -> StorageResult<Vec<BucketSummary>> {
        let client = self.client(creds);
        let buckets = client.list_buckets().await?;
        debug!("Listing {} buckets with statistics", buckets.len());

        let mut summaries = Vec::with_capacity(buckets.len());
        for (index, bucket) in buckets.into_iter().enumerate() {
            if index > 0 && !self.settings.inter_bucket_delay.is_zero() {
                tokio::time::sleep(self.settings.inter_bucket_delay).await;
            }

            let stats = match tokio::time::timeout(
                self.settings.stats_timeout,
                self.bucket_stats(client.as_ref(), &bucket.name),
            )
            .await
            {
                Ok(Ok(stats)) => stats,
                Ok(Err(e)) => {
                    warn!("Statistics for bucket {} failed: {}", bucket.name, e);
                    BucketStats::default()
                }
                Err(_) => {
                    warn!(
                        "Statistics for bucket {} timed out after {:?}",
                        bucket.name, self.settings.stats_timeout
                    );
                    BucketStats::default()
                }
            };

            summaries.push(BucketSummary {
                name: bucket.name,
                creation_date: bucket.created_at,
                region: creds.region.clone(),
                object_count: stats.object_count,
                total_size_bytes: stats.total_size_bytes,
            });
        }

        Ok(summaries)
    }

    /// Count objects and bytes in a bucket, skipping folder markers.
    async fn bucket_stats(&self, client: &dyn ObjectStore, bucket: &str) -> StorageResult<BucketStats> {
        let mut stats = BucketStats::default();
        let mut continuation_token = None;
        loop {
            let page = client
                .list_objects(
                    bucket,
                    ListObjectsRequest {
                        prefix: None,
                        delimiter: None,
                        continuation_token,
                        max_keys: self.settings.page_size,
                    },
                )
                .await?;

            for object in page.objects.iter().filter(|o| !o.key.ends_with('/')) {
                stats.object_count += 1;
                stats.total_size_bytes += object.size;
            }

            match page.next_continuation_token {
                Some(token) => continuation_token = Some(token),
                None => return Ok(stats),
            }
        }
    }

    /// Create a bucket, optionally in a region other than the session's.
    pub async fn create_bucket(
        &self,
        creds: &Credentials,
        name: &str,
        region: Option<&str>,
    ) -> StorageResult<BucketCreated> {
        validate_bucket_name(name)?;
        let region = match region.filter(|r| !r.is_empty()) {
            Some(r) if !self.regions.is_valid_region(r) => {
                return Err(StorageError::invalid_input(format!("Unknown region: {r}")));
            }
            Some(r) => r.to_string(),
            None => creds.region.clone(),
        };

        let client = self
            .clients
            .get_client(&creds.access_key, &creds.secret_key, &region);
        let result = client.create_bucket(name, Some(&region)).await;
        metrics::record_storage_operation("create_bucket", result.is_ok());
        result?;

        info!("Created bucket {} in {}", name, region);
        Ok(BucketCreated {
            name: name.to_string(),
            region,
        })
    }

    /// Delete a bucket.  With `force`, every object is removed first.
    ///
    /// The drain lists the whole bucket, then deletes objects one at a time
    /// in listing order.  Individual delete failures are logged and counted
    /// but never stop the drain, and the bucket delete is attempted
    /// afterwards regardless.
    pub async fn delete_bucket(
        &self,
        creds: &Credentials,
        name: &str,
        force: bool,
    ) -> StorageResult<BucketDeletion> {
        require_bucket(name)?;
        let result = self.delete_bucket_inner(creds, name, force).await;
        metrics::record_storage_operation("delete_bucket", result.is_ok());
        result
    }

    async fn delete_bucket_inner(
        &self,
        creds: &Credentials,
        name: &str,
        force: bool,
    ) -> StorageResult<BucketDeletion> {
        let client = self.client(creds);
        let mut deletion = BucketDeletion {
            name: name.to_string(),
            objects_deleted: 0,
            objects_failed: 0,
        };

        if force {
            let keys = self.collect_keys(client.as_ref(), name).await?;
            info!("Force delete of bucket {}: draining {} objects", name, keys.len());

            for key in &keys {
                match client.delete_object(name, key).await {
                    Ok(()) => deletion.objects_deleted += 1,
                    Err(e) => {
                        warn!("Drain of bucket {}: failed to delete {}: {}", name, key, e);
                        deletion.objects_failed += 1;
                    }
                }
            }
        }

        client.delete_bucket(name).await?;
        info!(
            "Deleted bucket {} ({} objects drained, {} failed)",
            name, deletion.objects_deleted, deletion.objects_failed
        );
        Ok(deletion)
    }

    /// Every key in a bucket, in listing order.
    async fn collect_keys(&self, client: &dyn ObjectStore, bucket: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token = None;
        loop {
            let page = client
                .list_objects(
                    bucket,
                    ListObjectsRequest {
                        prefix: None,
                        delimiter: None,
                        continuation_token,
                        max_keys: self.settings.page_size,
                    },
                )
                .await?;
            keys.extend(page.objects.into_iter().map(|o| o.key));
            match page.next_continuation_token {
                Some(token) => continuation_token = Some(token),
                None => return Ok(keys),
            }
        }
    }

    /// Direct children (folders and files) of `prefix` in a bucket.
    pub async fn list_objects(
        &self,
        creds: &Credentials,
        bucket: &str,
        prefix: &str,
    ) -> StorageResult<Vec<ObjectEntry>> {
        require_bucket(bucket)?;
        let result = self.list_objects_inner(creds, bucket, prefix).await;
        metrics::record_storage_operation("list_objects", result.is_ok());
        result
    }

    async fn list_objects_inner(
        &self,
        creds: &Credentials,
        bucket: &str,
        prefix: &str,
    ) -> StorageResult<Vec<ObjectEntry>> {
        let client = self.client(creds);
        let prefix = normalize_prefix(prefix);

        let mut objects = Vec::new();
        let mut common_prefixes = Vec::new();
        let mut continuation_token = None;
        loop {
            let page = client
                .list_objects(
                    bucket,
                    ListObjectsRequest {
                        prefix: (!prefix.is_empty()).then(|| prefix.clone()),
                        delimiter: Some(DELIMITER.to_string()),
                        continuation_token,
                        max_keys: self.settings.page_size,
                    },
                )
                .await?;
            objects.extend(page.objects);
            common_prefixes.extend(page.common_prefixes);
            match page.next_continuation_token {
                Some(token) => continuation_token = Some(token),
                None => break,
            }
        }

        Ok(build_entries(&prefix, objects, common_prefixes))
    }

    /// Single-shot upload.
    pub async fn upload_object(
        &self,
        creds: &Credentials,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<UploadedObject> {
        require_bucket(bucket)?;
        require_key(key)?;
        let size_bytes = data.len() as u64;
        let result = self
            .client(creds)
            .put_object(bucket, key, data, content_type)
            .await;
        metrics::record_storage_operation("upload_object", result.is_ok());
        let etag = result?;

        info!("Uploaded {}/{} ({} bytes)", bucket, key, size_bytes);
        Ok(UploadedObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size_bytes,
            etag,
        })
    }

    pub async fn delete_object(&self, creds: &Credentials, bucket: &str, key: &str) -> StorageResult<()> {
        require_bucket(bucket)?;
        require_key(key)?;
        let result = self.client(creds).delete_object(bucket, key).await;
        metrics::record_storage_operation("delete_object", result.is_ok());
        result
    }

    /// Pre-signed, time-boxed download URL.  No data flows through here.
    pub async fn get_download_url(
        &self,
        creds: &Credentials,
        bucket: &str,
        key: &str,
    ) -> StorageResult<DownloadUrl> {
        require_bucket(bucket)?;
        require_key(key)?;
        let result = self
            .client(creds)
            .presign_get(bucket, key, self.settings.presign_expiry)
            .await;
        metrics::record_storage_operation("get_download_url", result.is_ok());
        Ok(DownloadUrl {
            url: result?,
            expires_in: self.settings.presign_expiry.as_secs(),
        })
    }

    /// Emulate a directory with a zero-length object whose key ends in `/`.
    /// Returns the marker key.
    pub async fn create_folder(&self, creds: &Credentials, bucket: &str, path: &str) -> StorageResult<String> {
        require_bucket(bucket)?;
        let path = path.trim_matches('/');
        if path.is_empty() {
            return Err(StorageError::invalid_input("Folder name is required"));
        }
        if path.split('/').any(|segment| segment.is_empty() || segment == "..") {
            return Err(StorageError::invalid_input("Invalid folder path"));
        }

        let key = format!("{path}/");
        let result = self
            .client(creds)
            .put_object(bucket, &key, Bytes::new(), None)
            .await;
        metrics::record_storage_operation("create_folder", result.is_ok());
        result?;
        Ok(key)
    }
}

// -- Tests --------------------------------------------------------------------
