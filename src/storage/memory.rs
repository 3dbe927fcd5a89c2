//! In-memory S3-compatible object store.
//!
//! All buckets and objects live in a single [`MemoryStorage`] shared by every
//! client handle, the way one storage service is shared by every identity.
//! Handles carry their own credentials, which are checked against the
//! configured credential list on each call.  Useful for local development
//! and tests.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use super::backend::{BucketInfo, ListObjectsRequest, ListPage, ObjectInfo, ObjectStore, StoreFuture};
use super::cache::{ClientFactory, ClientHandle};
use super::errors::{parse_storage_error, StorageError};

/// Characters left unescaped in pre-signed memory URLs.
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    etag: String,
    content_type: Option<String>,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct StoredBucket {
    created_at: Option<DateTime<Utc>>,
    region: Option<String>,
    objects: BTreeMap<String, StoredObject>,
}

#[derive(Debug, Default)]
struct Inner {
    buckets: BTreeMap<String, StoredBucket>,
    /// access key -> secret key. Empty accepts any credentials.
    credentials: HashMap<String, String>,
}

/// Shared state behind every memory client handle.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: RwLock<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept the given credentials from now on.
    pub fn with_credentials<I, K, S>(credentials: I) -> Self
    where
        I: IntoIterator<Item = (K, S)>,
        K: Into<String>,
        S: Into<String>,
    {
        let storage = Self::new();
        {
            let mut inner = storage.inner.write().expect("rwlock poisoned");
            inner.credentials = credentials
                .into_iter()
                .map(|(k, s)| (k.into(), s.into()))
                .collect();
        }
        storage
    }

    /// Number of objects currently stored in `bucket`, if it exists.
    pub fn object_count(&self, bucket: &str) -> Option<usize> {
        let inner = self.inner.read().expect("rwlock poisoned");
        inner.buckets.get(bucket).map(|b| b.objects.len())
    }

    pub fn bucket_exists(&self, bucket: &str) -> bool {
        let inner = self.inner.read().expect("rwlock poisoned");
        inner.buckets.contains_key(bucket)
    }

    /// Content type recorded for an object.
    pub fn content_type(&self, bucket: &str, key: &str) -> Option<String> {
        let inner = self.inner.read().expect("rwlock poisoned");
        inner
            .buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .and_then(|o| o.content_type.clone())
    }

    /// Region a bucket was created in.
    pub fn bucket_region(&self, bucket: &str) -> Option<String> {
        let inner = self.inner.read().expect("rwlock poisoned");
        inner.buckets.get(bucket).and_then(|b| b.region.clone())
    }
}

/// A client handle over [`MemoryStorage`] bound to one identity.
pub struct MemoryObjectStore {
    storage: Arc<MemoryStorage>,
    access_key: String,
    secret_key: String,
    region: String,
}

impl MemoryObjectStore {
    pub fn new(storage: Arc<MemoryStorage>, access_key: &str, secret_key: &str, region: &str) -> Self {
        Self {
            storage,
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
            region: region.to_string(),
        }
    }

    /// Verify this handle's credentials against the configured list.
    fn authorize(&self, inner: &Inner) -> Result<(), StorageError> {
        if inner.credentials.is_empty() {
            return Ok(());
        }
        match inner.credentials.get(&self.access_key) {
            None => Err(parse_storage_error(
                Some("InvalidAccessKeyId"),
                "The access key ID you provided does not exist in our records.",
            )),
            Some(secret) if *secret != self.secret_key => Err(parse_storage_error(
                Some("SignatureDoesNotMatch"),
                "The request signature we calculated does not match the signature you provided.",
            )),
            Some(_) => Ok(()),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>, StorageError> {
        let inner = self.storage.inner.read().expect("rwlock poisoned");
        self.authorize(&inner)?;
        Ok(inner)
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>, StorageError> {
        let inner = self.storage.inner.write().expect("rwlock poisoned");
        self.authorize(&inner)?;
        Ok(inner)
    }
}

fn no_such_bucket() -> StorageError {
    parse_storage_error(Some("NoSuchBucket"), "The specified bucket does not exist")
}

/// Quoted MD5-hex ETag for a byte slice.
fn compute_etag(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("\"{}\"", hex::encode(hasher.finalize()))
}

/// One entry of a listing page, in key order.
enum Listed {
    Object(String),
    Prefix(String),
}

/// Continuation tokens record the last emitted entry and its type, so a
/// resumed listing skips every key already rolled into a common prefix.
fn encode_token(entry: &Listed) -> String {
    match entry {
        Listed::Object(key) => format!("k:{key}"),
        Listed::Prefix(prefix) => format!("p:{prefix}"),
    }
}

fn after_token(key: &str, token: Option<&str>) -> bool {
    match token {
        None => true,
        Some(t) => {
            if let Some(last_key) = t.strip_prefix("k:") {
                key > last_key
            } else if let Some(last_prefix) = t.strip_prefix("p:") {
                key > last_prefix && !key.starts_with(last_prefix)
            } else {
                true
            }
        }
    }
}

fn list_bucket(bucket: &StoredBucket, request: &ListObjectsRequest) -> ListPage {
    let prefix = request.prefix.as_deref().unwrap_or("");
    let delimiter = request.delimiter.as_deref().filter(|d| !d.is_empty());
    let max_keys = if request.max_keys <= 0 {
        1000
    } else {
        request.max_keys as usize
    };
    let token = request.continuation_token.as_deref();

    let mut page = ListPage::default();
    let mut emitted = 0usize;
    let mut last: Option<Listed> = None;

    for (key, object) in bucket.objects.range(prefix.to_string()..) {
        if !key.starts_with(prefix) {
            break;
        }
        if !after_token(key, token) {
            continue;
        }

        let rest = &key[prefix.len()..];
        let entry = match delimiter.and_then(|d| rest.find(d).map(|i| i + d.len())) {
            Some(end) => {
                let common = format!("{prefix}{}", &rest[..end]);
                if page.common_prefixes.last() == Some(&common) {
                    continue;
                }
                Listed::Prefix(common)
            }
            None => Listed::Object(key.clone()),
        };

        if emitted == max_keys {
            page.next_continuation_token = last.as_ref().map(encode_token);
            return page;
        }

        match &entry {
            Listed::Object(key) => page.objects.push(ObjectInfo {
                key: key.clone(),
                size: object.data.len() as u64,
                last_modified: Some(object.last_modified),
                etag: Some(object.etag.clone()),
                storage_class: Some("STANDARD".to_string()),
            }),
            Listed::Prefix(common) => page.common_prefixes.push(common.clone()),
        }
        emitted += 1;
        last = Some(entry);
    }

    page
}

impl ObjectStore for MemoryObjectStore {
    fn list_buckets(&self) -> StoreFuture<'_, Vec<BucketInfo>> {
        Box::pin(async move {
            let inner = self.read()?;
            Ok(inner
                .buckets
                .iter()
                .map(|(name, bucket)| BucketInfo {
                    name: name.clone(),
                    created_at: bucket.created_at,
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
            let inner = self.read()?;
            let stored = inner.buckets.get(&bucket).ok_or_else(no_such_bucket)?;
            Ok(list_bucket(stored, &request))
        })
    }

    fn create_bucket(&self, bucket: &str, location: Option<&str>) -> StoreFuture<'_, ()> {
        let bucket = bucket.to_string();
        let region = location.unwrap_or(&self.region).to_string();
        Box::pin(async move {
            let mut inner = self.write()?;
            if inner.buckets.contains_key(&bucket) {
                return Err(parse_storage_error(
                    Some("BucketAlreadyExists"),
                    "The requested bucket name is not available.",
                ));
            }
            inner.buckets.insert(
                bucket,
                StoredBucket {
                    created_at: Some(Utc::now()),
                    region: Some(region),
                    objects: BTreeMap::new(),
                },
            );
            Ok(())
        })
    }

    fn delete_bucket(&self, bucket: &str) -> StoreFuture<'_, ()> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            let mut inner = self.write()?;
            let stored = inner.buckets.get(&bucket).ok_or_else(no_such_bucket)?;
            if !stored.objects.is_empty() {
                return Err(parse_storage_error(
                    Some("BucketNotEmpty"),
                    "The bucket you tried to delete is not empty",
                ));
            }
            inner.buckets.remove(&bucket);
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
            let mut inner = self.write()?;
            let stored = inner.buckets.get_mut(&bucket).ok_or_else(no_such_bucket)?;
            let etag = compute_etag(&data);
            stored.objects.insert(
                key,
                StoredObject {
                    data,
                    etag: etag.clone(),
                    content_type,
                    last_modified: Utc::now(),
                },
            );
            Ok(Some(etag))
        })
    }

    fn delete_object(&self, bucket: &str, key: &str) -> StoreFuture<'_, ()> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let mut inner = self.write()?;
            let stored = inner.buckets.get_mut(&bucket).ok_or_else(no_such_bucket)?;
            // Deleting a missing key succeeds, as on S3.
            stored.objects.remove(&key);
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
            let inner = self.read()?;
            if !inner.buckets.contains_key(&bucket) {
                return Err(no_such_bucket());
            }
            let expires_at = Utc::now().timestamp() + expires_in.as_secs() as i64;
            Ok(format!(
                "memory://{}/{}?X-Amz-Credential={}&Expires={}",
                bucket,
                utf8_percent_encode(&key, KEY_ENCODE_SET),
                utf8_percent_encode(&self.access_key, NON_ALPHANUMERIC),
                expires_at
            ))
        })
    }
}

impl ClientFactory for Arc<MemoryStorage> {
    fn create(&self, access_key: &str, secret_key: &str, region: &str) -> ClientHandle {
        Arc::new(MemoryObjectStore::new(
            Arc::clone(self),
            access_key,
            secret_key,
            region,
        ))
    }
}

// -- Tests -------------------------------------------------------------------
