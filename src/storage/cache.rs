//! Per-identity storage client cache.
//!
//! Building a storage client is comparatively expensive (connector, TLS
//! and credential setup), so one handle is memoized per
//! `accessKey|region|secret fingerprint` and shared by every request from
//! that identity.  The cache is insert-if-absent: entries are never
//! replaced or evicted within the process lifetime.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

use super::backend::ObjectStore;
use super::errors::StorageError;

/// Shared, immutable client handle.
pub type ClientHandle = Arc<dyn ObjectStore>;

/// Constructs client handles bound to one identity.
pub trait ClientFactory: Send + Sync + 'static {
    fn create(&self, access_key: &str, secret_key: &str, region: &str) -> ClientHandle;
}

/// Memoizes one [`ClientHandle`] per `(access key, region, secret)`.
pub struct ClientCache {
    factory: Arc<dyn ClientFactory>,
    clients: RwLock<HashMap<String, ClientHandle>>,
}

/// `accessKey|region|hex(sha256(secret))`.  The secret itself is never
/// part of the key.
fn cache_key(access_key: &str, secret_key: &str, region: &str) -> String {
    let fingerprint = Sha256::digest(secret_key.as_bytes());
    format!("{access_key}|{region}|{}", hex::encode(fingerprint))
}

impl ClientCache {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Return the cached handle for this identity, building and storing one
    /// first if absent.
    pub fn get_client(&self, access_key: &str, secret_key: &str, region: &str) -> ClientHandle {
        let key = cache_key(access_key, secret_key, region);

        if let Some(handle) = self.clients.read().expect("rwlock poisoned").get(&key) {
            return Arc::clone(handle);
        }

        let mut clients = self.clients.write().expect("rwlock poisoned");
        // Another request may have inserted while we waited for the lock.
        let handle = clients.entry(key).or_insert_with(|| {
            debug!("Creating storage client for {}", key_for_log(access_key, region));
            self.factory.create(access_key, secret_key, region)
        });
        Arc::clone(handle)
    }

    /// Verify credentials with a lightweight bucket listing.
    ///
    /// Uses a fresh, uncached handle so a failed login never adds an entry.
    pub async fn test_connection(
        &self,
        access_key: &str,
        secret_key: &str,
        region: &str,
    ) -> Result<(), StorageError> {
        let probe = self.factory.create(access_key, secret_key, region);
        probe.list_buckets().await.map(|_| ())
    }

    /// Number of cached handles.
    pub fn len(&self) -> usize {
        self.clients.read().expect("rwlock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn key_for_log(access_key: &str, region: &str) -> String {
    format!("{}|{}", crate::auth::mask_access_key(access_key), region)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    fn cache() -> ClientCache {
        let storage = Arc::new(MemoryStorage::with_credentials([("ak", "sk")]));
        ClientCache::new(Arc::new(storage))
    }

    #[test]
    fn test_same_identity_returns_same_handle() {
        let cache = cache();
        let a = cache.get_client("ak", "sk", "us-east-1");
        let b = cache.get_client("ak", "sk", "us-east-1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_different_region_returns_distinct_handle() {
        let cache = cache();
        let a = cache.get_client("ak", "sk", "us-east-1");
        let b = cache.get_client("ak", "sk", "eu-west-2");
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_different_secrets_keep_their_own_handles() {
        let cache = cache();
        let old = cache.get_client("ak", "old", "us-east-1");
        let new = cache.get_client("ak", "sk", "us-east-1");
        assert!(!Arc::ptr_eq(&old, &new));
        // Alternating sessions never rebuild each other's handle.
        assert!(Arc::ptr_eq(&old, &cache.get_client("ak", "old", "us-east-1")));
        assert!(Arc::ptr_eq(&new, &cache.get_client("ak", "sk", "us-east-1")));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_connection_reports_bad_credentials() {
        let cache = cache();
        assert!(cache.test_connection("ak", "sk", "us-east-1").await.is_ok());
        let err = cache
            .test_connection("ak", "wrong", "us-east-1")
            .await
            .unwrap_err();
        assert!(err.is_credential_error());
        // Probing never populates the cache.
        assert!(cache.is_empty());
    }
}
