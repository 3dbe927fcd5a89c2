//! s3deck library: management console backend for S3-compatible storage.
//!
//! This crate authenticates operators with their storage credentials, keeps
//! server-side sessions, brokers bucket and object operations against the
//! storage service, and counts in-flight operations so the process can shut
//! down without cutting transfers short.

use std::sync::Arc;

pub mod auth;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod operations;
pub mod regions;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod storage;

use crate::config::{Config, StorageConfig};
use crate::operations::{AtomicOperationCounter, OperationCounter};
use crate::regions::RegionRegistry;
use crate::session::{InMemorySessionStore, SessionManager};
use crate::shutdown::ShutdownCoordinator;
use crate::storage::aws::S3ClientFactory;
use crate::storage::cache::{ClientCache, ClientFactory};
use crate::storage::memory::MemoryStorage;
use crate::storage::service::{OperationSettings, StorageService};

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    pub regions: Arc<RegionRegistry>,
    /// Operator sessions and tokens.
    pub sessions: Arc<SessionManager>,
    /// Bucket and object operations.
    pub storage: Arc<StorageService>,
    /// Process-wide in-flight operation count.
    pub operations: Arc<dyn OperationCounter>,
    pub shutdown: Arc<ShutdownCoordinator>,
}

impl AppState {
    /// Wire every service from configuration, with storage clients built by
    /// `factory`.
    pub fn new(
        config: Config,
        regions: Arc<RegionRegistry>,
        factory: Arc<dyn ClientFactory>,
    ) -> anyhow::Result<Self> {
        let clients = Arc::new(ClientCache::new(factory));
        let sessions = Arc::new(SessionManager::from_config(
            &config.auth,
            Arc::new(InMemorySessionStore::new()),
            clients.clone(),
            regions.clone(),
        )?);
        let storage = Arc::new(StorageService::new(
            clients,
            regions.clone(),
            OperationSettings::from_config(&config.storage),
        ));
        let operations: Arc<dyn OperationCounter> = Arc::new(AtomicOperationCounter::new());
        let shutdown = Arc::new(ShutdownCoordinator::from_config(
            operations.clone(),
            &config.shutdown,
        ));

        Ok(Self {
            config,
            regions,
            sessions,
            storage,
            operations,
            shutdown,
        })
    }

    /// Wire every service, choosing the storage backend from configuration.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let regions = Arc::new(RegionRegistry::from_config(&config.regions)?);
        let factory = client_factory(&config.storage, regions.clone())?;
        Self::new(config, regions, factory)
    }
}

/// Select the storage client factory named by `storage.backend`.
pub fn client_factory(
    config: &StorageConfig,
    regions: Arc<RegionRegistry>,
) -> anyhow::Result<Arc<dyn ClientFactory>> {
    match config.backend.as_str() {
        "s3" => Ok(Arc::new(S3ClientFactory::new(
            regions,
            config.endpoint_override.clone(),
            std::time::Duration::from_secs(config.request_timeout_secs),
        ))),
        "memory" => {
            let storage = MemoryStorage::with_credentials(
                config
                    .memory_credentials
                    .iter()
                    .map(|c| (c.access_key.clone(), c.secret_key.clone())),
            );
            Ok(Arc::new(Arc::new(storage)))
        }
        other => anyhow::bail!("unknown storage backend '{other}' (expected 's3' or 'memory')"),
    }
}
