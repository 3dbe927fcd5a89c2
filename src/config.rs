//! Configuration loading and types for s3deck.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Every section is optional; a missing section (or a
//! missing file) falls back to the defaults below.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Session and token settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Storage service client settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Region registry.
    #[serde(default)]
    pub regions: RegionsConfig,

    /// Graceful shutdown settings.
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings (metrics + health probes).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// `production` or `development`. Internal error detail is only
    /// returned to callers in development.
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Maximum accepted upload body in bytes (default 100 MiB).
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl ServerConfig {
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

/// Session, token and secret-encryption settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for signing tokens. Empty means a random per-process
    /// secret (tokens do not survive a restart, neither do sessions).
    #[serde(default)]
    pub jwt_secret: String,

    /// Base64-encoded 32-byte key for encrypting stored secrets. Empty
    /// means a random per-process key.
    #[serde(default)]
    pub encryption_key: String,

    /// Lifetime of session tokens issued at login.
    #[serde(default = "default_session_token_ttl")]
    pub session_token_ttl_secs: u64,

    /// Lifetime of refresh tokens.
    #[serde(default = "default_refresh_token_ttl")]
    pub refresh_token_ttl_secs: u64,

    /// Sessions idle for longer than this (and with no active operations)
    /// are swept.
    #[serde(default = "default_session_idle_timeout")]
    pub session_idle_timeout_secs: u64,

    /// How often the idle-session sweeper runs.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl AuthConfig {
    pub fn session_token_ttl(&self) -> Duration {
        Duration::from_secs(self.session_token_ttl_secs)
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_token_ttl_secs)
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            encryption_key: String::new(),
            session_token_ttl_secs: default_session_token_ttl(),
            refresh_token_ttl_secs: default_refresh_token_ttl(),
            session_idle_timeout_secs: default_session_idle_timeout(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// Storage service client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: `s3` (real S3-compatible service) or `memory`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Per-call transport timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Time box for computing one bucket's object statistics.
    #[serde(default = "default_stats_timeout")]
    pub stats_timeout_secs: u64,

    /// Pause between buckets while aggregating statistics.
    #[serde(default = "default_inter_bucket_delay")]
    pub inter_bucket_delay_ms: u64,

    /// Page size for object listings.
    #[serde(default = "default_page_size")]
    pub page_size: i32,

    /// Lifetime of pre-signed download URLs.
    #[serde(default = "default_presign_expiry")]
    pub presign_expiry_secs: u64,

    /// Send every request to this endpoint instead of the region's
    /// (e.g. MinIO or LocalStack).
    #[serde(default)]
    pub endpoint_override: Option<String>,

    /// Credentials accepted by the `memory` backend. Empty accepts any.
    #[serde(default)]
    pub memory_credentials: Vec<MemoryCredential>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            request_timeout_secs: default_request_timeout(),
            stats_timeout_secs: default_stats_timeout(),
            inter_bucket_delay_ms: default_inter_bucket_delay(),
            page_size: default_page_size(),
            presign_expiry_secs: default_presign_expiry(),
            endpoint_override: None,
            memory_credentials: Vec::new(),
        }
    }
}

/// An access key / secret pair accepted by the in-memory backend.
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryCredential {
    pub access_key: String,
    pub secret_key: String,
}

/// Region registry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RegionsConfig {
    /// Region used when a lookup misses.
    #[serde(default = "default_region")]
    pub default: String,

    /// Known regions, in display order.
    #[serde(default = "default_region_list")]
    pub list: Vec<RegionEntry>,
}

impl Default for RegionsConfig {
    fn default() -> Self {
        Self {
            default: default_region(),
            list: default_region_list(),
        }
    }
}

/// A single configured region.
#[derive(Debug, Clone, Deserialize)]
pub struct RegionEntry {
    pub id: String,
    pub display_name: String,
    pub endpoint: String,
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownConfig {
    /// How often to recheck the active-operation counter while draining.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Upper bound on draining before a forced exit.
    #[serde(default = "default_max_drain")]
    pub max_drain_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_drain_secs: default_max_drain(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Enable `/health` and `/status/operations`.
    #[serde(default = "default_true")]
    pub health_check: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            health_check: true,
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_environment() -> String {
    "production".to_string()
}

fn default_max_upload_bytes() -> usize {
    100 * 1024 * 1024
}

fn default_session_token_ttl() -> u64 {
    8 * 60 * 60
}

fn default_refresh_token_ttl() -> u64 {
    7 * 24 * 60 * 60
}

fn default_session_idle_timeout() -> u64 {
    8 * 60 * 60
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_storage_backend() -> String {
    "s3".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_stats_timeout() -> u64 {
    12
}

fn default_inter_bucket_delay() -> u64 {
    100
}

fn default_page_size() -> i32 {
    1000
}

fn default_presign_expiry() -> u64 {
    3600
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_region_list() -> Vec<RegionEntry> {
    [
        ("us-east-1", "US East (N. Virginia)"),
        ("us-west-2", "US West (Oregon)"),
        ("eu-west-1", "Europe (Ireland)"),
        ("eu-west-2", "Europe (London)"),
        ("eu-central-1", "Europe (Frankfurt)"),
        ("ap-southeast-1", "Asia Pacific (Singapore)"),
    ]
    .into_iter()
    .map(|(id, name)| RegionEntry {
        id: id.to_string(),
        display_name: name.to_string(),
        endpoint: format!("https://s3.{id}.amazonaws.com"),
    })
    .collect()
}

fn default_poll_interval() -> u64 {
    5
}

fn default_max_drain() -> u64 {
    120
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

/// Like [`load_config`], but a missing file yields the defaults.
pub fn load_config_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    if path.as_ref().exists() {
        load_config(path)
    } else {
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.server.max_upload_bytes, 104_857_600);
        assert_eq!(config.auth.session_token_ttl_secs, 28_800);
        assert_eq!(config.storage.request_timeout_secs, 30);
        assert_eq!(config.storage.page_size, 1000);
        assert_eq!(config.shutdown.poll_interval_secs, 5);
        assert_eq!(config.shutdown.max_drain_secs, 120);
        assert_eq!(config.regions.default, "us-east-1");
        assert!(config.regions.list.iter().any(|r| r.id == "eu-west-2"));
    }

    #[test]
    fn test_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "server:\n  port: 8080\n  environment: development\nstorage:\n  backend: memory\n  stats_timeout_secs: 3"
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert!(config.server.is_development());
        assert_eq!(config.storage.backend, "memory");
        assert_eq!(config.storage.stats_timeout_secs, 3);
        // Untouched sections keep their defaults.
        assert_eq!(config.storage.inter_bucket_delay_ms, 100);
        assert_eq!(config.auth.refresh_token_ttl_secs, 604_800);
    }

    #[test]
    fn test_custom_regions() {
        let yaml = r#"
regions:
  default: home
  list:
    - id: home
      display_name: Home
      endpoint: http://localhost:9000
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.regions.default, "home");
        assert_eq!(config.regions.list.len(), 1);
        assert_eq!(config.regions.list[0].endpoint, "http://localhost:9000");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_or_default(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.server.port, 3001);
    }
}
