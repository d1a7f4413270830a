use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub objectstore: ObjectStoreConfig,
    #[serde(default)]
    pub metastore: MetaStoreConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub verifier: VerifierConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub autodownload: AutoDownloadConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub static_assets: StaticAssetsConfig,
    #[serde(default)]
    pub mirror: MirrorConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_request_timeout_secs() -> u64 {
    60
}

/// Object store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStoreProvider {
    #[default]
    Local,
    S3,
}

/// Object store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObjectStoreConfig {
    #[serde(default)]
    pub provider: ObjectStoreProvider,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    /// Root directory for the local backend's blobs.
    #[serde(default = "default_local_root")]
    pub local_root: PathBuf,
    /// How long a presigned / direct URL remains valid.
    #[serde(default = "default_presign_ttl_secs")]
    pub presign_ttl_secs: u64,
    /// S3 access key, loaded from environment, never from the config file.
    #[serde(skip)]
    pub access_key: Option<String>,
    /// S3 secret key, loaded from environment, never from the config file.
    #[serde(skip)]
    pub secret_key: Option<String>,
    /// HMAC secret for signing the local backend's direct URLs, loaded from
    /// environment, never from the config file.
    #[serde(skip)]
    pub presign_secret: Option<String>,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            provider: ObjectStoreProvider::default(),
            bucket: default_bucket(),
            endpoint: None,
            region: None,
            local_root: default_local_root(),
            presign_ttl_secs: default_presign_ttl_secs(),
            access_key: None,
            secret_key: None,
            presign_secret: None,
        }
    }
}

fn default_bucket() -> String {
    "tfmirror".to_string()
}

fn default_local_root() -> PathBuf {
    PathBuf::from("data/objects")
}

fn default_presign_ttl_secs() -> u64 {
    300
}

/// Metadata store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetaStoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default)]
    pub backup: BackupConfig,
}

impl Default for MetaStoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            max_connections: default_max_connections(),
            backup: BackupConfig::default(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/tfmirror.db")
}

fn default_max_connections() -> u32 {
    8
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackupConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_backup_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_backup_prefix")]
    pub prefix: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_backup_interval_secs(),
            prefix: default_backup_prefix(),
        }
    }
}

fn default_backup_interval_secs() -> u64 {
    3600
}

fn default_backup_prefix() -> String {
    "backups/tfmirror".to_string()
}

/// Two-tier cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_memory_bytes")]
    pub memory_bytes: ByteSize,
    #[serde(default = "default_disk_bytes")]
    pub disk_bytes: ByteSize,
    #[serde(default = "default_disk_path")]
    pub disk_path: PathBuf,
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_bytes: default_memory_bytes(),
            disk_bytes: default_disk_bytes(),
            disk_path: default_disk_path(),
            default_ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_memory_bytes() -> ByteSize {
    ByteSize(64 * 1024 * 1024)
}

fn default_disk_bytes() -> ByteSize {
    ByteSize(2 * 1024 * 1024 * 1024)
}

fn default_disk_path() -> PathBuf {
    PathBuf::from("data/cache")
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

/// Upstream registry client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_provider_registry_base")]
    pub provider_registry_base: String,
    #[serde(default = "default_module_registry_base")]
    pub module_registry_base: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs_upstream")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_max_download_size")]
    pub max_download_size: ByteSize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            provider_registry_base: default_provider_registry_base(),
            module_registry_base: default_module_registry_base(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs_upstream(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_download_size: default_max_download_size(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_provider_registry_base() -> String {
    "https://registry.terraform.io".to_string()
}

fn default_module_registry_base() -> String {
    "https://registry.terraform.io".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs_upstream() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_max_download_size() -> ByteSize {
    ByteSize(512 * 1024 * 1024)
}

fn default_user_agent() -> String {
    "tfmirror/0.1.0".to_string()
}

/// Provider artifact verification configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VerifierConfig {
    #[serde(default)]
    pub gpg_enabled: bool,
    pub trusted_keys_path: Option<PathBuf>,
    #[serde(default = "default_max_module_size")]
    pub max_module_size: ByteSize,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            gpg_enabled: false,
            trusted_keys_path: None,
            max_module_size: default_max_module_size(),
        }
    }
}

fn default_max_module_size() -> ByteSize {
    ByteSize(256 * 1024 * 1024)
}

/// Job processor configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobsConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_retry_max")]
    pub retry_max: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            retry_max: default_retry_max(),
            retry_delay_ms: default_retry_delay_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

fn default_worker_count() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_max_concurrent_jobs() -> usize {
    8
}

fn default_retry_max() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

/// Auto-download admission controller configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AutoDownloadConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub allowed_namespaces: Vec<String>,
    #[serde(default)]
    pub blocked_namespaces: Vec<String>,
    #[serde(default = "default_rate_per_minute")]
    pub rate_per_minute: u32,
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    #[serde(default = "default_request_timeout_secs_ad")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_platforms")]
    pub platforms: Vec<Platform>,
    #[serde(default = "default_negative_ttl_secs")]
    pub negative_ttl_secs: u64,
}

impl Default for AutoDownloadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_namespaces: Vec::new(),
            blocked_namespaces: Vec::new(),
            rate_per_minute: default_rate_per_minute(),
            concurrency_limit: default_concurrency_limit(),
            request_timeout_secs: default_request_timeout_secs_ad(),
            platforms: default_platforms(),
            negative_ttl_secs: default_negative_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

fn default_rate_per_minute() -> u32 {
    30
}

fn default_concurrency_limit() -> usize {
    4
}

fn default_request_timeout_secs_ad() -> u64 {
    120
}

fn default_platforms() -> Vec<Platform> {
    vec![
        Platform { os: "linux".to_string(), arch: "amd64".to_string() },
        Platform { os: "darwin".to_string(), arch: "arm64".to_string() },
    ]
}

fn default_negative_ttl_secs() -> u64 {
    300
}

/// Ambient JWT-session auth configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_admin_username")]
    pub admin_username: String,
    /// JWT signing secret, loaded from environment, never from the config file.
    #[serde(skip)]
    pub jwt_secret: Option<String>,
    /// SHA-256 hex digest of the admin password, loaded from environment.
    #[serde(skip)]
    pub admin_password_hash: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl_secs(),
            admin_username: default_admin_username(),
            jwt_secret: None,
            admin_password_hash: None,
        }
    }
}

fn default_session_ttl_secs() -> u64 {
    28800
}

fn default_admin_username() -> String {
    "admin".to_string()
}

/// Ambient static asset serving configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct StaticAssetsConfig {
    pub ui_dir: Option<PathBuf>,
}

/// Settings describing this mirror's own identity
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MirrorConfig {
    #[serde(default = "default_tool_name")]
    pub tool_name: String,
    #[serde(default = "default_mirror_host")]
    pub mirror_host: String,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            tool_name: default_tool_name(),
            mirror_host: default_mirror_host(),
        }
    }
}

fn default_tool_name() -> String {
    "terraform".to_string()
}

fn default_mirror_host() -> String {
    "localhost:8080".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config {
            server: ServerConfig::default(),
            objectstore: ObjectStoreConfig::default(),
            metastore: MetaStoreConfig::default(),
            cache: CacheConfig::default(),
            upstream: UpstreamConfig::default(),
            verifier: VerifierConfig::default(),
            jobs: JobsConfig::default(),
            autodownload: AutoDownloadConfig::default(),
            auth: AuthConfig::default(),
            static_assets: StaticAssetsConfig::default(),
            mirror: MirrorConfig::default(),
        };

        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.cache.memory_bytes.as_u64(), 64 * 1024 * 1024);
        assert_eq!(config.jobs.worker_count, 4);
    }
}
