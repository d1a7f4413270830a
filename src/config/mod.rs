//! Configuration management
//!
//! Layered configuration loaded from, in priority order (lowest to highest):
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (`TFMIRROR__SECTION__KEY`)
//!
//! # Usage
//!
//! ```no_run
//! use tfmirror::config::Config;
//!
//! let config = Config::load().expect("failed to load configuration");
//! println!("server listening on: {}", config.server.bind_addr);
//! ```
//!
//! By default, configuration is loaded from `config/tfmirror.toml`. This can
//! be overridden with the `TFMIRROR_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{
    AuthConfig, AutoDownloadConfig, BackupConfig, CacheConfig, Config, JobsConfig, MetaStoreConfig,
    MirrorConfig, ObjectStoreConfig, ObjectStoreProvider, Platform, ServerConfig,
    StaticAssetsConfig, UpstreamConfig, VerifierConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment).
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path. Useful for testing with
    /// custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "127.0.0.1:9000"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "127.0.0.1:9000");
    }

    #[test]
    fn test_validation_runs_on_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[jobs]
worker_count = 0
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result,
            Err(ConfigError::ValidationError(ValidationError::InvalidWorkerCount))
        ));
    }
}
