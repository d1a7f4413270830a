use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "TFMIRROR_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/tfmirror.toml";
const ENV_PREFIX: &str = "TFMIRROR";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from a `.env` file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = load_from_sources(config_path)?;
    load_secrets(&mut config);
    Ok(config)
}

/// Load secrets from environment variables into config. Secrets never live
/// in TOML files, only in the process environment.
fn load_secrets(config: &mut Config) {
    if let Ok(access_key) = env::var("TFMIRROR_S3_ACCESS_KEY") {
        config.objectstore.access_key = Some(access_key);
    }
    if let Ok(secret_key) = env::var("TFMIRROR_S3_SECRET_KEY") {
        config.objectstore.secret_key = Some(secret_key);
    }
    if config.objectstore.access_key.is_none() {
        if let Ok(access_key) = env::var("AWS_ACCESS_KEY_ID") {
            config.objectstore.access_key = Some(access_key);
        }
    }
    if config.objectstore.secret_key.is_none() {
        if let Ok(secret_key) = env::var("AWS_SECRET_ACCESS_KEY") {
            config.objectstore.secret_key = Some(secret_key);
        }
    }

    if let Ok(secret) = env::var("TFMIRROR_PRESIGN_SECRET") {
        config.objectstore.presign_secret = Some(secret);
    }
    if let Ok(secret) = env::var("TFMIRROR_JWT_SECRET") {
        config.auth.jwt_secret = Some(secret);
    }
    if let Ok(hash) = env::var("TFMIRROR_ADMIN_PASSWORD_HASH") {
        config.auth.admin_password_hash = Some(hash);
    }
}

/// Load configuration from a specific path and environment. Useful for
/// testing with custom config files.
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // TFMIRROR__SERVER__BIND_ADDR -> server.bind_addr
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "127.0.0.1:9000"

[cache]
memory_bytes = "10MB"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.cache.memory_bytes.as_u64(), 10 * 1024 * 1024);
    }

    #[test]
    fn test_full_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "0.0.0.0:8080"

[objectstore]
provider = "s3"
bucket = "tfmirror-prod"
region = "us-east-1"

[metastore]
db_path = "data/prod.db"

[cache]
memory_bytes = "128MB"
disk_bytes = "10GB"

[jobs]
worker_count = 8
retry_max = 5

[autodownload]
enabled = true
rate_per_minute = 60

[verifier]
gpg_enabled = true

[mirror]
mirror_host = "mirror.example.com"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.objectstore.bucket, "tfmirror-prod");
        assert_eq!(config.cache.disk_bytes.as_u64(), 10 * 1024 * 1024 * 1024);
        assert_eq!(config.jobs.worker_count, 8);
        assert!(config.autodownload.enabled);
        assert!(config.verifier.gpg_enabled);
        assert_eq!(config.mirror.mirror_host, "mirror.example.com");
    }
}
