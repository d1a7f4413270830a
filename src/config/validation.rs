use super::models::{Config, ObjectStoreProvider};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("object store provider is s3 but missing credentials (access_key or secret_key)")]
    MissingS3Credentials,

    #[error("cache memory_bytes must be positive")]
    InvalidMemoryBytes,

    #[error("cache disk_bytes must be positive")]
    InvalidDiskBytes,

    #[error("jobs.worker_count must be at least 1")]
    InvalidWorkerCount,

    #[error("jobs.max_concurrent_jobs must be at least 1")]
    InvalidMaxConcurrentJobs,

    #[error("verifier.gpg_enabled is set but no trusted_keys_path is configured")]
    MissingTrustedKeysPath,

    #[error("autodownload.rate_per_minute must be positive when autodownload is enabled")]
    InvalidAutoDownloadRate,

    #[error("mirror.mirror_host must not be empty")]
    EmptyMirrorHost,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_objectstore(config)?;
    validate_cache(config)?;
    validate_jobs(config)?;
    validate_verifier(config)?;
    validate_autodownload(config)?;
    validate_mirror(config)?;
    Ok(())
}

fn validate_objectstore(config: &Config) -> Result<(), ValidationError> {
    if config.objectstore.provider == ObjectStoreProvider::S3
        && (config.objectstore.access_key.is_none() || config.objectstore.secret_key.is_none())
    {
        return Err(ValidationError::MissingS3Credentials);
    }
    Ok(())
}

fn validate_cache(config: &Config) -> Result<(), ValidationError> {
    if config.cache.memory_bytes.as_u64() == 0 {
        return Err(ValidationError::InvalidMemoryBytes);
    }
    if config.cache.disk_bytes.as_u64() == 0 {
        return Err(ValidationError::InvalidDiskBytes);
    }
    Ok(())
}

fn validate_jobs(config: &Config) -> Result<(), ValidationError> {
    if config.jobs.worker_count == 0 {
        return Err(ValidationError::InvalidWorkerCount);
    }
    if config.jobs.max_concurrent_jobs == 0 {
        return Err(ValidationError::InvalidMaxConcurrentJobs);
    }
    Ok(())
}

fn validate_verifier(config: &Config) -> Result<(), ValidationError> {
    if config.verifier.gpg_enabled && config.verifier.trusted_keys_path.is_none() {
        return Err(ValidationError::MissingTrustedKeysPath);
    }
    Ok(())
}

fn validate_autodownload(config: &Config) -> Result<(), ValidationError> {
    if config.autodownload.enabled && config.autodownload.rate_per_minute == 0 {
        return Err(ValidationError::InvalidAutoDownloadRate);
    }
    Ok(())
}

fn validate_mirror(config: &Config) -> Result<(), ValidationError> {
    if config.mirror.mirror_host.trim().is_empty() {
        return Err(ValidationError::EmptyMirrorHost);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::models::*;
    use super::*;

    fn test_config() -> Config {
        Config {
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
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&test_config()).is_ok());
    }

    #[test]
    fn test_s3_missing_credentials() {
        let mut config = test_config();
        config.objectstore.provider = ObjectStoreProvider::S3;
        let result = validate(&config);
        assert!(matches!(result, Err(ValidationError::MissingS3Credentials)));
    }

    #[test]
    fn test_s3_with_credentials_ok() {
        let mut config = test_config();
        config.objectstore.provider = ObjectStoreProvider::S3;
        config.objectstore.access_key = Some("key".to_string());
        config.objectstore.secret_key = Some("secret".to_string());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_memory_bytes() {
        let mut config = test_config();
        config.cache.memory_bytes = ByteSize(0);
        assert!(matches!(validate(&config), Err(ValidationError::InvalidMemoryBytes)));
    }

    #[test]
    fn test_zero_worker_count() {
        let mut config = test_config();
        config.jobs.worker_count = 0;
        assert!(matches!(validate(&config), Err(ValidationError::InvalidWorkerCount)));
    }

    #[test]
    fn test_gpg_requires_trusted_keys() {
        let mut config = test_config();
        config.verifier.gpg_enabled = true;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::MissingTrustedKeysPath)
        ));
    }

    #[test]
    fn test_autodownload_zero_rate() {
        let mut config = test_config();
        config.autodownload.enabled = true;
        config.autodownload.rate_per_minute = 0;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidAutoDownloadRate)
        ));
    }

    #[test]
    fn test_empty_mirror_host() {
        let mut config = test_config();
        config.mirror.mirror_host = "  ".to_string();
        assert!(matches!(validate(&config), Err(ValidationError::EmptyMirrorHost)));
    }
}
