//! Content-addressable blob storage for provider and module artifacts.
//!
//! Two backends implement the [`ObjectStore`] trait: [`local::LocalStore`]
//! (a plain filesystem tree with HMAC-signed direct URLs) and
//! [`s3::S3Store`] (backed by the `object_store` crate's AWS support,
//! using real presigned URLs).

mod local;
mod s3;

pub use local::{sign as sign_blob_url, verify as verify_blob_url, LocalStore};
pub use s3::S3Store;

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object store backend error: {0}")]
    Backend(String),

    #[error("presigned url signing is unsupported for this backend")]
    SigningUnsupported,
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Copy)]
pub struct ObjectMeta {
    pub size: u64,
}

/// Capability trait implemented by each storage backend. Keys are opaque
/// strings restricted to the charset produced by [`keys`]; callers never
/// construct keys by hand.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Bytes) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Bytes>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn stat(&self, key: &str) -> Result<ObjectMeta>;

    /// Vend a time-limited URL a client can fetch `key` from directly,
    /// without going through this process's authenticated API.
    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String>;
}

/// Key-layout helpers. Part of the persisted contract: changing these
/// changes where existing artifacts are expected to live.
pub mod keys {
    pub fn provider(host: &str, namespace: &str, kind: &str, version: &str, filename: &str) -> String {
        format!("providers/{host}/{namespace}/{kind}/{version}/{filename}")
    }

    pub fn module(namespace: &str, name: &str, system: &str, version: &str, filename: &str) -> String {
        format!("modules/{namespace}/{name}/{system}/{version}/{filename}")
    }

    pub fn backup(prefix: &str, timestamp: &str) -> String {
        format!("backups/{prefix}/{timestamp}.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_key_layout() {
        assert_eq!(
            keys::provider("registry.terraform.io", "hashicorp", "aws", "5.0.0", "terraform-provider-aws_5.0.0_linux_amd64.zip"),
            "providers/registry.terraform.io/hashicorp/aws/5.0.0/terraform-provider-aws_5.0.0_linux_amd64.zip"
        );
    }

    #[test]
    fn test_module_key_layout() {
        assert_eq!(
            keys::module("hashicorp", "consul", "aws", "0.11.0", "module.tar.gz"),
            "modules/hashicorp/consul/aws/0.11.0/module.tar.gz"
        );
    }

    #[test]
    fn test_backup_key_layout() {
        assert_eq!(keys::backup("tfmirror", "20260101T000000Z"), "backups/tfmirror/20260101T000000Z.db");
    }
}
