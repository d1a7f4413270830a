//! Orchestrates one artifact's trip from the upstream registry into this
//! mirror's storage and metadata layers. The only writer of provider and
//! module rows.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::metastore::{MetaStore, Module, ModuleIdentity, Provider, ProviderIdentity, StoreError};
use crate::objectstore::{self, ObjectStore};
use crate::rewriter::{ModuleRewriter, RewriteError};
use crate::upstream::{UpstreamClient, UpstreamError};
use crate::verifier::{VerifyError, Verifier};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error(transparent)]
    Rewrite(#[from] RewriteError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("metadata error: {0}")]
    Metadata(String),
}

impl PipelineError {
    /// Matches §7's retryable/permanent split: network and 5xx failures
    /// are transient, everything else (verification, parsing, 4xx,
    /// oversize) is terminal for the item.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Upstream(e) => e.is_retryable(),
            PipelineError::Storage(_) => true,
            PipelineError::Verify(_) | PipelineError::Rewrite(_) | PipelineError::Metadata(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

pub struct PipelineConfig {
    pub mirror_host: String,
    pub presign_ttl: Duration,
}

/// Coordinates `UpstreamClient`, `Verifier`, `ModuleRewriter`,
/// `ObjectStore`, and `MetaStore` for one artifact at a time. Cheap to
/// clone — every field is already an `Arc` or plain config.
#[derive(Clone)]
pub struct IngestionPipeline {
    upstream: Arc<UpstreamClient>,
    verifier: Arc<Verifier>,
    rewriter: Arc<ModuleRewriter>,
    store: Arc<dyn ObjectStore>,
    meta: MetaStore,
    config: Arc<PipelineConfig>,
}

impl IngestionPipeline {
    pub fn new(
        upstream: Arc<UpstreamClient>,
        verifier: Arc<Verifier>,
        store: Arc<dyn ObjectStore>,
        meta: MetaStore,
        config: PipelineConfig,
    ) -> Self {
        let rewriter = Arc::new(ModuleRewriter::new(config.mirror_host.clone()));
        Self {
            upstream,
            verifier,
            rewriter,
            store,
            meta,
            config: Arc::new(config),
        }
    }

    /// Ingest one provider release. Idempotent: an existing row for this
    /// identity is success without re-fetching anything.
    pub async fn ingest_provider(&self, identity: &ProviderIdentity) -> Result<Provider> {
        if let Some(existing) = self
            .meta
            .get_provider_by_identity(identity)
            .await
            .map_err(|e| PipelineError::Metadata(e.to_string()))?
        {
            info!(namespace = %identity.namespace, kind = %identity.kind, version = %identity.version, "provider already ingested");
            return Ok(existing);
        }

        let (os, arch) = identity
            .platform
            .split_once('_')
            .ok_or_else(|| PipelineError::Upstream(UpstreamError::Parse(format!("malformed platform {}", identity.platform))))?;

        let package = self
            .upstream
            .provider_package(&identity.namespace, &identity.kind, &identity.version, os, arch)
            .await?;

        let archive = self.upstream.fetch_bytes(&package.download_url).await?;
        let shasums = self.upstream.fetch_bytes(&package.shasums_url).await?;
        let shasums_text = String::from_utf8_lossy(&shasums).to_string();

        let signature = if !package.shasums_signature_url.is_empty() {
            Some(self.upstream.fetch_bytes(&package.shasums_signature_url).await?)
        } else {
            None
        };

        let verified_shasum = self.verifier.verify_provider(
            &archive,
            &package.filename,
            &package.shasum,
            &shasums_text,
            signature.as_deref(),
        )?;

        let key = objectstore::keys::provider(
            &self.config.mirror_host,
            &identity.namespace,
            &identity.kind,
            &identity.version,
            &package.filename,
        );
        self.store
            .put(&key, archive.clone())
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?;

        match self
            .meta
            .insert_provider(
                identity,
                &package.filename,
                archive.len() as i64,
                &verified_shasum,
                &key,
                &package.protocols,
            )
            .await
        {
            Ok(provider) => Ok(provider),
            Err(StoreError::Conflict(_)) => {
                // Another worker committed the same identity first; this
                // worker's upload is redundant but harmless.
                self.meta
                    .get_provider_by_identity(identity)
                    .await
                    .map_err(|e| PipelineError::Metadata(e.to_string()))?
                    .ok_or_else(|| PipelineError::Metadata("provider vanished after conflict".into()))
            }
            Err(e) => Err(PipelineError::Metadata(e.to_string())),
        }
    }

    /// Ingest one module version. Idempotent in the same way as
    /// `ingest_provider`.
    pub async fn ingest_module(&self, identity: &ModuleIdentity) -> Result<Module> {
        if let Some(existing) = self
            .meta
            .get_module_by_identity(identity)
            .await
            .map_err(|e| PipelineError::Metadata(e.to_string()))?
        {
            info!(namespace = %identity.namespace, name = %identity.name, version = %identity.version, "module already ingested");
            return Ok(existing);
        }

        let download_url = self
            .upstream
            .module_download_location(&identity.namespace, &identity.name, &identity.system, &identity.version)
            .await?;
        let raw = self.upstream.fetch_bytes(&download_url).await?;
        self.verifier.check_module_size(raw.len() as u64)?;

        let (rewritten, digest) = self.rewriter.rewrite(&raw)?;
        let filename = format!("{}-{}.zip", identity.name, identity.version);
        let key = objectstore::keys::module(&identity.namespace, &identity.name, &identity.system, &identity.version, &filename);

        self.store
            .put(&key, rewritten.clone().into())
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?;

        match self
            .meta
            .insert_module(identity, &filename, rewritten.len() as i64, &key, &download_url)
            .await
        {
            Ok(module) => {
                info!(namespace = %identity.namespace, name = %identity.name, digest, "module ingested");
                Ok(module)
            }
            Err(StoreError::Conflict(_)) => self
                .meta
                .get_module_by_identity(identity)
                .await
                .map_err(|e| PipelineError::Metadata(e.to_string()))?
                .ok_or_else(|| PipelineError::Metadata("module vanished after conflict".into())),
            Err(e) => Err(PipelineError::Metadata(e.to_string())),
        }
    }

    pub async fn presign(&self, key: &str) -> Result<String> {
        self.store
            .presign_get(key, self.config.presign_ttl)
            .await
            .map_err(|e| {
                warn!(key, error = %e, "presign failed");
                PipelineError::Storage(e.to_string())
            })
    }
}
