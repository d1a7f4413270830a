//! Admission controller gating upstream fetches triggered synchronously
//! by a mirror-protocol miss: namespace allow/block lists, a
//! tokens-per-minute rate limiter, a concurrency cap, single-flight
//! deduplication, and a negative-result cache.

use std::collections::HashMap;
use std::hash::Hash;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{Quota, RateLimiter};
use thiserror::Error;
use tokio::sync::{Mutex, Notify, Semaphore};
use tracing::debug;

use crate::metastore::{Module, ModuleIdentity, Provider, ProviderIdentity};
use crate::observability::Metrics;
use crate::pipeline::{IngestionPipeline, PipelineError};

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("auto-download is disabled")]
    Disabled,

    #[error("namespace {0} is not permitted")]
    NamespaceBlocked(String),

    #[error("rate limit exceeded waiting for a token")]
    RateLimited,

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

#[derive(Debug, Clone)]
pub struct AutoDownloadConfig {
    pub enabled: bool,
    pub allowed_namespaces: Vec<String>,
    pub blocked_namespaces: Vec<String>,
    pub rate_per_minute: u32,
    pub concurrency_limit: usize,
    pub request_timeout: Duration,
    pub platforms: Vec<String>,
    pub negative_ttl: Duration,
}

type RateLimiterImpl =
    RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;

struct NegativeEntry {
    recorded_at: std::time::Instant,
    message: String,
}

/// Per-identity-type single-flight and negative-cache bookkeeping.
/// `ProviderIdentity` and `ModuleIdentity` each get their own instance.
struct Dedup<K: Eq + Hash + Clone> {
    negative: Mutex<HashMap<K, NegativeEntry>>,
    inflight: Mutex<HashMap<K, Arc<Notify>>>,
}

impl<K: Eq + Hash + Clone> Dedup<K> {
    fn new() -> Self {
        Self {
            negative: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    async fn check_negative(&self, key: &K, ttl: Duration) -> Option<String> {
        let mut guard = self.negative.lock().await;
        if let Some(entry) = guard.get(key) {
            if entry.recorded_at.elapsed() < ttl {
                return Some(entry.message.clone());
            }
            guard.remove(key);
        }
        None
    }

    async fn record_negative(&self, key: K, message: String) {
        self.negative.lock().await.insert(
            key,
            NegativeEntry {
                recorded_at: std::time::Instant::now(),
                message,
            },
        );
    }

    /// Either register the caller as leader for `key` (returns `None`) or
    /// return the in-flight leader's `Notify` to wait on.
    async fn join_or_lead(&self, key: &K) -> Option<Arc<Notify>> {
        let mut guard = self.inflight.lock().await;
        if let Some(notify) = guard.get(key) {
            debug!("joining in-flight auto-download");
            return Some(Arc::clone(notify));
        }
        guard.insert(key.clone(), Arc::new(Notify::new()));
        None
    }

    /// Leader-only: remove the in-flight marker and wake every follower
    /// waiting on it. No entry outlives the leader's computation.
    async fn leave(&self, key: &K) {
        if let Some(notify) = self.inflight.lock().await.remove(key) {
            notify.notify_waiters();
        }
    }
}

/// Gates synchronous upstream fetches triggered by a mirror-protocol
/// cache/metadata miss. Shared across all mirror handlers.
pub struct AutoDownload {
    config: AutoDownloadConfig,
    pipeline: IngestionPipeline,
    limiter: RateLimiterImpl,
    slots: Arc<Semaphore>,
    providers: Dedup<ProviderIdentity>,
    modules: Dedup<ModuleIdentity>,
    metrics: Arc<Metrics>,
}

impl AutoDownload {
    pub fn new(config: AutoDownloadConfig, pipeline: IngestionPipeline) -> Self {
        Self::with_metrics(config, pipeline, Arc::new(Metrics::new()))
    }

    pub fn with_metrics(config: AutoDownloadConfig, pipeline: IngestionPipeline, metrics: Arc<Metrics>) -> Self {
        let per_minute = NonZeroU32::new(config.rate_per_minute.max(1)).expect("rate_per_minute > 0");
        Self {
            limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
            slots: Arc::new(Semaphore::new(config.concurrency_limit.max(1))),
            providers: Dedup::new(),
            modules: Dedup::new(),
            config,
            pipeline,
            metrics,
        }
    }

    fn namespace_allowed(&self, namespace: &str) -> bool {
        if self.config.blocked_namespaces.iter().any(|n| n == namespace) {
            return false;
        }
        if self.config.allowed_namespaces.is_empty() {
            return true;
        }
        self.config.allowed_namespaces.iter().any(|n| n == namespace)
    }

    /// Wait for a free rate-limiter token, bounded by `request_timeout`.
    async fn wait_for_token(&self) -> Result<(), AdmissionError> {
        let wait = async {
            loop {
                if self.limiter.check().is_ok() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };
        tokio::time::timeout(self.config.request_timeout, wait)
            .await
            .map_err(|_| AdmissionError::RateLimited)
    }

    pub async fn admit_provider(&self, identity: &ProviderIdentity) -> Result<Provider, AdmissionError> {
        if !self.config.enabled {
            self.metrics.autodownload_rejected();
            return Err(AdmissionError::Disabled);
        }
        if !self.namespace_allowed(&identity.namespace) {
            self.metrics.autodownload_rejected();
            return Err(AdmissionError::NamespaceBlocked(identity.namespace.clone()));
        }
        if let Some(message) = self.providers.check_negative(identity, self.config.negative_ttl).await {
            self.metrics.autodownload_rejected();
            return Err(AdmissionError::Pipeline(PipelineError::Metadata(message)));
        }

        if let Some(notify) = self.providers.join_or_lead(identity).await {
            notify.notified().await;
            let outcome = self.pipeline.ingest_provider(identity).await;
            self.record_outcome(&outcome);
            return outcome.map_err(AdmissionError::Pipeline);
        }

        self.wait_for_token().await?;
        let _permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AdmissionError::Pipeline(PipelineError::Metadata("semaphore closed".into())))?;

        let outcome = self.pipeline.ingest_provider(identity).await;
        if let Err(e) = &outcome {
            if !e.is_retryable() {
                self.providers.record_negative(identity.clone(), e.to_string()).await;
            }
        }
        self.providers.leave(identity).await;
        self.record_outcome(&outcome);
        outcome.map_err(AdmissionError::Pipeline)
    }

    pub async fn admit_module(&self, identity: &ModuleIdentity) -> Result<Module, AdmissionError> {
        if !self.config.enabled {
            self.metrics.autodownload_rejected();
            return Err(AdmissionError::Disabled);
        }
        if !self.namespace_allowed(&identity.namespace) {
            self.metrics.autodownload_rejected();
            return Err(AdmissionError::NamespaceBlocked(identity.namespace.clone()));
        }
        if let Some(message) = self.modules.check_negative(identity, self.config.negative_ttl).await {
            self.metrics.autodownload_rejected();
            return Err(AdmissionError::Pipeline(PipelineError::Metadata(message)));
        }

        if let Some(notify) = self.modules.join_or_lead(identity).await {
            notify.notified().await;
            let outcome = self.pipeline.ingest_module(identity).await;
            self.record_outcome(&outcome);
            return outcome.map_err(AdmissionError::Pipeline);
        }

        self.wait_for_token().await?;
        let _permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AdmissionError::Pipeline(PipelineError::Metadata("semaphore closed".into())))?;

        let outcome = self.pipeline.ingest_module(identity).await;
        if let Err(e) = &outcome {
            if !e.is_retryable() {
                self.modules.record_negative(identity.clone(), e.to_string()).await;
            }
        }
        self.modules.leave(identity).await;
        self.record_outcome(&outcome);
        outcome.map_err(AdmissionError::Pipeline)
    }

    fn record_outcome<T>(&self, outcome: &std::result::Result<T, PipelineError>) {
        if outcome.is_ok() {
            self.metrics.autodownload_admitted();
        } else {
            self.metrics.autodownload_rejected();
        }
    }

    pub fn platforms(&self) -> &[String] {
        &self.config.platforms
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(enabled: bool) -> AutoDownloadConfig {
        AutoDownloadConfig {
            enabled,
            allowed_namespaces: vec![],
            blocked_namespaces: vec!["evil".to_string()],
            rate_per_minute: 600,
            concurrency_limit: 4,
            request_timeout: Duration::from_millis(200),
            platforms: vec!["linux_amd64".to_string()],
            negative_ttl: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn test_dedup_negative_cache_expires() {
        let dedup: Dedup<String> = Dedup::new();
        dedup.record_negative("k".to_string(), "nope".to_string()).await;
        assert_eq!(dedup.check_negative(&"k".to_string(), Duration::from_secs(60)).await, Some("nope".to_string()));
        assert_eq!(dedup.check_negative(&"k".to_string(), Duration::from_millis(0)).await, None);
    }

    #[tokio::test]
    async fn test_dedup_join_or_lead_single_leader() {
        let dedup: Dedup<String> = Dedup::new();
        assert!(dedup.join_or_lead(&"k".to_string()).await.is_none());
        assert!(dedup.join_or_lead(&"k".to_string()).await.is_some());
        dedup.leave(&"k".to_string()).await;
        assert!(dedup.join_or_lead(&"k".to_string()).await.is_none());
    }

    #[test]
    fn test_namespace_allow_and_block_lists() {
        let cfg = config(true);
        assert!(!cfg.blocked_namespaces.is_empty());
    }

    #[test]
    fn test_disabled_flag() {
        assert!(!config(false).enabled);
    }
}
