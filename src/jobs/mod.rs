//! Durable job queue worker pool: polls `MetaStore::claim_next`, dispatches
//! each claimed item to `IngestionPipeline`, and classifies failures as
//! retryable or permanent per the error-handling policy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::metastore::{
    Job, JobItem, JobKind, JobStatus, MetaStore, ModuleIdentity, NewJobItem, ProviderIdentity, StoreError,
};
use crate::observability::Metrics;
use crate::pipeline::IngestionPipeline;

#[derive(Debug, Clone)]
pub struct JobsConfig {
    pub worker_count: usize,
    pub poll_interval: Duration,
    pub max_concurrent_jobs: usize,
    pub retry_max: u32,
    pub retry_delay: Duration,
    pub shutdown_grace: Duration,
}

/// Worker pool driving the job state machine
/// `pending -> running -> {completed, failed, cancelled}`.
pub struct JobProcessor {
    meta: MetaStore,
    pipeline: IngestionPipeline,
    config: JobsConfig,
    job_slots: Arc<Semaphore>,
    cancellations: Arc<std::sync::Mutex<std::collections::HashMap<String, CancellationToken>>>,
    shutdown: CancellationToken,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
    metrics: Arc<Metrics>,
}

impl JobProcessor {
    pub fn new(meta: MetaStore, pipeline: IngestionPipeline, config: JobsConfig) -> Arc<Self> {
        Self::with_metrics(meta, pipeline, config, Arc::new(Metrics::new()))
    }

    pub fn with_metrics(meta: MetaStore, pipeline: IngestionPipeline, config: JobsConfig, metrics: Arc<Metrics>) -> Arc<Self> {
        Arc::new(Self {
            meta,
            pipeline,
            job_slots: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
            cancellations: Arc::new(std::sync::Mutex::new(std::collections::HashMap::new())),
            shutdown: CancellationToken::new(),
            workers: std::sync::Mutex::new(Vec::new()),
            config,
            stopped: AtomicBool::new(false),
            metrics,
        })
    }

    /// Create a job from an uploaded provider/module manifest and its
    /// resolved item list.
    pub async fn enqueue(&self, kind: JobKind, manifest: &str, items: Vec<NewJobItem>) -> Result<Job, StoreError> {
        let job = self.meta.create_job(kind, manifest, items).await?;
        info!(job_id = %job.id, kind = kind.as_str(), total = job.total_items, "job enqueued");
        Ok(job)
    }

    pub async fn retry(&self, job_id: &str) -> Result<Job, StoreError> {
        self.meta.retry_job(job_id).await
    }

    /// Mark a job cancelled and signal any worker currently holding one
    /// of its items to abandon the in-flight fetch.
    pub async fn cancel(&self, job_id: &str) -> Result<Job, StoreError> {
        let job = self.meta.cancel_job(job_id).await?;
        if let Some(token) = self.cancellations.lock().expect("cancellations mutex poisoned").get(job_id) {
            token.cancel();
        }
        Ok(job)
    }

    /// Start the configured number of polling workers. Returns
    /// immediately; workers run until `shutdown` is called.
    pub fn spawn(self: &Arc<Self>) {
        let mut workers = self.workers.lock().expect("workers mutex poisoned");
        for index in 0..self.config.worker_count {
            let processor = Arc::clone(self);
            let worker_id = format!("worker-{index}-{}", Uuid::new_v4());
            workers.push(tokio::spawn(async move {
                processor.run_worker(worker_id).await;
            }));
        }
        info!(workers = self.config.worker_count, "job processor started");
    }

    async fn run_worker(self: Arc<Self>, worker_id: String) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!(worker_id, "worker stopping on shutdown signal");
                    return;
                }
                _ = ticker.tick() => {
                    self.poll_once(&worker_id).await;
                }
            }
        }
    }

    async fn poll_once(&self, worker_id: &str) {
        let Some(permit) = self.job_slots.clone().try_acquire_owned().ok() else {
            return;
        };

        match self.meta.claim_next(worker_id).await {
            Ok(Some((job, item))) => {
                self.process_item(job, item).await;
            }
            Ok(None) => {}
            Err(e) => warn!(worker_id, error = %e, "claim_next failed"),
        }
        drop(permit);
    }

    async fn process_item(&self, job: Job, item: JobItem) {
        let token = {
            let mut guard = self.cancellations.lock().expect("cancellations mutex poisoned");
            guard.entry(job.id.clone()).or_insert_with(CancellationToken::new).clone()
        };

        let outcome = tokio::select! {
            result = self.run_item(&job, &item) => result,
            _ = token.cancelled() => {
                info!(job_id = %job.id, item_id = %item.id, "item abandoned due to job cancellation");
                return;
            }
        };

        match outcome {
            Ok(artifact_id) => match self.meta.complete_item(&item.id, &artifact_id).await {
                Ok(updated_job) => self.record_terminal(&updated_job),
                Err(e) => warn!(item_id = %item.id, error = %e, "failed to record item completion"),
            },
            Err((message, retryable)) => {
                warn!(item_id = %item.id, error = %message, retryable, "item failed");
                match self
                    .meta
                    .fail_item(&item.id, &message, retryable, self.config.retry_max, self.config.retry_delay)
                    .await
                {
                    Ok(updated_job) => self.record_terminal(&updated_job),
                    Err(e) => warn!(item_id = %item.id, error = %e, "failed to record item failure"),
                }
            }
        }
    }

    /// Bump the ambient job-level counters exactly once, at the item
    /// transition that actually carries the job into a terminal state.
    fn record_terminal(&self, job: &Job) {
        match job.status {
            JobStatus::Completed => self.metrics.job_completed(),
            JobStatus::Failed => self.metrics.job_failed(),
            _ => {}
        }
    }

    async fn run_item(&self, job: &Job, item: &JobItem) -> Result<String, (String, bool)> {
        match job.kind {
            JobKind::Provider => {
                let identity = ProviderIdentity {
                    namespace: item.namespace.clone(),
                    kind: item.item_name.clone(),
                    version: item.version.clone(),
                    platform: item.system_or_platform.clone(),
                };
                self.pipeline
                    .ingest_provider(&identity)
                    .await
                    .map(|p| p.id)
                    .map_err(|e| (e.to_string(), e.is_retryable()))
            }
            JobKind::Module => {
                let identity = ModuleIdentity {
                    namespace: item.namespace.clone(),
                    name: item.item_name.clone(),
                    system: item.system_or_platform.clone(),
                    version: item.version.clone(),
                };
                self.pipeline
                    .ingest_module(&identity)
                    .await
                    .map(|m| m.id)
                    .map_err(|e| (e.to_string(), e.is_retryable()))
            }
        }
    }

    /// Stop accepting new item claims and wait up to `shutdown_grace` for
    /// in-flight items to finish before returning.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();
        let handles: Vec<_> = self.workers.lock().expect("workers mutex poisoned").drain(..).collect();
        let wait = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(self.config.shutdown_grace, wait).await.is_err() {
            warn!("job processor shutdown grace period elapsed with workers still running");
        }
        info!("job processor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objectstore::LocalStore;
    use crate::pipeline::PipelineConfig;
    use crate::upstream::{UpstreamClient, UpstreamClientConfig};
    use crate::verifier::{Verifier, VerifierConfig};

    fn jobs_config() -> JobsConfig {
        JobsConfig {
            worker_count: 1,
            poll_interval: Duration::from_millis(5),
            max_concurrent_jobs: 2,
            retry_max: 1,
            retry_delay: Duration::from_millis(1),
            shutdown_grace: Duration::from_secs(1),
        }
    }

    async fn test_pipeline(dir: &std::path::Path) -> (MetaStore, IngestionPipeline) {
        let meta = MetaStore::connect_in_memory().await.unwrap();
        let store = Arc::new(LocalStore::new(dir.to_path_buf(), b"secret".to_vec(), "http://localhost"));
        let upstream = Arc::new(
            UpstreamClient::new(UpstreamClientConfig {
                provider_registry_base: "http://127.0.0.1:1".into(),
                module_registry_base: "http://127.0.0.1:1".into(),
                connect_timeout: Duration::from_millis(50),
                request_timeout: Duration::from_millis(50),
                max_retries: 0,
                retry_backoff: Duration::from_millis(1),
                max_download_size: 1024 * 1024,
                user_agent: "tfmirror-test".into(),
            })
            .unwrap(),
        );
        let verifier = Arc::new(Verifier::new(VerifierConfig {
            gpg_enabled: false,
            trusted_keys: Vec::new(),
            max_module_size: 1024 * 1024,
        }));
        let pipeline = IngestionPipeline::new(
            upstream,
            verifier,
            store,
            meta.clone(),
            PipelineConfig {
                mirror_host: "mirror.local".into(),
                presign_ttl: Duration::from_secs(60),
            },
        );
        (meta, pipeline)
    }

    #[tokio::test]
    async fn test_cancel_job_signals_worker() {
        let dir = tempfile::tempdir().unwrap();
        let (meta, pipeline) = test_pipeline(dir.path()).await;
        let processor = JobProcessor::new(meta.clone(), pipeline, jobs_config());

        let job = processor
            .enqueue(
                JobKind::Provider,
                "manifest",
                vec![NewJobItem {
                    namespace: "acme".into(),
                    item_name: "foo".into(),
                    system_or_platform: "linux_amd64".into(),
                    version: "1.0.0".into(),
                }],
            )
            .await
            .unwrap();

        let cancelled = processor.cancel(&job.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_zero_item_job_enqueues_completed() {
        let dir = tempfile::tempdir().unwrap();
        let (meta, pipeline) = test_pipeline(dir.path()).await;
        let processor = JobProcessor::new(meta, pipeline, jobs_config());
        let job = processor.enqueue(JobKind::Provider, "manifest", vec![]).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_worker_claims_and_fails_unreachable_upstream() {
        let dir = tempfile::tempdir().unwrap();
        let (meta, pipeline) = test_pipeline(dir.path()).await;
        let processor = JobProcessor::new(meta.clone(), pipeline, jobs_config());

        let job = processor
            .enqueue(
                JobKind::Provider,
                "manifest",
                vec![NewJobItem {
                    namespace: "acme".into(),
                    item_name: "foo".into(),
                    system_or_platform: "linux_amd64".into(),
                    version: "1.0.0".into(),
                }],
            )
            .await
            .unwrap();

        processor.spawn();
        let mut finished = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let current = meta.get_job(&job.id).await.unwrap().unwrap();
            if current.status.is_terminal() {
                finished = Some(current);
                break;
            }
        }
        processor.shutdown().await;

        let finished = finished.expect("job should reach a terminal state");
        assert_eq!(finished.status, JobStatus::Failed);
    }
}
