use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, patch, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::Auth;
use crate::autodownload::{AutoDownload, AutoDownloadConfig};
use crate::cache::{Cache, CacheConfig};
use crate::config::{Config, ObjectStoreProvider};
use crate::jobs::{JobProcessor, JobsConfig};
use crate::metastore::MetaStore;
use crate::objectstore::{LocalStore, ObjectStore, S3Store};
use crate::observability::Metrics;
use crate::pipeline::{IngestionPipeline, PipelineConfig};
use crate::upstream::{UpstreamClient, UpstreamClientConfig};
use crate::verifier::{Verifier, VerifierConfig};

use super::state::AppState;
use super::{admin, auth_handlers, blobs, discovery, middleware, registry};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub async fn run(address: Option<SocketAddr>) -> Result<(), AnyError> {
    info!("loading configuration");
    let config = Config::load().map_err(|e| format!("failed to load config: {e}"))?;
    let bind_addr = address.unwrap_or(config.server.bind_addr);

    let meta = MetaStore::connect(&config.metastore.db_path, config.metastore.max_connections).await?;
    let metrics = Arc::new(Metrics::new());

    let presign_secret = config
        .objectstore
        .presign_secret
        .clone()
        .unwrap_or_else(|| "insecure-dev-presign-secret".to_string());

    let store: Arc<dyn ObjectStore> = match config.objectstore.provider {
        ObjectStoreProvider::Local => Arc::new(LocalStore::new(
            config.objectstore.local_root.clone(),
            presign_secret.clone().into_bytes(),
            format!("http://{bind_addr}"),
        )),
        ObjectStoreProvider::S3 => Arc::new(S3Store::new(
            &config.objectstore.bucket,
            config.objectstore.region.as_deref(),
            config.objectstore.endpoint.as_deref(),
            config.objectstore.access_key.as_deref(),
            config.objectstore.secret_key.as_deref(),
        )?),
    };

    crate::cache::ensure_disk_dir(&config.cache.disk_path)?;
    let cache = Arc::new(Cache::open(CacheConfig {
        memory_bytes: config.cache.memory_bytes.as_u64(),
        disk_bytes: config.cache.disk_bytes.as_u64(),
        disk_path: config.cache.disk_path.clone(),
        default_ttl: std::time::Duration::from_secs(config.cache.default_ttl_secs),
        sweep_interval: std::time::Duration::from_secs(config.cache.sweep_interval_secs),
        metrics: Arc::clone(&metrics),
    })?);
    cache.spawn_sweeper(std::time::Duration::from_secs(config.cache.sweep_interval_secs));

    let upstream = Arc::new(UpstreamClient::with_metrics(
        UpstreamClientConfig {
            provider_registry_base: config.upstream.provider_registry_base.clone(),
            module_registry_base: config.upstream.module_registry_base.clone(),
            connect_timeout: std::time::Duration::from_secs(config.upstream.connect_timeout_secs),
            request_timeout: std::time::Duration::from_secs(config.upstream.request_timeout_secs),
            max_retries: config.upstream.max_retries,
            retry_backoff: std::time::Duration::from_millis(config.upstream.retry_backoff_ms),
            max_download_size: config.upstream.max_download_size.as_u64(),
            user_agent: config.upstream.user_agent.clone(),
        },
        Arc::clone(&metrics),
    )?);

    let trusted_keys = load_trusted_keys(config.verifier.trusted_keys_path.as_deref())?;
    let verifier = Arc::new(Verifier::new(VerifierConfig {
        gpg_enabled: config.verifier.gpg_enabled,
        trusted_keys,
        max_module_size: config.verifier.max_module_size.as_u64(),
    }));

    let pipeline = IngestionPipeline::new(
        Arc::clone(&upstream),
        Arc::clone(&verifier),
        Arc::clone(&store),
        meta.clone(),
        PipelineConfig {
            mirror_host: config.mirror.mirror_host.clone(),
            presign_ttl: std::time::Duration::from_secs(config.objectstore.presign_ttl_secs),
        },
    );

    let platforms = config
        .autodownload
        .platforms
        .iter()
        .map(|p| format!("{}_{}", p.os, p.arch))
        .collect();

    let autodownload = Arc::new(AutoDownload::with_metrics(
        AutoDownloadConfig {
            enabled: config.autodownload.enabled,
            allowed_namespaces: config.autodownload.allowed_namespaces.clone(),
            blocked_namespaces: config.autodownload.blocked_namespaces.clone(),
            rate_per_minute: config.autodownload.rate_per_minute,
            concurrency_limit: config.autodownload.concurrency_limit,
            request_timeout: std::time::Duration::from_secs(config.autodownload.request_timeout_secs),
            platforms,
            negative_ttl: std::time::Duration::from_secs(config.autodownload.negative_ttl_secs),
        },
        pipeline.clone(),
        Arc::clone(&metrics),
    ));

    let jobs = JobProcessor::with_metrics(
        meta.clone(),
        pipeline.clone(),
        JobsConfig {
            worker_count: config.jobs.worker_count,
            poll_interval: std::time::Duration::from_millis(config.jobs.poll_interval_ms),
            max_concurrent_jobs: config.jobs.max_concurrent_jobs,
            retry_max: config.jobs.retry_max,
            retry_delay: std::time::Duration::from_millis(config.jobs.retry_delay_ms),
            shutdown_grace: std::time::Duration::from_secs(config.jobs.shutdown_grace_secs),
        },
        Arc::clone(&metrics),
    );
    jobs.spawn();

    if config.metastore.backup.enabled {
        spawn_backup_task(meta.clone(), Arc::clone(&store), config.metastore.clone());
    }

    let jwt_secret = config
        .auth
        .jwt_secret
        .clone()
        .unwrap_or_else(|| "insecure-dev-jwt-secret".to_string());
    let admin_password_hash = config.auth.admin_password_hash.clone().unwrap_or_default();
    let auth = Auth::new(
        meta.clone(),
        jwt_secret,
        config.auth.admin_username.clone(),
        admin_password_hash,
        std::time::Duration::from_secs(config.auth.session_ttl_secs),
    );

    let state = AppState {
        meta,
        store,
        cache,
        pipeline,
        upstream,
        autodownload,
        jobs: Arc::clone(&jobs),
        auth,
        metrics,
        tool_name: config.mirror.tool_name.clone(),
        mirror_host: config.mirror.mirror_host.clone(),
        ui_dir: config.static_assets.ui_dir.clone(),
        version: env!("CARGO_PKG_VERSION"),
        blob_signing_secret: Arc::from(presign_secret.as_str()),
    };

    let app = build_router(state.clone());

    let listener = TcpListener::bind(bind_addr).await?;
    info!(address = %bind_addr, "mirror listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.jobs.shutdown().await;
    state.cache.close().await;

    Ok(())
}

/// Assemble the full route tree: public mirror/registry endpoints, blob
/// serving, admin login, and the bearer-gated admin subtree. Split out
/// from `run` so integration tests can exercise the same router without
/// binding a socket or reading process configuration.
pub(crate) fn build_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/providers/{namespace}/{kind}/{version}/{platform}", patch(admin::patch_provider).delete(admin::delete_provider))
        .route("/modules/{namespace}/{name}/{system}/{version}", patch(admin::patch_module).delete(admin::delete_module))
        .route("/jobs", post(admin::create_job))
        .route("/jobs/{job_id}", get(admin::get_job))
        .route("/jobs/{job_id}/retry", post(admin::retry_job))
        .route("/jobs/{job_id}/cancel", post(admin::cancel_job))
        .route("/logout", post(auth_handlers::logout))
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::require_session));

    let mut app = Router::new()
        .route("/.well-known/{tool}.json", get(discovery::well_known))
        .route("/{hostname}/{namespace}/{kind}/index.json", get(discovery::provider_index))
        .route("/{hostname}/{namespace}/{kind}/{version}.json", get(discovery::provider_version_archives))
        .route("/v1/providers/{namespace}/{kind}/versions", get(registry::provider_versions))
        .route("/v1/providers/{namespace}/{kind}/{version}/download/{os}/{arch}", get(registry::provider_download))
        .route("/v1/modules/{namespace}/{name}/{system}/versions", get(registry::module_versions))
        .route("/v1/modules/{namespace}/{name}/{system}/{version}/download", get(registry::module_download))
        .route("/_blobs/{*key}", get(blobs::get_blob))
        .route("/admin/login", post(auth_handlers::login))
        .route("/admin/health", get(admin::health))
        .route("/health", get(admin::health))
        .nest("/admin", admin_routes)
        .with_state(state.clone())
        .layer(RequestDecompressionLayer::new())
        .layer(TraceLayer::new_for_http());

    if let Some(ui_dir) = &state.ui_dir {
        app = app.fallback_service(ServeDir::new(ui_dir));
    }
    app
}

/// Periodically snapshot the metadata store to a local file via
/// `VACUUM INTO` and, when the configured object store is reachable,
/// upload it under the `backups/{prefix}/{timestamp}.db` key. Runs for
/// the lifetime of the process; failures are logged and skipped rather
/// than fatal, since a missed backup shouldn't take the mirror down.
fn spawn_backup_task(meta: MetaStore, store: Arc<dyn ObjectStore>, config: crate::config::MetaStoreConfig) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(config.backup.interval_secs));
        let snapshot_dir = config
            .db_path
            .parent()
            .map(|p| p.join("backups"))
            .unwrap_or_else(|| std::path::PathBuf::from("backups"));

        loop {
            ticker.tick().await;
            let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
            let snapshot_path = snapshot_dir.join(format!("{timestamp}.db"));

            if let Err(e) = meta.backup_to(&snapshot_path).await {
                tracing::warn!(error = %e, "metadata backup snapshot failed");
                continue;
            }

            let key = crate::objectstore::keys::backup(&config.backup.prefix, &timestamp);
            match tokio::fs::read(&snapshot_path).await {
                Ok(bytes) => {
                    if let Err(e) = store.put(&key, bytes::Bytes::from(bytes)).await {
                        tracing::warn!(error = %e, key, "metadata backup upload failed");
                    } else {
                        info!(key, "metadata backup uploaded");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "failed to read metadata backup snapshot for upload"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::routing::get as mock_get;
    use axum::{extract::Path as AxPath, Json as AxJson};
    use bytes::Bytes as AxBytes;
    use sha2::{Digest, Sha256};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    use crate::config::MetaStoreConfig;
    use crate::metastore::{JobKind, JobStatus};
    use crate::objectstore::LocalStore;

    /// In-process stand-in for the upstream registry: serves the
    /// version-list/download-descriptor JSON these tests need plus the
    /// raw archive bytes, so `UpstreamClient` talks real HTTP over a
    /// loopback socket instead of a mocking library.
    #[derive(Clone)]
    struct MockUpstream {
        archive: AxBytes,
        shasums: String,
        module_tar: AxBytes,
        archive_fail_remaining: Arc<AtomicUsize>,
        archive_requests: Arc<AtomicUsize>,
    }

    async fn mock_provider_versions() -> AxJson<serde_json::Value> {
        AxJson(serde_json::json!({"versions": [{"version": "1.2.3"}, {"version": "2.0.0"}]}))
    }

    async fn mock_provider_package(
        axum::extract::State(state): axum::extract::State<(MockUpstream, String)>,
    ) -> AxJson<serde_json::Value> {
        let (mock, base) = state;
        let shasum = hex::encode(Sha256::digest(&mock.archive));
        AxJson(serde_json::json!({
            "filename": "terraform-provider-foo_1.2.3_linux_amd64.zip",
            "download_url": format!("{base}/archive.zip"),
            "shasums_url": format!("{base}/shasums.txt"),
            "shasums_signature_url": "",
            "shasum": shasum,
            "protocols": ["5.0"],
        }))
    }

    async fn mock_archive(
        axum::extract::State(state): axum::extract::State<(MockUpstream, String)>,
    ) -> Result<AxBytes, StatusCode> {
        let mock = state.0;
        mock.archive_requests.fetch_add(1, Ordering::SeqCst);
        let remaining = mock.archive_fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            mock.archive_fail_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        }
        Ok(mock.archive.clone())
    }

    async fn mock_shasums(axum::extract::State(state): axum::extract::State<(MockUpstream, String)>) -> String {
        state.0.shasums.clone()
    }

    async fn mock_module_versions() -> AxJson<serde_json::Value> {
        AxJson(serde_json::json!({"modules": [{"versions": [{"version": "1.0.0"}]}]}))
    }

    async fn mock_module_download(
        axum::extract::State(state): axum::extract::State<(MockUpstream, String)>,
    ) -> impl IntoResponse {
        let base = state.1;
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("X-Terraform-Get", format!("{base}/module.tar.gz").parse().unwrap());
        (StatusCode::NO_CONTENT, headers)
    }

    async fn mock_module_tarball(
        axum::extract::State(state): axum::extract::State<(MockUpstream, String)>,
    ) -> AxBytes {
        state.0.module_tar.clone()
    }

    /// Spin up the mock upstream on a loopback port and return its base
    /// URL alongside the shared state used to script its responses.
    async fn spawn_mock_upstream(mock: MockUpstream) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let state = (mock, base.clone());

        let app = Router::new()
            .route("/v1/providers/{namespace}/{kind}/versions", mock_get(mock_provider_versions))
            .route("/v1/providers/{namespace}/{kind}/{version}/download/{os}/{arch}", mock_get(mock_provider_package))
            .route("/archive.zip", mock_get(mock_archive))
            .route("/shasums.txt", mock_get(mock_shasums))
            .route("/v1/modules/{namespace}/{name}/{system}/versions", mock_get(mock_module_versions))
            .route("/v1/modules/{namespace}/{name}/{system}/{version}/download", mock_get(mock_module_download))
            .route("/module.tar.gz", mock_get(mock_module_tarball))
            .with_state(state);

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service()).await.unwrap();
        });
        base
    }

    fn make_tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut tar_bytes = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut tar_bytes);
            for (name, content) in files {
                let mut header = tar::Header::new_gnu();
                header.set_size(content.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder.append_data(&mut header, name, content.as_bytes()).unwrap();
            }
            builder.finish().unwrap();
        }
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(&tar_bytes).unwrap();
        gz.finish().unwrap()
    }

    struct Harness {
        state: AppState,
        jobs: Arc<JobProcessor>,
        upstream_base: String,
        _tmp: tempfile::TempDir,
    }

    async fn build_harness(upstream_base: String, autodownload_enabled: bool) -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let meta = MetaStore::connect_in_memory().await.unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(LocalStore::new(
            tmp.path().join("blobs"),
            b"test-presign-secret".to_vec(),
            "http://127.0.0.1:0".to_string(),
        ));

        let metrics = Arc::new(Metrics::new());

        crate::cache::ensure_disk_dir(&tmp.path().join("cache")).unwrap();
        let cache = Arc::new(
            Cache::open(CacheConfig {
                memory_bytes: 1 << 20,
                disk_bytes: 1 << 20,
                disk_path: tmp.path().join("cache"),
                default_ttl: std::time::Duration::from_secs(60),
                sweep_interval: std::time::Duration::from_secs(3600),
                metrics: Arc::clone(&metrics),
            })
            .unwrap(),
        );

        let upstream = Arc::new(
            UpstreamClient::new(UpstreamClientConfig {
                provider_registry_base: upstream_base.clone(),
                module_registry_base: upstream_base.clone(),
                connect_timeout: std::time::Duration::from_secs(2),
                request_timeout: std::time::Duration::from_secs(2),
                max_retries: 3,
                retry_backoff: std::time::Duration::from_millis(5),
                max_download_size: 10 * 1024 * 1024,
                user_agent: "tfmirror-test".into(),
            })
            .unwrap(),
        );

        let verifier = Arc::new(Verifier::new(VerifierConfig {
            gpg_enabled: false,
            trusted_keys: Vec::new(),
            max_module_size: 10 * 1024 * 1024,
        }));

        let pipeline = IngestionPipeline::new(
            Arc::clone(&upstream),
            Arc::clone(&verifier),
            Arc::clone(&store),
            meta.clone(),
            PipelineConfig {
                mirror_host: "mirror.local".into(),
                presign_ttl: std::time::Duration::from_secs(60),
            },
        );

        let autodownload = Arc::new(AutoDownload::with_metrics(
            AutoDownloadConfig {
                enabled: autodownload_enabled,
                allowed_namespaces: Vec::new(),
                blocked_namespaces: Vec::new(),
                rate_per_minute: 6000,
                concurrency_limit: 8,
                request_timeout: std::time::Duration::from_secs(2),
                platforms: vec!["linux_amd64".to_string()],
                negative_ttl: std::time::Duration::from_secs(30),
            },
            pipeline.clone(),
            Arc::clone(&metrics),
        ));

        let jobs = JobProcessor::with_metrics(
            meta.clone(),
            pipeline.clone(),
            JobsConfig {
                worker_count: 2,
                poll_interval: std::time::Duration::from_millis(5),
                max_concurrent_jobs: 4,
                retry_max: 3,
                retry_delay: std::time::Duration::from_millis(5),
                shutdown_grace: std::time::Duration::from_secs(2),
            },
            Arc::clone(&metrics),
        );

        let auth = Auth::new(
            meta.clone(),
            "test-jwt-secret".into(),
            "admin".into(),
            hex::encode(Sha256::digest(b"hunter2")),
            std::time::Duration::from_secs(300),
        );

        let state = AppState {
            meta,
            store,
            cache,
            pipeline,
            upstream,
            autodownload,
            jobs: Arc::clone(&jobs),
            auth,
            metrics,
            tool_name: "terraform".into(),
            mirror_host: "mirror.local".into(),
            ui_dir: None,
            version: "test",
            blob_signing_secret: Arc::from("test-presign-secret"),
        };

        Harness {
            state,
            jobs,
            upstream_base,
            _tmp: tmp,
        }
    }

    async fn wait_for_terminal(harness: &Harness, job_id: &str) -> crate::metastore::Job {
        for _ in 0..200 {
            let job = harness.state.meta.get_job(job_id).await.unwrap().unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("job {job_id} did not reach a terminal state in time");
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Scenario 1 + 2: provider ingest happy path, then both mirror
    /// protocol endpoints for the freshly ingested version.
    #[tokio::test]
    async fn test_provider_ingest_happy_path_and_mirror_protocol() {
        let archive = AxBytes::from_static(b"a fake provider zip archive");
        let shasum = hex::encode(Sha256::digest(&archive));
        let shasums = format!("{shasum}  terraform-provider-foo_1.2.3_linux_amd64.zip\n");

        let mock = MockUpstream {
            archive: archive.clone(),
            shasums,
            module_tar: AxBytes::new(),
            archive_fail_remaining: Arc::new(AtomicUsize::new(0)),
            archive_requests: Arc::new(AtomicUsize::new(0)),
        };
        let base = spawn_mock_upstream(mock).await;
        let harness = build_harness(base, false).await;

        let manifest = r#"provider "acme/foo" { versions = ["1.2.3"] platforms = ["linux_amd64"] }"#;
        let job = harness
            .jobs
            .enqueue(
                JobKind::Provider,
                manifest,
                vec![crate::metastore::NewJobItem {
                    namespace: "acme".into(),
                    item_name: "foo".into(),
                    system_or_platform: "linux_amd64".into(),
                    version: "1.2.3".into(),
                }],
            )
            .await
            .unwrap();
        harness.jobs.spawn();
        let finished = wait_for_terminal(&harness, &job.id).await;
        harness.jobs.shutdown().await;

        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.progress, 100);
        assert_eq!(finished.completed_items, 1);
        assert_eq!(finished.failed_items, 0);

        let identity = crate::metastore::ProviderIdentity {
            namespace: "acme".into(),
            kind: "foo".into(),
            version: "1.2.3".into(),
            platform: "linux_amd64".into(),
        };
        let provider = harness.state.meta.get_provider_by_identity(&identity).await.unwrap().unwrap();
        assert_eq!(provider.shasum, shasum);

        let app = build_router(harness.state.clone());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/v1/providers/acme/foo/versions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["versions"][0]["version"], "1.2.3");
        assert_eq!(body["versions"][0]["protocols"], serde_json::json!(provider.protocols));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/registry.example.com/acme/foo/index.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(body["versions"].as_object().unwrap().contains_key("1.2.3"));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/registry.example.com/acme/foo/1.2.3.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let archives = body["archives"]["linux_amd64"].as_object().unwrap();
        assert!(!archives["url"].as_str().unwrap().is_empty());
        assert_eq!(archives["hashes"][0], format!("zh:{shasum}"));
    }

    /// Scenario 3: a mutated archive fails verification permanently, with
    /// no retry and no provider row or blob ever committed.
    #[tokio::test]
    async fn test_verification_failure_is_permanent_no_retry() {
        let real_archive = b"the real archive bytes".to_vec();
        let real_shasum = hex::encode(Sha256::digest(&real_archive));
        // Upstream's descriptor claims `real_shasum`, but the bytes the
        // mock actually serves for the archive are different, so the
        // computed digest will never match.
        let served_archive = AxBytes::from(b"corrupted bytes on the wire".to_vec());
        let shasums = format!("{real_shasum}  terraform-provider-foo_1.2.3_linux_amd64.zip\n");

        let mock = MockUpstream {
            archive: served_archive,
            shasums,
            module_tar: AxBytes::new(),
            archive_fail_remaining: Arc::new(AtomicUsize::new(0)),
            archive_requests: Arc::new(AtomicUsize::new(0)),
        };
        let base = spawn_mock_upstream(mock).await;
        let harness = build_harness(base, false).await;

        let job = harness
            .jobs
            .enqueue(
                JobKind::Provider,
                "manifest",
                vec![crate::metastore::NewJobItem {
                    namespace: "acme".into(),
                    item_name: "foo".into(),
                    system_or_platform: "linux_amd64".into(),
                    version: "1.2.3".into(),
                }],
            )
            .await
            .unwrap();
        harness.jobs.spawn();
        let finished = wait_for_terminal(&harness, &job.id).await;
        harness.jobs.shutdown().await;

        assert_eq!(finished.status, JobStatus::Failed);
        assert_eq!(finished.failed_items, 1);

        let items = harness.state.meta.list_job_items(&job.id).await.unwrap();
        assert_eq!(items[0].retry_count, 0);

        let identity = crate::metastore::ProviderIdentity {
            namespace: "acme".into(),
            kind: "foo".into(),
            version: "1.2.3".into(),
            platform: "linux_amd64".into(),
        };
        assert!(harness.state.meta.get_provider_by_identity(&identity).await.unwrap().is_none());
    }

    /// Scenario 4: two transient 503s followed by success. The item
    /// completes with retry_count == 2 and exactly one provider row.
    #[tokio::test]
    async fn test_retry_recovers_after_transient_upstream_failures() {
        let archive = AxBytes::from_static(b"a fake provider zip archive");
        let shasum = hex::encode(Sha256::digest(&archive));
        let shasums = format!("{shasum}  terraform-provider-foo_1.2.3_linux_amd64.zip\n");

        let mock = MockUpstream {
            archive,
            shasums,
            module_tar: AxBytes::new(),
            archive_fail_remaining: Arc::new(AtomicUsize::new(2)),
            archive_requests: Arc::new(AtomicUsize::new(0)),
        };
        let base = spawn_mock_upstream(mock).await;
        let harness = build_harness(base, false).await;

        let job = harness
            .jobs
            .enqueue(
                JobKind::Provider,
                "manifest",
                vec![crate::metastore::NewJobItem {
                    namespace: "acme".into(),
                    item_name: "foo".into(),
                    system_or_platform: "linux_amd64".into(),
                    version: "1.2.3".into(),
                }],
            )
            .await
            .unwrap();
        harness.jobs.spawn();
        let finished = wait_for_terminal(&harness, &job.id).await;
        harness.jobs.shutdown().await;

        assert_eq!(finished.status, JobStatus::Completed);
        let items = harness.state.meta.list_job_items(&job.id).await.unwrap();
        assert_eq!(items[0].retry_count, 2);

        let identity = crate::metastore::ProviderIdentity {
            namespace: "acme".into(),
            kind: "foo".into(),
            version: "1.2.3".into(),
            platform: "linux_amd64".into(),
        };
        assert!(harness.state.meta.get_provider_by_identity(&identity).await.unwrap().is_some());
    }

    /// Scenario 5: ten concurrent auto-download requests for the same
    /// tuple collapse into exactly one upstream archive fetch and one
    /// provider row, all responses pointing at the same blob.
    #[tokio::test]
    async fn test_auto_download_single_flight() {
        let archive = AxBytes::from_static(b"a fake provider zip archive");
        let shasum = hex::encode(Sha256::digest(&archive));
        let shasums = format!("{shasum}  terraform-provider-foo_2.0.0_linux_amd64.zip\n");
        let archive_requests = Arc::new(AtomicUsize::new(0));

        let mock = MockUpstream {
            archive,
            shasums,
            module_tar: AxBytes::new(),
            archive_fail_remaining: Arc::new(AtomicUsize::new(0)),
            archive_requests: Arc::clone(&archive_requests),
        };
        let base = spawn_mock_upstream(mock).await;
        let harness = build_harness(base, true).await;
        let app = build_router(harness.state.clone());

        let requests = (0..10).map(|_| {
            let app = app.clone();
            async move {
                app.oneshot(
                    Request::builder()
                        .uri("/v1/providers/acme/foo/2.0.0/download/linux/amd64")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap()
            }
        });
        let responses = futures_util::future::join_all(requests).await;

        let mut urls = std::collections::HashSet::new();
        for response in responses {
            assert_eq!(response.status(), StatusCode::OK);
            let body = json_body(response).await;
            urls.insert(body["download_url"].as_str().unwrap().to_string());
        }
        assert_eq!(urls.len(), 1, "every response should reference the same blob");
        assert_eq!(archive_requests.load(Ordering::SeqCst), 1, "exactly one upstream fetch should occur");

        let count: i64 = {
            let identity = crate::metastore::ProviderIdentity {
                namespace: "acme".into(),
                kind: "foo".into(),
                version: "2.0.0".into(),
                platform: "linux_amd64".into(),
            };
            harness.state.meta.get_provider_by_identity(&identity).await.unwrap().is_some() as i64
        };
        assert_eq!(count, 1);
    }

    /// Scenario 6: a module with one remote and one local nested source
    /// gets the remote one rewritten to point at this mirror, the local
    /// one left alone, and the download endpoint returns the rewritten
    /// archive's location via `X-Terraform-Get`.
    #[tokio::test]
    async fn test_module_rewrite_on_ingest_and_download() {
        let module_tar = make_tar_gz(&[(
            "main.tf",
            "module \"x\" {\n  source = \"other/bar/aws\"\n}\n\nmodule \"y\" {\n  source = \"./local\"\n}\n",
        )]);

        let mock = MockUpstream {
            archive: AxBytes::new(),
            shasums: String::new(),
            module_tar: AxBytes::from(module_tar),
            archive_fail_remaining: Arc::new(AtomicUsize::new(0)),
            archive_requests: Arc::new(AtomicUsize::new(0)),
        };
        let base = spawn_mock_upstream(mock).await;
        let harness = build_harness(base, false).await;

        let manifest = r#"module "acme/bar/aws" { versions = ["1.0.0"] }"#;
        let job = harness
            .jobs
            .enqueue(
                JobKind::Module,
                manifest,
                vec![crate::metastore::NewJobItem {
                    namespace: "acme".into(),
                    item_name: "bar".into(),
                    system_or_platform: "aws".into(),
                    version: "1.0.0".into(),
                }],
            )
            .await
            .unwrap();
        harness.jobs.spawn();
        let finished = wait_for_terminal(&harness, &job.id).await;
        harness.jobs.shutdown().await;
        assert_eq!(finished.status, JobStatus::Completed);

        let identity = crate::metastore::ModuleIdentity {
            namespace: "acme".into(),
            name: "bar".into(),
            system: "aws".into(),
            version: "1.0.0".into(),
        };
        let module = harness.state.meta.get_module_by_identity(&identity).await.unwrap().unwrap();
        let stored = harness.state.store.get(&module.storage_key).await.unwrap();
        let mut zip = zip::ZipArchive::new(std::io::Cursor::new(stored.to_vec())).unwrap();
        let mut main_tf = String::new();
        std::io::Read::read_to_string(&mut zip.by_name("main.tf").unwrap(), &mut main_tf).unwrap();
        assert!(main_tf.contains("source = \"mirror.local/other/bar/aws\""));
        assert!(main_tf.contains("source = \"./local\""));

        let app = build_router(harness.state.clone());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/modules/acme/bar/aws/1.0.0/download")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let location = response.headers().get("X-Terraform-Get").unwrap().to_str().unwrap();
        assert!(!location.is_empty());
    }

    /// The admin surface: login, create a job via the same HCL manifest
    /// path exercised above, poll its status, and confirm an
    /// unauthenticated call to the same route is rejected.
    #[tokio::test]
    async fn test_admin_job_lifecycle_requires_session() {
        let mock = MockUpstream {
            archive: AxBytes::from_static(b"archive"),
            shasums: format!("{}  f\n", hex::encode(Sha256::digest(b"archive"))),
            module_tar: AxBytes::new(),
            archive_fail_remaining: Arc::new(AtomicUsize::new(0)),
            archive_requests: Arc::new(AtomicUsize::new(0)),
        };
        let base = spawn_mock_upstream(mock).await;
        let harness = build_harness(base, false).await;
        harness.jobs.spawn();
        let app = build_router(harness.state.clone());

        let unauthenticated = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/admin/jobs")
                    .header(header::CONTENT_TYPE, "text/plain")
                    .body(Body::from("provider \"acme/foo\" { versions = [\"1.2.3\"] platforms = [\"linux_amd64\"] }"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(unauthenticated.status(), StatusCode::UNAUTHORIZED);

        let login_response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/admin/login")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(serde_json::to_vec(&serde_json::json!({"username": "admin", "password": "hunter2"})).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(login_response.status(), StatusCode::OK);
        let login_body = json_body(login_response).await;
        let token = login_body["token"].as_str().unwrap().to_string();

        let created = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/admin/jobs")
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .header(header::CONTENT_TYPE, "text/plain")
                    .body(Body::from("provider \"acme/foo\" { versions = [\"1.2.3\"] platforms = [\"linux_amd64\"] }"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::ACCEPTED);
        let created_body = json_body(created).await;
        let job_id = created_body["job_id"].as_str().unwrap().to_string();

        let finished = wait_for_terminal(&harness, &job_id).await;
        harness.jobs.shutdown().await;
        assert_eq!(finished.status, JobStatus::Completed);

        let status_response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/admin/jobs/{job_id}"))
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(status_response.status(), StatusCode::OK);
    }

    /// A job with zero items completes immediately with progress 100,
    /// without ever touching the upstream mock.
    #[tokio::test]
    async fn test_zero_item_manifest_completes_immediately_via_router() {
        let mock = MockUpstream {
            archive: AxBytes::new(),
            shasums: String::new(),
            module_tar: AxBytes::new(),
            archive_fail_remaining: Arc::new(AtomicUsize::new(0)),
            archive_requests: Arc::new(AtomicUsize::new(0)),
        };
        let base = spawn_mock_upstream(mock).await;
        let harness = build_harness(base, false).await;
        let job = harness.jobs.enqueue(JobKind::Provider, "manifest", vec![]).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
    }

    #[tokio::test]
    async fn test_health_endpoint_matches_wire_contract() {
        let mock = MockUpstream {
            archive: AxBytes::new(),
            shasums: String::new(),
            module_tar: AxBytes::new(),
            archive_fail_remaining: Arc::new(AtomicUsize::new(0)),
            archive_requests: Arc::new(AtomicUsize::new(0)),
        };
        let base = spawn_mock_upstream(mock).await;
        let harness = build_harness(base, false).await;
        let app = build_router(harness.state.clone());

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], "test");
    }

    /// `spawn_backup_task` snapshots the metadata store and uploads the
    /// snapshot to the object store on its own schedule, without the
    /// router or any caller driving it directly.
    #[tokio::test]
    async fn test_spawn_backup_task_uploads_snapshot_to_object_store() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("main.db");
        let meta = MetaStore::connect(&db_path, 2).await.unwrap();
        meta.append_audit("admin", "smoke", "target", "ok").await.unwrap();

        let store: Arc<dyn ObjectStore> = Arc::new(LocalStore::new(
            dir.path().join("blobs"),
            b"test-presign-secret".to_vec(),
            "http://127.0.0.1:0".to_string(),
        ));

        let config = MetaStoreConfig {
            db_path: db_path.clone(),
            max_connections: 2,
            backup: crate::config::BackupConfig {
                enabled: true,
                interval_secs: 0,
                prefix: "meta".into(),
            },
        };
        spawn_backup_task(meta, store, config);

        // `interval(0)` fires immediately; give the spawned task a few
        // ticks to snapshot and upload before checking for the result.
        let mut uploaded = None;
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            let backups_dir = dir.path().join("blobs").join("backups").join("meta");
            if let Ok(mut entries) = tokio::fs::read_dir(&backups_dir).await {
                if let Some(entry) = entries.next_entry().await.unwrap() {
                    uploaded = Some(entry.path());
                    break;
                }
            }
        }
        let uploaded = uploaded.expect("backup task never uploaded a snapshot");
        assert!(uploaded.to_string_lossy().ends_with(".db"));
    }
}

fn load_trusted_keys(path: Option<&std::path::Path>) -> Result<Vec<Vec<u8>>, AnyError> {
    let Some(path) = path else { return Ok(Vec::new()) };
    let bytes = std::fs::read(path)?;
    Ok(vec![bytes])
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
