use std::sync::Arc;

use crate::auth::Auth;
use crate::autodownload::AutoDownload;
use crate::cache::Cache;
use crate::jobs::JobProcessor;
use crate::metastore::MetaStore;
use crate::objectstore::ObjectStore;
use crate::observability::Metrics;
use crate::pipeline::IngestionPipeline;
use crate::upstream::UpstreamClient;

#[derive(Clone)]
pub struct AppState {
    pub meta: MetaStore,
    pub store: Arc<dyn ObjectStore>,
    pub cache: Arc<Cache>,
    pub pipeline: IngestionPipeline,
    pub upstream: Arc<UpstreamClient>,
    pub autodownload: Arc<AutoDownload>,
    pub jobs: Arc<JobProcessor>,
    pub auth: Auth,
    pub metrics: Arc<Metrics>,
    pub tool_name: String,
    pub mirror_host: String,
    pub ui_dir: Option<std::path::PathBuf>,
    pub version: &'static str,
    /// Only meaningful for the local object store backend; the blob
    /// endpoint verifies presigned-URL signatures against it.
    pub blob_signing_secret: Arc<str>,
}
