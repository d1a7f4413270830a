//! Administrative surface: provider/module flag mutation, manifest-driven
//! job enqueueing, and job lifecycle control. Every handler here sits
//! behind the bearer-auth middleware and appends one audit record per
//! successful mutation.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use crate::metastore::{JobKind, ModuleIdentity, NewJobItem, ProviderIdentity};

use super::error::MirrorError;
use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct FlagsPatch {
    pub deprecated: Option<bool>,
    pub blocked: Option<bool>,
}

pub async fn patch_provider(
    State(state): State<AppState>,
    Extension(actor): Extension<String>,
    Path((namespace, kind, version, platform)): Path<(String, String, String, String)>,
    Json(patch): Json<FlagsPatch>,
) -> Result<Json<crate::metastore::Provider>, MirrorError> {
    let identity = ProviderIdentity { namespace, kind, version, platform };
    let provider = state
        .meta
        .update_provider_flags(&identity, patch.deprecated, patch.blocked)
        .await?;
    state
        .meta
        .append_audit(&actor, "provider.patch", &identity.namespace, "ok")
        .await?;
    Ok(Json(provider))
}

pub async fn delete_provider(
    State(state): State<AppState>,
    Extension(actor): Extension<String>,
    Path((namespace, kind, version, platform)): Path<(String, String, String, String)>,
) -> Result<StatusCode, MirrorError> {
    let identity = ProviderIdentity { namespace, kind, version, platform };
    let existing = state.meta.delete_provider(&identity).await?;
    if let Some(provider) = existing {
        let _ = state.store.delete(&provider.storage_key).await;
    }
    state
        .meta
        .append_audit(&actor, "provider.delete", &identity.namespace, "ok")
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn patch_module(
    State(state): State<AppState>,
    Extension(actor): Extension<String>,
    Path((namespace, name, system, version)): Path<(String, String, String, String)>,
    Json(patch): Json<FlagsPatch>,
) -> Result<Json<crate::metastore::Module>, MirrorError> {
    let identity = ModuleIdentity { namespace, name, system, version };
    let module = state
        .meta
        .update_module_flags(&identity, patch.deprecated, patch.blocked)
        .await?;
    state
        .meta
        .append_audit(&actor, "module.patch", &identity.namespace, "ok")
        .await?;
    Ok(Json(module))
}

pub async fn delete_module(
    State(state): State<AppState>,
    Extension(actor): Extension<String>,
    Path((namespace, name, system, version)): Path<(String, String, String, String)>,
) -> Result<StatusCode, MirrorError> {
    let identity = ModuleIdentity { namespace, name, system, version };
    let existing = state.meta.delete_module(&identity).await?;
    if let Some(module) = existing {
        let _ = state.store.delete(&module.storage_key).await;
    }
    state
        .meta
        .append_audit(&actor, "module.delete", &identity.namespace, "ok")
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_job(
    State(state): State<AppState>,
    Extension(actor): Extension<String>,
    body: String,
) -> Result<(StatusCode, Json<serde_json::Value>), MirrorError> {
    let (kind, items) = parse_manifest(&body)?;
    let job = state.jobs.enqueue(kind, &body, items).await?;
    state.metrics.job_accepted();
    state
        .meta
        .append_audit(&actor, "job.create", &job.id, "ok")
        .await?;
    Ok((StatusCode::ACCEPTED, Json(json!({"job_id": job.id, "status": job.status.as_str()}))))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<serde_json::Value>, MirrorError> {
    let job = state
        .meta
        .get_job(&job_id)
        .await?
        .ok_or_else(|| MirrorError::NotFound(format!("job {job_id} not found")))?;
    let items = state.meta.list_job_items(&job_id).await?;
    Ok(Json(json!({
        "id": job.id,
        "kind": job.kind.as_str(),
        "status": job.status.as_str(),
        "progress": job.progress,
        "total_items": job.total_items,
        "completed_items": job.completed_items,
        "failed_items": job.failed_items,
        "error": job.error,
        "items": items.iter().map(|i| json!({
            "namespace": i.namespace,
            "item_name": i.item_name,
            "system_or_platform": i.system_or_platform,
            "version": i.version,
            "status": i.status.as_str(),
            "retry_count": i.retry_count,
            "error": i.error,
        })).collect::<Vec<_>>(),
    })))
}

pub async fn retry_job(
    State(state): State<AppState>,
    Extension(actor): Extension<String>,
    Path(job_id): Path<String>,
) -> Result<Json<serde_json::Value>, MirrorError> {
    let job = state.jobs.retry(&job_id).await?;
    state.meta.append_audit(&actor, "job.retry", &job_id, "ok").await?;
    Ok(Json(json!({"job_id": job.id, "status": job.status.as_str()})))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Extension(actor): Extension<String>,
    Path(job_id): Path<String>,
) -> Result<Json<serde_json::Value>, MirrorError> {
    let job = state.jobs.cancel(&job_id).await?;
    state.meta.append_audit(&actor, "job.cancel", &job_id, "ok").await?;
    Ok(Json(json!({"job_id": job.id, "status": job.status.as_str()})))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": state.version,
        "metrics": state.metrics.snapshot(),
    }))
}

/// Parse an uploaded manifest: `provider "ns/type" { versions = [...]
/// platforms = [...] }` or `module "ns/name/system" { versions = [...] }`.
/// Exactly one block kind may appear per manifest.
fn parse_manifest(text: &str) -> Result<(JobKind, Vec<NewJobItem>), MirrorError> {
    let body: hcl::Body = hcl::from_str(text).map_err(|e| MirrorError::InvalidInput(format!("malformed manifest: {e}")))?;

    let mut items = Vec::new();
    let mut kind = None;

    for block in body.blocks() {
        let is_provider = block.identifier() == "provider";
        let is_module = block.identifier() == "module";
        if !is_provider && !is_module {
            continue;
        }
        let this_kind = if is_provider { JobKind::Provider } else { JobKind::Module };
        match kind {
            None => kind = Some(this_kind),
            Some(k) if std::mem::discriminant(&k) != std::mem::discriminant(&this_kind) => {
                return Err(MirrorError::InvalidInput("manifest mixes provider and module blocks".into()));
            }
            _ => {}
        }

        let label = block
            .labels()
            .first()
            .and_then(|l| l.as_str())
            .ok_or_else(|| MirrorError::InvalidInput("manifest block missing a label".into()))?;

        let versions = string_array_attr(&block, "versions")?;

        if is_provider {
            let (namespace, kind_name) = label
                .split_once('/')
                .ok_or_else(|| MirrorError::InvalidInput(format!("malformed provider label: {label}")))?;
            let platforms = string_array_attr(&block, "platforms")?;
            for version in &versions {
                for platform in &platforms {
                    items.push(NewJobItem {
                        namespace: namespace.to_string(),
                        item_name: kind_name.to_string(),
                        system_or_platform: platform.clone(),
                        version: version.clone(),
                    });
                }
            }
        } else {
            let mut parts = label.splitn(3, '/');
            let (namespace, name, system) = (
                parts.next().unwrap_or_default(),
                parts.next().unwrap_or_default(),
                parts.next().unwrap_or_default(),
            );
            if namespace.is_empty() || name.is_empty() || system.is_empty() {
                return Err(MirrorError::InvalidInput(format!("malformed module label: {label}")));
            }
            for version in &versions {
                items.push(NewJobItem {
                    namespace: namespace.to_string(),
                    item_name: name.to_string(),
                    system_or_platform: system.to_string(),
                    version: version.clone(),
                });
            }
        }
    }

    let kind = kind.ok_or_else(|| MirrorError::InvalidInput("manifest has no provider or module blocks".into()))?;
    Ok((kind, items))
}

fn string_array_attr(block: &hcl::Block, name: &str) -> Result<Vec<String>, MirrorError> {
    let Some(attr) = block.body.attributes().find(|a| a.key() == name) else {
        return Ok(Vec::new());
    };
    match attr.expr() {
        hcl::Expression::Array(items) => items
            .iter()
            .map(|e| {
                e.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| MirrorError::InvalidInput(format!("{name} must be an array of strings")))
            })
            .collect(),
        _ => Err(MirrorError::InvalidInput(format!("{name} must be an array"))),
    }
}
