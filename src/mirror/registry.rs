//! Terraform provider/module registry protocol v1: version listing and
//! single-platform download endpoints consumed directly by `terraform
//! init` when this mirror is configured as a provider/module registry
//! rather than a network mirror.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::metastore::{ModuleIdentity, ProviderIdentity};

use super::error::MirrorError;
use super::state::AppState;

pub async fn provider_versions(
    State(state): State<AppState>,
    Path((namespace, kind)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, MirrorError> {
    let mut versions = state.meta.list_provider_versions(&namespace, &kind).await?;
    if versions.is_empty() && state.autodownload.enabled() {
        versions = state
            .upstream
            .provider_versions(&namespace, &kind)
            .await
            .unwrap_or_default();
    }
    if versions.is_empty() {
        return Err(MirrorError::NotFound(format!("{namespace}/{kind} not found")));
    }

    let mut entries = Vec::with_capacity(versions.len());
    for v in versions {
        let protocols = state
            .meta
            .list_providers_for_version(&namespace, &kind, &v)
            .await?
            .into_iter()
            .find(|p| !p.protocols.is_empty())
            .map(|p| p.protocols)
            .unwrap_or_else(|| vec!["5.0".to_string()]);
        entries.push(json!({"version": v, "protocols": protocols}));
    }
    Ok(Json(json!({ "versions": entries })))
}

pub async fn provider_download(
    State(state): State<AppState>,
    Path((namespace, kind, version, os, arch)): Path<(String, String, String, String, String)>,
) -> Result<Json<serde_json::Value>, MirrorError> {
    let identity = ProviderIdentity {
        namespace: namespace.clone(),
        kind: kind.clone(),
        version: version.clone(),
        platform: format!("{os}_{arch}"),
    };

    let provider = match state.meta.get_provider_by_identity(&identity).await? {
        Some(p) => p,
        None => state.autodownload.admit_provider(&identity).await?,
    };

    let url = state.pipeline.presign(&provider.storage_key).await?;
    Ok(Json(json!({
        "protocol_versions": provider.protocols,
        "os": os,
        "arch": arch,
        "filename": provider.filename,
        "download_url": url,
        "shasum": provider.shasum,
        "shasums_url": "",
        "shasums_signature_url": "",
        "signing_keys": { "gpg_public_keys": [] },
    })))
}

pub async fn module_versions(
    State(state): State<AppState>,
    Path((namespace, name, system)): Path<(String, String, String)>,
) -> Result<Json<serde_json::Value>, MirrorError> {
    let mut versions = state.meta.list_module_versions(&namespace, &name, &system).await?;
    if versions.is_empty() && state.autodownload.enabled() {
        versions = state
            .upstream
            .module_versions(&namespace, &name, &system)
            .await
            .unwrap_or_default();
    }
    if versions.is_empty() {
        return Err(MirrorError::NotFound(format!("{namespace}/{name}/{system} not found")));
    }
    let entries: Vec<_> = versions.into_iter().map(|v| json!({"version": v})).collect();
    Ok(Json(json!({ "modules": [{ "versions": entries }] })))
}

pub async fn module_download(
    State(state): State<AppState>,
    Path((namespace, name, system, version)): Path<(String, String, String, String)>,
) -> Result<impl IntoResponse, MirrorError> {
    let identity = ModuleIdentity {
        namespace: namespace.clone(),
        name: name.clone(),
        system: system.clone(),
        version: version.clone(),
    };

    let module = match state.meta.get_module_by_identity(&identity).await? {
        Some(m) => m,
        None => state.autodownload.admit_module(&identity).await?,
    };

    let url = state.pipeline.presign(&module.storage_key).await?;
    let mut headers = HeaderMap::new();
    headers.insert(
        "X-Terraform-Get",
        HeaderValue::from_str(&url).map_err(|e| MirrorError::Internal(e.to_string()))?,
    );
    Ok((StatusCode::NO_CONTENT, headers))
}
