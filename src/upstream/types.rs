use serde::Deserialize;

/// A provider release package descriptor, as returned by the upstream
/// registry's `.../download/{os}/{arch}` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderPackage {
    pub filename: String,
    pub download_url: String,
    pub shasums_url: String,
    #[serde(default)]
    pub shasums_signature_url: String,
    pub shasum: String,
    /// Upstream's own advertised protocol versions. Preserved verbatim
    /// when present; callers fall back to `["5.0"]` only when upstream
    /// omits this field.
    #[serde(default)]
    pub protocols: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModulePackage {
    pub download_url: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct ProviderVersionsDoc {
    pub versions: Vec<ProviderVersionEntry>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ProviderVersionEntry {
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct ModuleVersionsDoc {
    pub modules: Vec<ModuleVersionsEntry>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ModuleVersionsEntry {
    pub versions: Vec<ModuleVersionEntry>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ModuleVersionEntry {
    pub version: String,
}
