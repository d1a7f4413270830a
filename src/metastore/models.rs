use serde::{Deserialize, Serialize};

/// `(namespace, type, version, platform)` — uniquely identifies a provider
/// artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderIdentity {
    pub namespace: String,
    pub kind: String,
    pub version: String,
    pub platform: String,
}

/// `(namespace, name, system, version)` — uniquely identifies a module
/// artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleIdentity {
    pub namespace: String,
    pub name: String,
    pub system: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub namespace: String,
    pub kind: String,
    pub version: String,
    pub platform: String,
    pub filename: String,
    pub size_bytes: i64,
    pub shasum: String,
    pub storage_key: String,
    /// Protocol versions as reported by upstream, preserved verbatim when
    /// present (see DESIGN.md open question 1); comma-joined in storage.
    pub protocols: Vec<String>,
    pub deprecated: bool,
    pub blocked: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub id: String,
    pub namespace: String,
    pub name: String,
    pub system: String,
    pub version: String,
    pub storage_key: String,
    pub filename: String,
    pub size_bytes: i64,
    pub source_url: String,
    pub deprecated: bool,
    pub blocked: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Provider,
    Module,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Provider => "provider",
            JobKind::Module => "module",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "provider" => Some(JobKind::Provider),
            "module" => Some(JobKind::Module),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobItemStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
}

impl JobItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobItemStatus::Pending => "pending",
            JobItemStatus::Downloading => "downloading",
            JobItemStatus::Completed => "completed",
            JobItemStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobItemStatus::Pending),
            "downloading" => Some(JobItemStatus::Downloading),
            "completed" => Some(JobItemStatus::Completed),
            "failed" => Some(JobItemStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub manifest: String,
    pub status: JobStatus,
    pub progress: i64,
    pub total_items: i64,
    pub completed_items: i64,
    pub failed_items: i64,
    pub error: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

/// One unit of work belonging to a job. For a provider job, `item_name` is
/// the provider type and `system_or_platform` is the `os_arch` platform
/// string; for a module job, `item_name` is the module name and
/// `system_or_platform` is the target system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobItem {
    pub id: String,
    pub job_id: String,
    pub namespace: String,
    pub item_name: String,
    pub system_or_platform: String,
    pub version: String,
    pub status: JobItemStatus,
    pub retry_count: i64,
    pub error: Option<String>,
    pub artifact_id: Option<String>,
    pub claimed_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub not_before: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub subject: String,
    pub issued_at: String,
    pub expires_at: String,
    pub revoked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub actor: String,
    pub action: String,
    pub target: String,
    pub outcome: String,
    pub created_at: String,
}
