use std::path::Path;
use std::str::FromStr;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use super::error::{is_unique_violation, Result, StoreError};
use super::models::*;
use super::schema::MIGRATIONS;

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// One pending unit of work, supplied when a job is created.
#[derive(Debug, Clone)]
pub struct NewJobItem {
    pub namespace: String,
    pub item_name: String,
    pub system_or_platform: String,
    pub version: String,
}

fn progress_of(completed: i64, failed: i64, total: i64) -> i64 {
    if total == 0 {
        100
    } else {
        (100 * (completed + failed) / total).min(100)
    }
}

/// Single-writer transactional metadata store, backed by SQLite in WAL
/// mode. Reads may run concurrently; every mutation is one transaction.
#[derive(Clone)]
pub struct MetaStore {
    pool: SqlitePool,
}

impl MetaStore {
    pub async fn connect(db_path: &Path, max_connections: u32) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Migration(e.to_string()))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))
            .map_err(|e| StoreError::Migration(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        store.integrity_check().await?;
        Ok(store)
    }

    /// Open an in-memory store, for tests.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Migration(e.to_string()))?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        for stmt in MIGRATIONS {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        info!("metastore migrations applied");
        Ok(())
    }

    async fn integrity_check(&self) -> Result<()> {
        let row = sqlx::query("PRAGMA integrity_check").fetch_one(&self.pool).await?;
        let result: String = row.get(0);
        if result != "ok" {
            return Err(StoreError::Migration(format!("integrity check failed: {result}")));
        }
        Ok(())
    }

    /// Write a consistent point-in-time copy of the database to
    /// `dest_path` using SQLite's `VACUUM INTO`, which takes its own
    /// read lock and never blocks on or interleaves with in-flight
    /// writers. Used by the periodic backup task; the resulting file is
    /// a complete, openable SQLite database on its own.
    pub async fn backup_to(&self, dest_path: &Path) -> Result<()> {
        if let Some(parent) = dest_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Migration(e.to_string()))?;
        }
        let dest = dest_path.display().to_string();
        sqlx::query("VACUUM INTO ?").bind(dest).execute(&self.pool).await?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Providers
    // ---------------------------------------------------------------

    pub async fn insert_provider(
        &self,
        identity: &ProviderIdentity,
        filename: &str,
        size_bytes: i64,
        shasum: &str,
        storage_key: &str,
        protocols: &[String],
    ) -> Result<Provider> {
        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        let protocols_joined = protocols.join(",");

        let result = sqlx::query(
            r#"INSERT INTO providers
                (id, namespace, type, version, platform, filename, size_bytes, shasum,
                 storage_key, protocols, deprecated, blocked, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?)"#,
        )
        .bind(&id)
        .bind(&identity.namespace)
        .bind(&identity.kind)
        .bind(&identity.version)
        .bind(&identity.platform)
        .bind(filename)
        .bind(size_bytes)
        .bind(shasum)
        .bind(storage_key)
        .bind(&protocols_joined)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(namespace = %identity.namespace, kind = %identity.kind, version = %identity.version, "provider inserted");
                self.get_provider_by_identity(identity)
                    .await?
                    .ok_or_else(|| StoreError::NotFound("provider vanished after insert".into()))
            }
            Err(e) if is_unique_violation(&e) => Err(StoreError::Conflict(format!(
                "provider {}/{}/{}/{} already exists",
                identity.namespace, identity.kind, identity.version, identity.platform
            ))),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_provider_by_identity(&self, identity: &ProviderIdentity) -> Result<Option<Provider>> {
        let row = sqlx::query(
            "SELECT * FROM providers WHERE namespace = ? AND type = ? AND version = ? AND platform = ?",
        )
        .bind(&identity.namespace)
        .bind(&identity.kind)
        .bind(&identity.version)
        .bind(&identity.platform)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(provider_from_row))
    }

    pub async fn list_provider_versions(&self, namespace: &str, kind: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT version FROM providers WHERE namespace = ? AND type = ? AND blocked = 0",
        )
        .bind(namespace)
        .bind(kind)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>("version")).collect())
    }

    pub async fn list_providers_for_version(&self, namespace: &str, kind: &str, version: &str) -> Result<Vec<Provider>> {
        let rows = sqlx::query(
            "SELECT * FROM providers WHERE namespace = ? AND type = ? AND version = ? AND blocked = 0",
        )
        .bind(namespace)
        .bind(kind)
        .bind(version)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(provider_from_row).collect())
    }

    pub async fn update_provider_flags(
        &self,
        identity: &ProviderIdentity,
        deprecated: Option<bool>,
        blocked: Option<bool>,
    ) -> Result<Provider> {
        let existing = self
            .get_provider_by_identity(identity)
            .await?
            .ok_or_else(|| StoreError::NotFound("provider not found".into()))?;
        let deprecated = deprecated.unwrap_or(existing.deprecated);
        let blocked = blocked.unwrap_or(existing.blocked);
        let now = now_rfc3339();

        sqlx::query("UPDATE providers SET deprecated = ?, blocked = ?, updated_at = ? WHERE id = ?")
            .bind(deprecated)
            .bind(blocked)
            .bind(&now)
            .bind(&existing.id)
            .execute(&self.pool)
            .await?;

        self.get_provider_by_identity(identity)
            .await?
            .ok_or_else(|| StoreError::NotFound("provider vanished after update".into()))
    }

    /// Delete the row and return it (its `storage_key` drives the caller's
    /// cascading blob delete).
    pub async fn delete_provider(&self, identity: &ProviderIdentity) -> Result<Option<Provider>> {
        let existing = self.get_provider_by_identity(identity).await?;
        if let Some(provider) = &existing {
            sqlx::query("DELETE FROM providers WHERE id = ?")
                .bind(&provider.id)
                .execute(&self.pool)
                .await?;
        }
        Ok(existing)
    }

    // ---------------------------------------------------------------
    // Modules
    // ---------------------------------------------------------------

    pub async fn insert_module(
        &self,
        identity: &ModuleIdentity,
        filename: &str,
        size_bytes: i64,
        storage_key: &str,
        source_url: &str,
    ) -> Result<Module> {
        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();

        let result = sqlx::query(
            r#"INSERT INTO modules
                (id, namespace, name, system, version, storage_key, filename, size_bytes,
                 source_url, deprecated, blocked, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?)"#,
        )
        .bind(&id)
        .bind(&identity.namespace)
        .bind(&identity.name)
        .bind(&identity.system)
        .bind(&identity.version)
        .bind(storage_key)
        .bind(filename)
        .bind(size_bytes)
        .bind(source_url)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => self
                .get_module_by_identity(identity)
                .await?
                .ok_or_else(|| StoreError::NotFound("module vanished after insert".into())),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Conflict(format!(
                "module {}/{}/{}/{} already exists",
                identity.namespace, identity.name, identity.system, identity.version
            ))),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_module_by_identity(&self, identity: &ModuleIdentity) -> Result<Option<Module>> {
        let row = sqlx::query(
            "SELECT * FROM modules WHERE namespace = ? AND name = ? AND system = ? AND version = ?",
        )
        .bind(&identity.namespace)
        .bind(&identity.name)
        .bind(&identity.system)
        .bind(&identity.version)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(module_from_row))
    }

    pub async fn list_module_versions(&self, namespace: &str, name: &str, system: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT version FROM modules WHERE namespace = ? AND name = ? AND system = ? AND blocked = 0",
        )
        .bind(namespace)
        .bind(name)
        .bind(system)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>("version")).collect())
    }

    pub async fn update_module_flags(
        &self,
        identity: &ModuleIdentity,
        deprecated: Option<bool>,
        blocked: Option<bool>,
    ) -> Result<Module> {
        let existing = self
            .get_module_by_identity(identity)
            .await?
            .ok_or_else(|| StoreError::NotFound("module not found".into()))?;
        let deprecated = deprecated.unwrap_or(existing.deprecated);
        let blocked = blocked.unwrap_or(existing.blocked);
        let now = now_rfc3339();

        sqlx::query("UPDATE modules SET deprecated = ?, blocked = ?, updated_at = ? WHERE id = ?")
            .bind(deprecated)
            .bind(blocked)
            .bind(&now)
            .bind(&existing.id)
            .execute(&self.pool)
            .await?;

        self.get_module_by_identity(identity)
            .await?
            .ok_or_else(|| StoreError::NotFound("module vanished after update".into()))
    }

    pub async fn delete_module(&self, identity: &ModuleIdentity) -> Result<Option<Module>> {
        let existing = self.get_module_by_identity(identity).await?;
        if let Some(module) = &existing {
            sqlx::query("DELETE FROM modules WHERE id = ?")
                .bind(&module.id)
                .execute(&self.pool)
                .await?;
        }
        Ok(existing)
    }

    // ---------------------------------------------------------------
    // Jobs
    // ---------------------------------------------------------------

    /// Create a job and its items in one transaction. A job with zero
    /// items completes immediately with progress 100.
    pub async fn create_job(&self, kind: JobKind, manifest: &str, items: Vec<NewJobItem>) -> Result<Job> {
        let job_id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        let total = items.len() as i64;
        let immediate = items.is_empty();
        let status = if immediate { JobStatus::Completed } else { JobStatus::Pending };
        let progress = if immediate { 100 } else { 0 };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO jobs
                (id, kind, manifest, status, progress, total_items, completed_items,
                 failed_items, error, created_at, started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, 0, 0, NULL, ?, ?, ?)"#,
        )
        .bind(&job_id)
        .bind(kind.as_str())
        .bind(manifest)
        .bind(status.as_str())
        .bind(progress)
        .bind(total)
        .bind(&now)
        .bind(if immediate { Some(&now) } else { None })
        .bind(if immediate { Some(&now) } else { None })
        .execute(&mut *tx)
        .await?;

        for item in &items {
            let item_id = Uuid::new_v4().to_string();
            sqlx::query(
                r#"INSERT INTO job_items
                    (id, job_id, namespace, item_name, system_or_platform, version,
                     status, retry_count, error, artifact_id, claimed_by, created_at, updated_at, not_before)
                   VALUES (?, ?, ?, ?, ?, ?, 'pending', 0, NULL, NULL, NULL, ?, ?, NULL)"#,
            )
            .bind(&item_id)
            .bind(&job_id)
            .bind(&item.namespace)
            .bind(&item.item_name)
            .bind(&item.system_or_platform)
            .bind(&item.version)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.get_job(&job_id)
            .await?
            .ok_or_else(|| StoreError::NotFound("job vanished after create".into()))
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(job_from_row))
    }

    pub async fn list_job_items(&self, job_id: &str) -> Result<Vec<JobItem>> {
        let rows = sqlx::query("SELECT * FROM job_items WHERE job_id = ? ORDER BY created_at ASC")
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(job_item_from_row).collect())
    }

    /// Atomically claim one pending item (whose `not_before` has elapsed)
    /// from one pending/running job, moving both to running/downloading
    /// for `worker_id`. Items are claimed in insertion order.
    pub async fn claim_next(&self, worker_id: &str) -> Result<Option<(Job, JobItem)>> {
        let mut tx = self.pool.begin().await?;
        let now = now_rfc3339();

        let item_row = sqlx::query(
            r#"SELECT ji.* FROM job_items ji
                JOIN jobs j ON j.id = ji.job_id
                WHERE ji.status = 'pending'
                  AND (ji.not_before IS NULL OR ji.not_before <= ?)
                  AND j.status IN ('pending', 'running')
                ORDER BY ji.created_at ASC
                LIMIT 1"#,
        )
        .bind(&now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(item_row) = item_row else {
            tx.commit().await?;
            return Ok(None);
        };
        let mut item = job_item_from_row(item_row);

        sqlx::query("UPDATE job_items SET status = 'downloading', claimed_by = ?, updated_at = ? WHERE id = ?")
            .bind(worker_id)
            .bind(&now)
            .bind(&item.id)
            .execute(&mut *tx)
            .await?;
        item.status = JobItemStatus::Downloading;
        item.claimed_by = Some(worker_id.to_string());

        let job_row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(&item.job_id)
            .fetch_one(&mut *tx)
            .await?;
        let mut job = job_from_row(job_row);

        if job.status == JobStatus::Pending {
            sqlx::query("UPDATE jobs SET status = 'running', started_at = ? WHERE id = ?")
                .bind(&now)
                .bind(&job.id)
                .execute(&mut *tx)
                .await?;
            job.status = JobStatus::Running;
            job.started_at = Some(now.clone());
        }

        tx.commit().await?;
        Ok(Some((job, item)))
    }

    pub async fn complete_item(&self, item_id: &str, artifact_id: &str) -> Result<Job> {
        let mut tx = self.pool.begin().await?;
        let now = now_rfc3339();

        let item_row = sqlx::query("SELECT * FROM job_items WHERE id = ?")
            .bind(item_id)
            .fetch_one(&mut *tx)
            .await?;
        let item = job_item_from_row(item_row);

        sqlx::query(
            "UPDATE job_items SET status = 'completed', artifact_id = ?, error = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(artifact_id)
        .bind(&now)
        .bind(item_id)
        .execute(&mut *tx)
        .await?;

        let job = finalize_item_transition(&mut tx, &item.job_id, true, &now).await?;
        tx.commit().await?;
        Ok(job)
    }

    /// Record an item failure. `retryable` items under the retry bound go
    /// back to `pending` with a jittered backoff delay; everything else is
    /// terminal.
    pub async fn fail_item(
        &self,
        item_id: &str,
        error: &str,
        retryable: bool,
        retry_max: u32,
        retry_delay: std::time::Duration,
    ) -> Result<Job> {
        let mut tx = self.pool.begin().await?;
        let now = now_rfc3339();

        let item_row = sqlx::query("SELECT * FROM job_items WHERE id = ?")
            .bind(item_id)
            .fetch_one(&mut *tx)
            .await?;
        let item = job_item_from_row(item_row);

        if retryable && (item.retry_count as u32) < retry_max {
            let next_retry = item.retry_count + 1;
            let backoff = retry_delay.as_millis() as i64 * (1i64 << next_retry.min(20));
            let jitter = (Uuid::new_v4().as_u128() % 250) as i64;
            let not_before = Utc::now() + chrono::Duration::milliseconds(backoff + jitter);

            sqlx::query(
                "UPDATE job_items SET status = 'pending', retry_count = ?, error = ?, not_before = ?, updated_at = ? WHERE id = ?",
            )
            .bind(next_retry)
            .bind(error)
            .bind(not_before.to_rfc3339())
            .bind(&now)
            .bind(item_id)
            .execute(&mut *tx)
            .await?;

            let job_row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
                .bind(&item.job_id)
                .fetch_one(&mut *tx)
                .await?;
            let job = job_from_row(job_row);
            tx.commit().await?;
            return Ok(job);
        }

        sqlx::query("UPDATE job_items SET status = 'failed', error = ?, updated_at = ? WHERE id = ?")
            .bind(error)
            .bind(&now)
            .bind(item_id)
            .execute(&mut *tx)
            .await?;

        let job = finalize_item_transition(&mut tx, &item.job_id, false, &now).await?;
        tx.commit().await?;
        Ok(job)
    }

    pub async fn cancel_job(&self, job_id: &str) -> Result<Job> {
        let now = now_rfc3339();
        sqlx::query(
            "UPDATE jobs SET status = 'cancelled', progress = 100, completed_at = ? WHERE id = ? AND status IN ('pending', 'running')",
        )
        .bind(&now)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        self.get_job(job_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("job {job_id} not found")))
    }

    /// Reset `failed` items of a `failed` or `completed` job back to
    /// `pending`, clear their errors, and move the job to `running`.
    pub async fn retry_job(&self, job_id: &str) -> Result<Job> {
        let mut tx = self.pool.begin().await?;
        let now = now_rfc3339();

        let job_row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_one(&mut *tx)
            .await?;
        let job = job_from_row(job_row);
        if !matches!(job.status, JobStatus::Failed | JobStatus::Completed) {
            tx.rollback().await?;
            return Err(StoreError::Conflict(format!(
                "job {job_id} is not in a retryable state"
            )));
        }

        sqlx::query(
            "UPDATE job_items SET status = 'pending', error = NULL, not_before = NULL, updated_at = ? WHERE job_id = ? AND status = 'failed'",
        )
        .bind(&now)
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        let failed_count_row = sqlx::query(
            "SELECT COUNT(*) as n FROM job_items WHERE job_id = ? AND status IN ('completed')",
        )
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await?;
        let completed: i64 = failed_count_row.get("n");

        sqlx::query(
            "UPDATE jobs SET status = 'running', failed_items = 0, completed_items = ?, progress = ?, error = NULL, completed_at = NULL WHERE id = ?",
        )
        .bind(completed)
        .bind(progress_of(completed, 0, job.total_items))
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.get_job(job_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("job {job_id} not found")))
    }

    // ---------------------------------------------------------------
    // Sessions & audit
    // ---------------------------------------------------------------

    pub async fn issue_session(&self, subject: &str, ttl: std::time::Duration) -> Result<Session> {
        let id = Uuid::new_v4().to_string();
        let issued_at = Utc::now();
        let expires_at = issued_at + chrono::Duration::from_std(ttl).unwrap_or_default();

        sqlx::query(
            "INSERT INTO sessions (id, subject, issued_at, expires_at, revoked) VALUES (?, ?, ?, ?, 0)",
        )
        .bind(&id)
        .bind(subject)
        .bind(issued_at.to_rfc3339())
        .bind(expires_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(Session {
            id,
            subject: subject.to_string(),
            issued_at: issued_at.to_rfc3339(),
            expires_at: expires_at.to_rfc3339(),
            revoked: false,
        })
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(session_from_row))
    }

    pub async fn revoke_session(&self, session_id: &str) -> Result<()> {
        sqlx::query("UPDATE sessions SET revoked = 1 WHERE id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn append_audit(&self, actor: &str, action: &str, target: &str, outcome: &str) -> Result<()> {
        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        sqlx::query(
            "INSERT INTO audit_records (id, actor, action, target, outcome, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(actor)
        .bind(action)
        .bind(target)
        .bind(outcome)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Shared tail of `complete_item`/`fail_item`: recompute job counters and
/// status from the job_items table, inside the caller's transaction.
async fn finalize_item_transition(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    job_id: &str,
    item_completed: bool,
    now: &str,
) -> Result<Job> {
    let job_row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
        .bind(job_id)
        .fetch_one(&mut **tx)
        .await?;
    let mut job = job_from_row(job_row);

    if item_completed {
        job.completed_items += 1;
    } else {
        job.failed_items += 1;
    }
    job.progress = progress_of(job.completed_items, job.failed_items, job.total_items);

    let done = job.completed_items + job.failed_items >= job.total_items;
    if done && !job.status.is_terminal() {
        job.status = if job.failed_items > 0 && job.completed_items == 0 {
            JobStatus::Failed
        } else if job.failed_items > 0 {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };
        job.completed_at = Some(now.to_string());
    }

    sqlx::query(
        "UPDATE jobs SET completed_items = ?, failed_items = ?, progress = ?, status = ?, completed_at = ? WHERE id = ?",
    )
    .bind(job.completed_items)
    .bind(job.failed_items)
    .bind(job.progress)
    .bind(job.status.as_str())
    .bind(&job.completed_at)
    .bind(job_id)
    .execute(&mut **tx)
    .await?;

    Ok(job)
}

fn provider_from_row(row: sqlx::sqlite::SqliteRow) -> Provider {
    let protocols: String = row.get("protocols");
    Provider {
        id: row.get("id"),
        namespace: row.get("namespace"),
        kind: row.get("type"),
        version: row.get("version"),
        platform: row.get("platform"),
        filename: row.get("filename"),
        size_bytes: row.get("size_bytes"),
        shasum: row.get("shasum"),
        storage_key: row.get("storage_key"),
        protocols: protocols.split(',').filter(|s| !s.is_empty()).map(String::from).collect(),
        deprecated: row.get::<i64, _>("deprecated") != 0,
        blocked: row.get::<i64, _>("blocked") != 0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn module_from_row(row: sqlx::sqlite::SqliteRow) -> Module {
    Module {
        id: row.get("id"),
        namespace: row.get("namespace"),
        name: row.get("name"),
        system: row.get("system"),
        version: row.get("version"),
        storage_key: row.get("storage_key"),
        filename: row.get("filename"),
        size_bytes: row.get("size_bytes"),
        source_url: row.get("source_url"),
        deprecated: row.get::<i64, _>("deprecated") != 0,
        blocked: row.get::<i64, _>("blocked") != 0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn job_from_row(row: sqlx::sqlite::SqliteRow) -> Job {
    let kind: String = row.get("kind");
    let status: String = row.get("status");
    Job {
        id: row.get("id"),
        kind: JobKind::parse(&kind).unwrap_or(JobKind::Provider),
        manifest: row.get("manifest"),
        status: JobStatus::parse(&status).unwrap_or(JobStatus::Failed),
        progress: row.get("progress"),
        total_items: row.get("total_items"),
        completed_items: row.get("completed_items"),
        failed_items: row.get("failed_items"),
        error: row.get("error"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
    }
}

fn job_item_from_row(row: sqlx::sqlite::SqliteRow) -> JobItem {
    let status: String = row.get("status");
    JobItem {
        id: row.get("id"),
        job_id: row.get("job_id"),
        namespace: row.get("namespace"),
        item_name: row.get("item_name"),
        system_or_platform: row.get("system_or_platform"),
        version: row.get("version"),
        status: JobItemStatus::parse(&status).unwrap_or(JobItemStatus::Failed),
        retry_count: row.get("retry_count"),
        error: row.get("error"),
        artifact_id: row.get("artifact_id"),
        claimed_by: row.get("claimed_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        not_before: row.get("not_before"),
    }
}

fn session_from_row(row: sqlx::sqlite::SqliteRow) -> Session {
    Session {
        id: row.get("id"),
        subject: row.get("subject"),
        issued_at: row.get("issued_at"),
        expires_at: row.get("expires_at"),
        revoked: row.get::<i64, _>("revoked") != 0,
    }
}
