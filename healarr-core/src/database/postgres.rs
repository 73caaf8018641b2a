//! Postgres implementations of the configuration repositories plus the
//! `ScanRepository` port the Scanner Engine depends on. One `PgPool`,
//! `sqlx::query!`/`query_as` calls, following
//! `ferrex-core::database::postgres`'s single-pool style.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use crate::error::{HealarrError, Result};
use crate::scanner::engine::{FileOutcome, NewScanFile, Scan, ScanFile, ScanRepository, ScanStatus};
use crate::types::{InstanceId, Page, PageMeta, PathId, Pagination};

use super::{
    ArrInstanceRepository, ArrInstanceRow, NewArrInstance, NewScanPath, PendingRescanRepository,
    PendingRescanRow, ScanPathRepository, ScanPathRow, SettingsRepository,
};

#[derive(Clone)]
pub struct PostgresPool(pub PgPool);

impl PostgresPool {
    pub fn new(pool: PgPool) -> Self {
        Self(pool)
    }
}

fn outcome_str(outcome: FileOutcome) -> &'static str {
    match outcome {
        FileOutcome::Healthy => "healthy",
        FileOutcome::Corrupt => "corrupt",
        FileOutcome::Inaccessible => "inaccessible",
        FileOutcome::Skipped => "skipped",
    }
}

fn parse_outcome(raw: &str) -> FileOutcome {
    match raw {
        "corrupt" => FileOutcome::Corrupt,
        "skipped" => FileOutcome::Skipped,
        "inaccessible" => FileOutcome::Inaccessible,
        _ => FileOutcome::Healthy,
    }
}

fn status_str(status: ScanStatus) -> &'static str {
    match status {
        ScanStatus::Running => "running",
        ScanStatus::Paused => "paused",
        ScanStatus::Completed => "completed",
        ScanStatus::Failed => "failed",
        ScanStatus::Cancelled => "cancelled",
    }
}

fn parse_status(raw: &str) -> ScanStatus {
    match raw {
        "paused" => ScanStatus::Paused,
        "completed" => ScanStatus::Completed,
        "failed" => ScanStatus::Failed,
        "cancelled" => ScanStatus::Cancelled,
        _ => ScanStatus::Running,
    }
}

#[derive(sqlx::FromRow)]
struct ScanRecord {
    id: i64,
    path_id: Option<i64>,
    local_path: String,
    status: String,
    total_files: i64,
    current_file_index: i64,
    files_scanned: i64,
    corruptions_found: i64,
    truncated: bool,
    cause: Option<String>,
    started_at: chrono::DateTime<Utc>,
    finished_at: Option<chrono::DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct ScanFileRecord {
    id: i64,
    scan_id: i64,
    file_path: String,
    outcome: String,
    corruption_type: Option<String>,
    details: Option<String>,
    observed_at: chrono::DateTime<Utc>,
}

impl From<ScanFileRecord> for ScanFile {
    fn from(r: ScanFileRecord) -> Self {
        ScanFile {
            id: r.id,
            scan_id: r.scan_id,
            file_path: r.file_path,
            outcome: parse_outcome(&r.outcome),
            corruption_type: r.corruption_type,
            details: r.details,
            observed_at: r.observed_at,
        }
    }
}

impl From<ScanRecord> for Scan {
    fn from(r: ScanRecord) -> Self {
        Scan {
            id: r.id,
            path_id: r.path_id,
            local_path: r.local_path,
            status: parse_status(&r.status),
            total_files: r.total_files,
            current_file_index: r.current_file_index,
            files_scanned: r.files_scanned,
            corruptions_found: r.corruptions_found,
            truncated: r.truncated,
            cause: r.cause,
            started_at: r.started_at,
            finished_at: r.finished_at,
        }
    }
}

#[async_trait]
impl ScanRepository for PostgresPool {
    async fn create_scan(&self, path_id: Option<i64>, local_path: &str) -> Result<Scan> {
        let record = sqlx::query_as::<_, ScanRecord>(
            r#"
            INSERT INTO scans (path_id, local_path, status)
            VALUES ($1, $2, 'running')
            RETURNING id, path_id, local_path, status, total_files, current_file_index,
                      files_scanned, corruptions_found, truncated, cause, started_at, finished_at
            "#,
        )
        .bind(path_id)
        .bind(local_path)
        .fetch_one(&self.0)
        .await
        .map_err(|e| HealarrError::store_unavailable(e.to_string()))?;

        Ok(record.into())
    }

    async fn update_scan(&self, scan: &Scan) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scans SET
                status = $2, total_files = $3, current_file_index = $4,
                files_scanned = $5, corruptions_found = $6, truncated = $7,
                cause = $8, finished_at = $9
            WHERE id = $1
            "#,
        )
        .bind(scan.id)
        .bind(status_str(scan.status))
        .bind(scan.total_files)
        .bind(scan.current_file_index)
        .bind(scan.files_scanned)
        .bind(scan.corruptions_found)
        .bind(scan.truncated)
        .bind(&scan.cause)
        .bind(scan.finished_at)
        .execute(&self.0)
        .await?;
        Ok(())
    }

    async fn get_scan(&self, id: i64) -> Result<Option<Scan>> {
        let record = sqlx::query_as::<_, ScanRecord>(
            r#"
            SELECT id, path_id, local_path, status, total_files, current_file_index,
                   files_scanned, corruptions_found, truncated, cause, started_at, finished_at
            FROM scans WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.0)
        .await?;
        Ok(record.map(Into::into))
    }

    async fn record_file(&self, scan_id: i64, file: NewScanFile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scan_files (scan_id, file_path, outcome, corruption_type, details)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(scan_id)
        .bind(&file.file_path)
        .bind(outcome_str(file.outcome))
        .bind(&file.corruption_type)
        .bind(&file.details)
        .execute(&self.0)
        .await?;
        Ok(())
    }

    async fn is_path_running(&self, local_path: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM scans WHERE local_path = $1 AND status = 'running'",
        )
        .bind(local_path)
        .fetch_one(&self.0)
        .await?;
        Ok(count > 0)
    }

    async fn mark_dangling_running_scans_interrupted(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE scans SET status = 'failed', cause = 'interrupted', finished_at = now()
            WHERE status = 'running'
            "#,
        )
        .execute(&self.0)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_scans(
        &self,
        order_by_column: &str,
        ascending: bool,
        pagination: Pagination,
    ) -> Result<Page<Scan>> {
        let direction = if ascending { "ASC" } else { "DESC" };
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scans")
            .fetch_one(&self.0)
            .await?;

        let query = format!(
            r#"
            SELECT id, path_id, local_path, status, total_files, current_file_index,
                   files_scanned, corruptions_found, truncated, cause, started_at, finished_at
            FROM scans ORDER BY {order_by_column} {direction}
            LIMIT $1 OFFSET $2
            "#
        );
        let records = sqlx::query_as::<_, ScanRecord>(&query)
            .bind(pagination.limit as i64)
            .bind(pagination.offset())
            .fetch_all(&self.0)
            .await?;

        Ok(Page {
            data: records.into_iter().map(Into::into).collect(),
            pagination: PageMeta::new(pagination, total),
        })
    }

    async fn list_scan_files(
        &self,
        scan_id: i64,
        outcome_filter: Option<FileOutcome>,
        pagination: Pagination,
    ) -> Result<Page<ScanFile>> {
        let outcome_bind = outcome_filter.map(outcome_str);

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM scan_files
            WHERE scan_id = $1 AND ($2::text IS NULL OR outcome = $2)
            "#,
        )
        .bind(scan_id)
        .bind(&outcome_bind)
        .fetch_one(&self.0)
        .await?;

        let records = sqlx::query_as::<_, ScanFileRecord>(
            r#"
            SELECT id, scan_id, file_path, outcome, corruption_type, details, observed_at
            FROM scan_files
            WHERE scan_id = $1 AND ($2::text IS NULL OR outcome = $2)
            ORDER BY observed_at ASC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(scan_id)
        .bind(&outcome_bind)
        .bind(pagination.limit as i64)
        .bind(pagination.offset())
        .fetch_all(&self.0)
        .await?;

        Ok(Page {
            data: records.into_iter().map(Into::into).collect(),
            pagination: PageMeta::new(pagination, total),
        })
    }
}

#[async_trait]
impl ScanPathRepository for PostgresPool {
    async fn create(&self, input: NewScanPath) -> Result<ScanPathRow> {
        let row = sqlx::query_as::<_, ScanPathRow>(
            r#"
            INSERT INTO scan_paths
                (local_path, external_path, instance_id, enabled, auto_remediate,
                 detection_method, detection_mode, detector_args, max_retries,
                 verification_timeout_hours)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id, local_path, external_path, instance_id, enabled, auto_remediate,
                      detection_method, detection_mode, detector_args, max_retries,
                      verification_timeout_hours, created_at, updated_at
            "#,
        )
        .bind(&input.local_path)
        .bind(&input.external_path)
        .bind(input.instance_id)
        .bind(input.enabled)
        .bind(input.auto_remediate)
        .bind(&input.detection_method)
        .bind(&input.detection_mode)
        .bind(&input.detector_args)
        .bind(input.max_retries)
        .bind(input.verification_timeout_hours)
        .fetch_one(&self.0)
        .await?;
        Ok(row)
    }

    async fn get(&self, id: PathId) -> Result<Option<ScanPathRow>> {
        let row = sqlx::query_as::<_, ScanPathRow>(
            r#"
            SELECT id, local_path, external_path, instance_id, enabled, auto_remediate,
                   detection_method, detection_mode, detector_args, max_retries,
                   verification_timeout_hours, created_at, updated_at
            FROM scan_paths WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.0)
        .await?;
        Ok(row)
    }

    async fn list(&self) -> Result<Vec<ScanPathRow>> {
        let rows = sqlx::query_as::<_, ScanPathRow>(
            r#"
            SELECT id, local_path, external_path, instance_id, enabled, auto_remediate,
                   detection_method, detection_mode, detector_args, max_retries,
                   verification_timeout_hours, created_at, updated_at
            FROM scan_paths ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.0)
        .await?;
        Ok(rows)
    }

    async fn list_enabled(&self) -> Result<Vec<ScanPathRow>> {
        let rows = sqlx::query_as::<_, ScanPathRow>(
            r#"
            SELECT id, local_path, external_path, instance_id, enabled, auto_remediate,
                   detection_method, detection_mode, detector_args, max_retries,
                   verification_timeout_hours, created_at, updated_at
            FROM scan_paths WHERE enabled = true ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.0)
        .await?;
        Ok(rows)
    }

    async fn delete(&self, id: PathId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM scan_paths WHERE id = $1")
            .bind(id)
            .execute(&self.0)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ArrInstanceRepository for PostgresPool {
    async fn create(&self, input: NewArrInstance) -> Result<ArrInstanceRow> {
        let row = sqlx::query_as::<_, ArrInstanceRow>(
            r#"
            INSERT INTO arr_instances (name, kind, base_url, api_key_encrypted, enabled)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, kind, base_url, api_key_encrypted, enabled, created_at, updated_at
            "#,
        )
        .bind(&input.name)
        .bind(&input.kind)
        .bind(&input.base_url)
        .bind(&input.api_key_encrypted)
        .bind(input.enabled)
        .fetch_one(&self.0)
        .await?;
        Ok(row)
    }

    async fn get(&self, id: InstanceId) -> Result<Option<ArrInstanceRow>> {
        let row = sqlx::query_as::<_, ArrInstanceRow>(
            r#"
            SELECT id, name, kind, base_url, api_key_encrypted, enabled, created_at, updated_at
            FROM arr_instances WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.0)
        .await?;
        Ok(row)
    }

    async fn list(&self) -> Result<Vec<ArrInstanceRow>> {
        let rows = sqlx::query_as::<_, ArrInstanceRow>(
            r#"
            SELECT id, name, kind, base_url, api_key_encrypted, enabled, created_at, updated_at
            FROM arr_instances ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.0)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl SettingsRepository for PostgresPool {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let value: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT value FROM settings WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.0)
                .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at) VALUES ($1, $2, now())
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.0)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PendingRescanRepository for PostgresPool {
    async fn schedule(
        &self,
        aggregate_id: &str,
        file_path: &str,
        reason: &str,
        at: chrono::DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_rescans (aggregate_id, file_path, reason, scheduled_for)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(aggregate_id)
        .bind(file_path)
        .bind(reason)
        .bind(at)
        .execute(&self.0)
        .await?;
        Ok(())
    }

    async fn due(&self, now: chrono::DateTime<Utc>) -> Result<Vec<PendingRescanRow>> {
        let rows = sqlx::query_as::<_, PendingRescanRow>(
            r#"
            SELECT id, aggregate_id, file_path, reason, scheduled_for, created_at
            FROM pending_rescans WHERE scheduled_for <= $1 ORDER BY scheduled_for ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.0)
        .await?;
        Ok(rows)
    }

    async fn remove(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM pending_rescans WHERE id = $1")
            .bind(id)
            .execute(&self.0)
            .await?;
        Ok(())
    }
}

/// Embedded migration set, shared between `run_migrations` (startup) and
/// `#[sqlx::test(migrator = "healarr_core::database::postgres::MIGRATOR")]`
/// in integration tests, so tests run against the exact schema the server
/// ships rather than a hand-maintained fixture copy.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Runs embedded migrations against `pool` (spec §6). Called once from
/// `healarr-server::main` at startup.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| HealarrError::Internal(format!("migration failed: {e}")))
}
