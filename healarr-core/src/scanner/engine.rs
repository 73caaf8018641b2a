//! Scan orchestration (spec §4.4): turns a scan-path or single-file request
//! into a `Scan` record plus a ledger of per-file outcomes, dispatching to
//! the Detector Adapter and publishing `CorruptionDetected` into the event
//! stream. Concurrency follows `ferrex_core`'s async/Tokio-first style: a
//! bounded `mpsc` channel hands paths from the walker to a
//! `Semaphore`-bounded worker pool.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{mpsc, Notify, RwLock};
use tracing::{error, info, warn};

use crate::aggregate::derive_aggregate_id;
use crate::detector::{detector_for, DetectionMethod, DetectionMode, DetectionOutcome, DetectorConfig};
use crate::error::{HealarrError, Result};
use crate::events::bus::InProcessEventBus;
use crate::events::store::EventStore;
use crate::events::{AggregateType, Event, EventType, NewEvent};
use crate::types::{Page, PageMeta, Pagination};

use super::walk::walk_media_files;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOutcome {
    Healthy,
    Corrupt,
    Inaccessible,
    Skipped,
}

/// Persisted scan record (spec §6 `scans` table). `id` is assigned by the
/// repository on creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    pub id: i64,
    pub path_id: Option<i64>,
    pub local_path: String,
    pub status: ScanStatus,
    pub total_files: i64,
    pub current_file_index: i64,
    pub files_scanned: i64,
    pub corruptions_found: i64,
    pub truncated: bool,
    pub cause: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// One ledger row per file visited (spec §6 `scan_files` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanFile {
    pub id: i64,
    pub scan_id: i64,
    pub file_path: String,
    pub outcome: FileOutcome,
    pub corruption_type: Option<String>,
    pub details: Option<String>,
    pub observed_at: DateTime<Utc>,
}

/// Repository boundary for scan/scan_files persistence (mirrors the
/// `EventStore` trait split: the engine depends on the port, the Postgres
/// implementation lives in `crate::database`).
#[async_trait]
pub trait ScanRepository: Send + Sync {
    async fn create_scan(&self, path_id: Option<i64>, local_path: &str) -> Result<Scan>;
    async fn update_scan(&self, scan: &Scan) -> Result<()>;
    async fn get_scan(&self, id: i64) -> Result<Option<Scan>>;
    async fn record_file(&self, scan_id: i64, file: NewScanFile) -> Result<()>;
    async fn is_path_running(&self, local_path: &str) -> Result<bool>;
    async fn mark_dangling_running_scans_interrupted(&self) -> Result<u64>;
    /// `order_by_column` must come from a `'static` allowlist (spec P5); the
    /// repository trusts its caller to have already run it through
    /// `query::safe_order_by`.
    async fn list_scans(
        &self,
        order_by_column: &str,
        ascending: bool,
        pagination: Pagination,
    ) -> Result<Page<Scan>>;
    async fn list_scan_files(
        &self,
        scan_id: i64,
        outcome_filter: Option<FileOutcome>,
        pagination: Pagination,
    ) -> Result<Page<ScanFile>>;
}

#[derive(Debug, Clone)]
pub struct NewScanFile {
    pub file_path: String,
    pub outcome: FileOutcome,
    pub corruption_type: Option<String>,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanProgress {
    pub id: i64,
    pub path: String,
    pub status: ScanStatus,
    pub total_files: i64,
    pub current_file_index: i64,
    pub files_scanned: i64,
    pub corruptions_found: i64,
    pub started_at: DateTime<Utc>,
}

/// Per-scan control state shared between the dispatcher task and the
/// `Pause/Resume/Cancel` public API. `Notify` wakes workers parked at the
/// pause boundary; it is not a channel, so no message can be "missed"
/// between a waiter registering interest and being notified.
struct ScanControl {
    path: String,
    cancelled: AtomicBool,
    paused: AtomicBool,
    resume_notify: Notify,
    total_files: AtomicI64,
    current_file_index: AtomicI64,
    files_scanned: AtomicI64,
    corruptions_found: AtomicI64,
    started_at: DateTime<Utc>,
}

impl ScanControl {
    fn snapshot(&self, scan_id: i64, status: ScanStatus) -> ScanProgress {
        ScanProgress {
            id: scan_id,
            path: self.path.clone(),
            status,
            total_files: self.total_files.load(Ordering::Relaxed),
            current_file_index: self.current_file_index.load(Ordering::Relaxed),
            files_scanned: self.files_scanned.load(Ordering::Relaxed),
            corruptions_found: self.corruptions_found.load(Ordering::Relaxed),
            started_at: self.started_at,
        }
    }

    /// Blocks the caller until unpaused or cancelled (spec §4.4, §9: pause
    /// is cooperative, checked at the file boundary; in-flight detector
    /// calls are never interrupted).
    async fn wait_if_paused(&self) {
        while self.paused.load(Ordering::Acquire) && !self.cancelled.load(Ordering::Acquire) {
            self.resume_notify.notified().await;
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

struct ActiveScan {
    scan_id: i64,
    control: Arc<ScanControl>,
}

/// Registry of in-flight scans (spec §4.4 `IsPathBeingScanned`,
/// `GetActiveScans`). Mirrors `ferrex_core`'s pattern of small state behind
/// an `RwLock` rather than a global mutex guarding everything.
#[derive(Default)]
struct ScanRegistry {
    by_id: RwLock<HashMap<i64, ActiveScan>>,
}

impl ScanRegistry {
    async fn register(&self, scan_id: i64, control: Arc<ScanControl>) {
        self.by_id
            .write()
            .await
            .insert(scan_id, ActiveScan { scan_id, control });
    }

    async fn unregister(&self, scan_id: i64) {
        self.by_id.write().await.remove(&scan_id);
    }

    async fn is_path_running(&self, local_path: &str) -> bool {
        self.by_id
            .read()
            .await
            .values()
            .any(|s| s.control.path == local_path)
    }

    async fn snapshot_all(&self) -> Vec<ScanProgress> {
        self.by_id
            .read()
            .await
            .values()
            .map(|s| s.control.snapshot(s.scan_id, ScanStatus::Running))
            .collect()
    }

    async fn get(&self, scan_id: i64) -> Option<Arc<ScanControl>> {
        self.by_id.read().await.get(&scan_id).map(|s| s.control.clone())
    }

    async fn all_ids(&self) -> Vec<i64> {
        self.by_id.read().await.keys().copied().collect()
    }
}

/// How many files a single scan's worker pool processes concurrently.
const DEFAULT_WORKER_CONCURRENCY: usize = 4;
/// Depth of the walker→worker path channel; bounds how far the walker can
/// run ahead of the slowest worker.
const WALK_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct ScanEngineConfig {
    pub worker_concurrency: usize,
    pub detection_method: DetectionMethod,
    pub detection_mode: DetectionMode,
    pub max_files: Option<usize>,
}

impl Default for ScanEngineConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
            detection_method: DetectionMethod::Ffprobe,
            detection_mode: DetectionMode::Quick,
            max_files: None,
        }
    }
}

pub struct ScanEngine {
    repo: Arc<dyn ScanRepository>,
    event_store: Arc<dyn EventStore>,
    bus: InProcessEventBus,
    config: ScanEngineConfig,
    registry: Arc<ScanRegistry>,
}

impl ScanEngine {
    pub fn new(
        repo: Arc<dyn ScanRepository>,
        event_store: Arc<dyn EventStore>,
        bus: InProcessEventBus,
        config: ScanEngineConfig,
    ) -> Self {
        Self {
            repo,
            event_store,
            bus,
            config,
            registry: Arc::new(ScanRegistry::default()),
        }
    }

    /// At server startup: any `scans` row left `running` by an unclean
    /// shutdown is finalised as `failed`/`interrupted` (spec §4.4, §7).
    pub async fn recover_interrupted_scans(&self) -> Result<u64> {
        let count = self.repo.mark_dangling_running_scans_interrupted().await?;
        if count > 0 {
            warn!(count, "marked dangling running scans as interrupted");
        }
        Ok(count)
    }

    pub async fn is_path_being_scanned(&self, local_path: &str) -> Result<bool> {
        if self.registry.is_path_running(local_path).await {
            return Ok(true);
        }
        self.repo.is_path_running(local_path).await
    }

    pub async fn get_active_scans(&self) -> Vec<ScanProgress> {
        self.registry.snapshot_all().await
    }

    pub async fn pause_scan(&self, scan_id: i64) -> Result<()> {
        let control = self
            .registry
            .get(scan_id)
            .await
            .ok_or_else(|| HealarrError::NotFound(format!("scan {scan_id} is not active")))?;
        control.paused.store(true, Ordering::Release);
        Ok(())
    }

    pub async fn resume_scan(&self, scan_id: i64) -> Result<()> {
        let control = self
            .registry
            .get(scan_id)
            .await
            .ok_or_else(|| HealarrError::NotFound(format!("scan {scan_id} is not active")))?;
        control.paused.store(false, Ordering::Release);
        control.resume_notify.notify_waiters();
        Ok(())
    }

    pub async fn cancel_scan(&self, scan_id: i64) -> Result<()> {
        let control = self
            .registry
            .get(scan_id)
            .await
            .ok_or_else(|| HealarrError::NotFound(format!("scan {scan_id} is not active")))?;
        control.cancelled.store(true, Ordering::Release);
        control.paused.store(false, Ordering::Release);
        control.resume_notify.notify_waiters();
        Ok(())
    }

    pub async fn pause_all(&self) -> Result<usize> {
        let ids = self.registry.all_ids().await;
        for id in &ids {
            let _ = self.pause_scan(*id).await;
        }
        Ok(ids.len())
    }

    pub async fn resume_all(&self) -> Result<usize> {
        let ids = self.registry.all_ids().await;
        for id in &ids {
            let _ = self.resume_scan(*id).await;
        }
        Ok(ids.len())
    }

    pub async fn cancel_all(&self) -> Result<usize> {
        let ids = self.registry.all_ids().await;
        for id in &ids {
            let _ = self.cancel_scan(*id).await;
        }
        Ok(ids.len())
    }

    /// Scans a directory root. Returns once the scan has reached a terminal
    /// status (spec §4.4: `completed`, `failed`, or `cancelled`).
    pub async fn scan_path(&self, path_id: Option<i64>, local_path: &str) -> Result<Scan> {
        if self.is_path_being_scanned(local_path).await? {
            return Err(HealarrError::Conflict(format!(
                "a scan of {local_path} is already running"
            )));
        }

        let root = PathBuf::from(local_path);
        if !root.exists() || !root.is_dir() {
            return Err(HealarrError::InvalidRequest(format!(
                "{local_path} is not a readable directory"
            )));
        }

        let mut scan = self.repo.create_scan(path_id, local_path).await?;
        let control = Arc::new(ScanControl {
            path: local_path.to_string(),
            cancelled: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            resume_notify: Notify::new(),
            total_files: AtomicI64::new(0),
            current_file_index: AtomicI64::new(0),
            files_scanned: AtomicI64::new(0),
            corruptions_found: AtomicI64::new(0),
            started_at: scan.started_at,
        });
        self.registry.register(scan.id, control.clone()).await;

        let result = self.run_scan(&root, path_id, &mut scan, &control).await;
        self.registry.unregister(scan.id).await;

        match result {
            Ok(()) => {}
            Err(e) => {
                error!(scan_id = scan.id, error = %e, "scan failed");
                scan.status = ScanStatus::Failed;
                scan.cause = Some(e.to_string());
            }
        }
        scan.finished_at = Some(Utc::now());
        self.repo.update_scan(&scan).await?;
        Ok(scan)
    }

    /// Fire-and-forget variant used by the HTTP surface (spec §6
    /// `POST /api/scans` returns 202 before the walk finishes): performs the
    /// same conflict/validity checks and record creation as `scan_path`
    /// synchronously, then hands the walk+detect work to a background task
    /// so the caller can respond with the freshly created `Scan` row
    /// immediately. Requires the engine to be held in an `Arc` so the
    /// spawned task can outlive the request.
    pub async fn start_scan(self: &Arc<Self>, path_id: Option<i64>, local_path: &str) -> Result<Scan> {
        if self.is_path_being_scanned(local_path).await? {
            return Err(HealarrError::Conflict(format!(
                "a scan of {local_path} is already running"
            )));
        }

        let root = PathBuf::from(local_path);
        if !root.exists() || !root.is_dir() {
            return Err(HealarrError::InvalidRequest(format!(
                "{local_path} is not a readable directory"
            )));
        }

        let scan = self.repo.create_scan(path_id, local_path).await?;
        let control = Arc::new(ScanControl {
            path: local_path.to_string(),
            cancelled: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            resume_notify: Notify::new(),
            total_files: AtomicI64::new(0),
            current_file_index: AtomicI64::new(0),
            files_scanned: AtomicI64::new(0),
            corruptions_found: AtomicI64::new(0),
            started_at: scan.started_at,
        });
        self.registry.register(scan.id, control.clone()).await;

        let engine = self.clone();
        let mut background_scan = scan.clone();
        tokio::spawn(async move {
            let result = engine.run_scan(&root, path_id, &mut background_scan, &control).await;
            engine.registry.unregister(background_scan.id).await;
            match result {
                Ok(()) => {}
                Err(e) => {
                    error!(scan_id = background_scan.id, error = %e, "scan failed");
                    background_scan.status = ScanStatus::Failed;
                    background_scan.cause = Some(e.to_string());
                }
            }
            background_scan.finished_at = Some(Utc::now());
            if let Err(e) = engine.repo.update_scan(&background_scan).await {
                error!(scan_id = background_scan.id, error = %e, "failed to persist final scan state");
            }
        });

        Ok(scan)
    }

    /// Single-file variant used by webhooks (spec §4.4 `ScanFile`). Not
    /// tracked in the active-scan registry: it is not a directory scan and
    /// completes too quickly to be pausable or cancellable.
    pub async fn scan_file(&self, path: &Path) -> Result<Option<FileOutcome>> {
        if !super::walk::is_media_file(path) {
            return Ok(None);
        }
        let scan = self
            .repo
            .create_scan(None, &path.to_string_lossy())
            .await?;
        let outcome = self.detect_and_record(scan.id, path).await?;
        let mut scan = scan;
        scan.status = ScanStatus::Completed;
        scan.files_scanned = 1;
        scan.total_files = 1;
        scan.finished_at = Some(Utc::now());
        self.repo.update_scan(&scan).await?;
        Ok(Some(outcome))
    }

    async fn run_scan(
        &self,
        root: &Path,
        path_id: Option<i64>,
        scan: &mut Scan,
        control: &Arc<ScanControl>,
    ) -> Result<()> {
        let walk = walk_media_files(root, self.config.max_files);
        scan.total_files = walk.files.len() as i64;
        scan.truncated = walk.truncated;
        control
            .total_files
            .store(scan.total_files, Ordering::Relaxed);

        let (tx, rx) = mpsc::channel::<PathBuf>(WALK_CHANNEL_CAPACITY);
        // The walker feed must run concurrently with the worker pool, not
        // before it: once `walk.files` exceeds `WALK_CHANNEL_CAPACITY`, a
        // synchronous fill-then-spawn-workers ordering deadlocks on the
        // first `send` past capacity, since nothing is draining yet.
        tokio::spawn(async move {
            for file in walk.files {
                if tx.send(file).await.is_err() {
                    break;
                }
            }
        });

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let worker_count = self.config.worker_concurrency.max(1);
        let mut handles = Vec::with_capacity(worker_count);

        for _ in 0..worker_count {
            let rx = rx.clone();
            let control = control.clone();
            let repo = self.repo.clone();
            let event_store = self.event_store.clone();
            let bus = self.bus.clone();
            let method = self.config.detection_method;
            let mode = self.config.detection_mode;
            let scan_id = scan.id;

            handles.push(tokio::spawn(async move {
                let detector = detector_for(method);
                let detector_config = DetectorConfig::new(method, mode);
                loop {
                    control.wait_if_paused().await;
                    if control.is_cancelled() {
                        return Ok::<(), HealarrError>(());
                    }

                    let path = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    let Some(path) = path else {
                        return Ok(());
                    };

                    control.current_file_index.fetch_add(1, Ordering::Relaxed);

                    let outcome_result = detector.check(&path, &detector_config).await;
                    match outcome_result {
                        Ok(outcome) => {
                            record_outcome(
                                &repo,
                                &event_store,
                                &bus,
                                scan_id,
                                path_id,
                                &path,
                                outcome,
                                &control,
                            )
                            .await?;
                        }
                        Err(e) if e.is_fatal_to_scan() => {
                            return Err(HealarrError::Unavailable(e.to_string()));
                        }
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "detector error, continuing scan");
                            repo.record_file(
                                scan_id,
                                NewScanFile {
                                    file_path: path.to_string_lossy().into_owned(),
                                    outcome: FileOutcome::Inaccessible,
                                    corruption_type: None,
                                    details: Some(e.to_string()),
                                },
                            )
                            .await?;
                        }
                    }
                }
            }));
        }

        let mut fatal: Option<HealarrError> = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => fatal = Some(e),
                Err(join_err) => {
                    fatal = Some(HealarrError::Internal(join_err.to_string()));
                }
            }
        }

        scan.files_scanned = control.files_scanned.load(Ordering::Relaxed);
        scan.corruptions_found = control.corruptions_found.load(Ordering::Relaxed);
        scan.current_file_index = control.current_file_index.load(Ordering::Relaxed);

        if let Some(e) = fatal {
            return Err(e);
        }
        if control.is_cancelled() {
            scan.status = ScanStatus::Cancelled;
        } else {
            scan.status = ScanStatus::Completed;
        }
        Ok(())
    }

    async fn detect_and_record(&self, scan_id: i64, path: &Path) -> Result<FileOutcome> {
        let detector = detector_for(self.config.detection_method);
        let config = DetectorConfig::new(self.config.detection_method, self.config.detection_mode);
        let outcome = detector
            .check(path, &config)
            .await
            .map_err(|e| HealarrError::Unavailable(e.to_string()))?;

        let control = Arc::new(ScanControl {
            path: path.to_string_lossy().into_owned(),
            cancelled: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            resume_notify: Notify::new(),
            total_files: AtomicI64::new(1),
            current_file_index: AtomicI64::new(1),
            files_scanned: AtomicI64::new(0),
            corruptions_found: AtomicI64::new(0),
            started_at: Utc::now(),
        });
        record_outcome(
            &self.repo,
            &self.event_store,
            &self.bus,
            scan_id,
            None,
            path,
            outcome.clone(),
            &control,
        )
        .await?;
        Ok(match outcome {
            DetectionOutcome::Healthy => FileOutcome::Healthy,
            DetectionOutcome::Corrupt { .. } => FileOutcome::Corrupt,
            DetectionOutcome::Inaccessible { .. } => FileOutcome::Inaccessible,
            DetectionOutcome::Skipped { .. } => FileOutcome::Skipped,
        })
    }
}

/// Per-file result mapping shared by the directory and single-file paths
/// (spec §4.4): healthy/corrupt both advance `files_scanned`; corrupt also
/// derives the aggregate id and emits `CorruptionDetected`.
async fn record_outcome(
    repo: &Arc<dyn ScanRepository>,
    event_store: &Arc<dyn EventStore>,
    bus: &InProcessEventBus,
    scan_id: i64,
    path_id: Option<i64>,
    path: &Path,
    outcome: DetectionOutcome,
    control: &Arc<ScanControl>,
) -> Result<()> {
    let file_path = path.to_string_lossy().into_owned();

    match outcome {
        DetectionOutcome::Healthy => {
            repo.record_file(
                scan_id,
                NewScanFile {
                    file_path,
                    outcome: FileOutcome::Healthy,
                    corruption_type: None,
                    details: None,
                },
            )
            .await?;
            control.files_scanned.fetch_add(1, Ordering::Relaxed);
        }
        DetectionOutcome::Corrupt {
            corruption_type,
            details,
        } => {
            repo.record_file(
                scan_id,
                NewScanFile {
                    file_path: file_path.clone(),
                    outcome: FileOutcome::Corrupt,
                    corruption_type: Some(corruption_type.clone()),
                    details: Some(details.clone()),
                },
            )
            .await?;
            control.files_scanned.fetch_add(1, Ordering::Relaxed);
            control.corruptions_found.fetch_add(1, Ordering::Relaxed);

            let size = tokio::fs::metadata(path)
                .await
                .map(|m| m.len())
                .unwrap_or(0);
            let aggregate_id = derive_aggregate_id(path);
            let payload = json!({
                "file_path": file_path,
                "path_id": path_id,
                "corruption_type": corruption_type,
                "size": size,
            });
            let new_event = NewEvent::new(
                AggregateType::Corruption,
                aggregate_id.clone(),
                EventType::CorruptionDetected,
                payload.clone(),
            );

            // (P9) the event is only observable on the bus once `append` has
            // returned to the publisher.
            match event_store.append(new_event).await {
                Ok(id) => {
                    let event = Event {
                        id,
                        aggregate_type: AggregateType::Corruption.as_str().to_string(),
                        aggregate_id,
                        event_type: EventType::CorruptionDetected.as_str().to_string(),
                        payload,
                        version: 1,
                        created_at: Utc::now(),
                        actor_id: None,
                    };
                    // scan_files/scans updates above already happened; the
                    // final scan record reflects reality even if this
                    // publish step, or the bus itself, fails (spec §4.4).
                    if let Err(e) = bus.publish(event).await {
                        warn!(error = %e, "failed to publish CorruptionDetected");
                    }
                }
                Err(e) => {
                    error!(error = %e, "failed to append CorruptionDetected event");
                }
            }
        }
        DetectionOutcome::Inaccessible { reason } | DetectionOutcome::Skipped { reason } => {
            repo.record_file(
                scan_id,
                NewScanFile {
                    file_path,
                    outcome: FileOutcome::Inaccessible,
                    corruption_type: None,
                    details: Some(reason),
                },
            )
            .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;
    use tokio::sync::Mutex as AsyncMutex;

    use crate::events::store::EventFilter;
    use crate::types::{Page, PageMeta, Pagination};

    #[derive(Default)]
    struct InMemoryScanRepo {
        scans: AsyncMutex<HashMap<i64, Scan>>,
        next_id: StdMutex<i64>,
        files: AsyncMutex<Vec<(i64, NewScanFile)>>,
    }

    #[derive(Default)]
    struct NoopEventStore {
        next_id: StdMutex<i64>,
    }

    #[async_trait]
    impl EventStore for NoopEventStore {
        async fn append(&self, _event: NewEvent) -> Result<i64> {
            let mut next_id = self.next_id.lock().unwrap();
            *next_id += 1;
            Ok(*next_id)
        }

        async fn history(&self, _aggregate_id: &crate::types::AggregateId) -> Result<Vec<Event>> {
            Ok(Vec::new())
        }

        async fn query(&self, _filter: EventFilter, pagination: Pagination) -> Result<Page<Event>> {
            Ok(Page {
                data: Vec::new(),
                pagination: PageMeta::new(pagination, 0),
            })
        }

        async fn delete_aggregate(&self, _aggregate_id: &crate::types::AggregateId) -> Result<u64> {
            Ok(0)
        }
    }

    #[async_trait]
    impl ScanRepository for InMemoryScanRepo {
        async fn create_scan(&self, path_id: Option<i64>, local_path: &str) -> Result<Scan> {
            let mut next_id = self.next_id.lock().unwrap();
            *next_id += 1;
            let id = *next_id;
            drop(next_id);

            let scan = Scan {
                id,
                path_id,
                local_path: local_path.to_string(),
                status: ScanStatus::Running,
                total_files: 0,
                current_file_index: 0,
                files_scanned: 0,
                corruptions_found: 0,
                truncated: false,
                cause: None,
                started_at: Utc::now(),
                finished_at: None,
            };
            self.scans.lock().await.insert(id, scan.clone());
            Ok(scan)
        }

        async fn update_scan(&self, scan: &Scan) -> Result<()> {
            self.scans.lock().await.insert(scan.id, scan.clone());
            Ok(())
        }

        async fn get_scan(&self, id: i64) -> Result<Option<Scan>> {
            Ok(self.scans.lock().await.get(&id).cloned())
        }

        async fn record_file(&self, scan_id: i64, file: NewScanFile) -> Result<()> {
            self.files.lock().await.push((scan_id, file));
            Ok(())
        }

        async fn is_path_running(&self, _local_path: &str) -> Result<bool> {
            Ok(false)
        }

        async fn mark_dangling_running_scans_interrupted(&self) -> Result<u64> {
            let mut scans = self.scans.lock().await;
            let mut count = 0;
            for scan in scans.values_mut() {
                if scan.status == ScanStatus::Running {
                    scan.status = ScanStatus::Failed;
                    scan.cause = Some("interrupted".to_string());
                    count += 1;
                }
            }
            Ok(count)
        }

        async fn list_scans(
            &self,
            _order_by_column: &str,
            _ascending: bool,
            pagination: Pagination,
        ) -> Result<Page<Scan>> {
            let scans = self.scans.lock().await;
            let mut data: Vec<Scan> = scans.values().cloned().collect();
            data.sort_by_key(|s| s.id);
            let total = data.len() as i64;
            Ok(Page {
                data,
                pagination: PageMeta::new(pagination, total),
            })
        }

        async fn list_scan_files(
            &self,
            scan_id: i64,
            _outcome_filter: Option<FileOutcome>,
            pagination: Pagination,
        ) -> Result<Page<ScanFile>> {
            let files = self.files.lock().await;
            let data: Vec<ScanFile> = files
                .iter()
                .filter(|(id, _)| *id == scan_id)
                .enumerate()
                .map(|(i, (_, f))| ScanFile {
                    id: i as i64,
                    scan_id,
                    file_path: f.file_path.clone(),
                    outcome: f.outcome,
                    corruption_type: f.corruption_type.clone(),
                    details: f.details.clone(),
                    observed_at: Utc::now(),
                })
                .collect();
            let total = data.len() as i64;
            Ok(Page {
                data,
                pagination: PageMeta::new(pagination, total),
            })
        }
    }

    #[tokio::test]
    async fn scan_path_completes_and_counts_files() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("a.mkv"), b"data").await.unwrap();
        tokio::fs::write(dir.path().join("b.mkv"), b"").await.unwrap();

        let repo: Arc<dyn ScanRepository> = Arc::new(InMemoryScanRepo::default());
        let event_store: Arc<dyn EventStore> = Arc::new(NoopEventStore::default());
        let bus = InProcessEventBus::new();
        let mut config = ScanEngineConfig::default();
        config.detection_method = DetectionMethod::ZeroByte;
        let engine = ScanEngine::new(repo, event_store, bus, config);

        let scan = engine
            .scan_path(None, dir.path().to_str().unwrap())
            .await
            .unwrap();

        assert_eq!(scan.status, ScanStatus::Completed);
        assert_eq!(scan.files_scanned, 2);
        assert_eq!(scan.corruptions_found, 1);
    }

    #[tokio::test]
    async fn duplicate_concurrent_scan_of_same_path_is_rejected() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("a.mkv"), b"data").await.unwrap();

        let repo: Arc<dyn ScanRepository> = Arc::new(InMemoryScanRepo::default());
        let event_store: Arc<dyn EventStore> = Arc::new(NoopEventStore::default());
        let bus = InProcessEventBus::new();
        let mut config = ScanEngineConfig::default();
        config.detection_method = DetectionMethod::ZeroByte;
        let engine = Arc::new(ScanEngine::new(repo, event_store, bus, config));

        let local_path = dir.path().to_str().unwrap().to_string();
        let engine2 = engine.clone();
        let local_path2 = local_path.clone();

        let first = tokio::spawn(async move { engine2.scan_path(None, &local_path2).await });
        // Give the first scan a chance to register before the second fires.
        tokio::task::yield_now().await;
        let second = engine.scan_path(None, &local_path).await;

        let first = first.await.unwrap();
        assert!(first.is_ok() || matches!(second, Err(HealarrError::Conflict(_))));
    }

    #[tokio::test]
    async fn recover_interrupted_scans_marks_running_rows_failed() {
        let repo = Arc::new(InMemoryScanRepo::default());
        let scan = repo.create_scan(None, "/tv").await.unwrap();
        assert_eq!(scan.status, ScanStatus::Running);

        let event_store: Arc<dyn EventStore> = Arc::new(NoopEventStore::default());
        let bus = InProcessEventBus::new();
        let engine = ScanEngine::new(repo.clone(), event_store, bus, ScanEngineConfig::default());
        let count = engine.recover_interrupted_scans().await.unwrap();
        assert_eq!(count, 1);

        let reloaded = repo.get_scan(scan.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, ScanStatus::Failed);
        assert_eq!(reloaded.cause.as_deref(), Some("interrupted"));
    }

    /// Regression test for the walker-feed/worker-pool ordering: a root with
    /// more files than `WALK_CHANNEL_CAPACITY` must not deadlock the scan on
    /// the walker's `tx.send` once the channel fills up.
    #[tokio::test]
    async fn scan_path_completes_when_file_count_exceeds_channel_capacity() {
        let dir = TempDir::new().unwrap();
        let file_count = WALK_CHANNEL_CAPACITY + 10;
        for i in 0..file_count {
            tokio::fs::write(dir.path().join(format!("f{i}.mkv")), b"data")
                .await
                .unwrap();
        }

        let repo: Arc<dyn ScanRepository> = Arc::new(InMemoryScanRepo::default());
        let event_store: Arc<dyn EventStore> = Arc::new(NoopEventStore::default());
        let bus = InProcessEventBus::new();
        let mut config = ScanEngineConfig::default();
        config.detection_method = DetectionMethod::ZeroByte;
        let engine = ScanEngine::new(repo, event_store, bus, config);

        let scan = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            engine.scan_path(None, dir.path().to_str().unwrap()),
        )
        .await
        .expect("scan_path deadlocked instead of draining past channel capacity")
        .unwrap();

        assert_eq!(scan.status, ScanStatus::Completed);
        assert_eq!(scan.files_scanned, file_count as i64);
    }
}
