//! Persistence ports for the configuration entities of spec §3/§6
//! (`scan_paths`, `arr_instances`, `settings`, `pending_rescans`) plus the
//! Postgres-backed `ScanRepository` the Scanner Engine depends on. Split
//! into small per-entity traits the way `ferrex-core::database::traits`
//! separates concerns, with a single `postgres` module providing the real
//! implementation.

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::detector::{DetectionMethod, DetectionMode};
use crate::error::Result;
use crate::types::{InstanceId, PathId};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScanPathRow {
    pub id: PathId,
    pub local_path: String,
    pub external_path: String,
    pub instance_id: Option<InstanceId>,
    pub enabled: bool,
    pub auto_remediate: bool,
    pub detection_method: String,
    pub detection_mode: String,
    pub detector_args: Option<serde_json::Value>,
    pub max_retries: i32,
    pub verification_timeout_hours: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScanPathRow {
    pub fn detection_method(&self) -> DetectionMethod {
        match self.detection_method.as_str() {
            "mediainfo" => DetectionMethod::MediaInfo,
            "handbrake" => DetectionMethod::HandBrake,
            "zero_byte" => DetectionMethod::ZeroByte,
            _ => DetectionMethod::Ffprobe,
        }
    }

    pub fn detection_mode(&self) -> DetectionMode {
        match self.detection_mode.as_str() {
            "thorough" => DetectionMode::Thorough,
            _ => DetectionMode::Quick,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewScanPath {
    pub local_path: String,
    pub external_path: String,
    pub instance_id: Option<InstanceId>,
    pub enabled: bool,
    pub auto_remediate: bool,
    pub detection_method: String,
    pub detection_mode: String,
    pub detector_args: Option<serde_json::Value>,
    pub max_retries: i32,
    pub verification_timeout_hours: Option<i32>,
}

#[async_trait]
pub trait ScanPathRepository: Send + Sync {
    async fn create(&self, input: NewScanPath) -> Result<ScanPathRow>;
    async fn get(&self, id: PathId) -> Result<Option<ScanPathRow>>;
    async fn list(&self) -> Result<Vec<ScanPathRow>>;
    async fn list_enabled(&self) -> Result<Vec<ScanPathRow>>;
    async fn delete(&self, id: PathId) -> Result<bool>;
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ArrInstanceRow {
    pub id: InstanceId,
    pub name: String,
    pub kind: String,
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key_encrypted: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewArrInstance {
    pub name: String,
    pub kind: String,
    pub base_url: String,
    pub api_key_encrypted: String,
    pub enabled: bool,
}

#[async_trait]
pub trait ArrInstanceRepository: Send + Sync {
    async fn create(&self, input: NewArrInstance) -> Result<ArrInstanceRow>;
    async fn get(&self, id: InstanceId) -> Result<Option<ArrInstanceRow>>;
    async fn list(&self) -> Result<Vec<ArrInstanceRow>>;
}

/// `settings` is a flat key/JSON-value store used for persisted
/// configuration overrides (spec §6 base-path resolution: "env → persisted
/// setting → default").
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;
    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PendingRescanRow {
    pub id: i64,
    pub aggregate_id: String,
    pub file_path: String,
    pub reason: String,
    pub scheduled_for: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// `pending_rescans` backs the verification-timeout and retry-scheduling
/// flow: a row here means "re-examine this aggregate's file at or after
/// `scheduled_for`", consumed by whatever drives the retry loop (the
/// scheduler capability, or a poll loop in `healarr-server`).
#[async_trait]
pub trait PendingRescanRepository: Send + Sync {
    async fn schedule(&self, aggregate_id: &str, file_path: &str, reason: &str, at: DateTime<Utc>) -> Result<()>;
    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<PendingRescanRow>>;
    async fn remove(&self, id: i64) -> Result<()>;
}
