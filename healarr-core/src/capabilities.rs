//! Capability interfaces (spec §1, §6): collaborators the core depends on
//! through a trait boundary rather than a concrete implementation, so the
//! HTTP surface and scheduler wrapper can bind whatever is appropriate for a
//! given deployment without the core knowing about it.
//!
//! `TelemetryLogger` wraps structured `tracing` events for the few call
//! sites the spec calls out as pluggable (scan lifecycle, remediation
//! lifecycle); most logging in this crate is a direct `tracing::info!`/
//! `warn!`/`error!` call, matching the teacher's own mix of direct macro use
//! and the occasional trait-wrapped logger.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Structured lifecycle logging for scan and remediation events. A thin
/// trait over `tracing` so call sites that want to be testable against a
/// fake logger don't need a live subscriber.
pub trait TelemetryLogger: Send + Sync {
    fn scan_started(&self, scan_id: i64, path: &str);
    fn scan_finished(&self, scan_id: i64, status: &str, files_scanned: i64, corruptions_found: i64);
    fn remediation_event(&self, aggregate_id: &str, event_type: &str);
}

/// Default implementation: plain `tracing` calls at the density used
/// throughout the scanner and aggregate modules.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetryLogger;

impl TelemetryLogger for TracingTelemetryLogger {
    fn scan_started(&self, scan_id: i64, path: &str) {
        tracing::info!(scan_id, path, "scan started");
    }

    fn scan_finished(&self, scan_id: i64, status: &str, files_scanned: i64, corruptions_found: i64) {
        tracing::info!(
            scan_id,
            status,
            files_scanned,
            corruptions_found,
            "scan finished"
        );
    }

    fn remediation_event(&self, aggregate_id: &str, event_type: &str) {
        tracing::info!(aggregate_id, event_type, "remediation event");
    }
}

/// Symmetric encryption of secrets at rest — arr-instance API keys, any
/// other credential the `settings`/`arr_instances` tables hold. Backed by
/// AES-256-GCM with a key sourced from configuration; zeroized on drop.
pub trait CredentialStore: Send + Sync {
    /// Encrypts `plaintext`, returning a value safe to persist (base64 of
    /// nonce||ciphertext).
    fn encrypt(&self, plaintext: &str) -> Result<String>;

    /// Decrypts a value previously produced by `encrypt`.
    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}

/// Validates the four auth sources of spec §4.9, in priority order, and
/// returns the caller identity (or rejects). Implemented at the server
/// boundary because it needs the decrypted stored key; the core only
/// defines the contract and the constant-time comparison helper.
#[async_trait]
pub trait HttpAuthenticator: Send + Sync {
    async fn authenticate(&self, presented_key: &str) -> Result<bool>;
}

/// Constant-time-at-the-length-of-the-stored-key comparison (spec §4.9).
/// `constant_time_eq` only guarantees constant time when both slices are
/// the same length; comparing against the stored key's length first keeps
/// the short-circuit itself independent of the presented key's content.
pub fn constant_time_key_eq(stored: &str, presented: &str) -> bool {
    if stored.len() != presented.len() {
        return false;
    }
    constant_time_eq::constant_time_eq(stored.as_bytes(), presented.as_bytes())
}

/// Out-of-band notifications — `SystemHealthDegraded` and friends (spec
/// §7). A no-op implementation ships by default: binding a real sink is
/// optional ("if a notifier is bound").
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, kind: &str, payload: Value) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotificationSink;

#[async_trait]
impl NotificationSink for NoopNotificationSink {
    async fn notify(&self, _kind: &str, _payload: Value) -> Result<()> {
        Ok(())
    }
}

/// Out-of-scope collaborator: the cron-driven scheduler wrapper (spec §1,
/// §2, §6) is referenced only as this one-method interface. No cron
/// runtime lives in this crate; whoever binds a `ScanTrigger` owns the
/// timer.
#[async_trait]
pub trait ScanTrigger: Send + Sync {
    async fn trigger(&self, path_id: crate::types::PathId) -> Result<()>;
}
